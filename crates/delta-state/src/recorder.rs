//! Write-side state machine: turns a sequence of snapshots into a
//! delta-state byte stream.
//!
//! A recorder moves through a small state machine:
//!
//! ```text
//! Uninitialized --arm()--> Armed --record_state()--> Recording --close()--> Closed
//!                                        |
//!                                        `--(any failure)--> Failed
//! ```
//!
//! `Failed` is terminal: a write or encode failure means the stream is no
//! longer trustworthy, so the recorder refuses further `record_state`
//! calls rather than risk producing a footer that disagrees with what's
//! actually in the stream.

use tracing::{debug, warn};

use ecs_ids::component::ComponentRegistry;

use crate::change_set::{compute_change_set, encode_snapshot};
use crate::component_table::encode_component_table;
use crate::error::{DeltaStateError, Result};
use crate::footer::{encode_footer, encode_trailer, StateTableEntry};
use crate::instrument::size_determination::SizeDeterminationWriteInstrument;
use crate::instrument::WriteInstrument;
use crate::model::{Snapshot, ValueCodecRegistry};
use crate::varint;
use crate::FORMAT_VERSION;

/// Recorder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Uninitialized,
    Armed,
    Recording,
    Failed,
    Closed,
}

/// Controls when the recorder writes an entire snapshot instead of a delta
/// against the previous one. The first state recorded is always entire,
/// regardless of policy, since there is nothing to diff against yet.
#[derive(Debug, Clone, Copy)]
pub enum FlushPolicy {
    /// Write an entire snapshot every `n` states (`n` must be at least 1).
    EveryNStates(u32),
    /// Never write an entire snapshot automatically; the caller requests
    /// one per state via [`DeltaStateRecorder::force_entire_next`].
    Manual,
}

/// Write-side state machine for the delta-state format.
///
/// Takes ownership of each recorded [`Snapshot`] (see [`record_state`](Self::record_state)),
/// since it must keep the most recent one around to diff the next state
/// against.
pub struct DeltaStateRecorder<'a> {
    state: RecorderState,
    instrument: &'a mut dyn WriteInstrument,
    codecs: &'a ValueCodecRegistry,
    component_registry: &'a ComponentRegistry,
    previous: Option<Snapshot>,
    states: Vec<StateTableEntry>,
    flush_policy: FlushPolicy,
    record_elapsed_time: bool,
    elapsed_accum: f64,
    force_entire_next: bool,
}

impl<'a> DeltaStateRecorder<'a> {
    /// Create a recorder writing to `instrument`. `component_registry`
    /// supplies the stable component names written into the session header
    /// (see [`arm`](Self::arm)) so a replayer can resolve this recorder's
    /// raw component ids regardless of its own registration order.
    /// `record_elapsed_time` enables the cumulative-elapsed-seconds column
    /// in the footer, which
    /// [`crate::replayer::DeltaStateReplayer::seek_to_elapsed_seconds`] needs.
    pub fn new(
        instrument: &'a mut dyn WriteInstrument,
        codecs: &'a ValueCodecRegistry,
        component_registry: &'a ComponentRegistry,
        flush_policy: FlushPolicy,
        record_elapsed_time: bool,
    ) -> Self {
        Self {
            state: RecorderState::Uninitialized,
            instrument,
            codecs,
            component_registry,
            previous: None,
            states: Vec::new(),
            flush_policy,
            record_elapsed_time,
            elapsed_accum: 0.0,
            force_entire_next: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Move from `Uninitialized` to `Armed`, writing the session header (the
    /// component name table) and leaving the recorder ready to accept the
    /// first recorded state.
    pub fn arm(&mut self) -> Result<()> {
        if self.state != RecorderState::Uninitialized {
            return Err(DeltaStateError::ChangeSetInternal {
                reason: format!("cannot arm a recorder in state {:?}", self.state),
            });
        }

        let mut probe = SizeDeterminationWriteInstrument::new();
        encode_component_table(self.component_registry, &mut probe)?;
        varint::encode_unsigned(probe.write_size(), self.instrument)?;
        encode_component_table(self.component_registry, self.instrument)?;

        self.state = RecorderState::Armed;
        Ok(())
    }

    /// Force the next call to [`record_state`](Self::record_state) to write
    /// an entire snapshot, even under [`FlushPolicy::EveryNStates`].
    pub fn force_entire_next(&mut self) {
        self.force_entire_next = true;
    }

    /// Record `snapshot` as the next state, `delta_seconds` after the
    /// previous one (ignored if elapsed-time tracking is disabled).
    ///
    /// On success the recorder moves to `Recording`. On failure it moves to
    /// `Failed` and no further states can be recorded.
    pub fn record_state(&mut self, snapshot: Snapshot, delta_seconds: f64) -> Result<()> {
        match self.state {
            RecorderState::Armed | RecorderState::Recording => {}
            other => {
                return Err(DeltaStateError::ChangeSetInternal {
                    reason: format!("cannot record a state in recorder state {other:?}"),
                })
            }
        }

        match self.record_state_inner(snapshot, delta_seconds) {
            Ok(()) => {
                self.state = RecorderState::Recording;
                Ok(())
            }
            Err(err) => {
                self.state = RecorderState::Failed;
                warn!(error = %err, "delta-state recorder failed, no further states can be recorded");
                Err(err)
            }
        }
    }

    fn record_state_inner(&mut self, snapshot: Snapshot, delta_seconds: f64) -> Result<()> {
        let is_first = self.previous.is_none();
        let write_entire = is_first || self.force_entire_next || self.should_flush_entire();
        self.force_entire_next = false;

        let offset = self.instrument.offset();
        if write_entire {
            encode_snapshot(&snapshot, self.instrument, self.codecs)?;
        } else {
            let previous = self
                .previous
                .as_ref()
                .expect("a delta state always follows a recorded previous state");
            let change_set = compute_change_set(previous, &snapshot, self.codecs)?;
            change_set.encode(self.instrument, self.codecs)?;
        }
        let size = self.instrument.offset() - offset;

        if self.record_elapsed_time {
            self.elapsed_accum += delta_seconds;
        }
        debug!(state_index = self.states.len(), write_entire, size, "recorded state");
        self.states.push(StateTableEntry {
            offset,
            size,
            is_entire: write_entire,
            elapsed_seconds: self.record_elapsed_time.then_some(self.elapsed_accum),
        });
        self.previous = Some(snapshot);
        Ok(())
    }

    fn should_flush_entire(&self) -> bool {
        match self.flush_policy {
            FlushPolicy::EveryNStates(n) if n > 0 => self.states.len() as u32 % n == 0,
            FlushPolicy::EveryNStates(_) => false,
            FlushPolicy::Manual => false,
        }
    }

    /// Write the trailing footer and trailer, and flush the instrument.
    /// Consumes the recorder; it cannot be reused afterwards.
    pub fn close(mut self) -> Result<()> {
        match self.state {
            RecorderState::Armed | RecorderState::Recording => {}
            other => {
                return Err(DeltaStateError::ChangeSetInternal {
                    reason: format!("cannot close a recorder in state {other:?}"),
                })
            }
        }
        let footer_size = encode_footer(&self.states, self.instrument)?;
        encode_trailer(footer_size, FORMAT_VERSION, self.instrument)?;
        self.instrument.flush()?;
        self.state = RecorderState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::memory::MemoryWriteInstrument;
    use crate::model::{BincodeCodec, EntityRecord};
    use ecs_ids::component::ComponentRegistry;
    use ecs_ids::entity::EntityAllocator;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    fn codecs() -> (ValueCodecRegistry, ComponentRegistry, ecs_ids::component::ComponentTypeId) {
        let mut registry = ComponentRegistry::new();
        let pos_id = registry.register::<Position>("position");
        let mut codecs = ValueCodecRegistry::new();
        codecs.register(Box::new(BincodeCodec::<Position>::new(pos_id)));
        (codecs, registry, pos_id)
    }

    #[test]
    fn first_state_is_always_entire() {
        let (codecs, registry, pos_id) = codecs();
        let mut w = MemoryWriteInstrument::new();
        let mut recorder = DeltaStateRecorder::new(&mut w, &codecs, &registry, FlushPolicy::Manual, false);
        recorder.arm().unwrap();

        let mut alloc = EntityAllocator::new();
        let entity = alloc.allocate();
        let mut snapshot = Snapshot::new();
        let mut record = EntityRecord::default();
        record.unique.insert(pos_id, Box::new(Position { x: 0.0, y: 0.0 }));
        snapshot.entities.insert(entity, record);

        recorder.record_state(snapshot, 0.0).unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        recorder.close().unwrap();
    }

    #[test]
    fn cannot_record_before_arming() {
        let (codecs, registry, _) = codecs();
        let mut w = MemoryWriteInstrument::new();
        let mut recorder = DeltaStateRecorder::new(&mut w, &codecs, &registry, FlushPolicy::Manual, false);
        assert!(recorder.record_state(Snapshot::new(), 0.0).is_err());
    }

    #[test]
    fn flush_policy_every_n_states_schedules_entire_frames() {
        let (codecs, registry, _) = codecs();
        let mut w = MemoryWriteInstrument::new();
        let mut recorder = DeltaStateRecorder::new(&mut w, &codecs, &registry, FlushPolicy::EveryNStates(2), false);
        recorder.arm().unwrap();
        for _ in 0..4 {
            recorder.record_state(Snapshot::new(), 0.1).unwrap();
        }
        recorder.close().unwrap();
    }

    #[test]
    fn failed_recorder_rejects_further_states() {
        let (codecs, registry, _pos_id) = codecs();
        let mut w = MemoryWriteInstrument::new();
        let mut recorder = DeltaStateRecorder::new(&mut w, &codecs, &registry, FlushPolicy::Manual, false);
        recorder.arm().unwrap();
        recorder.record_state(Snapshot::new(), 0.0).unwrap();

        // Force a failure: reference a component type with no registered codec.
        let mut alloc = EntityAllocator::new();
        let entity = alloc.allocate();
        let mut bad_snapshot = Snapshot::new();
        let mut record = EntityRecord::default();
        let unregistered = ecs_ids::component::ComponentTypeId::from_raw(9999);
        record.unique.insert(unregistered, Box::new(Position { x: 0.0, y: 0.0 }));
        bad_snapshot.entities.insert(entity, record);

        assert!(recorder.record_state(bad_snapshot, 0.0).is_err());
        assert_eq!(recorder.state(), RecorderState::Failed);
        assert!(recorder.record_state(Snapshot::new(), 0.0).is_err());
    }
}
