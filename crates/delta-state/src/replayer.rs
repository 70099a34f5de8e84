//! Read-side state machine: turns a delta-state byte stream back into a
//! sequence of snapshots.
//!
//! Opening a replayer reads the trailer and footer up front, so every
//! state's offset, size, and entire/delta flag are known before any state
//! is actually decoded. Advancing or seeking then only ever touches the
//! states it needs to: advancing one step re-decodes at most one state,
//! and seeking to an arbitrary index replays forward from the nearest
//! preceding entire state rather than from frame zero.

use tracing::debug;

use ecs_ids::component::ComponentRegistry;

use crate::applier::apply_change_set;
use crate::change_set::{decode_change_set, decode_snapshot};
use crate::component_table::{decode_component_table, remap_decoded_change_set, remap_snapshot, ComponentIdRemap};
use crate::error::{DeltaStateError, Result};
use crate::footer::{decode_footer, decode_trailer, StateTableEntry};
use crate::instrument::window::SubWindow;
use crate::instrument::{ReadInstrument, SeekFrom};
use crate::model::{Snapshot, ValueCodecRegistry};
use crate::varint;
use crate::FORMAT_VERSION;

/// Read-side state machine for the delta-state format.
pub struct DeltaStateReplayer<'a> {
    instrument: &'a mut dyn ReadInstrument,
    codecs: &'a ValueCodecRegistry,
    remap: ComponentIdRemap,
    states: Vec<StateTableEntry>,
    current_index: Option<usize>,
    current_snapshot: Option<Snapshot>,
}

impl<'a> DeltaStateReplayer<'a> {
    /// Open a stream for replay: reads the session header, trailer, and
    /// footer, validates the format version, and leaves the cursor
    /// positioned before the first recorded state. No state is decoded yet.
    ///
    /// `component_registry` resolves the component name table the recorder
    /// wrote at the start of the stream into a [`ComponentIdRemap`], so this
    /// replayer's registry does not need to register components in the same
    /// order the recorder's did.
    pub fn open(
        instrument: &'a mut dyn ReadInstrument,
        codecs: &'a ValueCodecRegistry,
        component_registry: &ComponentRegistry,
    ) -> Result<Self> {
        instrument.seek(SeekFrom::Start(0))?;
        let header_len = varint::decode_unsigned(instrument)?;
        let remap = {
            let mut window = SubWindow::open(instrument, header_len)?;
            decode_component_table(component_registry, &mut window)?
        };

        let (_footer_size, version) = decode_trailer(instrument)?;
        if version != FORMAT_VERSION {
            return Err(DeltaStateError::VersionMismatch {
                found: version,
                supported: FORMAT_VERSION,
            });
        }
        let states = decode_footer(instrument)?;
        debug!(state_count = states.len(), "opened delta-state stream for replay");
        Ok(Self {
            instrument,
            codecs,
            remap,
            states,
            current_index: None,
            current_snapshot: None,
        })
    }

    /// Number of recorded states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Index of the currently-materialized state, if any state has been
    /// decoded yet.
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// The currently-materialized snapshot, if any.
    pub fn current(&self) -> Option<&Snapshot> {
        self.current_snapshot.as_ref()
    }

    /// Decode and apply exactly the next state, returning the resulting
    /// snapshot. The first call (with no state materialized yet) decodes
    /// state 0, which is always an entire snapshot.
    pub fn advance_one_state(&mut self) -> Result<&Snapshot> {
        let next_index = match self.current_index {
            None => 0,
            Some(i) => i + 1,
        };
        self.decode_state_at(next_index)?;
        Ok(self.current_snapshot.as_ref().expect("just decoded"))
    }

    /// Advance `count` states forward.
    pub fn advance(&mut self, count: usize) -> Result<&Snapshot> {
        for _ in 0..count {
            self.advance_one_state()?;
        }
        Ok(self.current_snapshot.as_ref().expect("advanced at least once"))
    }

    /// Jump directly to state `target_index`, replaying forward from the
    /// nearest preceding entire state.
    pub fn seek(&mut self, target_index: usize) -> Result<&Snapshot> {
        if target_index >= self.states.len() {
            return Err(DeltaStateError::OutOfRange {
                context: "replayer seek target state index",
                offset: target_index as i64,
                limit: self.states.len(),
            });
        }

        let resume_from = self.nearest_entire_at_or_before(target_index);
        self.decode_state_at(resume_from)?;
        while self.current_index.unwrap() < target_index {
            self.advance_one_state()?;
        }
        Ok(self.current_snapshot.as_ref().expect("decoded at least once"))
    }

    /// Jump to the state active at `elapsed_seconds` since the first
    /// recorded state. Requires the recorder to have tracked elapsed time.
    pub fn seek_to_elapsed_seconds(&mut self, elapsed_seconds: f64) -> Result<&Snapshot> {
        let index = self.frame_index_from_elapsed_seconds(elapsed_seconds)?;
        self.seek(index)
    }

    /// Compute the index of the state active at `elapsed_seconds`, without
    /// seeking to it. The last state whose cumulative elapsed time does not
    /// exceed `elapsed_seconds` is returned; `elapsed_seconds` before the
    /// first state clamps to 0, and past the last state clamps to the last
    /// index.
    pub fn frame_index_from_elapsed_seconds(&self, elapsed_seconds: f64) -> Result<usize> {
        if self.states.is_empty() {
            return Err(DeltaStateError::OutOfRange {
                context: "frame index from elapsed seconds on an empty stream",
                offset: 0,
                limit: 0,
            });
        }
        if self.states.iter().any(|s| s.elapsed_seconds.is_none()) {
            return Err(DeltaStateError::ChangeSetInternal {
                reason: "stream was recorded without elapsed-time tracking".to_owned(),
            });
        }
        // `partition_point` over "elapsed_seconds <= target" gives the
        // count of states at or before the target; the last such state
        // (count - 1) is the one active at that time.
        let count = self
            .states
            .partition_point(|s| s.elapsed_seconds.unwrap() <= elapsed_seconds);
        Ok(count.saturating_sub(1))
    }

    fn nearest_entire_at_or_before(&self, index: usize) -> usize {
        (0..=index)
            .rev()
            .find(|&i| self.states[i].is_entire)
            .unwrap_or(0)
    }

    fn decode_state_at(&mut self, index: usize) -> Result<()> {
        let entry = *self.states.get(index).ok_or(DeltaStateError::OutOfRange {
            context: "replayer state index",
            offset: index as i64,
            limit: self.states.len(),
        })?;

        self.instrument.seek(SeekFrom::Start(entry.offset))?;

        if entry.is_entire {
            let mut snapshot = decode_snapshot(self.instrument, self.codecs)?;
            remap_snapshot(&mut snapshot, &self.remap)?;
            self.current_snapshot = Some(snapshot);
        } else {
            let mut change_set = decode_change_set(self.instrument, self.codecs)?;
            remap_decoded_change_set(&mut change_set, &self.remap)?;
            let snapshot = self
                .current_snapshot
                .as_mut()
                .ok_or_else(|| DeltaStateError::ChangeSetInternal {
                    reason: format!("state {index} is a delta but no previous snapshot is materialized"),
                })?;
            apply_change_set(snapshot, change_set)?;
        }

        let consumed = self.instrument.offset() - entry.offset;
        if consumed != entry.size {
            return Err(DeltaStateError::SizeMismatch {
                state_index: index,
                recorded: entry.size as usize,
                actual: consumed as usize,
            });
        }

        self.current_index = Some(index);
        Ok(())
    }
}
