//! Error types for the delta-state serialization engine.
//!
//! Every fallible operation in this crate returns a [`DeltaStateError`]
//! rather than panicking. This mirrors how the recorder/replayer state
//! machines work: a failed write or read moves the state machine to
//! `Failed` rather than unwinding, so callers can inspect *why* before
//! deciding whether the session is salvageable.

use ecs_ids::entity::EntityId;

/// Errors produced while recording, replaying, or computing change-sets.
#[derive(Debug, thiserror::Error)]
pub enum DeltaStateError {
    /// The backing instrument reported a write or read failure (e.g. the
    /// file-backed instrument ran out of disk, or the in-memory instrument
    /// ran out of buffer capacity).
    #[error("instrument I/O failure during {operation}")]
    IoFailure {
        /// What the engine was trying to do when the instrument failed.
        operation: &'static str,
    },

    /// Fewer bytes were available than the format requires -- the stream
    /// ends mid-record.
    #[error("truncated stream: expected {expected} more bytes while reading {context}, but the stream ended")]
    Truncated {
        /// What was being parsed.
        context: &'static str,
        /// How many bytes were still needed.
        expected: usize,
    },

    /// A seek or index computation landed outside the valid range for the
    /// current instrument or state table.
    #[error("{context}: offset {offset} is out of range (valid range is 0..{limit})")]
    OutOfRange {
        /// What was being addressed (a seek, a state index, ...).
        context: &'static str,
        /// The offending offset or index.
        offset: i64,
        /// The valid upper bound.
        limit: usize,
    },

    /// The trailer's `version` byte did not match the version this reader
    /// understands.
    #[error("version mismatch: stream was written with version {found}, this reader supports version {supported}")]
    VersionMismatch {
        /// Version byte found in the trailer.
        found: u8,
        /// Version byte this build of the replayer supports.
        supported: u8,
    },

    /// The trailing index footer could not be parsed (bad lengths, overlapping
    /// sub-instrument ranges, or a size mismatch between what the footer
    /// claims and what is actually present in the stream).
    #[error("footer is corrupt: {reason}")]
    FooterCorrupt {
        /// Human-readable description of what failed to parse.
        reason: String,
    },

    /// A state's recorded `write_size` did not match the number of bytes its
    /// callback actually consumed while reading it back.
    #[error("size mismatch for state {state_index}: recorded {recorded} bytes, callback consumed {actual} bytes")]
    SizeMismatch {
        /// Ordinal of the state whose size disagreed.
        state_index: usize,
        /// Size recorded in the footer at write time.
        recorded: usize,
        /// Size actually consumed while replaying.
        actual: usize,
    },

    /// The change-set computer or applier hit an internal inconsistency that
    /// is not attributable to a malformed stream (e.g. the applier was asked
    /// to update a component on an entity that does not exist in the target
    /// snapshot).
    #[error("change-set internal error: {reason}")]
    ChangeSetInternal {
        /// Human-readable description.
        reason: String,
    },

    /// A referenced entity does not exist (stale generation or never
    /// allocated) in the snapshot being operated on.
    #[error("entity {entity:?} does not exist in this snapshot")]
    StaleEntity {
        /// The offending entity.
        entity: EntityId,
    },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, DeltaStateError>;
