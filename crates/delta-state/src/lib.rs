//! Delta-state serialization engine.
//!
//! This crate records a sequence of ECS world snapshots as a compact
//! byte stream and replays them back. Most frames are recorded as a
//! **delta** -- only the structural differences from the previous snapshot
//! -- with occasional **entire** snapshots so a reader can seek into the
//! middle of the stream without replaying from frame zero. A trailing index
//! footer lists where every recorded state begins and how large it is, so
//! seeking and random access don't require a linear scan.
//!
//! The crate is organized bottom-up:
//!
//! - [`varint`] -- the variable-length integer codec every other layer uses.
//! - [`instrument`] -- the byte-stream cursor abstraction ([`instrument::WriteInstrument`]
//!   / [`instrument::ReadInstrument`]) that the rest of the crate is written against,
//!   so recording/replaying logic is agnostic to where the bytes actually live.
//! - [`model`] -- the in-memory representation of an ECS world snapshot this
//!   crate diffs and serializes: entities, their unique components, shared
//!   interned component instances, and global singleton components.
//! - [`change_set`] -- computes a structural diff ([`change_set::ChangeSet`])
//!   between two snapshots.
//! - [`applier`] -- applies a [`change_set::ChangeSet`] to a snapshot to
//!   produce the next one.
//! - [`recorder`] -- the write-side state machine that turns a sequence of
//!   snapshots into a byte stream.
//! - [`replayer`] -- the read-side state machine that turns a byte stream
//!   back into a sequence of snapshots.

pub mod applier;
pub mod change_set;
pub mod component_table;
pub mod error;
pub mod footer;
pub mod instrument;
pub mod model;
pub mod recorder;
pub mod replayer;
pub mod varint;

/// Wire format version understood by this build of the crate. The trailer's
/// version byte is `0` for the first shipped format; bump this whenever the
/// footer layout or a record encoding changes incompatibly.
pub const FORMAT_VERSION: u8 = 0;

pub mod prelude {
    pub use crate::applier::apply_change_set;
    pub use crate::change_set::{compute_change_set, ChangeSet};
    pub use crate::component_table::ComponentIdRemap;
    pub use crate::error::{DeltaStateError, Result};
    pub use crate::instrument::{ReadInstrument, SeekFrom, WriteInstrument};
    pub use crate::model::{Snapshot, ValueCodec};
    pub use crate::recorder::{DeltaStateRecorder, FlushPolicy};
    pub use crate::replayer::DeltaStateReplayer;
}
