//! Trailing index footer and fixed trailer.
//!
//! The recorder writes every state forward, in order, with no backward
//! patching. Once the last state is written it appends a footer listing
//! where each one begins and how large it is, followed by a small fixed
//! trailer that tells a reader how far back to seek to find the footer's
//! start and which format version wrote it. A reader always starts by
//! reading the last [`TRAILER_SIZE`] bytes of the stream, regardless of how
//! large the stream is.

use crate::error::{DeltaStateError, Result};
use crate::instrument::{ReadInstrument, SeekFrom, WriteInstrument};
use crate::varint;

/// `footer_size: u64 le, version: u8, reserved: [u8; 7]`
pub const TRAILER_SIZE: u64 = 16;

/// One recorded state's location and a few facts a reader needs before
/// deciding whether to replay it: its size (for skip-without-parsing), and
/// whether it's an entire snapshot or a delta against the previous state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateTableEntry {
    /// Absolute byte offset of the state record's start, from the
    /// beginning of the stream.
    pub offset: u64,
    /// Size in bytes of the state record's payload. There is no separate
    /// per-record flag byte in the stream; `is_entire` is the only thing
    /// that distinguishes an entire snapshot from a delta.
    pub size: u64,
    /// Whether this state is an entire snapshot rather than a delta.
    pub is_entire: bool,
    /// Cumulative elapsed seconds since the first recorded state, if the
    /// recorder was configured to track it.
    pub elapsed_seconds: Option<f64>,
}

/// Write the footer (state table) for `states` to `w`, returning the number
/// of bytes written (the value later placed in the trailer's `footer_size`).
pub fn encode_footer(states: &[StateTableEntry], w: &mut dyn WriteInstrument) -> Result<u64> {
    let start = w.offset();
    let records_elapsed_time = states.iter().any(|s| s.elapsed_seconds.is_some());
    w.write(&[records_elapsed_time as u8])?;
    varint::encode_unsigned(states.len() as u64, w)?;
    for state in states {
        varint::encode_unsigned(state.offset, w)?;
        varint::encode_unsigned(state.size, w)?;
        w.write(&[state.is_entire as u8])?;
        if records_elapsed_time {
            let elapsed = state.elapsed_seconds.ok_or_else(|| DeltaStateError::FooterCorrupt {
                reason: "recorder mixed states with and without elapsed-time tracking".to_owned(),
            })?;
            w.write(&elapsed.to_le_bytes())?;
        }
    }
    Ok(w.offset() - start)
}

/// Decode a footer previously written by [`encode_footer`].
pub fn decode_footer(r: &mut dyn ReadInstrument) -> Result<Vec<StateTableEntry>> {
    let records_elapsed_time = r.read_bytes::<1>()?[0] != 0;
    let count = varint::decode_unsigned(r)?;
    let mut states = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = varint::decode_unsigned(r)?;
        let size = varint::decode_unsigned(r)?;
        let is_entire = r.read_bytes::<1>()?[0] != 0;
        let elapsed_seconds = if records_elapsed_time {
            Some(f64::from_le_bytes(r.read_bytes::<8>()?))
        } else {
            None
        };
        states.push(StateTableEntry {
            offset,
            size,
            is_entire,
            elapsed_seconds,
        });
    }
    Ok(states)
}

/// Write the fixed trailer: `footer_size`, `version`, and padding.
pub fn encode_trailer(footer_size: u64, version: u8, w: &mut dyn WriteInstrument) -> Result<()> {
    w.write(&footer_size.to_le_bytes())?;
    w.write(&[version])?;
    w.write(&[0u8; 7])?;
    Ok(())
}

/// Read the trailer at the very end of `r`'s range, returning
/// `(footer_size, version)` and leaving the cursor at the start of the
/// footer (i.e. `total_size - TRAILER_SIZE - footer_size`).
pub fn decode_trailer(r: &mut dyn ReadInstrument) -> Result<(u64, u8)> {
    let total = r.total_size();
    if total < TRAILER_SIZE {
        return Err(DeltaStateError::Truncated {
            context: "trailer",
            expected: (TRAILER_SIZE - total) as usize,
        });
    }
    r.seek(SeekFrom::Start(total - TRAILER_SIZE))?;
    let footer_size = u64::from_le_bytes(r.read_bytes::<8>()?);
    let version = r.read_bytes::<1>()?[0];
    let _reserved = r.read_bytes::<7>()?;

    let footer_start = total
        .checked_sub(TRAILER_SIZE)
        .and_then(|v| v.checked_sub(footer_size))
        .ok_or_else(|| DeltaStateError::FooterCorrupt {
            reason: format!(
                "footer_size {footer_size} is larger than the stream ({total} bytes, trailer is {TRAILER_SIZE})"
            ),
        })?;
    r.seek(SeekFrom::Start(footer_start))?;
    Ok((footer_size, version))
}
