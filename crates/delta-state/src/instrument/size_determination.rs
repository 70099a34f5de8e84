//! Size-determination instrument realizations.
//!
//! These wrap a real instrument (or nothing, for writes) and count bytes
//! instead of moving them. The recorder uses a size-determination write
//! instrument to measure the component name table's encoded size in
//! [`crate::recorder::DeltaStateRecorder::arm`] before writing the real
//! header bytes, so the length prefix the replayer needs to bound its
//! [`crate::instrument::window::SubWindow`] read can be written first, in a
//! single forward pass with no backward patching. Per-state sizes, by
//! contrast, are measured directly off the real write instrument's offset
//! before and after encoding, since the real bytes are being committed
//! either way and a second, throwaway pass would just be wasted work.
//!
//! Seek semantics: an absolute seek (`Start`) resets the running count to
//! the target offset; a relative seek (`Current`/`End`) adjusts it. This is
//! deliberately the only rule -- earlier instrument designs in this lineage
//! had a flag to suppress seek-driven adjustments entirely, but the flag
//! was never exercised by any real caller and just made the two read paths
//! harder to reason about.

use super::{ReadInstrument, SeekFrom, WriteInstrument};
use crate::error::Result;

/// Counts bytes written without storing them anywhere.
#[derive(Debug, Default)]
pub struct SizeDeterminationWriteInstrument {
    write_size: u64,
}

impl SizeDeterminationWriteInstrument {
    /// Create a fresh counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes counted so far.
    pub fn write_size(&self) -> u64 {
        self.write_size
    }
}

impl WriteInstrument for SizeDeterminationWriteInstrument {
    fn offset(&self) -> u64 {
        self.write_size
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_size += data.len() as u64;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.write_size = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(offset) => (self.write_size as i64 + offset).max(0) as u64,
            SeekFrom::End(offset) => (self.write_size as i64 + offset).max(0) as u64,
        };
        Ok(self.write_size)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_size_determination(&self) -> bool {
        true
    }
}

/// Wraps a real [`ReadInstrument`] and counts bytes skipped over instead of
/// materializing them, so a header's encoded size can be measured by
/// replaying the same decode logic used for a real read.
pub struct SizeDeterminationReadInstrument<'a> {
    backing: &'a mut dyn ReadInstrument,
    read_size: u64,
}

impl<'a> SizeDeterminationReadInstrument<'a> {
    /// Wrap `backing`, counting from zero regardless of its current offset.
    pub fn new(backing: &'a mut dyn ReadInstrument) -> Self {
        Self {
            backing,
            read_size: 0,
        }
    }

    /// Bytes counted so far.
    pub fn read_size(&self) -> u64 {
        self.read_size
    }
}

impl<'a> ReadInstrument for SizeDeterminationReadInstrument<'a> {
    fn total_size(&self) -> u64 {
        self.backing.total_size()
    }

    fn offset(&self) -> u64 {
        self.backing.offset()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.backing.ignore(buf.len())?;
        self.read_size += buf.len() as u64;
        Ok(())
    }

    fn read_always(&mut self, buf: &mut [u8]) -> Result<()> {
        self.backing.read_always(buf)?;
        self.read_size += buf.len() as u64;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.backing.seek(pos)?;
        self.read_size = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(offset) => (self.read_size as i64 + offset).max(0) as u64,
            SeekFrom::End(offset) => (self.total_size() as i64 + offset).max(0) as u64,
        };
        Ok(self.read_size)
    }

    fn reference_data(&mut self, len: usize) -> Result<&[u8]> {
        self.backing.ignore(len)?;
        self.read_size += len as u64;
        Ok(&[])
    }

    fn is_size_determination(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::memory::MemoryReadInstrument;

    #[test]
    fn write_counter_counts_without_storing() {
        let mut w = SizeDeterminationWriteInstrument::new();
        w.write(&[1, 2, 3]).unwrap();
        w.write(&[4, 5]).unwrap();
        assert_eq!(w.write_size(), 5);
    }

    #[test]
    fn write_counter_current_seek_adjusts() {
        let mut w = SizeDeterminationWriteInstrument::new();
        w.write(&[0; 10]).unwrap();
        w.seek(SeekFrom::Current(-4)).unwrap();
        assert_eq!(w.write_size(), 6);
    }

    #[test]
    fn write_counter_start_seek_resets() {
        let mut w = SizeDeterminationWriteInstrument::new();
        w.write(&[0; 10]).unwrap();
        w.seek(SeekFrom::Start(2)).unwrap();
        assert_eq!(w.write_size(), 2);
    }

    #[test]
    fn read_counter_tracks_skipped_bytes() {
        let bytes = [1u8, 2, 3, 4, 5];
        let mut backing = MemoryReadInstrument::new(&bytes);
        let mut counter = SizeDeterminationReadInstrument::new(&mut backing);
        let mut buf = [0u8; 2];
        counter.read(&mut buf).unwrap();
        assert_eq!(counter.read_size(), 2);
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn read_counter_read_always_still_materializes() {
        let bytes = [7u8, 8, 9];
        let mut backing = MemoryReadInstrument::new(&bytes);
        let mut counter = SizeDeterminationReadInstrument::new(&mut backing);
        let mut buf = [0u8; 2];
        counter.read_always(&mut buf).unwrap();
        assert_eq!(buf, [7, 8]);
        assert_eq!(counter.read_size(), 2);
    }
}
