//! In-memory instrument realizations.
//!
//! These back every unit test and most integration tests in this crate:
//! a [`MemoryWriteInstrument`] grows a `Vec<u8>` as data is written to it,
//! and a [`MemoryReadInstrument`] borrows a `&[u8]` and can therefore offer
//! true zero-copy [`ReadInstrument::reference_data`].

use super::{seek_target, ReadInstrument, SeekFrom, WriteInstrument};
use crate::error::{DeltaStateError, Result};

/// Grows a `Vec<u8>` as data is written. Supports seeking to overwrite
/// already-written bytes, mirroring the contract any instrument realization
/// must honor even though the recorder in this crate never rewinds.
#[derive(Debug, Default)]
pub struct MemoryWriteInstrument {
    buf: Vec<u8>,
    pos: usize,
}

impl MemoryWriteInstrument {
    /// Create an empty instrument.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an instrument pre-sized to avoid reallocation.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Borrow the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the instrument, returning the bytes written.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl WriteInstrument for MemoryWriteInstrument {
    fn offset(&self) -> u64 {
        self.pos as u64
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = seek_target(self.pos as u64, self.buf.len() as u64, pos)?;
        self.pos = target as usize;
        Ok(target)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Borrows a `&[u8]` and reads out of it without copying.
#[derive(Debug)]
pub struct MemoryReadInstrument<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemoryReadInstrument<'a> {
    /// Wrap `data` for reading from the start.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> ReadInstrument for MemoryReadInstrument<'a> {
    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn offset(&self) -> u64 {
        self.pos as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_always(buf)
    }

    fn read_always(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(DeltaStateError::Truncated {
                context: "memory instrument read",
                expected: end - self.data.len(),
            });
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = seek_target(self.pos as u64, self.data.len() as u64, pos)?;
        if target > self.data.len() as u64 {
            return Err(DeltaStateError::OutOfRange {
                context: "memory instrument seek",
                offset: target as i64,
                limit: self.data.len(),
            });
        }
        self.pos = target as usize;
        Ok(target)
    }

    fn reference_data(&mut self, len: usize) -> Result<&[u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(DeltaStateError::Truncated {
                context: "memory instrument reference_data",
                expected: end - self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
