//! Bounded sub-instrument windows.
//!
//! The footer format prefixes each record with its own encoded size, so a
//! reader can skip a record it doesn't understand (or wants to defer) by
//! seeking past it. [`SubWindow`] gives parsing code a [`ReadInstrument`]
//! that is clamped to exactly that record's byte range: reads and seeks
//! past the end of the range fail instead of wandering into the next
//! record, and on drop the outer instrument's cursor is restored to the
//! end of the window, regardless of how far the inner parser actually
//! consumed. That drop behavior is what lets a caller safely ignore a
//! record's internal layout and just skip it.
//!
//! Because `SubWindow` itself implements [`ReadInstrument`], windows nest by
//! construction -- opening a window on top of a window -- with no fixed
//! depth limit to maintain.

use super::{seek_target, ReadInstrument, SeekFrom};
use crate::error::{DeltaStateError, Result};

/// A [`ReadInstrument`] clamped to `[base, base + len)` of some other
/// instrument, restoring the outer cursor to `base + len` when dropped.
pub struct SubWindow<'a> {
    inner: &'a mut dyn ReadInstrument,
    base: u64,
    len: u64,
    pos: u64,
}

impl<'a> SubWindow<'a> {
    /// Open a window of `len` bytes starting at `inner`'s current offset.
    ///
    /// Fails if fewer than `len` bytes remain in `inner`.
    pub fn open(inner: &'a mut dyn ReadInstrument, len: u64) -> Result<Self> {
        let base = inner.offset();
        if base + len > inner.total_size() {
            return Err(DeltaStateError::OutOfRange {
                context: "sub-instrument window",
                offset: (base + len) as i64,
                limit: inner.total_size() as usize,
            });
        }
        Ok(Self {
            inner,
            base,
            len,
            pos: 0,
        })
    }

    /// Bytes of the window not yet consumed.
    pub fn remaining(&self) -> u64 {
        self.len - self.pos
    }
}

impl<'a> ReadInstrument for SubWindow<'a> {
    fn total_size(&self) -> u64 {
        self.len
    }

    fn offset(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_bounds(buf.len())?;
        self.inner.read(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn read_always(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_bounds(buf.len())?;
        self.inner.read_always(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = seek_target(self.pos, self.len, pos)?;
        if target > self.len {
            return Err(DeltaStateError::OutOfRange {
                context: "sub-instrument window seek",
                offset: target as i64,
                limit: self.len as usize,
            });
        }
        self.inner.seek(SeekFrom::Start(self.base + target))?;
        self.pos = target;
        Ok(target)
    }

    fn reference_data(&mut self, len: usize) -> Result<&[u8]> {
        self.check_bounds(len)?;
        let slice = self.inner.reference_data(len)?;
        self.pos += len as u64;
        Ok(slice)
    }

    fn is_size_determination(&self) -> bool {
        self.inner.is_size_determination()
    }
}

impl<'a> SubWindow<'a> {
    fn check_bounds(&self, len: usize) -> Result<()> {
        if self.pos + len as u64 > self.len {
            return Err(DeltaStateError::OutOfRange {
                context: "sub-instrument window bounds",
                offset: (self.pos + len as u64) as i64,
                limit: self.len as usize,
            });
        }
        Ok(())
    }
}

impl<'a> Drop for SubWindow<'a> {
    fn drop(&mut self) {
        let _ = self.inner.seek(SeekFrom::Start(self.base + self.len));
    }
}
