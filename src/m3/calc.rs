//! A write-only transport that measures encoded size without buffering.

use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Counts the bytes written through it since the last reset.
///
/// The batch packer encodes each metric through a compact protocol backed by
/// one of these to learn the metric's wire size before committing it to the
/// in-flight batch. Clones share the counter, so the packer can keep one
/// handle while the protocol owns another.
#[derive(Clone, Debug, Default)]
pub(crate) struct CalcTransport {
    written: Arc<AtomicUsize>,
}

impl CalcTransport {
    /// Returns the number of bytes written since the last [`reset`](Self::reset).
    pub(crate) fn size(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    /// Zeroes the byte count.
    pub(crate) fn reset(&self) {
        self.written.store(0, Ordering::Relaxed);
    }
}

impl Write for CalcTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.fetch_add(buf.len(), Ordering::Relaxed);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
