//! Grow-only request buffer

use crate::error::{Error, Result};

/// Scratch buffer shared by every request of a session
///
/// The length of the inner vector is the capacity advertised to the kernel.
/// It only ever grows; contents are not preserved across a grow in any
/// meaningful way and callers must not rely on them.
#[derive(Debug)]
pub struct WorkBuffer {
    data: Vec<u8>,
}

impl WorkBuffer {
    /// Allocate a buffer of `initial` bytes, usually one sector
    pub fn new(initial: usize) -> Result<Self> {
        let mut buffer = WorkBuffer { data: Vec::new() };
        buffer.ensure_capacity(initial)?;
        Ok(buffer)
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Make room for at least `len` bytes
    ///
    /// Returns `true` if the buffer had to grow.
    pub fn ensure_capacity(&mut self, len: usize) -> Result<bool> {
        let current = self.data.len();
        if len <= current {
            return Ok(false);
        }
        self.data
            .try_reserve_exact(len - current)
            .map_err(|_| Error::OutOfMemory(len))?;
        self.data.resize(len, 0);
        Ok(true)
    }

    /// The whole buffer, as handed to the channel
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The first `len` bytes, if the buffer is large enough
    pub fn prefix_mut(&mut self, len: usize) -> Option<&mut [u8]> {
        self.data.get_mut(..len)
    }
}
