//! Request dispatch loop
//!
//! Fetch a request, run it against the overlay, report the result, repeat.
//! Requests are handled strictly one at a time. Provider failures are
//! reported to the kernel as errno and never stop the loop; only channel
//! failures and running out of memory for the buffer do.

use tracing::{debug, info, warn};

use super::buffer::WorkBuffer;
use super::overlay::{Overlay, ReadSource};
use crate::error::{errno_from_io, Error, Result};
use crate::gate::{BioCmd, BlockRequest, FetchError, GateChannel};

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Completed,
    Cancelled,
}

/// Counters kept for the lifetime of a dispatch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub unsupported: u64,
    /// Reads served from the read-provider or as zeros
    pub fallbacks: u64,
    /// Requests completed with a non-zero error
    pub failures: u64,
    pub grows: u64,
}

/// Serves one unit
pub struct Dispatcher<'a> {
    unit: i32,
    overlay: &'a Overlay,
    buffer: WorkBuffer,
    stats: DispatchStats,
}

impl<'a> Dispatcher<'a> {
    /// Start with a buffer of one sector
    pub fn new(unit: i32, sector_size: u32, overlay: &'a Overlay) -> Result<Self> {
        Ok(Dispatcher {
            unit,
            overlay,
            buffer: WorkBuffer::new(sector_size as usize)?,
            stats: DispatchStats::default(),
        })
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Current buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Serve requests until the channel reports cancellation
    pub fn serve<C: GateChannel>(&mut self, channel: &mut C) -> Result<DispatchStats> {
        info!("Serving unit {}", self.unit);
        loop {
            if self.step(channel)? == Step::Cancelled {
                info!(
                    reads = self.stats.reads,
                    writes = self.stats.writes,
                    deletes = self.stats.deletes,
                    fallbacks = self.stats.fallbacks,
                    failures = self.stats.failures,
                    buffer = self.buffer.capacity(),
                    "Unit {} cancelled",
                    self.unit
                );
                return Ok(self.stats);
            }
        }
    }

    /// Fetch, run and complete a single request
    pub fn step<C: GateChannel>(&mut self, channel: &mut C) -> Result<Step> {
        let request = loop {
            match channel.next_request(self.unit, self.buffer.as_mut_slice()) {
                Ok(request) => break request,
                Err(FetchError::Cancelled) => return Ok(Step::Cancelled),
                Err(FetchError::Retryable(required)) => {
                    if required <= self.buffer.capacity() {
                        return Err(Error::GateProtocol(format!(
                            "asked to grow a {} byte buffer to {}",
                            self.buffer.capacity(),
                            required
                        )));
                    }
                    debug!("Growing buffer {} -> {}", self.buffer.capacity(), required);
                    self.buffer.ensure_capacity(required)?;
                    self.stats.grows += 1;
                }
                Err(FetchError::Fatal(errno)) => return Err(Error::Gate(errno)),
            }
        };

        let error = self.dispatch(&request);
        if error != 0 {
            self.stats.failures += 1;
        }

        channel.complete(self.unit, &request, self.buffer.as_mut_slice(), error)?;
        Ok(Step::Completed)
    }

    /// Run `request` and return the errno to report
    fn dispatch(&mut self, request: &BlockRequest) -> i32 {
        debug!(
            "{:?} offset={} length={}",
            request.cmd, request.offset, request.length
        );

        match request.cmd {
            BioCmd::Read => {
                self.stats.reads += 1;
                match self.buffer.ensure_capacity(request.length) {
                    Ok(true) => self.stats.grows += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Read at {}: {}", request.offset, e);
                        return libc::ENOMEM;
                    }
                }
                let Some(buf) = self.buffer.prefix_mut(request.length) else {
                    return libc::ENOMEM;
                };
                match self.overlay.read(buf, request.offset) {
                    Ok(ReadSource::Upper) => 0,
                    Ok(ReadSource::Lower | ReadSource::Zero | ReadSource::Mixed) => {
                        self.stats.fallbacks += 1;
                        0
                    }
                    Err(e) => {
                        warn!("Read at {} failed: {}", request.offset, e);
                        errno_from_io(&e)
                    }
                }
            }
            BioCmd::Write => {
                self.stats.writes += 1;
                let Some(buf) = staged(&mut self.buffer, request) else {
                    return libc::EINVAL;
                };
                match self.overlay.write(buf, request.offset) {
                    Ok(()) => 0,
                    Err(e) => {
                        warn!("Write at {} failed: {}", request.offset, e);
                        errno_from_io(&e)
                    }
                }
            }
            BioCmd::Delete => {
                self.stats.deletes += 1;
                // No payload is staged and the kernel never retries a delete.
                match self.buffer.ensure_capacity(request.length) {
                    Ok(true) => self.stats.grows += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Delete at {}: {}", request.offset, e);
                        return libc::ENOMEM;
                    }
                }
                let Some(buf) = self.buffer.prefix_mut(request.length) else {
                    return libc::ENOMEM;
                };
                match self.overlay.delete(buf, request.offset) {
                    Ok(()) => 0,
                    Err(e) => {
                        warn!("Delete at {} failed: {}", request.offset, e);
                        errno_from_io(&e)
                    }
                }
            }
            BioCmd::Other(cmd) => {
                self.stats.unsupported += 1;
                debug!("Unsupported command {:#x}", cmd);
                libc::EOPNOTSUPP
            }
        }
    }
}

/// The part of the buffer holding the payload the kernel staged
fn staged<'b>(buffer: &'b mut WorkBuffer, request: &BlockRequest) -> Option<&'b mut [u8]> {
    let capacity = buffer.capacity();
    let buf = buffer.prefix_mut(request.length);
    if buf.is_none() {
        warn!(
            "{:?} of {} bytes does not fit the {} byte buffer",
            request.cmd, request.length, capacity
        );
    }
    buf
}
