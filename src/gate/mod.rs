//! GEOM Gate channel
//!
//! The kernel side of a unit hands us block requests one at a time and takes
//! back a completion code for each. Everything the engine needs from the
//! kernel goes through the [`GateChannel`] trait so the dispatch loop can be
//! driven by something other than `/dev/ggctl`.

mod ggctl;
#[cfg(test)]
pub(crate) mod scripted;

pub use ggctl::{parse_conftxt, GateDevice};

use crate::error::Result;

/// Control device name under /dev
pub const CONTROL_NAME: &str = "ggctl";

/// Prefix of the providers created by the gate class
pub const PROVIDER_NAME: &str = "ggate";

/// Let the kernel pick the unit number
pub const UNIT_AUTO: i32 = -1;

/// Kernel default request timeout
pub const DEFAULT_TIMEOUT: u32 = 0;

/// Unit flags accepted from userland
pub const FLAG_READONLY: u32 = 0x0001;
pub const FLAG_WRITEONLY: u32 = 0x0002;

const BIO_READ: u32 = 0x01;
const BIO_WRITE: u32 = 0x02;
const BIO_DELETE: u32 = 0x03;

/// Block operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioCmd {
    Read,
    Write,
    Delete,
    /// Anything else the kernel forwards (flush, getattr, ...)
    Other(u32),
}

impl BioCmd {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            BIO_READ => BioCmd::Read,
            BIO_WRITE => BioCmd::Write,
            BIO_DELETE => BioCmd::Delete,
            other => BioCmd::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            BioCmd::Read => BIO_READ,
            BioCmd::Write => BIO_WRITE,
            BioCmd::Delete => BIO_DELETE,
            BioCmd::Other(raw) => raw,
        }
    }

    /// Whether the kernel stages payload in the request buffer
    pub fn carries_payload(self) -> bool {
        matches!(self, BioCmd::Write)
    }
}

/// One request delivered by the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub cmd: BioCmd,
    /// Byte offset, a multiple of the sector size
    pub offset: u64,
    /// Transfer length in bytes
    pub length: usize,
    /// Correlation token owned by the channel
    pub seq: usize,
}

/// Why a fetch did not produce a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// The unit is going away; shut down cleanly
    Cancelled,
    /// The pending request needs a buffer of at least this many bytes
    Retryable(usize),
    /// The channel is unusable (errno)
    Fatal(i32),
}

/// Parameters for a new unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub unit: i32,
    pub media_size: u64,
    pub sector_size: u32,
    pub timeout: u32,
    pub flags: u32,
    /// Free-form description shown by the kernel
    pub info: String,
}

/// An existing unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub unit: i32,
    pub name: String,
    pub media_size: u64,
    pub sector_size: u32,
}

/// Operations provided by the kernel gate device
pub trait GateChannel {
    /// Create a unit, returning its number
    fn create(&mut self, spec: &UnitSpec) -> Result<i32>;

    /// Fail all requests queued on `unit` so a new server can take over
    fn cancel(&mut self, unit: i32) -> Result<()>;

    fn destroy(&mut self, unit: i32, force: bool) -> Result<()>;

    /// Enumerate units, optionally only `unit`
    fn list(&mut self, unit: Option<i32>) -> Result<Vec<UnitInfo>>;

    /// Block until the next request for `unit` arrives
    ///
    /// `buf.len()` is the advertised capacity. Write and delete payloads are
    /// staged in `buf`.
    fn next_request(
        &mut self,
        unit: i32,
        buf: &mut [u8],
    ) -> std::result::Result<BlockRequest, FetchError>;

    /// Report the outcome of `request`; read data is taken from `buf`
    fn complete(
        &mut self,
        unit: i32,
        request: &BlockRequest,
        buf: &mut [u8],
        error: i32,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bio_cmd_raw_values() {
        assert_eq!(BioCmd::from_raw(0x01), BioCmd::Read);
        assert_eq!(BioCmd::from_raw(0x02), BioCmd::Write);
        assert_eq!(BioCmd::from_raw(0x03), BioCmd::Delete);
        assert_eq!(BioCmd::from_raw(0x05), BioCmd::Other(0x05));
        assert_eq!(BioCmd::Other(0x05).raw(), 0x05);
        assert_eq!(BioCmd::Delete.raw(), 0x03);
    }

    #[test]
    fn test_payload_kinds() {
        assert!(BioCmd::Write.carries_payload());
        assert!(!BioCmd::Delete.carries_payload());
        assert!(!BioCmd::Read.carries_payload());
        assert!(!BioCmd::Other(4).carries_payload());
    }
}
