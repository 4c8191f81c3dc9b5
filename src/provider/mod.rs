//! Backing providers
//!
//! A provider is a regular file or a disk device. The write-provider holds
//! the obfuscated overlay, the optional read-provider supplies the contents
//! of blocks that were never written.

mod media;

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sector size reported for regular files
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// How a provider is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// An open backing store
#[derive(Debug)]
pub struct Provider {
    file: File,
    path: PathBuf,
    access: Access,
}

impl Provider {
    /// Open a provider with synchronous writes (and direct I/O where supported)
    pub fn open(path: &Path, access: Access) -> Result<Self> {
        let mut options = OpenOptions::new();
        options
            .read(true)
            .write(access == Access::ReadWrite)
            .custom_flags(open_flags());

        let file = options.open(path).map_err(|e| Error::open(path, e))?;
        debug!("Opened {:?} ({:?})", path, access);

        Ok(Provider {
            file,
            path: path.to_path_buf(),
            access,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Size of the provider in bytes
    pub fn media_size(&self) -> Result<u64> {
        media::media_size(&self.file).map_err(Error::Io)
    }

    /// Native sector size of the provider in bytes
    pub fn sector_size(&self) -> Result<u32> {
        media::sector_size(&self.file).map_err(Error::Io)
    }

    /// Fill `buf` from `offset`
    ///
    /// Loops over short reads; bytes past the end of the provider read as
    /// zero.
    pub fn read_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.file.read_at(buf, offset) {
                Ok(0) => {
                    buf.fill(0);
                    break;
                }
                Ok(n) => {
                    offset += n as u64;
                    buf = &mut buf[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Write all of `buf` at `offset`
    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        if self.access != Access::ReadWrite {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        self.file.write_all_at(buf, offset)
    }
}

#[cfg(target_os = "freebsd")]
fn open_flags() -> i32 {
    libc::O_DIRECT | libc::O_FSYNC
}

#[cfg(not(target_os = "freebsd"))]
fn open_flags() -> i32 {
    libc::O_SYNC
}
