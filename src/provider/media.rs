//! Media size and sector size queries

use std::fs::File;
use std::io::{self, Seek, SeekFrom};

use super::DEFAULT_SECTOR_SIZE;

pub(super) fn media_size(file: &File) -> io::Result<u64> {
    let meta = file.metadata()?;
    if meta.is_file() {
        return Ok(meta.len());
    }
    // Disk devices report a zero length; their end offset is the media size.
    let mut handle = file;
    handle.seek(SeekFrom::End(0))
}

pub(super) fn sector_size(file: &File) -> io::Result<u32> {
    if file.metadata()?.is_file() {
        return Ok(DEFAULT_SECTOR_SIZE);
    }
    device_sector_size(file)
}

#[cfg(target_os = "freebsd")]
mod ioctl {
    // DIOCGSECTORSIZE from <sys/disk.h>
    nix::ioctl_read!(diocgsectorsize, b'd', 128, libc::c_uint);
}

#[cfg(target_os = "linux")]
mod ioctl {
    // BLKSSZGET from <linux/fs.h>
    nix::ioctl_read_bad!(blksszget, 0x1268, libc::c_int);
}

#[cfg(target_os = "freebsd")]
fn device_sector_size(file: &File) -> io::Result<u32> {
    use std::os::unix::io::AsRawFd;

    let mut size: libc::c_uint = 0;
    unsafe { ioctl::diocgsectorsize(file.as_raw_fd(), &mut size) }
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    Ok(size)
}

#[cfg(target_os = "linux")]
fn device_sector_size(file: &File) -> io::Result<u32> {
    use std::os::unix::io::AsRawFd;

    let mut size: libc::c_int = 0;
    unsafe { ioctl::blksszget(file.as_raw_fd(), &mut size) }
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    u32::try_from(size).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

#[cfg(not(any(target_os = "freebsd", target_os = "linux")))]
fn device_sector_size(_file: &File) -> io::Result<u32> {
    Ok(DEFAULT_SECTOR_SIZE)
}
