//! `/dev/ggctl` control device
//!
//! The control device is opened on first use, so listing units works without
//! the kernel module being reachable.

use std::fs::{File, OpenOptions};
use std::process::Command;

use tracing::debug;

use super::{
    BlockRequest, FetchError, GateChannel, UnitInfo, UnitSpec, CONTROL_NAME, PROVIDER_NAME,
};
use crate::error::{Error, Result};

/// Handle on the gate control device
#[derive(Debug, Default)]
pub struct GateDevice {
    control: Option<File>,
}

impl GateDevice {
    pub fn new() -> Self {
        GateDevice { control: None }
    }

    /// Get the control device, opening it if needed
    fn control(&mut self) -> Result<&File> {
        if self.control.is_none() {
            let path = format!("/dev/{}", CONTROL_NAME);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| Error::open(std::path::Path::new(&path), e))?;
            debug!("{} opened", path);
            self.control = Some(file);
        }
        self.control
            .as_ref()
            .ok_or_else(|| Error::Internal("control device not open".to_string()))
    }
}

impl GateChannel for GateDevice {
    fn create(&mut self, spec: &UnitSpec) -> Result<i32> {
        let fd = self.control()?;
        sys::create(fd, spec)
    }

    fn cancel(&mut self, unit: i32) -> Result<()> {
        let fd = self.control()?;
        sys::cancel(fd, unit)
    }

    fn destroy(&mut self, unit: i32, force: bool) -> Result<()> {
        let fd = self.control()?;
        sys::destroy(fd, unit, force)
    }

    fn list(&mut self, unit: Option<i32>) -> Result<Vec<UnitInfo>> {
        let output = Command::new("sysctl")
            .arg("-n")
            .arg("kern.geom.conftxt")
            .output()?;
        if !output.status.success() {
            return Err(Error::Internal(format!(
                "Cannot read kern.geom.conftxt: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_conftxt(&String::from_utf8_lossy(&output.stdout), unit))
    }

    fn next_request(
        &mut self,
        unit: i32,
        buf: &mut [u8],
    ) -> std::result::Result<BlockRequest, FetchError> {
        let fd = self.control().map_err(|_| FetchError::Fatal(libc::EBADF))?;
        sys::start(fd, unit, buf)
    }

    fn complete(
        &mut self,
        unit: i32,
        request: &BlockRequest,
        buf: &mut [u8],
        error: i32,
    ) -> Result<()> {
        let fd = self.control()?;
        sys::done(fd, unit, request, buf, error)
    }
}

/// Extract gate providers from `kern.geom.conftxt`
///
/// Lines look like `0 GATE ggate3 1073741824 512`.
pub fn parse_conftxt(text: &str, unit: Option<i32>) -> Vec<UnitInfo> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _depth = fields.next()?;
            if fields.next()? != "GATE" {
                return None;
            }
            let name = fields.next()?;
            let number = name.strip_prefix(PROVIDER_NAME)?.parse::<i32>().ok()?;
            let media_size = fields.next()?.parse::<u64>().ok()?;
            let sector_size = fields.next()?.parse::<u32>().ok()?;
            Some(UnitInfo {
                unit: number,
                name: name.to_string(),
                media_size,
                sector_size,
            })
        })
        .filter(|info| unit.map_or(true, |u| u == info.unit))
        .collect()
}

#[cfg(target_os = "freebsd")]
mod sys {
    //! Structures and ioctls from <geom/gate/g_gate.h>

    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    use libc::{c_char, c_int, c_uint, c_void, off_t};
    use tracing::warn;

    use crate::error::{Error, Result};
    use crate::gate::{BioCmd, BlockRequest, FetchError, UnitSpec};

    const GATE_VERSION: c_uint = 3;
    const NAME_MAX: usize = 255;
    const INFO_SIZE: usize = 2048;

    #[repr(C)]
    pub struct CtlCreate {
        version: c_uint,
        mediasize: off_t,
        sectorsize: c_uint,
        flags: c_uint,
        maxcount: c_uint,
        timeout: c_uint,
        name: [c_char; NAME_MAX],
        info: [c_char; INFO_SIZE],
        readprov: [c_char; NAME_MAX],
        readoffset: off_t,
        unit: c_int,
    }

    #[repr(C)]
    pub struct CtlDestroy {
        version: c_uint,
        unit: c_int,
        force: c_int,
        name: [c_char; NAME_MAX],
    }

    #[repr(C)]
    pub struct CtlCancel {
        version: c_uint,
        unit: c_int,
        seq: usize,
        name: [c_char; NAME_MAX],
    }

    #[repr(C)]
    pub struct CtlIo {
        version: c_uint,
        unit: c_int,
        seq: usize,
        cmd: c_uint,
        offset: off_t,
        length: off_t,
        data: *mut c_void,
        error: c_int,
    }

    nix::ioctl_readwrite!(gate_create, b'm', 0, CtlCreate);
    nix::ioctl_readwrite!(gate_destroy, b'm', 1, CtlDestroy);
    nix::ioctl_readwrite!(gate_cancel, b'm', 2, CtlCancel);
    nix::ioctl_readwrite!(gate_start, b'm', 3, CtlIo);
    nix::ioctl_readwrite!(gate_done, b'm', 4, CtlIo);

    fn copy_cstr(dst: &mut [c_char], src: &str) {
        let len = src.len().min(dst.len() - 1);
        for (d, s) in dst.iter_mut().zip(&src.as_bytes()[..len]) {
            *d = *s as c_char;
        }
    }

    pub fn create(fd: &File, spec: &UnitSpec) -> Result<i32> {
        let mediasize = off_t::try_from(spec.media_size)
            .map_err(|_| Error::MediaSize(format!("{} does not fit off_t", spec.media_size)))?;
        // SAFETY: plain C struct, all-zero is a valid value for every field.
        let mut ctl: CtlCreate = unsafe { std::mem::zeroed() };
        ctl.version = GATE_VERSION;
        ctl.unit = spec.unit;
        ctl.mediasize = mediasize;
        ctl.sectorsize = spec.sector_size;
        ctl.timeout = spec.timeout;
        ctl.flags = spec.flags;
        ctl.maxcount = 0;
        copy_cstr(&mut ctl.info, &spec.info);

        unsafe { gate_create(fd.as_raw_fd(), &mut ctl) }.map_err(|e| Error::Gate(e as i32))?;
        Ok(ctl.unit)
    }

    pub fn cancel(fd: &File, unit: i32) -> Result<()> {
        // SAFETY: as above.
        let mut ctl: CtlCancel = unsafe { std::mem::zeroed() };
        ctl.version = GATE_VERSION;
        ctl.unit = unit;
        ctl.seq = 0;
        unsafe { gate_cancel(fd.as_raw_fd(), &mut ctl) }.map_err(|e| Error::Gate(e as i32))?;
        Ok(())
    }

    pub fn destroy(fd: &File, unit: i32, force: bool) -> Result<()> {
        // SAFETY: as above.
        let mut ctl: CtlDestroy = unsafe { std::mem::zeroed() };
        ctl.version = GATE_VERSION;
        ctl.unit = unit;
        ctl.force = c_int::from(force);
        unsafe { gate_destroy(fd.as_raw_fd(), &mut ctl) }.map_err(|e| Error::Gate(e as i32))?;
        Ok(())
    }

    pub fn start(
        fd: &File,
        unit: i32,
        buf: &mut [u8],
    ) -> std::result::Result<BlockRequest, FetchError> {
        let mut io = CtlIo {
            version: GATE_VERSION,
            unit,
            seq: 0,
            cmd: 0,
            offset: 0,
            length: off_t::try_from(buf.len()).map_err(|_| FetchError::Fatal(libc::EINVAL))?,
            data: buf.as_mut_ptr().cast(),
            error: 0,
        };
        unsafe { gate_start(fd.as_raw_fd(), &mut io) }.map_err(|e| FetchError::Fatal(e as i32))?;

        let cmd = BioCmd::from_raw(io.cmd);
        match io.error {
            0 => {}
            libc::ECANCELED => return Err(FetchError::Cancelled),
            libc::ENOMEM if cmd.carries_payload() => {
                let required =
                    usize::try_from(io.length).map_err(|_| FetchError::Fatal(libc::EINVAL))?;
                return Err(FetchError::Retryable(required));
            }
            libc::ENOMEM => {
                warn!("Buffer too small for a {:?} request", cmd);
                return Err(FetchError::Fatal(libc::ENOMEM));
            }
            errno => return Err(FetchError::Fatal(errno)),
        }

        Ok(BlockRequest {
            cmd,
            offset: u64::try_from(io.offset).map_err(|_| FetchError::Fatal(libc::EINVAL))?,
            length: usize::try_from(io.length).map_err(|_| FetchError::Fatal(libc::EINVAL))?,
            seq: io.seq,
        })
    }

    pub fn done(
        fd: &File,
        unit: i32,
        request: &BlockRequest,
        buf: &mut [u8],
        error: i32,
    ) -> Result<()> {
        let mut io = CtlIo {
            version: GATE_VERSION,
            unit,
            seq: request.seq,
            cmd: request.cmd.raw(),
            offset: off_t::try_from(request.offset)
                .map_err(|_| Error::GateProtocol(format!("offset {}", request.offset)))?,
            length: off_t::try_from(request.length)
                .map_err(|_| Error::GateProtocol(format!("length {}", request.length)))?,
            data: buf.as_mut_ptr().cast(),
            error,
        };
        unsafe { gate_done(fd.as_raw_fd(), &mut io) }.map_err(|e| Error::Gate(e as i32))?;
        Ok(())
    }
}

#[cfg(not(target_os = "freebsd"))]
mod sys {
    use std::fs::File;

    use crate::error::{Error, Result};
    use crate::gate::{BlockRequest, FetchError, UnitSpec};

    fn unsupported() -> Error {
        Error::Unsupported("GEOM Gate requires FreeBSD".to_string())
    }

    pub fn create(_fd: &File, _spec: &UnitSpec) -> Result<i32> {
        Err(unsupported())
    }

    pub fn cancel(_fd: &File, _unit: i32) -> Result<()> {
        Err(unsupported())
    }

    pub fn destroy(_fd: &File, _unit: i32, _force: bool) -> Result<()> {
        Err(unsupported())
    }

    pub fn start(
        _fd: &File,
        _unit: i32,
        _buf: &mut [u8],
    ) -> std::result::Result<BlockRequest, FetchError> {
        Err(FetchError::Fatal(libc::ENODEV))
    }

    pub fn done(
        _fd: &File,
        _unit: i32,
        _request: &BlockRequest,
        _buf: &mut [u8],
        _error: i32,
    ) -> Result<()> {
        Err(unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFTXT: &str = "\
0 DISK ada0 500107862016 512 hd 16 sc 63
1 PART ada0p1 524288 512 i 1 o 20480 ty freebsd-boot xs GPT xt 83bd6b9d
0 GATE ggate0 4096 512
0 GATE ggate7 1073741824 4096
0 GATE garbage 1 1
";

    #[test]
    fn test_parse_conftxt_all_units() {
        let units = parse_conftxt(CONFTXT, None);
        assert_eq!(units.len(), 2);
        assert_eq!(
            units[0],
            UnitInfo {
                unit: 0,
                name: "ggate0".to_string(),
                media_size: 4096,
                sector_size: 512,
            }
        );
        assert_eq!(units[1].unit, 7);
        assert_eq!(units[1].sector_size, 4096);
    }

    #[test]
    fn test_parse_conftxt_filter() {
        let units = parse_conftxt(CONFTXT, Some(7));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "ggate7");
        assert!(parse_conftxt(CONFTXT, Some(3)).is_empty());
    }

    #[test]
    fn test_parse_conftxt_empty() {
        assert!(parse_conftxt("", None).is_empty());
    }
}
