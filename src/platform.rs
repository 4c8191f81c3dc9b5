//! Process-level helpers: kernel module loading, detaching and log output

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::{Error, Result};

/// Kernel module providing the gate class
pub const GATE_MODULE: &str = "geom_gate";

/// Make sure the gate kernel module is loaded
#[cfg(target_os = "freebsd")]
pub fn load_module() -> Result<()> {
    let output = std::process::Command::new("kldload")
        .arg("-n")
        .arg(GATE_MODULE)
        .output()?;

    if output.status.success() {
        debug!("{} loaded", GATE_MODULE);
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "Cannot load {}: {}",
            GATE_MODULE,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(not(target_os = "freebsd"))]
pub fn load_module() -> Result<()> {
    debug!("{} is only available on FreeBSD", GATE_MODULE);
    Err(Error::Unsupported(format!("cannot load {}", GATE_MODULE)))
}

/// Detach from the controlling terminal and continue in the background
#[cfg(any(target_os = "freebsd", target_os = "linux"))]
pub fn detach() -> Result<()> {
    nix::unistd::daemon(false, false)
        .map_err(|e| Error::Internal(format!("Cannot daemonize: {}", e)))?;
    debug!("Worker created: {}", std::process::id());
    Ok(())
}

#[cfg(not(any(target_os = "freebsd", target_os = "linux")))]
pub fn detach() -> Result<()> {
    Err(Error::Unsupported("daemonizing".to_string()))
}

/// Log destination: appended to `path`, or stderr
///
/// A detached worker has stderr on /dev/null, so only a log file keeps its
/// output.
pub fn log_writer(path: Option<&Path>) -> Result<BoxMakeWriter> {
    match path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::open(path, e))?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ggateu.log");
        std::fs::write(&path, "old\n").unwrap();

        let writer = log_writer(Some(&path)).unwrap();
        writer.make_writer().write_all(b"new\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn test_unwritable_log_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("ggateu.log");
        assert!(matches!(log_writer(Some(&path)), Err(Error::Open { .. })));
    }
}
