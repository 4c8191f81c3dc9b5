//! Offline scan of the overlay
//!
//! Reconstructs the logical contents of the device without a kernel unit by
//! running the overlay read path over every sector in address order.

use std::io::Write;

use tracing::debug;

use super::buffer::WorkBuffer;
use super::overlay::{Overlay, ReadSource};
use crate::error::{Error, Result};

/// Write the plaintext of `[0, media_size)` to `out`
///
/// Returns the number of bytes written. Any provider or output failure aborts
/// the scan.
pub fn scan<W: Write>(
    overlay: &Overlay,
    media_size: u64,
    sector_size: u32,
    out: &mut W,
) -> Result<u64> {
    if sector_size == 0 || media_size % u64::from(sector_size) != 0 {
        return Err(Error::MediaSize(format!(
            "media size {} is not a multiple of the {} byte sector",
            media_size, sector_size
        )));
    }

    let mut buffer = WorkBuffer::new(sector_size as usize)?;
    let buf = buffer.as_mut_slice();
    let mut fallbacks = 0u64;

    let mut offset = 0u64;
    while offset < media_size {
        let source = overlay.read(buf, offset).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("read failed at offset {}: {}", offset, e),
            ))
        })?;
        if source != ReadSource::Upper {
            fallbacks += 1;
        }
        out.write_all(buf)?;
        offset += u64::from(sector_size);
    }
    out.flush()?;

    debug!(
        "Scanned {} bytes, {} sectors not written",
        media_size, fallbacks
    );
    Ok(media_size)
}
