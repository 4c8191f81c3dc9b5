//! Copy-on-write overlay of the two providers
//!
//! A sector whose write-provider bytes are all zero has never been written
//! (or was deleted) and is served from the read-provider. Anything else is
//! obfuscated payload keyed by the sector's byte offset. Both rules apply per
//! sector, so a request may mix written and unwritten sectors.

use std::io;

use crate::crypto::Mangler;
use crate::provider::Provider;

/// Where the data returned by a read came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Written block, de-obfuscated from the write-provider
    Upper,
    /// Unwritten block, copied from the read-provider
    Lower,
    /// Unwritten block and no read-provider
    Zero,
    /// Some sectors written, the rest served as unwritten
    Mixed,
}

/// The two providers plus the session's cipher context
#[derive(Debug)]
pub struct Overlay {
    upper: Provider,
    lower: Option<Provider>,
    mangler: Mangler,
    sector_size: usize,
}

impl Overlay {
    pub fn new(
        upper: Provider,
        lower: Option<Provider>,
        mangler: Mangler,
        sector_size: u32,
    ) -> Self {
        Overlay {
            upper,
            lower,
            mangler,
            sector_size: (sector_size as usize).max(1),
        }
    }

    /// The write-provider
    pub fn upper(&self) -> &Provider {
        &self.upper
    }

    /// The read-provider, if configured
    pub fn lower(&self) -> Option<&Provider> {
        self.lower.as_ref()
    }

    /// Fill `buf` with the plaintext of `[offset, offset + buf.len())`
    pub fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<ReadSource> {
        self.upper.read_at(buf, offset)?;

        let mut written = 0usize;
        let mut unwritten = 0usize;
        let mut at = offset;
        for chunk in buf.chunks_mut(self.sector_size) {
            if is_zero(chunk) {
                if let Some(lower) = &self.lower {
                    lower.read_at(chunk, at)?;
                }
                unwritten += 1;
            } else {
                self.mangler.apply(chunk, at);
                written += 1;
            }
            at += chunk.len() as u64;
        }

        Ok(match (written, unwritten) {
            (_, 0) => ReadSource::Upper,
            (0, _) if self.lower.is_some() => ReadSource::Lower,
            (0, _) => ReadSource::Zero,
            _ => ReadSource::Mixed,
        })
    }

    /// Store the plaintext in `buf` at `offset`
    ///
    /// `buf` is obfuscated in place.
    pub fn write(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.mangler.apply_sectors(buf, offset, self.sector_size);
        self.upper.write_at(buf, offset)
    }

    /// Return `[offset, offset + buf.len())` to the unwritten state
    ///
    /// `buf` is zeroed and used as the source of the write.
    pub fn delete(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        buf.fill(0);
        self.upper.write_at(buf, offset)
    }
}

/// True if every byte of `buf` is zero
pub fn is_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{MangleKey, IV_SIZE};
    use crate::provider::Access;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const SECTOR: usize = 512;

    fn mangler() -> Mangler {
        Mangler::new(MangleKey::default(), [0u8; IV_SIZE])
    }

    fn image(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn overlay_with_lower(fill: u8) -> (TempDir, Overlay) {
        let dir = tempdir().unwrap();
        let lower = image(dir.path(), "lower.img", &[fill; 4096]);
        let upper = image(dir.path(), "upper.img", &[0u8; 4096]);
        let overlay = Overlay::new(
            Provider::open(&upper, Access::ReadWrite).unwrap(),
            Some(Provider::open(&lower, Access::ReadOnly).unwrap()),
            mangler(),
            SECTOR as u32,
        );
        (dir, overlay)
    }

    #[test]
    fn test_is_zero() {
        assert!(is_zero(&[]));
        assert!(is_zero(&[0u8; 513]));
        for pos in [0, 7, 8, 100, 511, 512] {
            let mut buf = vec![0u8; 513];
            buf[pos] = 1;
            assert!(!is_zero(&buf), "non-zero byte at {} missed", pos);
        }
        // Unaligned start
        let buf = [0u8; 64];
        assert!(is_zero(&buf[3..61]));
    }

    #[test]
    fn test_unwritten_falls_back_to_lower() {
        let (_dir, overlay) = overlay_with_lower(0xaa);
        let mut buf = vec![0u8; SECTOR];
        assert_eq!(overlay.read(&mut buf, 0).unwrap(), ReadSource::Lower);
        assert!(buf.iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn test_unwritten_without_lower_reads_zero() {
        let dir = tempdir().unwrap();
        let upper = image(dir.path(), "upper.img", &[0u8; 4096]);
        let overlay = Overlay::new(
            Provider::open(&upper, Access::ReadWrite).unwrap(),
            None,
            mangler(),
            SECTOR as u32,
        );

        let mut buf = vec![0xffu8; SECTOR];
        assert_eq!(overlay.read(&mut buf, 1024).unwrap(), ReadSource::Zero);
        assert!(is_zero(&buf));
    }

    #[test]
    fn test_write_then_read_returns_plaintext() {
        let (_dir, overlay) = overlay_with_lower(0xaa);
        let plain: Vec<u8> = (0..SECTOR).map(|i| (i % 251) as u8 + 1).collect();

        let mut buf = plain.clone();
        overlay.write(&mut buf, 512).unwrap();

        let mut stored = vec![0u8; SECTOR];
        overlay.upper().read_at(&mut stored, 512).unwrap();
        assert_ne!(stored, plain, "payload must be stored obfuscated");

        let mut out = vec![0u8; SECTOR];
        assert_eq!(overlay.read(&mut out, 512).unwrap(), ReadSource::Upper);
        assert_eq!(out, plain);
    }

    #[test]
    fn test_multi_sector_write_read() {
        let (_dir, overlay) = overlay_with_lower(0x55);
        let plain = vec![0x01u8; 3 * SECTOR];

        let mut buf = plain.clone();
        overlay.write(&mut buf, 1024).unwrap();

        let mut out = vec![0u8; 3 * SECTOR];
        overlay.read(&mut out, 1024).unwrap();
        assert_eq!(out, plain);

        // Neighbouring sectors are untouched.
        let mut before = vec![0u8; SECTOR];
        overlay.read(&mut before, 512).unwrap();
        assert!(before.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_read_split_differently_from_write() {
        let (_dir, overlay) = overlay_with_lower(0x55);
        let plain: Vec<u8> = (0..4 * SECTOR).map(|i| (i / SECTOR) as u8 + 1).collect();

        let mut buf = plain.clone();
        overlay.write(&mut buf, 1024).unwrap();

        for (i, expected) in plain.chunks(SECTOR).enumerate() {
            let mut out = vec![0u8; SECTOR];
            let at = 1024 + (i * SECTOR) as u64;
            assert_eq!(overlay.read(&mut out, at).unwrap(), ReadSource::Upper);
            assert_eq!(&out[..], expected, "sector at {}", at);
        }

        // Straddling the end of the write mixes payload and fallback.
        let mut out = vec![0u8; 2 * SECTOR];
        assert_eq!(overlay.read(&mut out, 2560).unwrap(), ReadSource::Mixed);
        assert_eq!(&out[..SECTOR], &plain[3 * SECTOR..]);
        assert!(out[SECTOR..].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_zero_plaintext_write_reads_from_upper() {
        let (_dir, overlay) = overlay_with_lower(0xaa);

        let mut buf = vec![0u8; SECTOR];
        overlay.write(&mut buf, 512).unwrap();

        let mut stored = vec![0u8; SECTOR];
        overlay.upper().read_at(&mut stored, 512).unwrap();
        assert!(!is_zero(&stored));

        let mut out = vec![0xffu8; SECTOR];
        assert_eq!(overlay.read(&mut out, 512).unwrap(), ReadSource::Upper);
        assert!(is_zero(&out));
    }

    #[test]
    fn test_delete_restores_fallback() {
        let (_dir, overlay) = overlay_with_lower(0xaa);

        let mut buf = vec![0x01u8; SECTOR];
        overlay.write(&mut buf, 0).unwrap();

        let mut scratch = vec![0x77u8; SECTOR];
        overlay.delete(&mut scratch, 0).unwrap();

        let mut out = vec![0u8; SECTOR];
        assert_eq!(overlay.read(&mut out, 0).unwrap(), ReadSource::Lower);
        assert!(out.iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn test_read_error_is_reported() {
        let (_dir, overlay) = overlay_with_lower(0xaa);
        // Reading far past the end zero-fills, so an invalid offset is needed.
        let mut buf = vec![0u8; SECTOR];
        let err = overlay.read(&mut buf, u64::MAX - 10).unwrap_err();
        assert!(err.raw_os_error().is_some() || err.kind() == io::ErrorKind::InvalidInput);
    }
}
