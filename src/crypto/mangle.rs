//! Offset-keyed Salsa20 keystream
//!
//! Every sector is XORed with the Salsa20 keystream for the configured IV,
//! with the 64-bit block counter set to the sector's byte offset. Each sector
//! is keyed on its own, so the stored bytes do not depend on how requests
//! were split. Applying the transform twice at the same offset gives back the
//! input, so nothing but the key has to be persisted. This is obfuscation, not confidentiality:
//! there is no authentication and keystream windows of nearby offsets overlap.

use salsa20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use salsa20::Salsa20;

use super::{MangleKey, IV_SIZE};

/// Salsa20 block length in bytes
const SALSA_BLOCK: u128 = 64;

/// Keyed cipher context owned by a session
#[derive(Clone, Debug)]
pub struct Mangler {
    key: MangleKey,
    iv: [u8; IV_SIZE],
}

impl Mangler {
    pub fn new(key: MangleKey, iv: [u8; IV_SIZE]) -> Self {
        Mangler { key, iv }
    }

    /// Transform `buf` in place for the block at byte `offset`
    pub fn apply(&self, buf: &mut [u8], offset: u64) {
        let mut cipher = Salsa20::new(self.key.key().into(), (&self.iv).into());
        cipher.seek(u128::from(offset) * SALSA_BLOCK);
        cipher.apply_keystream(buf);
    }

    /// Transform every `sector_size` chunk of `buf` at its own offset
    pub fn apply_sectors(&self, buf: &mut [u8], offset: u64, sector_size: usize) {
        let mut at = offset;
        for chunk in buf.chunks_mut(sector_size.max(1)) {
            self.apply(chunk, at);
            at += chunk.len() as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mangler() -> Mangler {
        Mangler::new(MangleKey::default(), [0u8; IV_SIZE])
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_apply_twice_restores_plaintext() {
        let m = mangler();
        for offset in [0u64, 512, 4096, 1 << 40] {
            let plain = sample(1024);
            let mut buf = plain.clone();
            m.apply(&mut buf, offset);
            assert_ne!(buf, plain);
            m.apply(&mut buf, offset);
            assert_eq!(buf, plain);
        }
    }

    #[test]
    fn test_keystream_depends_on_offset() {
        let m = mangler();
        let mut a = vec![0u8; 512];
        let mut b = vec![0u8; 512];
        m.apply(&mut a, 0);
        m.apply(&mut b, 512);
        assert_ne!(a, b);
    }

    #[test]
    fn test_keystream_depends_on_key() {
        let other = Mangler::new(MangleKey::from_material(b"other").unwrap(), [0u8; IV_SIZE]);
        let mut a = vec![0u8; 512];
        let mut b = vec![0u8; 512];
        mangler().apply(&mut a, 0);
        other.apply(&mut b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_keystream_depends_on_iv() {
        let other = Mangler::new(MangleKey::default(), [1u8; IV_SIZE]);
        let mut a = vec![0u8; 512];
        let mut b = vec![0u8; 512];
        mangler().apply(&mut a, 4096);
        other.apply(&mut b, 4096);
        assert_ne!(a, b);
    }

    #[test]
    fn test_offset_selects_block_counter() {
        // Counter N starts at keystream byte N * 64 of the counter-0 stream.
        let m = mangler();
        let mut long = vec![0u8; 64 * 4];
        m.apply(&mut long, 0);
        let mut shifted = vec![0u8; 64];
        m.apply(&mut shifted, 3);
        assert_eq!(&long[64 * 3..], &shifted[..]);
    }

    #[test]
    fn test_sectors_are_keyed_independently() {
        let m = mangler();
        let plain = sample(4 * 512);

        let mut whole = plain.clone();
        m.apply_sectors(&mut whole, 1024, 512);

        let mut split = plain.clone();
        for (i, chunk) in split.chunks_mut(512).enumerate() {
            m.apply(chunk, 1024 + (i * 512) as u64);
        }
        assert_eq!(whole, split);

        // The middle two sectors alone give the same bytes.
        let mut middle = plain[512..1536].to_vec();
        m.apply_sectors(&mut middle, 1536, 512);
        assert_eq!(&middle[..], &whole[512..1536]);

        m.apply_sectors(&mut whole, 1024, 512);
        assert_eq!(whole, plain);
    }
}
