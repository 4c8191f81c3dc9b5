//! Obfuscation key material
//!
//! The operator hands us a short string; it is copied into a fixed-size,
//! zero-padded Salsa20 key that is wiped when dropped.

use crate::crypto::{IV_SIZE, KEY_SIZE};
use crate::error::{Error, Result};
use zeroize::Zeroizing;

/// Key used when the operator does not supply one
pub const DEFAULT_KEY: &str = "ggateu";

/// Fixed-size keystream key (zeroized on drop)
#[derive(Clone)]
pub struct MangleKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl MangleKey {
    /// Build a key from operator-supplied material
    ///
    /// Shorter input is zero-padded to `KEY_SIZE` bytes, longer input is
    /// rejected.
    pub fn from_material(material: &[u8]) -> Result<Self> {
        if material.len() > KEY_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Invalid key size, {} bytes max.",
                KEY_SIZE
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key[..material.len()].copy_from_slice(material);
        Ok(MangleKey { key })
    }

    /// Get the key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Default for MangleKey {
    fn default() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key[..DEFAULT_KEY.len()].copy_from_slice(DEFAULT_KEY.as_bytes());
        MangleKey { key }
    }
}

impl std::fmt::Debug for MangleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MangleKey(..)")
    }
}

/// Parse a hex IV, e.g. from the configuration file
pub fn parse_iv(hex_iv: &str) -> Result<[u8; IV_SIZE]> {
    let bytes = hex::decode(hex_iv.trim())
        .map_err(|e| Error::InvalidConfig(format!("Invalid IV: {}", e)))?;
    <[u8; IV_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
        Error::InvalidConfig(format!(
            "Invalid IV length: {} bytes, need {}",
            bytes.len(),
            IV_SIZE
        ))
    })
}
