//! Keystream obfuscation applied to blocks stored in the write-provider

mod key;
mod mangle;

pub use key::{parse_iv, MangleKey, DEFAULT_KEY};
pub use mangle::Mangler;

/// Salsa20 key size in bytes
pub const KEY_SIZE: usize = 32;

/// Salsa20 IV size in bytes
pub const IV_SIZE: usize = 8;
