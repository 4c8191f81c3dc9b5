//! Configuration management for ggateu

use crate::crypto::{MangleKey, Mangler, DEFAULT_KEY, IV_SIZE, KEY_SIZE};
use crate::error::{Error, Result};
use crate::gate::{DEFAULT_TIMEOUT, FLAG_READONLY, FLAG_WRITEONLY, UNIT_AUTO};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest sector size accepted from the operator
pub const MIN_SECTOR_SIZE: u32 = 512;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Unit number (-1 lets the kernel choose)
    pub unit: i32,

    /// Sector size in bytes (0 = use the provider's)
    pub sector_size: u32,

    /// Kernel request timeout in seconds (0 = kernel default)
    pub timeout: u32,

    /// Expose the unit read-only
    pub read_only: bool,

    /// Expose the unit write-only
    pub write_only: bool,

    /// Lower, immutable provider
    pub read_provider: Option<PathBuf>,

    /// Upper provider holding the obfuscated overlay
    pub write_provider: Option<PathBuf>,

    /// Obfuscation key material, at most 32 bytes
    pub mangle_key: String,

    /// Salsa20 IV
    #[serde(with = "hex_serde")]
    pub mangle_iv: [u8; IV_SIZE],

    /// Destroy a unit even if it is open
    pub force: bool,

    /// Stay in the foreground and log at debug level
    pub verbose: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            unit: UNIT_AUTO,
            sector_size: 0,
            timeout: DEFAULT_TIMEOUT,
            read_only: false,
            write_only: false,
            read_provider: None,
            write_provider: None,
            mangle_key: DEFAULT_KEY.to_string(),
            mangle_iv: [0u8; IV_SIZE],
            force: false,
            verbose: false,
        }
    }
}

impl GateConfig {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: GateConfig = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load `path`, or the default config file if present, or the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                let mut config = GateConfig::default();
                config.apply_env_overrides();
                Ok(config)
            }
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GGATEU_KEY") {
            if !key.is_empty() {
                self.mangle_key = key;
            }
        }

        if let Ok(sector_size) = std::env::var("GGATEU_SECTOR_SIZE") {
            if let Ok(size) = sector_size.trim().parse::<u32>() {
                self.sector_size = size;
            }
        }

        if let Ok(timeout) = std::env::var("GGATEU_TIMEOUT") {
            if let Ok(secs) = timeout.trim().parse::<u32>() {
                self.timeout = secs;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.unit < UNIT_AUTO {
            return Err(Error::InvalidConfig(format!(
                "Invalid unit number: {}",
                self.unit
            )));
        }

        if self.sector_size != 0
            && (!self.sector_size.is_power_of_two() || self.sector_size < MIN_SECTOR_SIZE)
        {
            return Err(Error::InvalidConfig(format!(
                "Invalid sector size {}: must be a power of two, at least {}",
                self.sector_size, MIN_SECTOR_SIZE
            )));
        }

        if self.mangle_key.len() > KEY_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Invalid key size, {} bytes max.",
                KEY_SIZE
            )));
        }

        if self.read_only && self.write_only {
            return Err(Error::InvalidConfig(
                "A unit cannot be both read-only and write-only".to_string(),
            ));
        }

        Ok(())
    }

    /// Unit flags passed to the kernel
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.read_only {
            flags |= FLAG_READONLY;
        }
        if self.write_only {
            flags |= FLAG_WRITEONLY;
        }
        flags
    }

    /// Build the session's cipher context
    pub fn mangler(&self) -> Result<Mangler> {
        let key = MangleKey::from_material(self.mangle_key.as_bytes())?;
        Ok(Mangler::new(key, self.mangle_iv))
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        GateConfig {
            mangle_key: "<redacted>".to_string(),
            ..self.clone()
        }
    }
}

/// `<config dir>/ggateu/config.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ggateu").join("config.json"))
}

/// Hex serialization for the IV
mod hex_serde {
    use crate::crypto::{parse_iv, IV_SIZE};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; IV_SIZE], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; IV_SIZE], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok([0u8; IV_SIZE]);
        }
        parse_iv(&s).map_err(serde::de::Error::custom)
    }
}
