//! Session lifecycle
//!
//! Opens the providers, checks that their sizes fit together, resolves the
//! sector size, and either attaches the overlay to a kernel unit or scans it
//! offline.

use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::engine::{self, DispatchStats, Dispatcher, Overlay};
use crate::error::{Error, Result};
use crate::gate::{GateChannel, UnitInfo, UnitSpec, UNIT_AUTO};
use crate::provider::{Access, Provider};

/// One overlay instance
#[derive(Debug)]
pub struct GateSession {
    unit: i32,
    media_size: u64,
    sector_size: u32,
    timeout: u32,
    flags: u32,
    overlay: Overlay,
}

impl GateSession {
    /// Open the providers described by `config` and resolve the geometry
    ///
    /// `upper_access` is read-write for live sessions and read-only for
    /// offline scans.
    pub fn open(config: &GateConfig, upper_access: Access) -> Result<Self> {
        config.validate()?;

        let write_path = config.write_provider.as_deref().ok_or_else(|| {
            Error::InvalidConfig("A write-provider is required".to_string())
        })?;

        let lower = config
            .read_provider
            .as_deref()
            .map(|path| Provider::open(path, Access::ReadOnly))
            .transpose()?;
        let upper = Provider::open(write_path, upper_access)?;

        let upper_size = upper.media_size()?;
        let media_size = match &lower {
            Some(lower) => {
                let lower_size = lower.media_size()?;
                if upper_size < lower_size {
                    return Err(Error::MediaSize(format!(
                        "upper level provider too small: {} {}",
                        lower_size, upper_size
                    )));
                }
                if upper_size != lower_size {
                    warn!(
                        "Provider media sizes mismatch: {} {}",
                        lower_size, upper_size
                    );
                }
                lower_size
            }
            None => upper_size,
        };

        let sector_size = match config.sector_size {
            0 => lower.as_ref().unwrap_or(&upper).sector_size()?,
            size => size,
        };
        if sector_size == 0 || !sector_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "Invalid sector size {}",
                sector_size
            )));
        }
        if media_size % u64::from(sector_size) != 0 {
            return Err(Error::MediaSize(format!(
                "Invalid media size {} for {} bytes sector",
                media_size, sector_size
            )));
        }

        debug!(
            "Overlay geometry: {} bytes, {} byte sectors",
            media_size, sector_size
        );

        Ok(GateSession {
            unit: config.unit,
            media_size,
            sector_size,
            timeout: config.timeout,
            flags: config.flags(),
            overlay: Overlay::new(upper, lower, config.mangler()?, sector_size),
        })
    }

    /// Open the providers and create a new kernel unit for them
    pub fn create<C: GateChannel>(config: &GateConfig, channel: &mut C) -> Result<Self> {
        let mut session = Self::open(config, Access::ReadWrite)?;

        let spec = UnitSpec {
            unit: session.unit,
            media_size: session.media_size,
            sector_size: session.sector_size,
            timeout: session.timeout,
            flags: session.flags,
            info: session.info(),
        };
        session.unit = channel.create(&spec)?;

        info!(
            "Created unit {} ({} bytes, {} byte sectors)",
            session.unit, session.media_size, session.sector_size
        );
        Ok(session)
    }

    /// Take over an existing unit whose previous server went away
    pub fn rescue<C: GateChannel>(config: &GateConfig, channel: &mut C) -> Result<Self> {
        if config.unit == UNIT_AUTO {
            return Err(Error::InvalidConfig("Required unit number.".to_string()));
        }

        let session = Self::open(config, Access::ReadWrite)?;
        channel.cancel(session.unit)?;

        info!("Rescued unit {}", session.unit);
        Ok(session)
    }

    /// Run the dispatch loop until the unit is cancelled
    pub fn serve<C: GateChannel>(&self, channel: &mut C) -> Result<DispatchStats> {
        let mut dispatcher = Dispatcher::new(self.unit, self.sector_size, &self.overlay)?;
        dispatcher.serve(channel)
    }

    /// Write the device's logical contents to `out`
    pub fn cat<W: Write>(&self, out: &mut W) -> Result<u64> {
        engine::scan(&self.overlay, self.media_size, self.sector_size, out)
    }

    pub fn unit(&self) -> i32 {
        self.unit
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Description handed to the kernel: the provider paths
    fn info(&self) -> String {
        let upper = self.overlay.upper().path();
        match self.overlay.lower() {
            Some(lower) => format!("{} {}", display(lower.path()), display(upper)),
            None => display(upper),
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Open the providers read-only and scan them to `out`
pub fn cat<W: Write>(config: &GateConfig, out: &mut W) -> Result<u64> {
    GateSession::open(config, Access::ReadOnly)?.cat(out)
}

/// Tear down a unit
pub fn destroy<C: GateChannel>(channel: &mut C, unit: i32, force: bool) -> Result<()> {
    if unit == UNIT_AUTO {
        return Err(Error::InvalidConfig("Required unit number.".to_string()));
    }
    channel.destroy(unit, force)?;
    info!("Destroyed unit {}", unit);
    Ok(())
}

/// Enumerate units, optionally only `unit`
pub fn list<C: GateChannel>(channel: &mut C, unit: Option<i32>) -> Result<Vec<UnitInfo>> {
    channel.list(unit.filter(|&u| u != UNIT_AUTO))
}
