//! ggateu - GEOM Gate copy-on-write overlay with obfuscated upper layer
//!
//! Usage:
//!   ggateu create [-v] [--log-file path] [-s sectorsize] [-t timeout] [-i key] [-u unit] [-r read-provider] -w write-provider
//!   ggateu rescue [-v] -u unit [-i key] [-r read-provider] -w write-provider
//!   ggateu destroy [-f] -u unit
//!   ggateu list [-v] [-u unit]
//!   ggateu cat [-s sectorsize] [-i key] [-r read-provider] -w write-provider

use clap::{Args, Parser, Subcommand};
use ggateu::{
    config::{self, GateConfig},
    gate::{GateChannel, GateDevice, PROVIDER_NAME, UNIT_AUTO},
    platform, session,
    session::GateSession,
    Error, Result,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "ggateu")]
#[command(version)]
#[command(about = "GEOM Gate overlay: read-provider below, obfuscated write-provider on top")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Stay in the foreground and enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append logs to this file; a detached worker logs nowhere else
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Provider and key options shared by the data-path commands
#[derive(Args)]
struct ProviderArgs {
    /// Lower, read-only provider
    #[arg(short, long, value_name = "PATH")]
    read_provider: Option<PathBuf>,

    /// Upper provider receiving all writes
    #[arg(short, long, value_name = "PATH")]
    write_provider: Option<PathBuf>,

    /// Obfuscation key (at most 32 bytes)
    #[arg(short = 'i', long)]
    key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a unit and serve it
    Create {
        #[command(flatten)]
        providers: ProviderArgs,

        /// Unit number (default: first free)
        #[arg(short, long)]
        unit: Option<i32>,

        /// Sector size (default: read-provider's)
        #[arg(short, long)]
        sector_size: Option<u32>,

        /// Request timeout in seconds
        #[arg(short, long)]
        timeout: Option<u32>,

        /// Expose the unit read-only
        #[arg(long, conflicts_with = "write_only")]
        read_only: bool,

        /// Expose the unit write-only
        #[arg(long)]
        write_only: bool,
    },

    /// Resume serving an existing unit
    Rescue {
        #[command(flatten)]
        providers: ProviderArgs,

        /// Unit number
        #[arg(short, long)]
        unit: i32,
    },

    /// Destroy a unit
    Destroy {
        /// Unit number
        #[arg(short, long)]
        unit: i32,

        /// Destroy even if the unit is open
        #[arg(short, long)]
        force: bool,
    },

    /// List units
    List {
        /// Only show this unit
        #[arg(short, long)]
        unit: Option<i32>,
    },

    /// Write the overlay's logical contents to stdout
    Cat {
        #[command(flatten)]
        providers: ProviderArgs,

        /// Sector size (default: read-provider's)
        #[arg(short, long)]
        sector_size: Option<u32>,
    },

    /// Print the effective configuration
    ShowConfig,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for `cat` output
    let log_level = if cli.verbose { "debug" } else { "info" };

    let writer = match platform::log_writer(cli.log_file.as_deref()) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(writer)
        .with_ansi(cli.log_file.is_none())
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    if let Err(e) = run(cli) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = GateConfig::load_or_default(cli.config.as_deref())?;
    config.verbose |= cli.verbose;

    match cli.command {
        Commands::Create {
            providers,
            unit,
            sector_size,
            timeout,
            read_only,
            write_only,
        } => {
            providers.apply(&mut config);
            if let Some(unit) = unit {
                config.unit = unit;
            }
            if let Some(size) = sector_size {
                config.sector_size = size;
            }
            if let Some(secs) = timeout {
                config.timeout = secs;
            }
            config.read_only |= read_only;
            config.write_only |= write_only;
            cmd_create(&config)
        }

        Commands::Rescue { providers, unit } => {
            providers.apply(&mut config);
            config.unit = unit;
            cmd_rescue(&config)
        }

        Commands::Destroy { unit, force } => {
            config.unit = unit;
            config.force |= force;
            cmd_destroy(&config)
        }

        Commands::List { unit } => cmd_list(unit, config.verbose),

        Commands::Cat {
            providers,
            sector_size,
        } => {
            providers.apply(&mut config);
            if let Some(size) = sector_size {
                config.sector_size = size;
            }
            cmd_cat(&config)
        }

        Commands::ShowConfig => cmd_show_config(&config),
    }
}

impl ProviderArgs {
    fn apply(self, config: &mut GateConfig) {
        if self.read_provider.is_some() {
            config.read_provider = self.read_provider;
        }
        if self.write_provider.is_some() {
            config.write_provider = self.write_provider;
        }
        if let Some(key) = self.key {
            config.mangle_key = key;
        }
    }
}

fn cmd_create(config: &GateConfig) -> Result<()> {
    platform::load_module()?;

    let mut gate = GateDevice::new();
    let session = GateSession::create(config, &mut gate)?;

    if config.unit == UNIT_AUTO {
        println!("{}{}", PROVIDER_NAME, session.unit());
        std::io::stdout().flush()?;
    }

    serve_detached(config, &session, &mut gate)
}

fn cmd_rescue(config: &GateConfig) -> Result<()> {
    let mut gate = GateDevice::new();
    let session = GateSession::rescue(config, &mut gate)?;
    serve_detached(config, &session, &mut gate)
}

/// Daemonize unless verbose, then serve until the unit is cancelled
fn serve_detached<C: GateChannel>(
    config: &GateConfig,
    session: &GateSession,
    gate: &mut C,
) -> Result<()> {
    if !config.verbose {
        info!("Detaching from the terminal");
        if let Err(e) = platform::detach() {
            if let Err(destroy_err) = gate.destroy(session.unit(), true) {
                error!("Cannot destroy unit {}: {}", session.unit(), destroy_err);
            }
            return Err(e);
        }
    }

    session.serve(gate)?;
    Ok(())
}

fn cmd_destroy(config: &GateConfig) -> Result<()> {
    let mut gate = GateDevice::new();
    session::destroy(&mut gate, config.unit, config.force)
}

fn cmd_list(unit: Option<i32>, verbose: bool) -> Result<()> {
    let mut gate = GateDevice::new();
    let units = session::list(&mut gate, unit)?;

    for info in units {
        if verbose {
            println!(
                "{}\tmediasize={}\tsectorsize={}",
                info.name, info.media_size, info.sector_size
            );
        } else {
            println!("{}", info.name);
        }
    }
    Ok(())
}

fn cmd_cat(config: &GateConfig) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let written = session::cat(config, &mut out)?;
    info!("Wrote {} bytes", written);
    Ok(())
}

fn cmd_show_config(config: &GateConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(&config.redacted())
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    println!("{}", json);
    if let Some(path) = config::default_path() {
        info!("Default config file: {:?}", path);
    }
    Ok(())
}
