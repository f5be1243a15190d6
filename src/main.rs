//! Binary entrypoint for the instancer CLI.
//!
//! Commands:
//! - `init` - write a default `instancer.toml`
//! - `check-config` - load and validate the configuration
//! - `simulate --definitions <dir> --players <n>` - run the service over the
//!   in-memory host, start one instance per dungeon and print a JSON report
//!
//! See the library crate docs for module-level details: `instancer::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::IVec3;
use log::{info, warn};
use serde::Serialize;

use instancer::config::Config;
use instancer::context::AppContext;
use instancer::dungeon::{InstanceOption, InstanceStatus};
use instancer::host::memory::MemoryHost;
use instancer::host::PlayerId;
use instancer::identifier::IdKey;
use instancer::loader::{DefinitionSet, LoadReport};
use instancer::metrics::Snapshot;

#[derive(Parser)]
#[command(name = "instancer")]
#[command(about = "Instanced dungeon orchestration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "instancer.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Load and validate the configuration file
    CheckConfig,
    /// Run the service against an in-memory world
    Simulate {
        /// Directory holding formats.json, mobs.json and components.json
        #[arg(short, long, default_value = "definitions")]
        definitions: String,

        /// Players to spread over the started instances
        #[arg(short, long, default_value_t = 1)]
        players: usize,

        /// Seconds to let maintenance run before the report
        #[arg(long, default_value_t = 1)]
        settle: u64,
    },
}

#[derive(Serialize)]
struct SimulationReport {
    load: LoadReport,
    instances: Vec<InstanceStatus>,
    metrics: Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Created default configuration at {}", cli.config);
            println!("Edit the [dungeon] section, then run: instancer check-config");
        }
        Commands::CheckConfig => {
            let config = Config::load(&cli.config).await?;
            config.validate()?;
            println!("Configuration OK");
            println!("  Backing world: {}", config.dungeon.world);
            println!("  Grid size: {}", config.dungeon.grid_size);
            println!("  Cached instances per dungeon: {}", config.dungeon.cache_size_per_dungeon);
            println!("  Key auto-pickup: {}s", config.keys.auto_pickup_secs);
        }
        Commands::Simulate {
            definitions,
            players,
            settle,
        } => {
            let config = match pre_config {
                Some(config) => config,
                None => {
                    warn!("No configuration at {}, using defaults", cli.config);
                    Config::default()
                }
            };
            config.validate()?;
            let report = simulate(config, &definitions, players, Duration::from_secs(settle)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn simulate(config: Config, definitions: &str, players: usize, settle: Duration) -> Result<SimulationReport> {
    let definitions = DefinitionSet::read_dir(definitions)
        .await
        .with_context(|| format!("Failed to read definitions from {}", definitions))?;

    let host = Arc::new(MemoryHost::default());
    for format in &definitions.formats {
        if let Some(template) = &format.template {
            let extent = format
                .rooms
                .iter()
                .fold(IVec3::ONE, |acc, room| acc.max(room.max + IVec3::ONE));
            host.register_template(template, extent, Vec::new());
        }
    }

    let app = AppContext::new(config, host.clone(), host.clone())?;
    let load = app.enable(&definitions).await?;
    info!("Simulating {} player(s) over {} format(s)", players, definitions.formats.len());

    let roster: Vec<PlayerId> = (0..players).map(|_| host.join_at_spawn()).collect();
    let names: Vec<IdKey> = app.formats.keys();
    for (index, format) in names.iter().enumerate() {
        let party: Vec<PlayerId> = roster
            .iter()
            .enumerate()
            .filter(|(i, _)| i % names.len() == index)
            .map(|(_, p)| *p)
            .collect();
        match app
            .manager
            .start(&app, format.clone(), InstanceOption::ConsumeCache, party)
            .await
        {
            Ok(instance) => info!("Started {} as {}", format, instance.uuid()),
            Err(e) => warn!("Could not start {}: {}", format, e),
        }
    }

    tokio::time::sleep(settle).await;
    app.lanes.components.flush().await?;
    let report = SimulationReport {
        load,
        instances: app.manager.status(&app),
        metrics: app.metrics.snapshot(),
    };
    app.disable().await?;
    Ok(report)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity; the config level applies when no -v is given
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let file = config.as_ref().and_then(|c| c.logging.file.clone());
    match file.map(|path| std::fs::OpenOptions::new().create(true).append(true).open(path)) {
        Some(Ok(f)) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Echo to the console only when someone is watching
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        _ => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}
