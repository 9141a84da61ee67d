//! EDA-Lab CLI - Main entry point

use clap::{Parser, Subcommand};
use edalab_rpc::{commands, AppConfig, AppContext};
use edalab_simulator::parse_event_type;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "edalab")]
#[command(about = "EDA-Lab - event-driven banking pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "EDALAB_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger storage, `memory` or `sqlite:<path>`
    #[arg(long)]
    ledger: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate events at a fixed rate and apply them to the ledger
    Simulate {
        /// Events per second
        #[arg(long)]
        rate: Option<u32>,
        /// Run length in seconds (0 runs until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
        /// Event types, by record name or topic
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        /// Seed for reproducible data
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Produce a burst of one event type
    Produce {
        /// Record name or topic
        event_type: String,
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Stream events to TCP clients until Ctrl-C
    Serve {
        /// Listen address (overrides hub.addr)
        #[arg(long)]
        hub_addr: Option<String>,
        /// Also run a simulation at this rate
        #[arg(long)]
        rate: Option<u32>,
    },

    /// Replay a fixed banking story and show the resulting ledger
    Scenario,

    /// List the registered event schemas
    Schemas {
        /// Print the full schema definitions
        #[arg(long)]
        definitions: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "edalab=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(ledger) = cli.ledger {
        config.ledger.storage = ledger;
    }

    match cli.command {
        Commands::Simulate {
            rate,
            duration,
            types,
            seed,
        } => {
            if let Some(rate) = rate {
                config.simulation.rate = rate;
            }
            if let Some(duration) = duration {
                config.simulation.duration_secs = duration;
            }
            if !types.is_empty() {
                config.simulation.event_types = types;
            }
            if seed.is_some() {
                config.simulation.seed = seed;
            }
            let simulation = config.simulation_config()?;

            let mut ctx = AppContext::new(config).await?;
            let result = commands::simulate(&mut ctx, simulation).await;
            ctx.shutdown().await;
            result?;
        }

        Commands::Produce { event_type, count } => {
            let kind = parse_event_type(&event_type)?;
            let mut ctx = AppContext::new(config).await?;
            let result = commands::produce(&mut ctx, kind, count).await;
            ctx.shutdown().await;
            result?;
        }

        Commands::Serve { hub_addr, rate } => {
            if let Some(addr) = hub_addr {
                config.hub.addr = addr;
            }
            let simulation = match rate {
                Some(rate) => {
                    config.simulation.rate = rate;
                    Some(config.simulation_config()?)
                }
                None => None,
            };
            let addr = config.hub.addr.clone();

            let mut ctx = AppContext::new(config).await?;
            let result = commands::serve(&mut ctx, &addr, simulation).await;
            ctx.shutdown().await;
            result?;
        }

        Commands::Scenario => {
            let mut ctx = AppContext::new(config).await?;
            let result = commands::scenario(&mut ctx).await;
            ctx.shutdown().await;
            result?;
        }

        Commands::Schemas { definitions } => {
            let ctx = AppContext::new(config).await?;
            let result = commands::schemas(&ctx, definitions).await;
            ctx.shutdown().await;
            result?;
        }
    }

    Ok(())
}
