//! Rules to Live By CLI
//!
//! Command-line client for the community rules feed.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rules_core::{
    Config, DisabledGateway, ExportFormat, Gateway, Identity, MemoryGateway, RestGateway,
    StoreOptions, SyncStore,
};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "rules")]
#[command(about = "Rules to Live By - a community feed of rules, ranked by votes")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a throwaway in-memory backend with sample rules
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the feed, ranked by upvotes
    #[command(alias = "ls")]
    List,
    /// Submit a new rule
    Add {
        /// Rule text
        text: String,
    },
    /// Vote for a rule, or take the vote back
    Vote {
        /// Rule id (full or prefix) or feed rank
        rule: String,
    },
    /// Take back all of your votes
    Clear,
    /// Export the rules you voted for
    Favorites {
        /// text (with site footer) or share
        #[arg(short, long, default_value = "text")]
        format: ExportFormat,
    },
    /// Show the feed and refresh it live
    Watch,
    /// Show your anonymous identity
    Whoami,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (backend_url, backend_key, realtime, ...)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work without a loaded store
    if let Some(Commands::Config { command }) = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, &output)
            }
        };
    }

    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config, &output);

    if let Some(Commands::Whoami) = &cli.command {
        return commands::whoami::show(&config, &output);
    }

    let identity = Identity::with_config(&config).load_or_create()?;
    if identity.is_new {
        info!("First run, created identity {}", identity.user_id);
    }

    let gateway = build_gateway(&config, cli.memory)?;
    let options = StoreOptions::from_config(&config);
    let store = SyncStore::new(gateway, Some(identity.user_id), options.clone());

    match cli.command.unwrap_or(Commands::List) {
        Commands::List => commands::feed::list(&store, &output).await,
        Commands::Add { text } => commands::feed::add(&store, text, &output).await,
        Commands::Vote { rule } => {
            commands::vote::toggle(&store, rule, &options, config.request_timeout(), &output)
                .await
        }
        Commands::Clear => commands::feed::clear(&store, &output).await,
        Commands::Favorites { format } => {
            commands::favorites::print(&store, format, &output).await
        }
        Commands::Watch => commands::watch::run(&store, &output).await,
        // Handled above
        Commands::Whoami | Commands::Config { .. } => Ok(()),
    }
}

/// Pick the backend: in-memory when asked, REST when configured, else disabled
fn build_gateway(config: &Config, memory: bool) -> Result<Arc<dyn Gateway>> {
    if memory {
        debug!("Using in-memory backend");
        return Ok(Arc::new(seeded_memory_gateway()));
    }

    if !config.is_configured() {
        debug!("No backend configured");
        return Ok(Arc::new(DisabledGateway));
    }

    let url = config.backend_url.as_deref().unwrap_or_default();
    let key = config.backend_key.as_deref().unwrap_or_default();
    let mut gateway = RestGateway::new(url, key, config.request_timeout())
        .context("Failed to set up backend client")?;
    if config.realtime {
        gateway = gateway.with_realtime();
    }
    debug!("Using backend at {}", gateway.base_url());
    Ok(Arc::new(gateway))
}

fn seeded_memory_gateway() -> MemoryGateway {
    let gateway = MemoryGateway::new().without_journal();
    for (text, upvotes) in [
        ("Call your parents more often than you think you should", 21),
        ("Leave every place a little better than you found it", 17),
        ("Drink a glass of water before your first coffee", 12),
        ("Say yes to the walk", 8),
        ("Never skip the thank-you note", 8),
        ("Read the whole email before you reply", 3),
    ] {
        gateway.seed_rule(text, "user_sample", upvotes);
    }
    gateway
}

/// Initialize logging to the configured log file, or stderr
///
/// `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config, output: &Output) {
    let level = if output.is_quiet() {
        "warn"
    } else {
        config.log_level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("rules_core={},rules_cli={}", level, level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore the error if a subscriber is already installed
    match &config.log_file {
        Some(path) => {
            let log_file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            let _ = builder.with_ansi(false).with_writer(log_file).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
