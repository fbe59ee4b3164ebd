//! linode-ddns - keep a Linode A record pointed at this host.

use clap::{Parser, Subcommand};
use linode_ddns::config::Config;
use linode_ddns::detector::create_resolver;
use linode_ddns::domain::split_domain;
use linode_ddns::providers::create_provider;
use linode_ddns::reconcile::{CycleOutcome, Reconciler};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linode-ddns")]
#[command(about = "Keep a Linode DNS A record pointed at this host's public IPv4 address")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Domain to post to
    #[arg(short, long, global = true)]
    domain: Option<String>,

    /// API token to use (the TOKEN environment variable takes precedence)
    #[arg(short, long, global = true)]
    token: Option<String>,

    /// Turn on debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the public IP and update the record when it changes (default)
    Run {
        /// Check interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Reconcile the record once and exit
    Update {
        /// Update even if the IP matches the last one seen
        #[arg(short, long)]
        force: bool,
    },

    /// Show the detected public IP
    Status,

    /// Check the API token is accepted
    Validate,
}

fn get_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }

    let candidates = [
        Config::default_path().ok(),
        Some(PathBuf::from("/etc/linode-ddns/config.toml")),
        Some(PathBuf::from("config.toml")),
    ];

    for candidate in candidates.into_iter().flatten() {
        if candidate.exists() {
            return candidate;
        }
    }

    Config::default_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = get_config_path(cli.config);
    let mut config = Config::load_from(&config_path)?;

    if let Some(domain) = cli.domain {
        config.domain = domain;
    }
    if let Some(token) = cli.token {
        config.token = Some(token);
    }
    tracing::debug!("Parsed domain: {}", config.domain);

    let command = cli.command.unwrap_or(Commands::Run { interval: None });

    if !matches!(command, Commands::Status) && config.resolve_token().is_err() {
        eprintln!("Error: No Token provided");
        std::process::exit(1);
    }

    match command {
        Commands::Run { interval } => {
            if let Some(interval) = interval {
                config.check_interval_secs = interval;
            }
            cmd_run(config).await?;
        }
        Commands::Update { force } => cmd_update(config, force).await?,
        Commands::Status => cmd_status(config).await?,
        Commands::Validate => cmd_validate(config).await?,
    }

    Ok(())
}

fn build_reconciler(config: &Config) -> anyhow::Result<Reconciler> {
    config.validate()?;
    split_domain(&config.domain)?;

    let resolver = create_resolver(config)?;
    let provider = create_provider(config)?;

    Ok(
        Reconciler::new(resolver, provider, config.domain.trim())
            .retry_failed_updates(config.retry_failed_updates),
    )
}

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    let mut reconciler = build_reconciler(&config)?;
    let interval = Duration::from_secs(config.check_interval_secs);

    reconciler
        .run_until(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}

async fn cmd_update(config: Config, force: bool) -> anyhow::Result<()> {
    let mut reconciler = build_reconciler(&config)?;

    let outcome = if force {
        reconciler.force_cycle().await
    } else {
        reconciler.run_cycle().await
    };
    outcome.report(reconciler.domain());

    if !matches!(outcome, CycleOutcome::Applied { .. }) {
        std::process::exit(1);
    }

    Ok(())
}

async fn cmd_status(config: Config) -> anyhow::Result<()> {
    let resolver = create_resolver(&config)?;

    println!("linode-ddns Status");
    println!("==================\n");

    match resolver.resolve().await {
        Ok(ip) => println!("Current Public IP: {}", ip),
        Err(e) => println!("Failed to detect IP: {}", e),
    }

    if !config.domain.trim().is_empty() {
        match split_domain(&config.domain) {
            Ok(parts) => {
                let name = if parts.is_apex() {
                    "(apex)"
                } else {
                    parts.subdomain.as_str()
                };
                println!("Domain: {} (zone {}, record {})", parts.fqdn(), parts.apex, name);
            }
            Err(e) => println!("Domain: {}", e),
        }
    }

    Ok(())
}

async fn cmd_validate(config: Config) -> anyhow::Result<()> {
    let provider = create_provider(&config)?;

    print!("  {}: ", provider.name());

    match provider.auth_valid().await {
        Ok(true) => println!("OK"),
        Ok(false) => {
            println!("FAILED - token rejected");
            std::process::exit(1);
        }
        Err(e) => {
            println!("FAILED - {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
