//! CLI command definitions for modelmux.
//!
//! Provides the `run` command that loads provider definitions, connects
//! to the shared counter store, and runs the scheduler until interrupted.

use std::fs;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::events::SchedulerEvent;
use crate::metrics::init_metrics;
use crate::provider::{HttpProviderClient, ProviderConfig, ProviderRegistry};
use crate::ratelimit::RedisCounterStore;
use crate::scheduler::Scheduler;

/// Multi-provider inference request scheduler.
#[derive(Parser)]
#[command(name = "modelmux")]
#[command(about = "Schedule inference requests across model providers")]
#[command(version)]
#[command(
    long_about = "modelmux routes inference requests across interchangeable model providers\nwith priority queueing, distributed rate limiting, response caching, and\ncost-aware failover.\n\nExample usage:\n  modelmux run --providers ./providers.json --redis-url redis://localhost:6379"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the scheduler until interrupted.
    Run(RunArgs),
}

/// Arguments for `modelmux run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the provider definitions file (JSON array).
    #[arg(short, long, default_value = "./providers.json")]
    pub providers: String,

    /// Redis URL for the shared rate-limit counter store.
    #[arg(long, env = "MODELMUX_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Monthly spending budget in dollars.
    #[arg(long, env = "MODELMUX_MONTHLY_BUDGET")]
    pub monthly_budget: Option<f64>,

    /// Maximum retry attempts before a request fails terminally.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Reject requests when the counter store is unreachable instead of
    /// admitting them.
    #[arg(long)]
    pub fail_closed: bool,
}

/// One entry in the provider definitions file.
#[derive(Debug, Deserialize)]
struct ProviderFileEntry {
    #[serde(flatten)]
    config: ProviderConfig,
    /// API key for this provider's endpoint.
    api_key: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_scheduler(args).await,
    }
}

async fn run_scheduler(args: RunArgs) -> anyhow::Result<()> {
    let mut config = SchedulerConfig::from_env()?;
    if let Some(redis_url) = args.redis_url {
        config.redis_url = redis_url;
    }
    if let Some(budget) = args.monthly_budget {
        config.monthly_budget = budget;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if args.fail_closed {
        config.fail_open = false;
    }
    config.validate()?;

    init_metrics()?;

    let registry = load_providers(&args.providers)?;
    if registry.is_empty() {
        anyhow::bail!("no providers defined in {}", args.providers);
    }
    info!(
        providers = registry.len(),
        file = %args.providers,
        "Loaded provider definitions"
    );

    let store = RedisCounterStore::connect(&config.redis_url).await?;
    info!(redis_url = %config.redis_url, "Connected to counter store");

    let scheduler = Scheduler::new(config, registry, Arc::new(store))?;
    scheduler.start()?;

    // Mirror lifecycle events into the log until shutdown.
    let mut events = scheduler.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SchedulerEvent::CostAlert {
                    level,
                    utilization,
                    projected_monthly,
                } => warn!(
                    level = ?level,
                    utilization = utilization,
                    projected_monthly = projected_monthly,
                    "Cost alert"
                ),
                other => tracing::debug!(event = ?other, "Scheduler event"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    scheduler.shutdown().await?;
    event_logger.abort();
    Ok(())
}

fn load_providers(path: &str) -> anyhow::Result<ProviderRegistry> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read provider file {}: {}", path, e))?;
    let entries: Vec<ProviderFileEntry> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse provider file {}: {}", path, e))?;

    let mut registry = ProviderRegistry::new();
    for entry in entries {
        let client = HttpProviderClient::new(entry.config.endpoint.clone(), entry.api_key);
        registry.register(entry.config, Arc::new(client));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_provider_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[
                {{
                    "id": "openai",
                    "endpoint": "https://api.openai.com/v1",
                    "models": ["gpt-4", "gpt-4o-mini"],
                    "max_concurrent": 8,
                    "cost_per_request": 0.01,
                    "api_key": "sk-test"
                }},
                {{
                    "id": "local",
                    "endpoint": "http://localhost:8000/v1",
                    "models": ["llama-3"],
                    "ceilings": {{"per_minute": 10, "per_hour": 100, "per_day": 1000}},
                    "max_concurrent": 2,
                    "cost_per_request": 0.0001,
                    "priority_weight": 2.0
                }}
            ]"#
        )
        .expect("write");

        let registry =
            load_providers(file.path().to_str().expect("utf8 path")).expect("should parse");
        assert_eq!(registry.len(), 2);

        let openai = registry.get("openai").expect("openai registered");
        assert!(openai.config.supports_model("gpt-4"));
        assert_eq!(openai.config.priority_weight, 1.0);

        let local = registry.get("local").expect("local registered");
        assert_eq!(local.config.ceilings.per_minute, 10);
        assert_eq!(local.config.priority_weight, 2.0);
    }

    #[test]
    fn test_missing_provider_file_errors() {
        assert!(load_providers("/nonexistent/providers.json").is_err());
    }

    #[test]
    fn test_cli_parses_run_command() {
        let cli = Cli::try_parse_from([
            "modelmux",
            "run",
            "--providers",
            "./p.json",
            "--monthly-budget",
            "250",
            "--fail-closed",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.providers, "./p.json");
                assert_eq!(args.monthly_budget, Some(250.0));
                assert!(args.fail_closed);
            }
        }
    }
}
