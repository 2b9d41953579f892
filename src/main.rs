// Quotagate - Main Entry Point
//
// CLI for the admission controller:
// - serve the gated routes and the ops endpoints (health, metrics, bucket introspection)
// - validate and print the effective configuration
// - simulate a burst of requests against a fresh registry

use anyhow::{Context, Result};
use axum::http::Method;
use clap::{Parser, Subcommand};
use quotagate::config::Config;
use quotagate::logging::LogLevel;
use quotagate::rate_limit::{
    AdmissionGate, AdmissionResult, BucketRegistry, BucketView, Category, Inspector,
};
use quotagate::server;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Quotagate: token-bucket admission control
#[derive(Parser, Debug)]
#[command(name = "quotagate")]
#[command(version)]
#[command(about = "Per-identifier, per-category rate limiting for HTTP services", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the gated routes and the ops endpoints
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the configuration and print the effective limits
    CheckConfig,
    /// Send a burst of requests through a fresh admission gate
    Simulate {
        /// Category name (unknown names fall back to GENERAL)
        #[arg(long, default_value = "GENERAL", conflicts_with = "route")]
        category: String,

        /// Route to classify instead of a category, e.g. "POST /api/auth/login"
        #[arg(long)]
        route: Option<String>,

        /// Identifier the requests are made under
        #[arg(long, default_value = "127.0.0.1")]
        identifier: String,

        /// Number of requests
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: u32,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationReport {
    category: Category,
    identifier: String,
    decisions: Vec<AdmissionResult>,
    buckets: Vec<BucketView>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from_path(&config_path)?;

    let mut logging = config.logging.clone();
    if args.verbose {
        logging.level = LogLevel::Debug;
    }
    logging.init()?;

    if config_path.exists() {
        info!("Loaded configuration from {:?}", config_path);
    } else {
        debug!("Config file not found at {:?}, using defaults", config_path);
    }

    match args.command {
        Some(Commands::Serve { port }) => serve(config, port).await?,
        Some(Commands::CheckConfig) => check_config(&config)?,
        Some(Commands::Simulate {
            category,
            route,
            identifier,
            requests,
            json,
        }) => simulate(&config, &category, route.as_deref(), &identifier, requests, json)?,
        None => {
            println!("No command specified. Use \"quotagate --help\" for usage.");
        }
    }

    Ok(())
}

async fn serve(mut config: Config, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }

    let registry = Arc::new(BucketRegistry::new(config.rate_limit.clone()));
    info!(
        "Quotagate v{} starting (rate limiting {})",
        env!("CARGO_PKG_VERSION"),
        if config.rate_limit.enabled { "enabled" } else { "disabled" }
    );

    server::start_server(&config, registry).await
}

fn check_config(config: &Config) -> Result<()> {
    let limits = &config.rate_limit;

    println!("Configuration OK");
    println!(
        "rate limiting: {}, refill every {}s ({:?})",
        if limits.enabled { "enabled" } else { "disabled" },
        limits.refill_interval_secs,
        limits.refill_mode
    );
    println!("{:<8} {:>8} {:>8}", "CATEGORY", "CAPACITY", "REFILL");
    for category in Category::ALL {
        let limit = limits.limit(category);
        println!(
            "{:<8} {:>8} {:>8}",
            category, limit.capacity, limit.refill_rate
        );
    }

    let routes = config.route_table()?;
    println!("gated routes: {}", routes.len());
    for (method, path, category) in routes.entries() {
        println!("  {:<7} {:<45} {}", method.as_str(), path, category);
    }

    Ok(())
}

fn simulate(
    config: &Config,
    category: &str,
    route: Option<&str>,
    identifier: &str,
    requests: u32,
    json: bool,
) -> Result<()> {
    let category = match route {
        Some(route) => {
            let (method, path) = route
                .split_once(' ')
                .context("Route must look like \"METHOD /path\"")?;
            let method = method
                .to_uppercase()
                .parse::<Method>()
                .with_context(|| format!("Invalid method in route {:?}", route))?;
            match config.route_table()?.category_for(&method, path.trim()) {
                Some(category) => category,
                None => {
                    println!("Route {} is not rate limited", route);
                    return Ok(());
                }
            }
        }
        None => Category::from_name_or_default(category),
    };

    let registry = Arc::new(BucketRegistry::new(config.rate_limit.clone()));
    let gate = AdmissionGate::new(registry.clone());
    let inspector = Inspector::new(registry);

    let decisions: Vec<AdmissionResult> = (0..requests)
        .map(|_| gate.admit(identifier, category))
        .collect();

    if json {
        let report = SimulationReport {
            category,
            identifier: identifier.to_string(),
            decisions,
            buckets: inspector.list_buckets(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (i, decision) in decisions.iter().enumerate() {
        println!(
            "#{:<3} {} {}:{} limit={} remaining={} reset={}",
            i + 1,
            if decision.allowed { "allowed" } else { "denied " },
            category,
            identifier,
            decision.limit,
            decision.remaining,
            decision.reset_at_epoch_secs
        );
    }

    println!("buckets:");
    for bucket in inspector.list_buckets() {
        println!(
            "  {}:{} {}/{}",
            bucket.category, bucket.identifier, bucket.available_tokens, bucket.capacity
        );
    }

    Ok(())
}
