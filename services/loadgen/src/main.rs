//! Redis load generator.
//!
//! Drives sustained traffic against a Redis server from many worker threads
//! to validate client behaviour during failovers and maintenance:
//! - Weighted operation mixes, pipelines, transactions and pub/sub
//! - Per-worker rate limiting
//! - Prometheus metrics tagged with app name, instance and run id
//! - Final summary as a table, JSON or CSV

mod cli;
mod logging;
mod signals;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use loadgen_core::{
    ClientFactory, LoadEngine, LoadGenError, MemoryClientFactory, MemoryOptions, RunnerConfig,
    WorkloadProfile,
};
use redis_store::RedisClientFactory;

use cli::{Cli, Commands, ConnectionArgs, Driver, RunArgs};

/// A configuration problem, reported before anything starts.
const EXIT_CONFIG: u8 = 1;
/// The run ended because no client or worker could do any work.
const EXIT_RUN_FAILED: u8 = 2;

fn main() -> ExitCode {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(&args),
        Commands::ListProfiles => {
            list_profiles();
            Ok(ExitCode::SUCCESS)
        }
        Commands::ShowProfile { name } => show_profile(name),
        Commands::TestConnection(args) => test_connection(&args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            if let Some(load_err) = e.downcast_ref::<LoadGenError>() {
                if load_err.is_config_error() {
                    eprintln!("Configuration error: {}", load_err);
                    return ExitCode::from(EXIT_CONFIG);
                }
            }
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn run(args: &RunArgs) -> Result<ExitCode> {
    let config = args.build_config()?;

    if let Some(path) = &args.save_config {
        config
            .save_to_file(path)
            .with_context(|| format!("failed to save configuration to {}", path.display()))?;
        println!("Configuration saved to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    config.validate()?;
    logging::init(&config.logging)?;
    if let Some(path) = &args.config_file {
        info!(path = %path.display(), "Loaded configuration file");
    }
    if config.telemetry.enabled {
        install_exporter(&config);
    }

    let factory: Arc<dyn ClientFactory> = match args.driver {
        Driver::Redis => Arc::new(RedisClientFactory::new(config.connection.clone())),
        Driver::Memory => Arc::new(MemoryClientFactory::new(MemoryOptions::default())),
    };

    let engine = LoadEngine::new(config, factory)?;
    signals::spawn_listener(engine.cancellation_token())?;

    let outcome = engine.run()?;
    if outcome.stop_reason.is_failure() {
        warn!(reason = %outcome.stop_reason, "Load test failed");
        return Ok(ExitCode::from(EXIT_RUN_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

/// Serve `/metrics` for Prometheus. A bind failure is logged and the run
/// continues without export.
fn install_exporter(config: &RunnerConfig) {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.telemetry.metrics_port));
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "Prometheus metrics exporter initialized"),
        Err(e) => warn!(%addr, error = %e, "Failed to start Prometheus exporter; metrics disabled"),
    }
}

fn list_profiles() {
    println!("Available workload profiles:");
    println!();
    for profile in WorkloadProfile::ALL {
        println!("  {:<18} {}", profile.name(), profile.description());
    }
}

fn show_profile(profile: WorkloadProfile) -> Result<ExitCode> {
    let spec = profile.spec();
    println!("Profile: {}", profile.name());
    println!("Description: {}", profile.description());
    println!("Duration: {}s", profile.duration_secs());
    println!();
    print!("{}", serde_yaml::to_string(&spec)?);
    Ok(ExitCode::SUCCESS)
}

fn test_connection(args: &ConnectionArgs) -> Result<ExitCode> {
    let mut connection = RunnerConfig::default().connection;
    args.apply(&mut connection);

    match redis_store::probe(&connection) {
        Ok(probe) => {
            println!("✓ Redis connection successful!");
            println!("URL: {}", probe.url);
            println!(
                "Redis version: {}",
                probe.server_version.as_deref().unwrap_or("unknown")
            );
            println!("PING: {:.2}ms", probe.ping.as_secs_f64() * 1000.0);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("✗ Redis connection failed: {}", e);
            Ok(ExitCode::from(EXIT_CONFIG))
        }
    }
}
