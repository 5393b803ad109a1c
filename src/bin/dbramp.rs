//! dbramp CLI — ramp up tenants against a SQLite backend and keep the
//! operation menu churning until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dbramp::backend::TenantFactory;
use dbramp::backend::sqlite::SqliteTenantFactory;
use dbramp::config::Config;
use dbramp::engine::{Engine, EngineConfig, RampConfig};
use dbramp::model;
use dbramp::telemetry::metrics::OtelMetrics;
use dbramp::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Backend {
    /// One SQLite database file per tenant
    SqliteFile,
    /// One shared in-memory SQLite database
    SqliteShared,
}

#[derive(Parser)]
#[command(name = "dbramp", about = "Multi-tenant database load generator")]
struct Cli {
    /// Storage backend for tenant databases
    #[arg(long, value_enum, default_value = "sqlite-file")]
    backend: Backend,

    /// Milliseconds between ramp ticks
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Tenants created per ramp tick
    #[arg(long, default_value_t = 400)]
    increment: usize,

    /// Total number of tenants to create
    #[arg(long, default_value_t = 400)]
    ceiling: usize,

    /// TOML file overriding the default operation menu
    #[arg(long)]
    ops_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env();

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "dbramp".to_string(),
    })?;

    let operations = match cli.ops_file {
        Some(ref path) => model::menu_from_toml(&std::fs::read_to_string(path)?)?,
        None => model::default_menu(),
    };

    let factory: Arc<dyn TenantFactory> = match cli.backend {
        Backend::SqliteFile => Arc::new(SqliteTenantFactory::file_per_tenant().await?),
        Backend::SqliteShared => Arc::new(SqliteTenantFactory::shared_memory().await?),
    };

    let engine = Engine::new(
        factory,
        Arc::new(OtelMetrics::new()),
        EngineConfig {
            ramp: RampConfig {
                tick: Duration::from_millis(cli.tick_ms),
                increment: cli.increment,
                ceiling: cli.ceiling,
            },
            operations,
        },
    )?;

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel.cancel();
    });

    engine.run().await?;
    Ok(())
}
