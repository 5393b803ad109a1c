//! The load engine: root supervision scope tying the ramp controller and
//! the population spawner together behind one joinable lifecycle.

pub mod ramp;
pub mod spawner;
pub mod supervisor;

mod runner;

use std::sync::Arc;

use tracing::info;

use crate::backend::TenantFactory;
use crate::error::Result;
use crate::model::{self, OperationDef};
use crate::telemetry::metrics::MetricsSink;

pub use ramp::RampConfig;
pub use supervisor::{CancelToken, Supervisor};

/// Everything the engine needs to run, passed in at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ramp: RampConfig,
    pub operations: Vec<OperationDef>,
}

/// Root supervisor. Owns the cancellation scope for the whole run.
pub struct Engine {
    factory: Arc<dyn TenantFactory>,
    metrics: Arc<dyn MetricsSink>,
    config: EngineConfig,
    cancel: CancelToken,
}

impl Engine {
    /// Validate the configuration and build the engine.
    pub fn new(
        factory: Arc<dyn TenantFactory>,
        metrics: Arc<dyn MetricsSink>,
        config: EngineConfig,
    ) -> Result<Self> {
        model::validate_menu(&config.operations)?;
        Ok(Self {
            factory,
            metrics,
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Token an external party (signal handler, test harness) can use to
    /// stop the run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the whole scope to stop at its next safe point.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run until the scope fails or is cancelled.
    ///
    /// A clean external shutdown returns `Ok`; the first fatal error
    /// (tenant creation failure, runner defect) cancels everything,
    /// is awaited to full drain, and returned.
    pub async fn run(&self) -> Result<()> {
        info!(
            tick = ?self.config.ramp.tick,
            increment = self.config.ramp.increment,
            ceiling = self.config.ramp.ceiling,
            operations = self.config.operations.len(),
            "engine starting"
        );

        let mut scope = Supervisor::with_token(self.cancel.clone());
        let tenants = ramp::ramp_tenants(
            &mut scope,
            Arc::clone(&self.factory),
            self.config.ramp.clone(),
            Arc::clone(&self.metrics),
        );
        spawner::spawn_population(
            &mut scope,
            tenants,
            self.config.operations.clone(),
            Arc::clone(&self.metrics),
        );

        let result = scope.wait().await;
        info!("engine stopped");
        result
    }
}
