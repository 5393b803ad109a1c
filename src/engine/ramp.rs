//! Ramp controller: grows the tenant population at a fixed rate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info};
use uuid::Uuid;

use super::supervisor::{CancelToken, Supervisor};
use crate::backend::{Tenant, TenantFactory};
use crate::error::Result;
use crate::telemetry::metrics::MetricsSink;

/// How fast and how far the population grows.
#[derive(Debug, Clone)]
pub struct RampConfig {
    /// Period between growth ticks.
    pub tick: Duration,
    /// Tenants created per tick.
    pub increment: usize,
    /// Total tenants to create before the ramp completes.
    pub ceiling: usize,
}

/// Start the ramp inside `sup` and return the channel tenants arrive on.
///
/// Tenants are delivered in creation order. The channel closes when the
/// ceiling is reached or the scope is cancelled; a creation failure is
/// terminal and propagates through the scope.
pub fn ramp_tenants(
    sup: &mut Supervisor,
    factory: Arc<dyn TenantFactory>,
    config: RampConfig,
    metrics: Arc<dyn MetricsSink>,
) -> mpsc::Receiver<Tenant> {
    let (tx, rx) = mpsc::channel(config.increment.max(1));
    let cancel = sup.cancel_token();
    sup.spawn(run_ramp(factory, config, metrics, tx, cancel));
    rx
}

async fn run_ramp(
    factory: Arc<dyn TenantFactory>,
    config: RampConfig,
    metrics: Arc<dyn MetricsSink>,
    tx: mpsc::Sender<Tenant>,
    cancel: CancelToken,
) -> Result<()> {
    // First tick after one full period, like a ticking clock: the timer
    // drives ticks regardless of how fast the consumer drains, only a full
    // channel delays the publish step.
    let mut ticker = interval_at(Instant::now() + config.tick, config.tick);
    // Ticks missed while the publish step was blocked are dropped, not
    // replayed in a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut created = 0usize;

    while created < config.ceiling {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let batch = config.increment.min(config.ceiling - created);
        for _ in 0..batch {
            let name = Uuid::new_v4().to_string();
            let started = std::time::Instant::now();
            let tenant = match factory.create(&name).await {
                Ok(tenant) => tenant,
                Err(e) => {
                    error!(tenant = %name, "tenant creation failed: {e}");
                    return Err(e);
                }
            };
            metrics.tenant_created(started.elapsed());
            created += 1;

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = tx.send(tenant) => {
                    // Receiver gone means the spawner is down; the scope is
                    // coming apart, nothing more to do here.
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    info!(created, "ramp complete");
    Ok(())
}
