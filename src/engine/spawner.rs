//! Population spawner: coalescing restart of the runner population.
//!
//! Tenants arrive from the ramp on a bounded channel. Rather than restart
//! the runner population on every arrival (which would thrash timers and
//! reset jitter phase constantly), the spawner drains bursts first and only
//! replaces the generation at a quiet point. The trade-off: during a
//! replacement no runner is active, a brief global pause bounded by the
//! graceful drain of the prior generation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{error, info};

use super::runner::spawn_runner;
use super::supervisor::{CancelToken, Supervisor};
use crate::backend::Tenant;
use crate::error::Result;
use crate::model::OperationDef;
use crate::telemetry::metrics::MetricsSink;

/// Start the spawner inside `sup`, consuming the ramp's channel.
pub fn spawn_population(
    sup: &mut Supervisor,
    rx: mpsc::Receiver<Tenant>,
    operations: Vec<OperationDef>,
    metrics: Arc<dyn MetricsSink>,
) {
    let cancel = sup.cancel_token();
    sup.spawn(run_spawner(rx, operations, metrics, cancel));
}

async fn run_spawner(
    mut rx: mpsc::Receiver<Tenant>,
    operations: Vec<OperationDef>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancelToken,
) -> Result<()> {
    // Owned exclusively by this task; all handoff goes through the channel.
    let mut accumulated: Vec<Tenant> = Vec::new();
    // Tenants whose one-shot operations have already been scheduled in a
    // previous generation. One-shots fire exactly once per tenant, ever;
    // periodic runners are respawned for everyone on each replacement.
    let mut initialized = 0usize;
    let mut pending = 0usize;
    let mut inflow_open = true;
    let mut generation = Supervisor::new();

    loop {
        // Drain whatever is already queued before considering a restart —
        // never replace the generation mid-burst.
        while inflow_open {
            match rx.try_recv() {
                Ok(tenant) => {
                    accumulated.push(tenant);
                    pending += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => inflow_open = false,
            }
        }

        if cancel.is_cancelled() {
            return generation.shutdown().await;
        }

        if pending > 0 {
            // Quiet point: replace the whole generation. The old one must be
            // fully drained before any replacement runner starts.
            generation.shutdown().await?;
            generation = start_generation(&accumulated, initialized, &operations, &metrics);
            info!(
                tenants = accumulated.len(),
                runners = generation.len(),
                "generation started"
            );
            initialized = accumulated.len();
            pending = 0;
            continue;
        }

        let generation_active = !generation.is_empty();
        tokio::select! {
            _ = cancel.cancelled() => {
                return generation.shutdown().await;
            }
            received = rx.recv(), if inflow_open => {
                match received {
                    Some(tenant) => {
                        accumulated.push(tenant);
                        pending += 1;
                    }
                    None => inflow_open = false,
                }
            }
            joined = generation.join_next(), if generation_active => {
                // One-shot runners exit Ok as a matter of course. A runner
                // error means an internal defect, fatal to the engine.
                if let Some(Err(e)) = joined {
                    error!("generation runner failed: {e}");
                    generation.cancel();
                    let _ = generation.wait().await;
                    return Err(e);
                }
            }
        }
    }
}

/// Materialize one generation: a runner per (tenant, operation), skipping
/// one-shot operations for the first `initialized` tenants, which already
/// had them.
fn start_generation(
    tenants: &[Tenant],
    initialized: usize,
    operations: &[OperationDef],
    metrics: &Arc<dyn MetricsSink>,
) -> Supervisor {
    let mut generation = Supervisor::new();
    for (idx, tenant) in tenants.iter().enumerate() {
        for op in operations {
            if op.period().is_zero() && idx < initialized {
                continue;
            }
            spawn_runner(&mut generation, op.clone(), tenant.clone(), Arc::clone(metrics));
        }
    }
    generation
}
