//! Operation runner: drives one (tenant, operation) pair on its schedule.

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::warn;

use super::supervisor::{CancelToken, Supervisor};
use crate::backend::Tenant;
use crate::model::OperationDef;
use crate::telemetry::metrics::MetricsSink;

/// Fork one runner for `op` against `tenant` into the generation scope.
pub(crate) fn spawn_runner(
    generation: &mut Supervisor,
    op: OperationDef,
    tenant: Tenant,
    metrics: Arc<dyn MetricsSink>,
) {
    let cancel = generation.cancel_token();
    generation.spawn(run_operation(op, tenant, metrics, cancel));
}

/// Run until cancelled (or, for zero-period operations, until the single
/// immediate fire completes).
///
/// A positive period starts with a uniform random delay in `[0, period)` so
/// tenants created in the same ramp tick do not fire in lockstep; the first
/// fire happens right after that delay, later fires on a fixed-period tick.
/// Invocation failures are counted and logged, never fatal — the schedule
/// continues regardless of the recurrence value.
pub(crate) async fn run_operation(
    op: OperationDef,
    tenant: Tenant,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancelToken,
) -> crate::error::Result<()> {
    let period = op.period();
    if period.is_zero() {
        fire(&op, &tenant, &*metrics).await;
        return Ok(());
    }

    let jitter_ms = rand::thread_rng().gen_range(0..period.as_millis().max(1) as u64);
    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        _ = time::sleep(Duration::from_millis(jitter_ms)) => {}
    }

    // First tick completes immediately; a slow invocation delays the next
    // tick rather than bunching fires together.
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => fire(&op, &tenant, &*metrics).await,
        }
    }
}

/// One invocation: time it, record it, absorb failure.
async fn fire(op: &OperationDef, tenant: &Tenant, metrics: &dyn MetricsSink) {
    let started = Instant::now();
    let result = op.kind.apply(tenant).await;
    let elapsed = started.elapsed();

    match result {
        Ok(count) => {
            metrics.operation_observed(&op.name, tenant.name(), elapsed, true);
            if let Some(value) = count {
                metrics.tenant_count(&op.name, tenant.name(), value);
            }
        }
        Err(e) => {
            metrics.operation_observed(&op.name, tenant.name(), elapsed, false);
            warn!(operation = %op.name, tenant = %tenant.name(), "operation failed: {e}");
        }
    }
}
