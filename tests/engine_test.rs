//! End-to-end engine tests on paused virtual time, with recording mocks
//! standing in for the storage backend and the metrics sink.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbramp::backend::{Tenant, TenantFactory, TenantStore};
use dbramp::engine::{Engine, EngineConfig, RampConfig};
use dbramp::error::{Error, Result};
use dbramp::model::{OperationDef, OperationKind};
use dbramp::telemetry::metrics::MetricsSink;

/// Per-tenant call counts, shared across all mock stores of one run.
#[derive(Default)]
struct CallLog {
    seeds: Mutex<HashMap<String, usize>>,
    updates: Mutex<HashMap<String, usize>>,
}

struct MockStore {
    tenant: String,
    log: Arc<CallLog>,
    fail_updates: bool,
    /// Holds each update invocation open for this long.
    update_delay: Duration,
    in_flight: Arc<Overlap>,
}

/// Tracks concurrent invocations per tenant to prove the generation barrier.
#[derive(Default)]
struct Overlap {
    current: Mutex<HashMap<String, usize>>,
    max_seen: Mutex<usize>,
}

impl Overlap {
    fn enter(&self, tenant: &str) {
        let mut current = self.current.lock().unwrap();
        let n = current.entry(tenant.to_string()).or_insert(0);
        *n += 1;
        let mut max = self.max_seen.lock().unwrap();
        *max = (*max).max(*n);
    }

    fn exit(&self, tenant: &str) {
        let mut current = self.current.lock().unwrap();
        *current.get_mut(tenant).unwrap() -= 1;
    }
}

#[async_trait]
impl TenantStore for MockStore {
    async fn seed_agents(&self, _agents: usize) -> Result<()> {
        *self
            .log
            .seeds
            .lock()
            .unwrap()
            .entry(self.tenant.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn update_agent_status(&self, _agents: usize, _status: &str) -> Result<()> {
        self.in_flight.enter(&self.tenant);
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        self.in_flight.exit(&self.tenant);
        *self
            .log
            .updates
            .lock()
            .unwrap()
            .entry(self.tenant.clone())
            .or_insert(0) += 1;
        if self.fail_updates {
            return Err(Error::Other("simulated query failure".to_string()));
        }
        Ok(())
    }

    async fn append_agent_events(&self, _agents: usize) -> Result<()> {
        Ok(())
    }
    async fn prune_agent_events(&self, _max_events: usize) -> Result<()> {
        Ok(())
    }
    async fn count_agents(&self) -> Result<i64> {
        Ok(42)
    }
    async fn count_agent_events(&self) -> Result<i64> {
        Ok(7)
    }
}

#[derive(Default)]
struct MockFactory {
    log: Arc<CallLog>,
    created: AtomicUsize,
    fail_from: Option<usize>,
    fail_updates: bool,
    update_delay: Duration,
    in_flight: Arc<Overlap>,
}

#[async_trait]
impl TenantFactory for MockFactory {
    async fn create(&self, name: &str) -> Result<Tenant> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_from {
            if n >= limit {
                return Err(Error::Other("provisioning refused".to_string()));
            }
        }
        Ok(Tenant::new(
            name,
            Arc::new(MockStore {
                tenant: name.to_string(),
                log: Arc::clone(&self.log),
                fail_updates: self.fail_updates,
                update_delay: self.update_delay,
                in_flight: Arc::clone(&self.in_flight),
            }),
        ))
    }
}

/// Records every sample the engine pushes.
#[derive(Default)]
struct RecordingSink {
    creations: AtomicUsize,
    // (operation, tenant, ok)
    operations: Mutex<Vec<(String, String, bool)>>,
    counts: Mutex<Vec<(String, String, i64)>>,
}

impl MetricsSink for RecordingSink {
    fn tenant_created(&self, _elapsed: Duration) {
        self.creations.fetch_add(1, Ordering::SeqCst);
    }
    fn operation_observed(&self, operation: &str, tenant: &str, _elapsed: Duration, ok: bool) {
        self.operations
            .lock()
            .unwrap()
            .push((operation.to_string(), tenant.to_string(), ok));
    }
    fn tenant_count(&self, operation: &str, tenant: &str, value: i64) {
        self.counts
            .lock()
            .unwrap()
            .push((operation.to_string(), tenant.to_string(), value));
    }
}

fn init_op() -> OperationDef {
    OperationDef {
        name: "tenant-init".to_string(),
        period_ms: 0,
        kind: OperationKind::SeedAgents { agents: 60 },
    }
}

fn touch_op(period_ms: u64) -> OperationDef {
    OperationDef {
        name: "touch".to_string(),
        period_ms,
        kind: OperationKind::UpdateAgentStatus {
            agents: 10,
            status: "active".to_string(),
        },
    }
}

fn engine_config(tick_ms: u64, increment: usize, ceiling: usize, ops: Vec<OperationDef>) -> EngineConfig {
    EngineConfig {
        ramp: RampConfig {
            tick: Duration::from_millis(tick_ms),
            increment,
            ceiling,
        },
        operations: ops,
    }
}

#[tokio::test(start_paused = true)]
async fn ramp_scenario_init_once_and_touch_everyone() {
    let factory = Arc::new(MockFactory::default());
    let log = Arc::clone(&factory.log);
    let sink = Arc::new(RecordingSink::default());

    // tick=1s, increment=2, ceiling=4: four tenants across two ticks.
    let engine = Engine::new(
        factory.clone(),
        sink.clone(),
        engine_config(1000, 2, 4, vec![init_op(), touch_op(5000)]),
    )
    .unwrap();
    let cancel = engine.cancel_token();
    let handle = tokio::spawn(async move { engine.run().await });

    // Jitter keeps every first touch inside [0, 5s) of its generation, and
    // the last generation starts just after the second tick.
    tokio::time::sleep(Duration::from_secs(8)).await;
    cancel.cancel();
    handle
        .await
        .unwrap()
        .expect("external shutdown is a clean stop");

    assert_eq!(factory.created.load(Ordering::SeqCst), 4);
    assert_eq!(sink.creations.load(Ordering::SeqCst), 4);

    let seeds = log.seeds.lock().unwrap();
    assert_eq!(seeds.len(), 4, "every tenant gets seeded");
    for (tenant, count) in seeds.iter() {
        assert_eq!(*count, 1, "tenant {tenant} must be seeded exactly once");
    }

    let updates = log.updates.lock().unwrap();
    assert_eq!(updates.len(), 4, "every tenant gets touched");
    for (tenant, count) in updates.iter() {
        assert!(*count >= 1, "tenant {tenant} missing a touch sample");
    }

    // Histogram samples exist for both operations.
    let ops = sink.operations.lock().unwrap();
    let touched: HashSet<_> = ops
        .iter()
        .filter(|(op, _, ok)| op == "touch" && *ok)
        .map(|(_, tenant, _)| tenant.clone())
        .collect();
    assert_eq!(touched.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn one_shot_never_refires_across_restarts() {
    let factory = Arc::new(MockFactory::default());
    let log = Arc::clone(&factory.log);
    let sink = Arc::new(RecordingSink::default());

    // Ten single-tenant ticks force many generation restarts.
    let engine = Engine::new(
        factory.clone(),
        sink,
        engine_config(1000, 1, 10, vec![init_op(), touch_op(60_000)]),
    )
    .unwrap();
    let cancel = engine.cancel_token();
    let handle = tokio::spawn(async move { engine.run().await });

    tokio::time::sleep(Duration::from_secs(30)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let seeds = log.seeds.lock().unwrap();
    assert_eq!(seeds.len(), 10);
    for (tenant, count) in seeds.iter() {
        assert_eq!(*count, 1, "restart re-ran the one-shot for {tenant}");
    }
}

#[tokio::test(start_paused = true)]
async fn generations_never_overlap_for_a_tenant() {
    // Updates stay in flight for 700ms while fresh tenants arrive every
    // 500ms, so every restart has to wait out an in-flight invocation.
    let factory = Arc::new(MockFactory {
        update_delay: Duration::from_millis(700),
        ..Default::default()
    });
    let overlap = Arc::clone(&factory.in_flight);
    let sink = Arc::new(RecordingSink::default());

    let engine = Engine::new(
        factory.clone(),
        sink,
        engine_config(500, 1, 8, vec![touch_op(1000)]),
    )
    .unwrap();
    let cancel = engine.cancel_token();
    let handle = tokio::spawn(async move { engine.run().await });

    tokio::time::sleep(Duration::from_secs(15)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(
        *overlap.max_seen.lock().unwrap(),
        1,
        "two runners drove the same tenant-operation pair concurrently"
    );
}

#[tokio::test(start_paused = true)]
async fn failing_operation_is_counted_not_fatal() {
    let factory = Arc::new(MockFactory {
        fail_updates: true,
        ..Default::default()
    });
    let sink = Arc::new(RecordingSink::default());

    let engine = Engine::new(
        factory.clone(),
        sink.clone(),
        engine_config(500, 1, 1, vec![touch_op(1000)]),
    )
    .unwrap();
    let cancel = engine.cancel_token();
    let handle = tokio::spawn(async move { engine.run().await });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(
        !handle.is_finished(),
        "continuous operation failure must not take the engine down"
    );
    cancel.cancel();
    handle.await.unwrap().expect("failures are absorbed, join is clean");

    let ops = sink.operations.lock().unwrap();
    let fires: Vec<_> = ops.iter().filter(|(op, _, _)| op == "touch").collect();
    let failures = fires.iter().filter(|(_, _, ok)| !ok).count();
    assert!(fires.len() >= 2, "expected repeated fires, got {}", fires.len());
    assert_eq!(
        failures,
        fires.len(),
        "every fire fails, and every failure still gets a duration sample"
    );
}

#[tokio::test(start_paused = true)]
async fn periodic_fires_are_spaced_by_the_period() {
    let factory = Arc::new(MockFactory::default());
    let log = Arc::clone(&factory.log);
    let sink = Arc::new(RecordingSink::default());

    // One tenant, one 10s operation. First fire within [0, 10s) of the
    // generation start at ~1s, then every 10s: 3 or 4 fires by t=31s.
    let engine = Engine::new(
        factory,
        sink,
        engine_config(1000, 1, 1, vec![touch_op(10_000)]),
    )
    .unwrap();
    let cancel = engine.cancel_token();
    let handle = tokio::spawn(async move { engine.run().await });

    tokio::time::sleep(Duration::from_secs(31)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let updates = log.updates.lock().unwrap();
    let fires: usize = updates.values().sum();
    assert!(
        (3..=4).contains(&fires),
        "expected 3-4 fires in 30s of a 10s schedule, got {fires}"
    );
}

#[tokio::test(start_paused = true)]
async fn count_operations_publish_per_tenant_gauges() {
    let factory = Arc::new(MockFactory::default());
    let sink = Arc::new(RecordingSink::default());

    let count_op = OperationDef {
        name: "agents-count".to_string(),
        period_ms: 2000,
        kind: OperationKind::CountAgents,
    };
    let engine = Engine::new(
        factory,
        sink.clone(),
        engine_config(500, 2, 2, vec![count_op]),
    )
    .unwrap();
    let cancel = engine.cancel_token();
    let handle = tokio::spawn(async move { engine.run().await });

    tokio::time::sleep(Duration::from_secs(6)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let counts = sink.counts.lock().unwrap();
    let tenants: HashSet<_> = counts.iter().map(|(_, tenant, _)| tenant.clone()).collect();
    assert_eq!(tenants.len(), 2);
    assert!(counts.iter().all(|(op, _, v)| op == "agents-count" && *v == 42));
}

#[tokio::test(start_paused = true)]
async fn creation_failure_tears_the_engine_down() {
    let factory = Arc::new(MockFactory {
        fail_from: Some(2),
        ..Default::default()
    });
    let sink = Arc::new(RecordingSink::default());

    let engine = Engine::new(
        factory,
        sink,
        engine_config(1000, 2, 8, vec![touch_op(5000)]),
    )
    .unwrap();
    let handle = tokio::spawn(async move { engine.run().await });

    let err = tokio::time::timeout(Duration::from_secs(60), handle)
        .await
        .expect("engine must terminate on its own")
        .unwrap()
        .expect_err("creation failure is fatal");
    assert!(err.to_string().contains("provisioning refused"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_ramp_joins_cleanly() {
    let factory = Arc::new(MockFactory::default());
    let sink = Arc::new(RecordingSink::default());

    let engine = Engine::new(
        factory,
        sink,
        engine_config(1000, 2, 1000, vec![init_op(), touch_op(5000)]),
    )
    .unwrap();
    let cancel = engine.cancel_token();
    let handle = tokio::spawn(async move { engine.run().await });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("drain must finish within the grace period")
        .unwrap()
        .expect("cancellation is not an error");
}

#[tokio::test]
async fn duplicate_operation_names_are_rejected() {
    let factory = Arc::new(MockFactory::default());
    let sink = Arc::new(RecordingSink::default());

    let err = Engine::new(
        factory,
        sink,
        engine_config(1000, 1, 1, vec![touch_op(1000), touch_op(2000)]),
    )
    .err()
    .expect("duplicate names must fail validation");
    assert!(err.to_string().contains("duplicate operation name"));
}
