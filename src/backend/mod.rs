//! Backend seam: how tenants are provisioned and how operations reach them.
//!
//! The scheduling engine only ever sees these traits. Concrete storage lives
//! behind them and is chosen by configuration, never by code edits.

pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Provisions one backing store per tenant name.
///
/// Called sequentially by the ramp controller; a creation failure terminates
/// the ramp, so implementations should only fail for real backend trouble.
#[async_trait]
pub trait TenantFactory: Send + Sync {
    async fn create(&self, name: &str) -> Result<Tenant>;
}

/// The operation interface of one provisioned tenant.
///
/// Every method is a single logical unit of load against that tenant's
/// backing store. Counting methods return the observed row count so the
/// caller can publish it as a gauge.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn seed_agents(&self, agents: usize) -> Result<()>;
    async fn update_agent_status(&self, agents: usize, status: &str) -> Result<()>;
    async fn append_agent_events(&self, agents: usize) -> Result<()>;
    async fn prune_agent_events(&self, max_events: usize) -> Result<()>;
    async fn count_agents(&self) -> Result<i64>;
    async fn count_agent_events(&self) -> Result<i64>;
}

/// Handle to one provisioned tenant: its identity plus its bound store.
///
/// Cheap to clone; the name is immutable for the tenant's lifetime.
#[derive(Clone)]
pub struct Tenant {
    name: Arc<str>,
    store: Arc<dyn TenantStore>,
}

impl Tenant {
    pub fn new(name: impl Into<Arc<str>>, store: Arc<dyn TenantStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &dyn TenantStore {
        &*self.store
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant").field("name", &self.name).finish()
    }
}
