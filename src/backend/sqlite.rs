//! SQLite backends via sqlx.
//!
//! Two provisioning strategies, selected by configuration:
//! - file-per-tenant: each tenant gets its own database file under a scratch
//!   directory, with the schema applied at creation time;
//! - shared-memory: one in-memory database shared by every tenant, rows
//!   discriminated by the `tenant_name` column.
//!
//! The per-tenant query set is identical in both cases, so a single store
//! type serves both factories.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use tracing::debug;
use uuid::Uuid;

use super::{Tenant, TenantFactory, TenantStore};
use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agent (
    uuid TEXT PRIMARY KEY,
    tenant_name TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agent_tenant_name ON agent (tenant_name);
CREATE INDEX IF NOT EXISTS idx_agent_status ON agent (status);

CREATE TABLE IF NOT EXISTS agent_event (
    agent_uuid TEXT NOT NULL REFERENCES agent (uuid),
    event TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agent_event_event ON agent_event (event);
";

enum Layout {
    /// One database file per tenant under this directory.
    FilePerTenant { dir: PathBuf },
    /// One shared in-memory database for all tenants.
    SharedMemory { pool: SqlitePool },
}

/// Provisions SQLite-backed tenants.
pub struct SqliteTenantFactory {
    layout: Layout,
}

impl SqliteTenantFactory {
    /// Factory giving each tenant its own database file under a fresh
    /// scratch directory.
    pub async fn file_per_tenant() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("dbramp-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "tenant database directory created");
        Ok(Self {
            layout: Layout::FilePerTenant { dir },
        })
    }

    /// Factory backing every tenant with one shared in-memory database.
    pub async fn shared_memory() -> Result<Self> {
        // An in-memory SQLite database lives and dies with its connection,
        // so the pool is pinned to exactly one connection that never retires.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            layout: Layout::SharedMemory { pool },
        })
    }
}

#[async_trait]
impl TenantFactory for SqliteTenantFactory {
    async fn create(&self, name: &str) -> Result<Tenant> {
        let pool = match &self.layout {
            Layout::FilePerTenant { dir } => {
                let options = SqliteConnectOptions::new()
                    .filename(dir.join(format!("{name}.db")))
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(2)
                    .connect_with(options)
                    .await?;
                sqlx::raw_sql(SCHEMA).execute(&pool).await?;
                pool
            }
            Layout::SharedMemory { pool } => pool.clone(),
        };

        let store = SqliteTenantStore {
            tenant: name.to_string(),
            pool,
        };
        Ok(Tenant::new(name, Arc::new(store)))
    }
}

/// One tenant's operations against its SQLite pool.
pub struct SqliteTenantStore {
    tenant: String,
    pool: SqlitePool,
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    async fn seed_agents(&self, agents: usize) -> Result<()> {
        if agents == 0 {
            return Ok(());
        }
        let rows = (0..agents).map(|_| Uuid::new_v4().to_string());
        let mut qb: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("INSERT INTO agent (uuid, tenant_name, status) ");
        qb.push_values(rows, |mut b, uuid| {
            b.push_bind(uuid)
                .push_bind(&self.tenant)
                .push_bind("inactive");
        });
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn update_agent_status(&self, agents: usize, status: &str) -> Result<()> {
        sqlx::query(
            "UPDATE agent SET status = ?
             WHERE uuid IN (
                 SELECT uuid FROM agent
                 WHERE tenant_name = ?
                 ORDER BY RANDOM()
                 LIMIT ?
             )",
        )
        .bind(status)
        .bind(&self.tenant)
        .bind(agents as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_agent_events(&self, agents: usize) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_event (agent_uuid, event)
             SELECT uuid, ? FROM agent
             WHERE tenant_name = ?
             ORDER BY RANDOM()
             LIMIT ?",
        )
        .bind("event")
        .bind(&self.tenant)
        .bind(agents as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_agent_events(&self, max_events: usize) -> Result<()> {
        sqlx::query(
            "DELETE FROM agent_event
             WHERE agent_uuid IN (
                 SELECT agent_uuid FROM agent_event
                 INNER JOIN agent ON agent.uuid = agent_event.agent_uuid
                 WHERE agent.tenant_name = ?
                 GROUP BY agent_uuid
                 HAVING COUNT(*) > ?
             )",
        )
        .bind(&self.tenant)
        .bind(max_events as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_agents(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM agent WHERE tenant_name = ?")
                .bind(&self.tenant)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn count_agent_events(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agent_event
             INNER JOIN agent ON agent.uuid = agent_event.agent_uuid
             WHERE agent.tenant_name = ?",
        )
        .bind(&self.tenant)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
