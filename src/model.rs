//! The operation menu: named units of work applied to a tenant.
//!
//! The menu is configured once at startup (defaults below, overridable from
//! a TOML file) and is immutable for the run.

use std::time::Duration;

use serde::Deserialize;

use crate::backend::Tenant;
use crate::error::{Error, Result};

/// One of the fixed menu of tenant operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OperationKind {
    /// Insert `agents` fresh agent rows for the tenant.
    SeedAgents { agents: usize },
    /// Flip the status of up to `agents` randomly chosen agents.
    UpdateAgentStatus { agents: usize, status: String },
    /// Append one event to each of up to `agents` randomly chosen agents.
    AppendAgentEvents { agents: usize },
    /// Delete all events of agents holding more than `max_events` events.
    PruneAgentEvents { max_events: usize },
    /// Count the tenant's agents.
    CountAgents,
    /// Count the tenant's agent events.
    CountAgentEvents,
}

impl OperationKind {
    /// Apply this operation to a tenant's store.
    ///
    /// Counting operations yield the observed value; the others yield `None`.
    pub async fn apply(&self, tenant: &Tenant) -> Result<Option<i64>> {
        let store = tenant.store();
        match self {
            Self::SeedAgents { agents } => store.seed_agents(*agents).await.map(|()| None),
            Self::UpdateAgentStatus { agents, status } => store
                .update_agent_status(*agents, status)
                .await
                .map(|()| None),
            Self::AppendAgentEvents { agents } => {
                store.append_agent_events(*agents).await.map(|()| None)
            }
            Self::PruneAgentEvents { max_events } => {
                store.prune_agent_events(*max_events).await.map(|()| None)
            }
            Self::CountAgents => store.count_agents().await.map(Some),
            Self::CountAgentEvents => store.count_agent_events().await.map(Some),
        }
    }
}

/// A named, scheduled unit of work applied to every tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationDef {
    /// Metric label; must be unique within a run.
    pub name: String,
    /// Trigger period in milliseconds. Zero means run exactly once,
    /// immediately, with no recurrence.
    #[serde(default)]
    pub period_ms: u64,
    pub kind: OperationKind,
}

impl OperationDef {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Deserialize)]
struct OperationMenuFile {
    #[serde(rename = "operation")]
    operations: Vec<OperationDef>,
}

/// Parse an operation menu from TOML text.
///
/// ```toml
/// [[operation]]
/// name = "agent-status-active"
/// period_ms = 5000
/// kind = { type = "update-agent-status", agents = 10, status = "active" }
/// ```
pub fn menu_from_toml(text: &str) -> Result<Vec<OperationDef>> {
    let file: OperationMenuFile =
        toml::from_str(text).map_err(|e| Error::Config(format!("bad operation menu: {e}")))?;
    validate_menu(&file.operations)?;
    Ok(file.operations)
}

/// Reject empty menus and duplicate operation names.
pub fn validate_menu(operations: &[OperationDef]) -> Result<()> {
    if operations.is_empty() {
        return Err(Error::Config("operation menu is empty".to_string()));
    }
    let mut seen = std::collections::HashSet::new();
    for op in operations {
        if !seen.insert(op.name.as_str()) {
            return Err(Error::Config(format!(
                "duplicate operation name: {}",
                op.name
            )));
        }
    }
    Ok(())
}

/// The stock menu: one-shot seeding plus the recurring churn operations.
pub fn default_menu() -> Vec<OperationDef> {
    vec![
        OperationDef {
            name: "tenant-init".to_string(),
            period_ms: 0,
            kind: OperationKind::SeedAgents { agents: 60 },
        },
        OperationDef {
            name: "agent-status-active".to_string(),
            period_ms: 5_000,
            kind: OperationKind::UpdateAgentStatus {
                agents: 10,
                status: "active".to_string(),
            },
        },
        OperationDef {
            name: "agent-status-inactive".to_string(),
            period_ms: 8_000,
            kind: OperationKind::UpdateAgentStatus {
                agents: 10,
                status: "inactive".to_string(),
            },
        },
        OperationDef {
            name: "agent-events".to_string(),
            period_ms: 15_000,
            kind: OperationKind::AppendAgentEvents { agents: 10 },
        },
        OperationDef {
            name: "cull-agent-events".to_string(),
            period_ms: 30_000,
            kind: OperationKind::PruneAgentEvents { max_events: 30 },
        },
        OperationDef {
            name: "agents-count".to_string(),
            period_ms: 30_000,
            kind: OperationKind::CountAgents,
        },
        OperationDef {
            name: "agent-events-count".to_string(),
            period_ms: 30_000,
            kind: OperationKind::CountAgentEvents,
        },
    ]
}
