//! JSON persistence for an in-memory namespace.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use super::store::StoreSnapshot;
use crate::domain::{BrokerFault, QueueDescription, Rule, SubscriptionDescription, TopicDescription};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state file content rejected: {0}")]
    Invalid(#[from] BrokerFault),
}

/// Entire namespace content: entities, rules and messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub name: String,
    pub topics: Vec<TopicSnapshot>,
    pub queues: Vec<QueueSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    pub description: TopicDescription,
    pub subscriptions: Vec<SubscriptionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub description: SubscriptionDescription,
    pub rules: Vec<Rule>,
    pub messages: StoreSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub description: QueueDescription,
    pub messages: StoreSnapshot,
}

impl NamespaceSnapshot {
    /// Read a snapshot; a missing file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), "Loaded namespace snapshot");
        Ok(Some(snapshot))
    }

    /// Write the snapshot, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let raw = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Saved namespace snapshot");
        Ok(())
    }
}
