//! Key-value persistence for saved strategies and the current session marker.

use crate::error::{StorageError, StorageResult};
use crate::models::Configuration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SESSION_KEY: &str = "session:current";
const STRATEGY_PREFIX: &str = "strategy:";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;
    /// Matching keys in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedStrategy {
    pub name: String,
    pub config: Configuration,
    pub saved_at: DateTime<Utc>,
}

/// Named configurations stored under `strategy:<name>`.
#[derive(Clone)]
pub struct StrategyLibrary {
    store: Arc<dyn KeyValueStore>,
}

fn strategy_key(name: &str) -> StorageResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StorageError::Malformed {
            key: STRATEGY_PREFIX.to_string(),
            reason: "strategy name must not be empty".to_string(),
        });
    }
    Ok(format!("{}{}", STRATEGY_PREFIX, name))
}

impl StrategyLibrary {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, name: &str, config: &Configuration) -> StorageResult<SavedStrategy> {
        let key = strategy_key(name)?;
        let saved = SavedStrategy {
            name: name.trim().to_string(),
            config: config.clone(),
            saved_at: Utc::now(),
        };
        let payload = serde_json::to_string(&saved).map_err(|err| StorageError::Malformed {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        self.store.put(&key, &payload).await?;
        info!("Saved strategy {} ({} on {})", saved.name, config.strategy, config.symbol);
        Ok(saved)
    }

    pub async fn load(&self, name: &str) -> StorageResult<Option<SavedStrategy>> {
        let key = strategy_key(name)?;
        let Some(payload) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|err| StorageError::Malformed {
                key,
                reason: err.to_string(),
            })
    }

    /// Every readable entry, sorted by name. Unreadable entries are skipped.
    pub async fn list(&self) -> StorageResult<Vec<SavedStrategy>> {
        let mut saved = Vec::new();
        for key in self.store.keys_with_prefix(STRATEGY_PREFIX).await? {
            let Some(payload) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<SavedStrategy>(&payload) {
                Ok(entry) => saved.push(entry),
                Err(err) => debug!("Skipping unreadable strategy entry {}: {}", key, err),
            }
        }
        saved.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(saved)
    }

    pub async fn delete(&self, name: &str) -> StorageResult<bool> {
        let key = strategy_key(name)?;
        self.store.delete(&key).await
    }
}
