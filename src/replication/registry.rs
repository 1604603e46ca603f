//! Effect Registry
//!
//! Maps operation kinds (e.g. "kv.put") to the closures that apply a
//! committed operation to the embedding application's state. The log calls
//! [`EffectRegistry::apply`] exactly once per committed index.

use super::types::LogEntry;

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe effect callback. Runs synchronously inside `commit`.
pub type EffectFn = Arc<dyn Fn(&LogEntry) -> Result<()> + Send + Sync>;

pub struct EffectRegistry {
    effects: DashMap<String, EffectFn>,
}

impl EffectRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `effect` under `kind`, replacing any previous one.
    pub fn register<F>(&self, kind: &str, effect: F)
    where
        F: Fn(&LogEntry) -> Result<()> + Send + Sync + 'static,
    {
        self.effects.insert(kind.to_string(), Arc::new(effect));
        tracing::info!("Registered effect: {}", kind);
    }

    /// Runs the effect registered for the entry's operation kind.
    ///
    /// # Returns
    /// * `Ok(true)` if an effect ran successfully.
    /// * `Ok(false)` if no effect is registered for the kind.
    /// * `Err` if the effect itself failed.
    pub fn apply(&self, entry: &LogEntry) -> Result<bool> {
        // Clone the Arc out so the shard lock is not held while user code runs.
        let effect = match self.effects.get(&entry.operation.kind) {
            Some(effect) => effect.value().clone(),
            None => {
                tracing::warn!(
                    "No effect registered for '{}' (index {})",
                    entry.operation.kind,
                    entry.index
                );
                return Ok(false);
            }
        };

        tracing::debug!(
            "Applying '{}' at index {} ({} bytes)",
            entry.operation.kind,
            entry.index,
            entry.operation.payload.len()
        );
        effect(entry)?;
        Ok(true)
    }

    pub fn has_effect(&self, kind: &str) -> bool {
        self.effects.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        self.effects.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self {
            effects: DashMap::new(),
        }
    }
}
