//! Ledger resolver
//!
//! Maps ledger names to live instances. The first request for a name
//! constructs storage through the factory and caches the instance;
//! later requests share it. The map is guarded by one mutex and has a
//! clear shutdown boundary: `close_all` drains it and releases shared
//! resources.

use crate::clock::{Clock, SystemClock};
use crate::config::StorageConfig;
use crate::ledger::Ledger;
use crate::storage::StoreFactory;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared registry of named ledgers.
pub struct Resolver {
    factory: StoreFactory,
    clock: Arc<dyn Clock>,
    ledgers: Mutex<HashMap<String, Arc<Ledger>>>,
}

impl Resolver {
    /// Create a resolver over the configured storage.
    pub fn new(config: StorageConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a resolver with an injected clock.
    pub fn with_clock(config: StorageConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            factory: StoreFactory::new(config),
            clock,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a name to its ledger, constructing it on first use.
    pub async fn get(&self, name: &str) -> Result<Arc<Ledger>> {
        validate_name(name)?;

        let mut ledgers = self.ledgers.lock().await;
        if let Some(ledger) = ledgers.get(name) {
            return Ok(ledger.clone());
        }

        let store = self.factory.make(name).await?;
        let ledger = Arc::new(Ledger::new(name, store, self.clock.clone()));
        ledgers.insert(name.to_string(), ledger.clone());

        tracing::info!(ledger = name, "ledger opened");
        Ok(ledger)
    }

    /// Close every open ledger and shared storage resources.
    pub async fn close_all(&self) -> Result<()> {
        let mut ledgers = self.ledgers.lock().await;
        for (name, ledger) in ledgers.drain() {
            if let Err(err) = ledger.close().await {
                tracing::warn!(ledger = %name, %err, "error closing ledger");
            }
        }
        self.factory.close().await?;

        tracing::info!("resolver shut down");
        Ok(())
    }
}

/// Ledger names become storage paths and schema names; restrict them to
/// a charset that is safe in both.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Resolver("ledger name is empty".to_string()));
    }
    if name.len() > 64 {
        return Err(Error::Resolver(format!(
            "ledger name too long: {} chars",
            name.len()
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Resolver(format!("invalid ledger name: {name:?}")));
    }
    Ok(())
}
