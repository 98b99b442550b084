//! CRUD store for test configurations.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::TestConfiguration;
use crate::persist::atomic_write_json;

/// Failure modes of the configuration store.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// No configuration with the given id.
    #[error("configuration not found: {0}")]
    NotFound(String),

    /// Low-level I/O error on the backing document.
    #[error("configuration storage failure: {0}")]
    Storage(#[from] std::io::Error),

    /// The backing document is not a valid configuration list.
    #[error("configuration document not parseable: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Persists all test configurations in one JSON document.
///
/// Every save rewrites the document atomically and reassigns the steps'
/// `index` values to a contiguous 1..N in list order, so indices can never
/// drift apart from the stored order.
pub struct TestConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TestConfigStore {
    /// Store backed by the given document path (created on first save).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<TestConfiguration>, ConfigStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// All configurations in save order.
    pub async fn list(&self) -> Result<Vec<TestConfiguration>, ConfigStoreError> {
        let _guard = self.write_lock.lock().await;
        self.load()
    }

    /// One configuration by id.
    pub async fn get(&self, id: &str) -> Result<TestConfiguration, ConfigStoreError> {
        let _guard = self.write_lock.lock().await;
        self.load()?
            .into_iter()
            .find(|config| config.id == id)
            .ok_or_else(|| ConfigStoreError::NotFound(id.to_string()))
    }

    /// Insert or replace a configuration.
    ///
    /// An empty id gets a fresh uuid. Steps are reindexed 1..N in the
    /// order they arrive; incoming index values are ignored.
    pub async fn save(
        &self,
        mut config: TestConfiguration,
    ) -> Result<TestConfiguration, ConfigStoreError> {
        let _guard = self.write_lock.lock().await;

        if config.id.is_empty() {
            config.id = Uuid::new_v4().to_string();
        }
        for (position, step) in config.steps.iter_mut().enumerate() {
            step.index = u32::try_from(position).unwrap_or(u32::MAX).saturating_add(1);
        }

        let mut configs = self.load()?;
        match configs.iter_mut().find(|existing| existing.id == config.id) {
            Some(existing) => *existing = config.clone(),
            None => configs.push(config.clone()),
        }
        atomic_write_json(&self.path, &configs)?;
        Ok(config)
    }

    /// Remove a configuration by id.
    pub async fn delete(&self, id: &str) -> Result<(), ConfigStoreError> {
        let _guard = self.write_lock.lock().await;

        let configs = self.load()?;
        let remaining: Vec<TestConfiguration> = configs
            .iter()
            .filter(|config| config.id != id)
            .cloned()
            .collect();
        if remaining.len() == configs.len() {
            return Err(ConfigStoreError::NotFound(id.to_string()));
        }
        atomic_write_json(&self.path, &remaining)?;
        Ok(())
    }
}
