use super::DataSource;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Fixed in-memory datasets serving as the degraded-mode secondary.
///
/// Holds a snapshot of reference data good enough to keep the embedding
/// application usable while the remote API is unavailable. Keys mirror the
/// primary service's endpoint keys so the two sources are interchangeable
/// behind a [`FallbackCoordinator`](super::FallbackCoordinator).
pub struct StaticDataSource {
    name: String,
    datasets: HashMap<String, Value>,
}

impl StaticDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datasets: HashMap::new(),
        }
    }

    pub fn with_dataset(mut self, key: impl Into<String>, value: Value) -> Self {
        self.datasets.insert(key.into(), value);
        self
    }

    pub fn dataset_keys(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: &str) -> Result<Value> {
        match self.datasets.get(key) {
            Some(value) => {
                debug!(source = %self.name, key, "serving static dataset");
                Ok(value.clone())
            }
            None => Err(Error::configuration_with_context(
                format!("no static dataset registered for key '{}'", key),
                ErrorContext::new()
                    .with_field_path(key)
                    .with_source("static_source"),
            )),
        }
    }
}
