//! Model catalog
//!
//! Maps the logical model keys used by the pipeline (`image`, `clip`,
//! `caption`, ...) to vendor model references. Injected into the
//! [`crate::PredictionClient`] at construction.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, String>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a model reference
    pub fn with_model(mut self, key: impl Into<String>, model_ref: impl Into<String>) -> Self {
        self.insert(key, model_ref);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, model_ref: impl Into<String>) {
        self.models.insert(key.into(), model_ref.into());
    }

    /// Resolves a logical key to the vendor model reference
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.models.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
