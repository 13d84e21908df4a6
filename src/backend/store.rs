use std::sync::Arc;

use dashmap::DashMap;
use graphbus_error::GraphBusResult;
use serde_json::Value;

use super::DocumentStore;

/// Хранилище документов в памяти процесса.
pub struct InMemoryStore {
    pub data: Arc<DashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryStore {
    fn get(
        &self,
        name: &str,
    ) -> GraphBusResult<Option<Value>> {
        Ok(self.data.get(name).map(|entry| entry.clone()))
    }

    fn set(
        &self,
        name: &str,
        value: Value,
    ) -> GraphBusResult<()> {
        self.data.insert(name.to_string(), value);
        Ok(())
    }

    fn exists(
        &self,
        name: &str,
    ) -> GraphBusResult<bool> {
        Ok(self.data.contains_key(name))
    }

    fn del(
        &self,
        name: &str,
    ) -> GraphBusResult<bool> {
        Ok(self.data.remove(name).is_some())
    }
}
