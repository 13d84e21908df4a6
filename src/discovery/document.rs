use std::collections::BTreeMap;

use graphbus_error::{BackendError, GraphBusResult};
use serde::{Deserialize, Serialize};

use super::EndpointDescriptor;
use crate::backend::DocumentStore;

/// Документ discovery: адрес узла → описания его endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryDocument {
    nodes: BTreeMap<String, Vec<EndpointDescriptor>>,
}

impl DiscoveryDocument {
    /// Читает документ из хранилища; отсутствующий документ пуст.
    pub fn load(
        store: &dyn DocumentStore,
        name: &str,
    ) -> GraphBusResult<Self> {
        match store.get(name)? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| BackendError::codec(format!("discovery document {name}"), e).into()),
            None => Ok(Self::default()),
        }
    }

    pub fn save(
        &self,
        store: &dyn DocumentStore,
        name: &str,
    ) -> GraphBusResult<()> {
        let value = serde_json::to_value(self)
            .map_err(|e| BackendError::codec(format!("discovery document {name}"), e))?;
        store.set(name, value)
    }

    pub fn contains_node(
        &self,
        address: &str,
    ) -> bool {
        self.nodes.contains_key(address)
    }

    /// Создаёт запись узла, если её нет. Существующие endpoints сохраняются.
    pub fn add_node(
        &mut self,
        address: &str,
    ) {
        self.nodes.entry(address.to_string()).or_default();
    }

    /// Удаляет запись узла и возвращает его endpoints.
    pub fn remove_node(
        &mut self,
        address: &str,
    ) -> Option<Vec<EndpointDescriptor>> {
        self.nodes.remove(address)
    }

    /// Добавляет описание или заменяет описание с тем же id.
    ///
    /// Возвращает `false`, если узла нет в документе.
    pub fn upsert_endpoint(
        &mut self,
        address: &str,
        descriptor: EndpointDescriptor,
    ) -> bool {
        let Some(endpoints) = self.nodes.get_mut(address) else {
            return false;
        };
        match endpoints.iter_mut().find(|d| d.id() == descriptor.id()) {
            Some(existing) => *existing = descriptor,
            None => endpoints.push(descriptor),
        }
        true
    }

    pub fn remove_endpoint(
        &mut self,
        address: &str,
        endpoint_id: &str,
    ) -> bool {
        let Some(endpoints) = self.nodes.get_mut(address) else {
            return false;
        };
        let before = endpoints.len();
        endpoints.retain(|d| d.id() != endpoint_id);
        endpoints.len() != before
    }

    pub fn endpoints(
        &self,
        address: &str,
    ) -> &[EndpointDescriptor] {
        self.nodes.get(address).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::InMemoryStore;

    fn timer(id: &str) -> EndpointDescriptor {
        EndpointDescriptor::Timer {
            id: id.into(),
            name: "tick".into(),
            period_secs: 0.5,
        }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let store = InMemoryStore::new();
        let doc = DiscoveryDocument::load(&store, "comm_graph").unwrap();
        assert!(doc.is_empty());
    }

    /// Тест проверяет, что upsert не дублирует описание с тем же id.
    #[test]
    fn test_upsert_replaces_by_id() {
        let mut doc = DiscoveryDocument::default();
        doc.add_node("/a");
        assert!(doc.upsert_endpoint("/a", timer("t1")));
        assert!(doc.upsert_endpoint("/a", timer("t1")));
        assert_eq!(doc.endpoints("/a").len(), 1);
        assert!(!doc.upsert_endpoint("/ghost", timer("t2")));
    }

    #[test]
    fn test_add_node_keeps_endpoints() {
        let mut doc = DiscoveryDocument::default();
        doc.add_node("/a");
        doc.upsert_endpoint("/a", timer("t1"));
        doc.add_node("/a");
        assert_eq!(doc.endpoints("/a").len(), 1);
    }

    /// Тест проверяет сохранение и загрузку через хранилище.
    #[test]
    fn test_save_and_load() {
        let store = InMemoryStore::new();
        let mut doc = DiscoveryDocument::default();
        doc.add_node("/a");
        doc.upsert_endpoint("/a", timer("t1"));
        doc.save(&store, "comm_graph").unwrap();

        let raw = store.data.get("comm_graph").unwrap().clone();
        assert_eq!(raw["/a"][0]["type"], json!("timer"));

        let mut loaded = DiscoveryDocument::load(&store, "comm_graph").unwrap();
        assert_eq!(loaded, doc);
        assert!(loaded.remove_endpoint("/a", "t1"));
        assert!(!loaded.remove_endpoint("/a", "t1"));
    }

    #[test]
    fn test_corrupted_document_is_codec_error() {
        let store = InMemoryStore::new();
        store.set("comm_graph", json!([1, 2, 3])).unwrap();
        let err = DiscoveryDocument::load(&store, "comm_graph").unwrap_err();
        assert_eq!(err.status_code(), graphbus_error::StatusCode::SerializationFailed);
    }
}
