//! Протокол discovery.
//!
//! Узлы и их endpoints регистрируются в двух общих структурах:
//!
//! - документ discovery ([`DiscoveryDocument`]) в хранилище документов,
//!   адрес узла → описания endpoints;
//! - граф топологии в [`GraphStore`](crate::backend::GraphStore): узлы
//!   `node`/`topic`/`shared_variable`, рёбра `publish`/`subscribed`/`uses`.
//!
//! Каждое read-modify-write выполняется под именованной блокировкой
//! документа. Проверка оставшихся рёбер и удаление осиротевшего узла
//! топика идут в той же области блокировки.

pub mod descriptor;
pub mod document;

use std::collections::BTreeSet;

pub use descriptor::*;
pub use document::*;
use graphbus_error::{EndpointError, GraphBusResult, NodeError};
use serde_json::Value;
use tracing::debug;

use crate::{
    backend::{Backend, EdgeLabel, EdgePattern, GraphEdge, GraphNode, NodeKey, NodeLabel, Properties},
    topic::topic_path,
};

/// Регистратор узлов и endpoints в общих структурах discovery.
#[derive(Clone, Debug)]
pub struct DiscoveryGraph {
    backend: Backend,
    document: String,
}

impl DiscoveryGraph {
    /// `document`: имя документа discovery в хранилище (оно же имя
    /// блокировки).
    pub fn new(
        backend: Backend,
        document: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            document: document.into(),
        }
    }

    /// Имя документа для пространства имён: `/<namespace>/<name>` или
    /// просто `name` без пространства имён.
    pub fn document_name(
        namespace: &str,
        name: &str,
    ) -> String {
        if namespace.trim_matches('/').is_empty() {
            name.to_string()
        } else {
            topic_path([namespace, name])
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Снимок документа (без блокировки).
    pub fn snapshot(&self) -> GraphBusResult<DiscoveryDocument> {
        DiscoveryDocument::load(self.backend.store(), &self.document)
    }

    pub fn is_node_declared(
        &self,
        address: &str,
    ) -> GraphBusResult<bool> {
        Ok(self.snapshot()?.contains_node(address))
    }

    pub fn endpoints(
        &self,
        address: &str,
    ) -> GraphBusResult<Vec<EndpointDescriptor>> {
        Ok(self.snapshot()?.endpoints(address).to_vec())
    }

    /// Создаёт запись узла и его вершину в графе.
    ///
    /// Адрес, который уже держит живой узел, отклоняется.
    pub fn register_node(
        &self,
        address: &str,
        node_ref: &str,
        namespace: &str,
    ) -> GraphBusResult<()> {
        let _guard = self.backend.lock(&self.document)?;

        let mut doc = self.snapshot()?;
        if doc.contains_node(address) {
            return Err(NodeError::AlreadyDeclared {
                node: address.to_string(),
            }
            .into());
        }
        doc.add_node(address);
        doc.save(self.backend.store(), &self.document)?;

        self.backend.graph().add_node(
            GraphNode::new(NodeKey::node(address))
                .with_property("ref", node_ref)
                .with_property("namespace", namespace),
        )?;

        debug!(node = address, document = %self.document, "node registered");
        Ok(())
    }

    /// Удаляет запись узла и его вершину; вершины топиков и переменных,
    /// оставшиеся без рёбер, удаляются.
    pub fn unregister_node(
        &self,
        address: &str,
    ) -> GraphBusResult<()> {
        let _guard = self.backend.lock(&self.document)?;

        let mut doc = self.snapshot()?;
        if doc.remove_node(address).is_some() {
            doc.save(self.backend.store(), &self.document)?;
        }

        let key = NodeKey::node(address);
        let graph = self.backend.graph();
        let neighbours: BTreeSet<NodeKey> = graph
            .match_edges(&EdgePattern::any().touching(key.clone()))?
            .into_iter()
            .map(|e| if e.from == key { e.to } else { e.from })
            .collect();

        graph.delete_node(&key)?;
        for neighbour in &neighbours {
            self.prune_if_orphan(neighbour)?;
        }

        debug!(node = address, document = %self.document, "node unregistered");
        Ok(())
    }

    /// Регистрирует endpoint: описание в документе и ребро в графе.
    ///
    /// Узел-владелец обязан быть зарегистрирован.
    pub fn declare_endpoint(
        &self,
        address: &str,
        namespace: &str,
        descriptor: &EndpointDescriptor,
    ) -> GraphBusResult<()> {
        let _guard = self.backend.lock(&self.document)?;

        let mut doc = self.snapshot()?;
        if !doc.upsert_endpoint(address, descriptor.clone()) {
            return Err(EndpointError::NodeNotDeclared {
                address: address.to_string(),
            }
            .into());
        }
        doc.save(self.backend.store(), &self.document)?;

        if let Some((vertex, edge)) = topology_for(address, namespace, descriptor) {
            let graph = self.backend.graph();
            graph.add_node(vertex)?;
            // Вершина узла могла быть удалена из графа отдельно от документа.
            graph.add_node(GraphNode::new(NodeKey::node(address)))?;
            graph.add_edge(edge)?;
        }

        debug!(
            node = address,
            endpoint_id = descriptor.id(),
            kind = %descriptor.kind(),
            target = descriptor.target(),
            "endpoint declared"
        );
        Ok(())
    }

    /// Удаляет описание endpoint'а и его ребро; вершина топика или
    /// переменной без оставшихся рёбер удаляется.
    pub fn undeclare_endpoint(
        &self,
        address: &str,
        descriptor: &EndpointDescriptor,
    ) -> GraphBusResult<()> {
        let _guard = self.backend.lock(&self.document)?;

        let mut doc = self.snapshot()?;
        if doc.remove_endpoint(address, descriptor.id()) {
            doc.save(self.backend.store(), &self.document)?;
        }

        if let Some(target) = target_key(descriptor) {
            self.backend
                .graph()
                .delete_edges(&EdgePattern::any().endpoint(descriptor.id()))?;
            self.prune_if_orphan(&target)?;
        }

        debug!(
            node = address,
            endpoint_id = descriptor.id(),
            kind = %descriptor.kind(),
            "endpoint undeclared"
        );
        Ok(())
    }

    /// Удаляет вершину топика/переменной, если на неё не ссылается ни одно
    /// ребро. Вызывается под блокировкой документа.
    fn prune_if_orphan(
        &self,
        key: &NodeKey,
    ) -> GraphBusResult<bool> {
        if key.label == NodeLabel::Node {
            return Ok(false);
        }
        let graph = self.backend.graph();
        if graph
            .match_edges(&EdgePattern::any().touching(key.clone()))?
            .is_empty()
        {
            let deleted = graph.delete_node(key)?;
            if deleted {
                debug!(vertex = %key, "orphan vertex pruned");
            }
            return Ok(deleted);
        }
        Ok(false)
    }
}

/// Вершина графа, на которую указывает endpoint (таймеры рёбер не имеют).
fn target_key(descriptor: &EndpointDescriptor) -> Option<NodeKey> {
    match descriptor {
        EndpointDescriptor::Publisher { topic, .. } | EndpointDescriptor::Subscriber { topic, .. } => {
            Some(NodeKey::topic(topic.as_str()))
        }
        EndpointDescriptor::SharedVariable { name, .. } => {
            Some(NodeKey::shared_variable(name.as_str()))
        }
        EndpointDescriptor::Timer { .. } => None,
    }
}

/// Вершина и ребро топологии для endpoint'а.
fn topology_for(
    address: &str,
    namespace: &str,
    descriptor: &EndpointDescriptor,
) -> Option<(GraphNode, GraphEdge)> {
    let target = target_key(descriptor)?;
    let node = NodeKey::node(address);

    let mut properties = Properties::new();
    properties.insert("namespace".to_string(), Value::from(namespace));

    let (label, from, to, vertex) = match descriptor {
        EndpointDescriptor::Publisher { msg_type, qos, .. } => {
            properties.insert("msg_type".to_string(), Value::from(msg_type.as_str()));
            properties.insert("qos".to_string(), qos.clone().map_or(Value::Null, Value::from));
            (EdgeLabel::Publish, node, target.clone(), GraphNode::new(target))
        }
        EndpointDescriptor::Subscriber { msg_type, qos, .. } => {
            properties.insert("msg_type".to_string(), Value::from(msg_type.as_str()));
            properties.insert("qos".to_string(), qos.clone().map_or(Value::Null, Value::from));
            (EdgeLabel::Subscribed, target.clone(), node, GraphNode::new(target))
        }
        EndpointDescriptor::SharedVariable {
            scope,
            variable_type,
            descriptor: text,
            ..
        } => {
            properties.insert("variable_type".to_string(), Value::from(variable_type.as_str()));
            let vertex = GraphNode::new(target.clone())
                .with_property("scope", scope.as_str())
                .with_property("variable_type", variable_type.as_str())
                .with_property("descriptor", text.as_str());
            (EdgeLabel::Uses, node, target, vertex)
        }
        EndpointDescriptor::Timer { .. } => return None,
    };

    Some((
        vertex,
        GraphEdge {
            label,
            from,
            to,
            endpoint_id: descriptor.id().to_string(),
            properties,
        },
    ))
}

#[cfg(test)]
mod tests {
    use graphbus_error::StatusCode;

    use super::*;
    use crate::endpoint::{Scope, VariableType};

    fn setup() -> DiscoveryGraph {
        let discovery = DiscoveryGraph::new(Backend::in_memory(), "comm_graph");
        discovery.register_node("/ns/a", "a", "ns").unwrap();
        discovery
    }

    fn publisher(
        id: &str,
        topic: &str,
    ) -> EndpointDescriptor {
        EndpointDescriptor::Publisher {
            id: id.into(),
            topic: topic.into(),
            msg_type: "String".into(),
            qos: None,
        }
    }

    fn topic_edges(
        discovery: &DiscoveryGraph,
        topic: &str,
    ) -> usize {
        discovery
            .backend()
            .graph()
            .match_edges(&EdgePattern::any().touching(NodeKey::topic(topic)))
            .unwrap()
            .len()
    }

    #[test]
    fn test_document_name() {
        assert_eq!(DiscoveryGraph::document_name("", "comm_graph"), "comm_graph");
        assert_eq!(DiscoveryGraph::document_name("/", "comm_graph"), "comm_graph");
        assert_eq!(
            DiscoveryGraph::document_name("robot", "comm_graph"),
            "/robot/comm_graph"
        );
    }

    /// Тест проверяет, что занятый адрес нельзя зарегистрировать повторно,
    /// а после снятия узла адрес снова свободен.
    #[test]
    fn test_register_node_rejects_live_address() {
        let discovery = setup();
        let err = discovery.register_node("/ns/a", "a", "ns").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NodeAlreadyDeclared);
        assert!(discovery.is_node_declared("/ns/a").unwrap());

        discovery.unregister_node("/ns/a").unwrap();
        discovery.register_node("/ns/a", "a", "ns").unwrap();
    }

    /// Тест проверяет, что endpoint незарегистрированного узла отклоняется.
    #[test]
    fn test_declare_requires_node() {
        let discovery = setup();
        let err = discovery
            .declare_endpoint("/ns/ghost", "ns", &publisher("p1", "/t"))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NodeNotDeclared);
        assert_eq!(topic_edges(&discovery, "/t"), 0);
    }

    /// Тест проверяет, что последний undeclare удаляет вершину топика.
    #[test]
    fn test_topic_pruned_after_last_edge() {
        let discovery = setup();
        let p1 = publisher("p1", "/t");
        let p2 = publisher("p2", "/t");
        discovery.declare_endpoint("/ns/a", "ns", &p1).unwrap();
        discovery.declare_endpoint("/ns/a", "ns", &p2).unwrap();
        assert_eq!(topic_edges(&discovery, "/t"), 2);
        assert_eq!(discovery.endpoints("/ns/a").unwrap().len(), 2);

        discovery.undeclare_endpoint("/ns/a", &p1).unwrap();
        assert_eq!(topic_edges(&discovery, "/t"), 1);
        assert!(discovery
            .backend()
            .graph()
            .find_node(&NodeKey::topic("/t"))
            .unwrap()
            .is_some());

        discovery.undeclare_endpoint("/ns/a", &p2).unwrap();
        assert!(discovery
            .backend()
            .graph()
            .find_node(&NodeKey::topic("/t"))
            .unwrap()
            .is_none());
        assert!(discovery.endpoints("/ns/a").unwrap().is_empty());
    }

    #[test]
    fn test_subscriber_edge_direction() {
        let discovery = setup();
        let sub = EndpointDescriptor::Subscriber {
            id: "s1".into(),
            topic: "/t".into(),
            msg_type: "String".into(),
            qos: Some("reliable".into()),
        };
        discovery.declare_endpoint("/ns/a", "ns", &sub).unwrap();

        let edges = discovery
            .backend()
            .graph()
            .match_edges(&EdgePattern::any().label(EdgeLabel::Subscribed))
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, NodeKey::topic("/t"));
        assert_eq!(edges[0].to, NodeKey::node("/ns/a"));
        assert_eq!(edges[0].properties["qos"], Value::from("reliable"));
    }

    /// Тест проверяет, что таймер попадает в документ, но не в граф.
    #[test]
    fn test_timer_has_no_edge() {
        let discovery = setup();
        let timer = EndpointDescriptor::Timer {
            id: "t1".into(),
            name: "tick".into(),
            period_secs: 1.0,
        };
        discovery.declare_endpoint("/ns/a", "ns", &timer).unwrap();
        assert_eq!(discovery.endpoints("/ns/a").unwrap(), vec![timer.clone()]);
        assert!(discovery
            .backend()
            .graph()
            .match_edges(&EdgePattern::any())
            .unwrap()
            .is_empty());
        discovery.undeclare_endpoint("/ns/a", &timer).unwrap();
    }

    #[test]
    fn test_shared_variable_uses_edge() {
        let discovery = setup();
        let sv = EndpointDescriptor::SharedVariable {
            id: "sv1".into(),
            name: "/ns/speed".into(),
            scope: Scope::Global,
            variable_type: VariableType::Float,
            descriptor: "wheel speed".into(),
        };
        discovery.declare_endpoint("/ns/a", "ns", &sv).unwrap();

        let vertex = discovery
            .backend()
            .graph()
            .find_node(&NodeKey::shared_variable("/ns/speed"))
            .unwrap()
            .unwrap();
        assert_eq!(vertex.properties["variable_type"], Value::from("float"));

        discovery.undeclare_endpoint("/ns/a", &sv).unwrap();
        assert!(discovery
            .backend()
            .graph()
            .find_node(&NodeKey::shared_variable("/ns/speed"))
            .unwrap()
            .is_none());
    }

    /// Тест проверяет, что unregister_node удаляет узел и осиротевшие топики.
    #[test]
    fn test_unregister_node_prunes_orphans() {
        let discovery = setup();
        discovery.register_node("/ns/b", "b", "ns").unwrap();
        discovery
            .declare_endpoint("/ns/a", "ns", &publisher("p1", "/only_a"))
            .unwrap();
        discovery
            .declare_endpoint("/ns/a", "ns", &publisher("p2", "/shared"))
            .unwrap();
        discovery
            .declare_endpoint("/ns/b", "ns", &publisher("p3", "/shared"))
            .unwrap();

        discovery.unregister_node("/ns/a").unwrap();

        let graph = discovery.backend().graph();
        assert!(graph.find_node(&NodeKey::node("/ns/a")).unwrap().is_none());
        assert!(graph.find_node(&NodeKey::topic("/only_a")).unwrap().is_none());
        assert!(graph.find_node(&NodeKey::topic("/shared")).unwrap().is_some());
        assert!(!discovery.is_node_declared("/ns/a").unwrap());
        assert!(discovery.is_node_declared("/ns/b").unwrap());
    }
}
