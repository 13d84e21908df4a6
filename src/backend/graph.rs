use std::collections::BTreeMap;

use graphbus_error::{BackendError, GraphBusResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Свойства узла или ребра графа.
pub type Properties = Map<String, Value>;

/// Метка узла графа топологии.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    Node,
    Topic,
    SharedVariable,
}

/// Метка ребра графа топологии.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    /// node → topic
    Publish,
    /// topic → node
    Subscribed,
    /// node → shared_variable
    Uses,
}

/// Ключ узла графа: метка + имя.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: NodeLabel,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: NodeKey,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub label: EdgeLabel,
    pub from: NodeKey,
    pub to: NodeKey,
    /// Endpoint, которому принадлежит ребро.
    pub endpoint_id: String,
    #[serde(default)]
    pub properties: Properties,
}

/// Шаблон для поиска и удаления рёбер. Пустые поля совпадают с чем угодно.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgePattern {
    pub label: Option<EdgeLabel>,
    pub from: Option<NodeKey>,
    pub to: Option<NodeKey>,
    /// Узел на любом из концов ребра.
    pub touching: Option<NodeKey>,
    pub endpoint_id: Option<String>,
}

/// Property-граф топологии.
pub trait GraphStore: Send + Sync {
    /// Добавляет узел; существующий узел с тем же ключом получает
    /// объединённые свойства.
    fn add_node(
        &self,
        node: GraphNode,
    ) -> GraphBusResult<()>;

    fn find_node(
        &self,
        key: &NodeKey,
    ) -> GraphBusResult<Option<GraphNode>>;

    fn match_nodes(
        &self,
        label: NodeLabel,
    ) -> GraphBusResult<Vec<GraphNode>>;

    /// Удаляет узел вместе с инцидентными рёбрами.
    fn delete_node(
        &self,
        key: &NodeKey,
    ) -> GraphBusResult<bool>;

    /// Добавляет ребро; оба конца должны существовать.
    fn add_edge(
        &self,
        edge: GraphEdge,
    ) -> GraphBusResult<()>;

    fn match_edges(
        &self,
        pattern: &EdgePattern,
    ) -> GraphBusResult<Vec<GraphEdge>>;

    /// Удаляет подходящие рёбра. Возвращает их количество.
    fn delete_edges(
        &self,
        pattern: &EdgePattern,
    ) -> GraphBusResult<usize>;
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Topic => "topic",
            Self::SharedVariable => "shared_variable",
        }
    }
}

impl NodeKey {
    pub fn new(
        label: NodeLabel,
        name: impl Into<String>,
    ) -> Self {
        Self {
            label,
            name: name.into(),
        }
    }

    pub fn node(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Node, name)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Topic, name)
    }

    pub fn shared_variable(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::SharedVariable, name)
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "({}:{})", self.label.as_str(), self.name)
    }
}

impl GraphNode {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            properties: Properties::new(),
        }
    }

    pub fn with_property(
        mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

impl EdgePattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn label(
        mut self,
        label: EdgeLabel,
    ) -> Self {
        self.label = Some(label);
        self
    }

    pub fn from(
        mut self,
        key: NodeKey,
    ) -> Self {
        self.from = Some(key);
        self
    }

    pub fn to(
        mut self,
        key: NodeKey,
    ) -> Self {
        self.to = Some(key);
        self
    }

    pub fn touching(
        mut self,
        key: NodeKey,
    ) -> Self {
        self.touching = Some(key);
        self
    }

    pub fn endpoint(
        mut self,
        endpoint_id: impl Into<String>,
    ) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    pub fn matches(
        &self,
        edge: &GraphEdge,
    ) -> bool {
        self.label.map_or(true, |l| l == edge.label)
            && self.from.as_ref().map_or(true, |k| *k == edge.from)
            && self.to.as_ref().map_or(true, |k| *k == edge.to)
            && self
                .touching
                .as_ref()
                .map_or(true, |k| *k == edge.from || *k == edge.to)
            && self
                .endpoint_id
                .as_deref()
                .map_or(true, |id| id == edge.endpoint_id)
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: BTreeMap<NodeKey, Properties>,
    edges: Vec<GraphEdge>,
}

/// Граф топологии в памяти процесса.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    inner: RwLock<GraphInner>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }
}

impl GraphStore for InMemoryGraph {
    fn add_node(
        &self,
        node: GraphNode,
    ) -> GraphBusResult<()> {
        let mut inner = self.inner.write();
        inner
            .nodes
            .entry(node.key)
            .or_default()
            .extend(node.properties);
        Ok(())
    }

    fn find_node(
        &self,
        key: &NodeKey,
    ) -> GraphBusResult<Option<GraphNode>> {
        let inner = self.inner.read();
        Ok(inner.nodes.get(key).map(|props| GraphNode {
            key: key.clone(),
            properties: props.clone(),
        }))
    }

    fn match_nodes(
        &self,
        label: NodeLabel,
    ) -> GraphBusResult<Vec<GraphNode>> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .iter()
            .filter(|(key, _)| key.label == label)
            .map(|(key, props)| GraphNode {
                key: key.clone(),
                properties: props.clone(),
            })
            .collect())
    }

    fn delete_node(
        &self,
        key: &NodeKey,
    ) -> GraphBusResult<bool> {
        let mut inner = self.inner.write();
        let existed = inner.nodes.remove(key).is_some();
        inner.edges.retain(|e| e.from != *key && e.to != *key);
        Ok(existed)
    }

    fn add_edge(
        &self,
        edge: GraphEdge,
    ) -> GraphBusResult<()> {
        let mut inner = self.inner.write();
        for end in [&edge.from, &edge.to] {
            if !inner.nodes.contains_key(end) {
                return Err(BackendError::Graph {
                    reason: format!("cannot add {:?} edge: node {end} does not exist", edge.label),
                }
                .into());
            }
        }

        let existing = inner.edges.iter().position(|e| {
            e.label == edge.label
                && e.from == edge.from
                && e.to == edge.to
                && e.endpoint_id == edge.endpoint_id
        });
        match existing {
            Some(i) => inner.edges[i].properties.extend(edge.properties),
            None => inner.edges.push(edge),
        }
        Ok(())
    }

    fn match_edges(
        &self,
        pattern: &EdgePattern,
    ) -> GraphBusResult<Vec<GraphEdge>> {
        let inner = self.inner.read();
        Ok(inner
            .edges
            .iter()
            .filter(|e| pattern.matches(e))
            .cloned()
            .collect())
    }

    fn delete_edges(
        &self,
        pattern: &EdgePattern,
    ) -> GraphBusResult<usize> {
        let mut inner = self.inner.write();
        let before = inner.edges.len();
        inner.edges.retain(|e| !pattern.matches(e));
        Ok(before - inner.edges.len())
    }
}
