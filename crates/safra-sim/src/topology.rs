//! Static topology: node identifiers, weighted undirected edges, one root.
//!
//! A [`Topology`] can only be obtained through [`TopologyBuilder::build`] (or
//! the [`TopologySpec`] loaders, which go through the builder), so every
//! topology handed to the runtime is symmetric, connected and has exactly one
//! root. Nodes are stored in an arena; neighbors refer to each other by id and
//! arena index, never by pointer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Unique identifier for a node in the topology
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a new NodeId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of a node's ordered neighbor list
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: NodeId,
    /// Arena index of the neighbor
    pub index: usize,
    pub weight: f64,
}

/// A node and its ordered neighbor list
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub id: NodeId,
    /// Order fixes the token forwarding sequence
    pub neighbors: Vec<Link>,
}

impl NodeEntry {
    /// Look up the link to `neighbor`
    pub fn link_to(&self, neighbor: &NodeId) -> Option<&Link> {
        self.neighbors.iter().find(|link| &link.id == neighbor)
    }
}

/// A validated topology
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NodeEntry>,
    index: HashMap<NodeId, usize>,
    root: usize,
}

impl Topology {
    /// Start building a topology
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a validated topology
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in declaration order
    pub fn nodes(&self) -> &[NodeEntry] {
        &self.nodes
    }

    /// Node at an arena index
    pub fn node(&self, index: usize) -> &NodeEntry {
        &self.nodes[index]
    }

    /// Arena index of a node id
    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Arena index of the root
    pub fn root_index(&self) -> usize {
        self.root
    }

    /// Id of the root
    pub fn root(&self) -> &NodeId {
        &self.nodes[self.root].id
    }

    /// Weight of the edge between two nodes, if they are neighbors
    pub fn weight(&self, from: &NodeId, to: &NodeId) -> Option<f64> {
        let entry = &self.nodes[self.index_of(from)?];
        entry.link_to(to).map(|link| link.weight)
    }

    /// Number of undirected edges
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.neighbors.len()).sum::<usize>() / 2
    }

    /// Build from a deserialized specification
    pub fn from_spec(spec: TopologySpec) -> Result<Self, TopologyError> {
        let mut builder = TopologyBuilder::new();
        for node in spec.nodes {
            builder = builder.node(node.id.clone());
            if node.root {
                builder = builder.root(node.id.clone());
            }
            for neighbor in node.neighbors {
                builder = builder.neighbor(node.id.clone(), neighbor.id, neighbor.weight);
            }
        }
        builder.build()
    }

    /// Parse a YAML topology document
    pub fn from_yaml_str(text: &str) -> Result<Self, TopologyError> {
        let spec: TopologySpec =
            serde_yaml::from_str(text).map_err(|e| TopologyError::Parse(e.to_string()))?;
        Self::from_spec(spec)
    }

    /// Parse a JSON topology document
    pub fn from_json_str(text: &str) -> Result<Self, TopologyError> {
        let spec: TopologySpec =
            serde_json::from_str(text).map_err(|e| TopologyError::Parse(e.to_string()))?;
        Self::from_spec(spec)
    }

    /// Load a topology file; `.json` is parsed as JSON, anything else as YAML
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TopologyError::Parse(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }
}

/// Serializable topology description with explicit ordered neighbor lists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologySpec {
    pub nodes: Vec<NodeSpec>,
}

/// One node of a [`TopologySpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub neighbors: Vec<NeighborSpec>,
}

/// One neighbor entry of a [`NodeSpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborSpec {
    pub id: NodeId,
    pub weight: f64,
}

/// Fluent builder for [`Topology`]
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    declared: Vec<NodeId>,
    links: Vec<(NodeId, NodeId, f64)>,
    roots: Vec<NodeId>,
}

impl TopologyBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node
    pub fn node(mut self, id: impl Into<NodeId>) -> Self {
        self.declared.push(id.into());
        self
    }

    /// Declare several nodes
    pub fn nodes<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.declared.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add an undirected edge; appends to both ordered neighbor lists
    pub fn edge(self, a: impl Into<NodeId>, b: impl Into<NodeId>, weight: f64) -> Self {
        let a = a.into();
        let b = b.into();
        self.neighbor(a.clone(), b.clone(), weight).neighbor(b, a, weight)
    }

    /// Append `to` to the neighbor list of `from` only
    pub fn neighbor(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>, weight: f64) -> Self {
        self.links.push((from.into(), to.into(), weight));
        self
    }

    /// Designate the root (initiator)
    pub fn root(mut self, id: impl Into<NodeId>) -> Self {
        let id = id.into();
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        self
    }

    /// Validate and build the topology
    pub fn build(self) -> Result<Topology, TopologyError> {
        if self.declared.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut index = HashMap::with_capacity(self.declared.len());
        for (i, id) in self.declared.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(TopologyError::DuplicateNode(id.clone()));
            }
        }

        let mut nodes: Vec<NodeEntry> = self
            .declared
            .iter()
            .map(|id| NodeEntry {
                id: id.clone(),
                neighbors: Vec::new(),
            })
            .collect();

        for (from, to, weight) in &self.links {
            let (Some(&from_idx), Some(&to_idx)) = (index.get(from), index.get(to)) else {
                return Err(TopologyError::UnknownNode {
                    from: from.clone(),
                    to: to.clone(),
                });
            };
            if from == to {
                return Err(TopologyError::SelfLoop(from.clone()));
            }
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(TopologyError::InvalidWeight {
                    from: from.clone(),
                    to: to.clone(),
                    weight: *weight,
                });
            }
            let entry = &mut nodes[from_idx];
            if entry.link_to(to).is_some() {
                return Err(TopologyError::DuplicateEdge {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
            entry.neighbors.push(Link {
                id: to.clone(),
                index: to_idx,
                weight: *weight,
            });
        }

        for entry in &nodes {
            for link in &entry.neighbors {
                match nodes[link.index].link_to(&entry.id) {
                    None => {
                        return Err(TopologyError::AsymmetricEdge {
                            from: entry.id.clone(),
                            to: link.id.clone(),
                        })
                    }
                    Some(back) if back.weight != link.weight => {
                        return Err(TopologyError::WeightMismatch {
                            from: entry.id.clone(),
                            to: link.id.clone(),
                            forward: link.weight,
                            backward: back.weight,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let root = match self.roots.as_slice() {
            [] => return Err(TopologyError::NoRoot),
            [only] => *index
                .get(only)
                .ok_or_else(|| TopologyError::UnknownRoot(only.clone()))?,
            many => return Err(TopologyError::MultipleRoots(many.to_vec())),
        };

        let unreachable = unreachable_from(&nodes, root);
        if !unreachable.is_empty() {
            return Err(TopologyError::Disconnected { unreachable });
        }

        Ok(Topology { nodes, index, root })
    }
}

/// Breadth-first reachability from `start`; returns ids never reached
fn unreachable_from(nodes: &[NodeEntry], start: usize) -> Vec<NodeId> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for link in &nodes[current].neighbors {
            if seen.insert(link.index) {
                queue.push_back(link.index);
            }
        }
    }
    nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| !seen.contains(i))
        .map(|(_, n)| n.id.clone())
        .collect()
}
