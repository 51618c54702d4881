//! Family graph model: persons as nodes, relationships as edges.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema-less attribute bag (name, birth date, gender, cultural role, ...)
pub type Attributes = Map<String, Value>;

pub const PERSON_NODE: &str = "person";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Layout hint for the editor
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Attributes,
}

impl FamilyNode {
    pub fn person(id: impl Into<String>, position: Position, data: Attributes) -> Self {
        Self {
            id: id.into(),
            node_type: PERSON_NODE.to_string(),
            position,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Relationship kind, e.g. `parent` or `spouse`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub metadata: Attributes,
}

impl FamilyEdge {
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyGraph {
    pub nodes: Vec<FamilyNode>,
    pub edges: Vec<FamilyEdge>,
}

impl FamilyGraph {
    pub fn node(&self, id: &str) -> Option<&FamilyNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Insert or replace by id, keeping node ids unique.
    pub fn upsert_node(&mut self, node: FamilyNode) {
        match self.nodes.iter_mut().find(|existing| existing.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    pub fn push_edge(&mut self, edge: FamilyEdge) {
        self.edges.retain(|existing| existing.id != edge.id);
        self.edges.push(edge);
    }

    /// Merge `changes` into a node's attributes. Returns false if the node is
    /// unknown.
    pub fn merge_node_data(&mut self, id: &str, changes: &Attributes) -> bool {
        let Some(node) = self.nodes.iter_mut().find(|node| node.id == id) else {
            return false;
        };
        for (key, value) in changes {
            node.data.insert(key.clone(), value.clone());
        }
        true
    }

    /// Remove a node and every edge that references it. Edges are dropped even
    /// when the node itself is absent. Returns the number of edges removed.
    pub fn remove_node(&mut self, id: &str) -> usize {
        self.nodes.retain(|node| node.id != id);
        let edges_before = self.edges.len();
        self.edges.retain(|edge| !edge.touches(id));
        edges_before - self.edges.len()
    }

    /// Default layout slot for the next person added to the editor.
    pub fn next_position(&self) -> Position {
        let index = self.nodes.len() as f64;
        Position {
            x: (index % 4.0) * 220.0,
            y: (index / 4.0).floor() * 160.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person(id: &str) -> FamilyNode {
        FamilyNode::person(id, Position::default(), Attributes::new())
    }

    fn edge(id: &str, source: &str, target: &str) -> FamilyEdge {
        FamilyEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            kind: "parent".to_string(),
            metadata: Attributes::new(),
        }
    }

    #[test]
    fn test_remove_node_cascades_edges() {
        let mut graph = FamilyGraph::default();
        graph.upsert_node(person("p1"));
        graph.upsert_node(person("p2"));
        graph.upsert_node(person("p3"));
        graph.push_edge(edge("e1", "p1", "p2"));
        graph.push_edge(edge("e2", "p3", "p1"));
        graph.push_edge(edge("e3", "p2", "p3"));

        assert_eq!(graph.remove_node("p1"), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].id, "e3");
        assert_eq!(graph.remove_node("p1"), 0);
    }

    #[test]
    fn test_remove_missing_node_still_drops_its_edges() {
        let mut graph = FamilyGraph::default();
        graph.upsert_node(person("p2"));
        graph.push_edge(edge("e1", "ghost", "p2"));

        assert_eq!(graph.remove_node("ghost"), 1);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.nodes.len(), 1);
    }

    #[test]
    fn test_upsert_keeps_ids_unique() {
        let mut graph = FamilyGraph::default();
        graph.upsert_node(person("p1"));
        let mut renamed = person("p1");
        renamed.data.insert("name".to_string(), json!("Ada"));
        graph.upsert_node(renamed);

        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.node("p1").unwrap().data["name"], json!("Ada"));
    }

    #[test]
    fn test_node_wire_format() {
        let node = FamilyNode::person("p1", Position { x: 1.0, y: 2.0 }, Attributes::new());
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], json!("person"));
        assert_eq!(value["position"], json!({"x": 1.0, "y": 2.0}));
    }
}
