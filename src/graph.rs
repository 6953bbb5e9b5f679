use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node_key::{base_key, parse_reference, split_index};
use crate::pattern::Pattern;
use crate::validator::Finding;

pub type Attributes = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: BTreeMap<String, Vec<String>>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn from_adjacency(raw: BTreeMap<String, Vec<String>>) -> Graph {
        let mut graph = Graph::new();
        for (node, neighbors) in raw {
            graph.add_node(&node);
            for neighbor in neighbors {
                graph.add_edge(&node, &neighbor);
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn add_node(&mut self, key: &str) -> bool {
        if self.nodes.contains_key(key) {
            return false;
        }
        self.nodes.insert(key.to_string(), Vec::new());
        true
    }

    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        self.add_node(to);
        let neighbors = self.nodes.entry(from.to_string()).or_default();
        if neighbors.iter().any(|n| n == to) {
            return false;
        }
        neighbors.push(to.to_string());
        true
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.nodes
            .get(from)
            .is_some_and(|ns| ns.iter().any(|n| n == to))
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        match self.nodes.get_mut(from) {
            Some(neighbors) => {
                let before = neighbors.len();
                neighbors.retain(|n| n != to);
                neighbors.len() != before
            }
            None => false,
        }
    }

    /// Removes a node, returning its outbound neighbors, or `None` when the
    /// key is absent. With `remove_dangling_edges` every reference to the
    /// node is stripped from other neighbor lists as well.
    pub fn remove_node(&mut self, key: &str, remove_dangling_edges: bool) -> Option<Vec<String>> {
        let removed = self.nodes.remove(key)?;
        if remove_dangling_edges {
            for neighbors in self.nodes.values_mut() {
                neighbors.retain(|n| n != key);
            }
        }
        Some(removed)
    }

    pub fn neighbors(&self, key: &str) -> &[String] {
        self.nodes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self, key: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, ns)| ns.iter().any(|n| n == key))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn nodes_matching(&self, pattern: &Pattern) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect()
    }

    pub fn edges(&self) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .flat_map(|(from, ns)| ns.iter().map(move |to| (from.clone(), to.clone())))
            .collect()
    }

    pub fn rename_node(&mut self, old: &str, new: &str) -> bool {
        if old == new || self.contains(new) {
            return false;
        }
        let Some(neighbors) = self.nodes.remove(old) else {
            return false;
        };
        for ns in self.nodes.values_mut() {
            for n in ns.iter_mut() {
                if n == old {
                    *n = new.to_string();
                }
            }
        }
        self.nodes.insert(new.to_string(), Vec::new());
        for n in neighbors {
            self.add_edge(new, &n);
        }
        for ns in self.nodes.values_mut() {
            dedup_in_place(ns);
        }
        true
    }

    pub fn dangling_edges(&self) -> Vec<(String, String)> {
        self.edges()
            .into_iter()
            .filter(|(_, to)| !self.contains(to))
            .collect()
    }

    pub fn prune_dangling(&mut self) -> usize {
        let present: BTreeSet<String> = self.nodes.keys().cloned().collect();
        let mut pruned = 0;
        for neighbors in self.nodes.values_mut() {
            let before = neighbors.len();
            neighbors.retain(|n| present.contains(n));
            pruned += before - neighbors.len();
        }
        pruned
    }

    pub fn duplicate_edges(&self) -> Vec<(String, String)> {
        let mut dups = Vec::new();
        for (from, ns) in &self.nodes {
            let mut seen = BTreeSet::new();
            for n in ns {
                if !seen.insert(n) {
                    dups.push((from.clone(), n.clone()));
                }
            }
        }
        dups
    }

    pub fn resolve_reference(&self, raw: &str) -> Option<String> {
        if self.contains(raw) {
            return Some(raw.to_string());
        }
        let addr = parse_reference(raw)?;
        self.contains(&addr).then_some(addr)
    }

    pub fn instances_of(&self, base: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = self
            .nodes
            .keys()
            .filter_map(|k| match split_index(k) {
                (b, Some(i)) if b == base => Some((i, k.clone())),
                _ => None,
            })
            .collect();
        found.sort();
        found.into_iter().map(|(_, k)| k).collect()
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        split_index(key).1.is_some() || !self.instances_of(base_key(key)).is_empty()
    }

    pub(crate) fn neighbors_mut(&mut self, key: &str) -> Option<&mut Vec<String>> {
        self.nodes.get_mut(key)
    }

    pub fn adjacency(&self) -> &BTreeMap<String, Vec<String>> {
        &self.nodes
    }
}

fn dedup_in_place(list: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    list.retain(|n| seen.insert(n.clone()));
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: BTreeMap<String, Attributes>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata::default()
    }

    pub fn get(&self, key: &str) -> Option<&Attributes> {
        self.entries.get(key)
    }

    pub fn attr(&self, key: &str, name: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|a| a.get(name))
    }

    pub fn entry(&mut self, key: &str) -> &mut Attributes {
        self.entries.entry(key.to_string()).or_default()
    }

    pub fn insert(&mut self, key: &str, attrs: Attributes) {
        self.entries.insert(key.to_string(), attrs);
    }

    pub fn set(&mut self, key: &str, name: &str, value: Value) {
        self.entry(key).insert(name.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Attributes> {
        self.entries.remove(key)
    }

    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(attrs) = self.entries.remove(old) {
            self.entries.insert(new.to_string(), attrs);
        }
    }

    pub fn cloned(&self, key: &str) -> Attributes {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    pub fn retain_nodes(&mut self, graph: &Graph) {
        self.entries.retain(|k, _| graph.contains(k));
    }

    pub fn is_hidden(&self, key: &str) -> bool {
        self.attr(key, "hidden").is_some_and(|v| match v {
            Value::Bool(b) => *b,
            Value::String(s) => s == "true",
            _ => false,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub graph: Graph,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub node_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip)]
    pub pinned_edges: BTreeSet<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl GraphState {
    pub fn new(graph: Graph, metadata: Metadata, node_list: Vec<String>) -> GraphState {
        let node_list = if node_list.is_empty() {
            graph.keys().cloned().collect()
        } else {
            node_list
        };
        GraphState {
            graph,
            metadata,
            node_list,
            ..GraphState::default()
        }
    }

    pub fn remove_node(&mut self, key: &str) -> bool {
        let removed = self.graph.remove_node(key, true).is_some();
        if removed {
            self.metadata.remove(key);
            self.pinned_edges.retain(|(a, b)| a != key && b != key);
        }
        removed
    }

    pub fn rename_node(&mut self, old: &str, new: &str) -> bool {
        if !self.graph.rename_node(old, new) {
            return false;
        }
        self.metadata.rename(old, new);
        let pinned = std::mem::take(&mut self.pinned_edges);
        self.pinned_edges = pinned
            .into_iter()
            .map(|(a, b)| (rename_if(a, old, new), rename_if(b, old, new)))
            .collect();
        true
    }

    pub fn refresh_node_list(&mut self) {
        let mut list: Vec<String> = self
            .node_list
            .iter()
            .filter(|k| self.graph.contains(k))
            .cloned()
            .collect();
        let known: BTreeSet<String> = list.iter().cloned().collect();
        list.extend(self.graph.keys().filter(|k| !known.contains(*k)).cloned());
        self.node_list = list;
    }

    pub fn same_diagram(&self, other: &GraphState) -> bool {
        self.graph == other.graph && self.metadata == other.metadata
    }
}

fn rename_if(key: String, old: &str, new: &str) -> String {
    if key == old { new.to_string() } else { key }
}
