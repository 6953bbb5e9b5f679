use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::graph::{Attributes, GraphState};
use crate::pattern::Pattern;
use crate::validator::{Finding, FindingKind};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnnotationDocument {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub connect: IndexMap<String, Vec<ConnectTarget>>,
    #[serde(default)]
    pub disconnect: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub add: IndexMap<String, Option<Attributes>>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub update: IndexMap<String, NodeUpdate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConnectTarget {
    Plain(String),
    Labelled(IndexMap<String, String>),
}

impl ConnectTarget {
    fn entries(&self) -> Vec<(&str, Option<&str>)> {
        match self {
            ConnectTarget::Plain(t) => vec![(t.as_str(), None)],
            ConnectTarget::Labelled(map) => map
                .iter()
                .map(|(t, l)| (t.as_str(), Some(l.as_str())))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeUpdate {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub edge_labels: IndexMap<String, String>,
}

impl AnnotationDocument {
    pub fn from_yaml(text: &str) -> Result<AnnotationDocument, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            what: "annotation document",
            source,
        })
    }

    pub fn apply(&self, state: &mut GraphState) {
        info!(format = ?self.format, "applying annotations");
        self.apply_remove(state);
        self.apply_disconnect(state);
        self.apply_add(state);
        self.apply_connect(state);
        self.apply_update(state);
        if let Some(title) = &self.title {
            state.title = Some(title.clone());
        }
    }

    fn apply_remove(&self, state: &mut GraphState) {
        for pattern in &self.remove {
            let Some(nodes) = resolve(state, pattern, "remove") else {
                continue;
            };
            for node in nodes {
                debug!(node = %node, "annotation removes node");
                state.remove_node(&node);
            }
        }
    }

    fn apply_disconnect(&self, state: &mut GraphState) {
        for (source, targets) in &self.disconnect {
            let Some(sources) = resolve(state, source, "disconnect") else {
                continue;
            };
            for target in targets {
                let Some(resolved) = resolve(state, target, "disconnect") else {
                    continue;
                };
                for s in &sources {
                    for t in &resolved {
                        state.graph.remove_edge(s, t);
                        state.graph.remove_edge(t, s);
                        state.pinned_edges.remove(&(s.clone(), t.clone()));
                        state.pinned_edges.remove(&(t.clone(), s.clone()));
                    }
                }
            }
        }
    }

    fn apply_add(&self, state: &mut GraphState) {
        for (node, attrs) in &self.add {
            state.graph.add_node(node);
            let entry = state.metadata.entry(node);
            for (k, v) in attrs.iter().flatten() {
                entry.insert(k.clone(), v.clone());
            }
        }
    }

    fn apply_connect(&self, state: &mut GraphState) {
        for (source, targets) in &self.connect {
            let Some(sources) = resolve(state, source, "connect") else {
                continue;
            };
            for target in targets {
                for (pattern, label) in target.entries() {
                    let Some(resolved) = resolve(state, pattern, "connect") else {
                        continue;
                    };
                    for s in &sources {
                        for t in resolved.iter().filter(|t| *t != s) {
                            state.graph.remove_edge(t, s);
                            state.graph.add_edge(s, t);
                            state.pinned_edges.insert((s.clone(), t.clone()));
                            if let Some(label) = label {
                                set_edge_label(state, s, t, label);
                            }
                        }
                    }
                }
            }
        }
    }

    fn apply_update(&self, state: &mut GraphState) {
        for (pattern, update) in &self.update {
            let Some(nodes) = resolve(state, pattern, "update") else {
                continue;
            };
            for node in &nodes {
                if let Some(label) = &update.label {
                    state.metadata.set(node, "label", Value::String(label.clone()));
                }
                for (target, label) in &update.edge_labels {
                    let Some(targets) = resolve(state, target, "update") else {
                        continue;
                    };
                    for t in &targets {
                        set_edge_label(state, node, t, label);
                    }
                }
            }
        }
    }
}

fn resolve(state: &mut GraphState, pattern: &str, operation: &str) -> Option<Vec<String>> {
    let nodes = state.graph.nodes_matching(&Pattern::annotation(pattern));
    if nodes.is_empty() {
        warn!(pattern, operation, "annotation references no existing resource");
        state.findings.push(Finding::new(
            FindingKind::DanglingReference,
            pattern,
            format!("annotation `{operation}` references `{pattern}`, which matches no resource"),
        ));
        return None;
    }
    Some(nodes)
}

fn set_edge_label(state: &mut GraphState, from: &str, to: &str, label: &str) {
    let entry = state.metadata.entry(from);
    let labels = entry
        .entry("edge_labels")
        .or_insert_with(|| Value::Object(Attributes::new()));
    if !labels.is_object() {
        *labels = Value::Object(Attributes::new());
    }
    if let Value::Object(map) = labels {
        map.insert(to.to_string(), Value::String(label.to_string()));
    }
}
