use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ProviderProfile;
use crate::graph::GraphState;
use crate::node_key::resource_type;
use crate::pattern::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    SharedAcrossGroups,
    DanglingEdge,
    DuplicateEdge,
    DanglingReference,
    AmbiguousVariant,
    OrientationConflict,
    InvalidMultiplicity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub subject: String,
    pub message: String,
}

impl Finding {
    pub fn new(kind: FindingKind, subject: &str, message: String) -> Finding {
        Finding {
            kind,
            subject: subject.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructuralValidator {
    drawable: Vec<Pattern>,
    groups: Vec<Pattern>,
    exempt: Vec<Pattern>,
}

impl StructuralValidator {
    pub fn from_profile(profile: &ProviderProfile) -> StructuralValidator {
        let patterns = |list: &[String]| -> Vec<Pattern> {
            list.iter().map(|p| Pattern::resource(p)).collect()
        };
        StructuralValidator {
            drawable: patterns(&profile.drawable),
            groups: patterns(&profile.group_nodes),
            exempt: profile
                .shared_services
                .iter()
                .chain(&profile.outer_nodes)
                .map(|p| Pattern::resource(p))
                .collect(),
        }
    }

    pub fn validate(&self, state: &GraphState) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (from, to) in state.graph.dangling_edges() {
            findings.push(Finding::new(
                FindingKind::DanglingEdge,
                &from,
                format!("{from} points at missing node {to}"),
            ));
        }
        for (from, to) in state.graph.duplicate_edges() {
            findings.push(Finding::new(
                FindingKind::DuplicateEdge,
                &from,
                format!("{from} lists {to} more than once"),
            ));
        }
        for node in state.graph.keys() {
            if !self.drawable.iter().any(|p| p.matches(node))
                || self.exempt.iter().any(|p| p.matches(node))
            {
                continue;
            }
            let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for parent in state.graph.parents(node) {
                if self.groups.iter().any(|p| p.matches(&parent)) {
                    by_type.entry(resource_type(&parent)).or_default().push(parent);
                }
            }
            for (group_type, holders) in by_type.into_iter().filter(|(_, h)| h.len() > 1) {
                findings.push(Finding::new(
                    FindingKind::SharedAcrossGroups,
                    node,
                    format!(
                        "{node} is connected from {} {group_type} containers ({}); expected one instance per container",
                        holders.len(),
                        holders.join(", ")
                    ),
                ));
            }
        }
        findings
    }
}
