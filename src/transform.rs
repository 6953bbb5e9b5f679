use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::graph::{Attributes, GraphState};
use crate::node_key::{base_key, index_of, indexed_key, parse_address, parse_reference};
use crate::pattern::Pattern;
use crate::procedures::Generator;
use crate::validator::{Finding, FindingKind};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", content = "params", rename_all = "snake_case")]
pub enum Transformation {
    ExpandToNumberedInstances {
        resource_pattern: String,
        multiplicity_key: String,
    },
    MoveToParent {
        resource_pattern: String,
        from_parent_pattern: String,
        to_parent_pattern: String,
    },
    DeleteNodes {
        resource_pattern: String,
        #[serde(default = "default_true")]
        remove_from_parents: bool,
    },
    LinkResources {
        source_pattern: String,
        target_pattern: String,
    },
    UnlinkResources {
        source_pattern: String,
        target_pattern: String,
    },
    InsertIntermediateNode {
        parent_pattern: String,
        child_pattern: String,
        generator: Generator,
    },
    PropagateMetadata {
        source_pattern: String,
        target_pattern: String,
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        direction: PropagateDirection,
        #[serde(default)]
        propagate_to_children: bool,
        #[serde(default)]
        overwrite: bool,
    },
    ConsolidateIntoSingleNode {
        resource_pattern: String,
        target_node_name: String,
    },
    BidirectionalLink {
        source_pattern: String,
        target_pattern: String,
        #[serde(default)]
        cleanup_reverse: bool,
    },
    RedirectConnections {
        old_pattern: String,
        new_pattern: String,
    },
    ReplaceConnectionTargets {
        source_pattern: String,
        old_pattern: String,
        new_pattern: String,
    },
    ApplyResourceVariants {
        resource_pattern: String,
        variant_map: IndexMap<String, String>,
        metadata_key: String,
        #[serde(default)]
        precedence: VariantPrecedence,
    },
    MatchBySuffix {
        source_pattern: String,
        target_pattern: String,
    },
    BypassNodes {
        resource_pattern: String,
    },
    ReverseConnections {
        source_pattern: String,
        target_pattern: String,
    },
    AddOuterNode {
        node: String,
        when_present: String,
        #[serde(default)]
        link_to: Option<String>,
        #[serde(default)]
        attributes: Attributes,
    },
    SetMetadata {
        resource_pattern: String,
        key: String,
        value: Value,
    },
    DeleteUnconnected {
        resource_pattern: String,
    },
    ExpandPerParent {
        resource_pattern: String,
        parent_pattern: String,
    },
    GroupInto {
        resource_pattern: String,
        group_node: String,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagateDirection {
    #[default]
    Forward,
    Reverse,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantPrecedence {
    #[default]
    FirstDeclared,
    LongestMatch,
}

impl Transformation {
    pub const OPERATIONS: &'static [&'static str] = &[
        "expand_to_numbered_instances",
        "move_to_parent",
        "delete_nodes",
        "link_resources",
        "unlink_resources",
        "insert_intermediate_node",
        "propagate_metadata",
        "consolidate_into_single_node",
        "bidirectional_link",
        "redirect_connections",
        "replace_connection_targets",
        "apply_resource_variants",
        "match_by_suffix",
        "bypass_nodes",
        "reverse_connections",
        "add_outer_node",
        "set_metadata",
        "delete_unconnected",
        "expand_per_parent",
        "group_into",
    ];

    pub fn operation(&self) -> &'static str {
        let idx = match self {
            Transformation::ExpandToNumberedInstances { .. } => 0,
            Transformation::MoveToParent { .. } => 1,
            Transformation::DeleteNodes { .. } => 2,
            Transformation::LinkResources { .. } => 3,
            Transformation::UnlinkResources { .. } => 4,
            Transformation::InsertIntermediateNode { .. } => 5,
            Transformation::PropagateMetadata { .. } => 6,
            Transformation::ConsolidateIntoSingleNode { .. } => 7,
            Transformation::BidirectionalLink { .. } => 8,
            Transformation::RedirectConnections { .. } => 9,
            Transformation::ReplaceConnectionTargets { .. } => 10,
            Transformation::ApplyResourceVariants { .. } => 11,
            Transformation::MatchBySuffix { .. } => 12,
            Transformation::BypassNodes { .. } => 13,
            Transformation::ReverseConnections { .. } => 14,
            Transformation::AddOuterNode { .. } => 15,
            Transformation::SetMetadata { .. } => 16,
            Transformation::DeleteUnconnected { .. } => 17,
            Transformation::ExpandPerParent { .. } => 18,
            Transformation::GroupInto { .. } => 19,
        };
        Self::OPERATIONS[idx]
    }

    pub fn apply(&self, state: &mut GraphState) -> usize {
        match self {
            Transformation::ExpandToNumberedInstances {
                resource_pattern,
                multiplicity_key,
            } => expand_to_numbered_instances(state, resource_pattern, multiplicity_key),
            Transformation::MoveToParent {
                resource_pattern,
                from_parent_pattern,
                to_parent_pattern,
            } => move_to_parent(state, resource_pattern, from_parent_pattern, to_parent_pattern),
            Transformation::DeleteNodes {
                resource_pattern,
                remove_from_parents,
            } => delete_nodes(state, resource_pattern, *remove_from_parents),
            Transformation::LinkResources {
                source_pattern,
                target_pattern,
            } => link_resources(state, source_pattern, target_pattern),
            Transformation::UnlinkResources {
                source_pattern,
                target_pattern,
            } => unlink_resources(state, source_pattern, target_pattern),
            Transformation::InsertIntermediateNode {
                parent_pattern,
                child_pattern,
                generator,
            } => insert_intermediate_node(state, parent_pattern, child_pattern, generator),
            Transformation::PropagateMetadata {
                source_pattern,
                target_pattern,
                keys,
                direction,
                propagate_to_children,
                overwrite,
            } => propagate_metadata(
                state,
                source_pattern,
                target_pattern,
                keys,
                *direction,
                *propagate_to_children,
                *overwrite,
            ),
            Transformation::ConsolidateIntoSingleNode {
                resource_pattern,
                target_node_name,
            } => consolidate_into_single_node(state, resource_pattern, target_node_name),
            Transformation::BidirectionalLink {
                source_pattern,
                target_pattern,
                cleanup_reverse,
            } => bidirectional_link(state, source_pattern, target_pattern, *cleanup_reverse),
            Transformation::RedirectConnections {
                old_pattern,
                new_pattern,
            } => redirect_connections(state, old_pattern, new_pattern),
            Transformation::ReplaceConnectionTargets {
                source_pattern,
                old_pattern,
                new_pattern,
            } => replace_connection_targets(state, source_pattern, old_pattern, new_pattern),
            Transformation::ApplyResourceVariants {
                resource_pattern,
                variant_map,
                metadata_key,
                precedence,
            } => apply_resource_variants(
                state,
                resource_pattern,
                variant_map,
                metadata_key,
                *precedence,
            ),
            Transformation::MatchBySuffix {
                source_pattern,
                target_pattern,
            } => match_by_suffix(state, source_pattern, target_pattern),
            Transformation::BypassNodes { resource_pattern } => {
                bypass_nodes(state, resource_pattern)
            }
            Transformation::ReverseConnections {
                source_pattern,
                target_pattern,
            } => reverse_connections(state, source_pattern, target_pattern),
            Transformation::AddOuterNode {
                node,
                when_present,
                link_to,
                attributes,
            } => add_outer_node(state, node, when_present, link_to.as_deref(), attributes),
            Transformation::SetMetadata {
                resource_pattern,
                key,
                value,
            } => set_metadata(state, resource_pattern, key, value),
            Transformation::DeleteUnconnected { resource_pattern } => {
                delete_unconnected(state, resource_pattern)
            }
            Transformation::ExpandPerParent {
                resource_pattern,
                parent_pattern,
            } => expand_per_parent(state, resource_pattern, parent_pattern),
            Transformation::GroupInto {
                resource_pattern,
                group_node,
            } => group_into(state, resource_pattern, group_node),
        }
    }
}

// --- Index pairing helpers ---

/// Candidates that share `node`'s instance index, plus unindexed ones.
/// An unindexed node pairs with every candidate.
fn pair_by_index(node: &str, candidates: &[String]) -> Vec<String> {
    match index_of(node) {
        Some(i) if candidates.iter().any(|c| index_of(c) == Some(i)) => candidates
            .iter()
            .filter(|c| matches!(index_of(c), Some(j) if j == i) || index_of(c).is_none())
            .cloned()
            .collect(),
        _ => candidates.to_vec(),
    }
}

fn corresponding(node: &str, candidates: &[String]) -> Option<String> {
    if let Some(i) = index_of(node) {
        if let Some(c) = candidates.iter().find(|c| index_of(c) == Some(i)) {
            return Some(c.clone());
        }
    }
    candidates.first().cloned()
}

fn remap_pinned(state: &mut GraphState, from: &str, to: &str) {
    let pinned = std::mem::take(&mut state.pinned_edges);
    state.pinned_edges = pinned
        .into_iter()
        .map(|(a, b)| {
            (
                if a == from { to.to_string() } else { a },
                if b == from { to.to_string() } else { b },
            )
        })
        .filter(|(a, b)| a != b)
        .collect();
}

// --- Transformers ---

const MAX_INSTANCES: u64 = 1024;

pub fn expand_to_numbered_instances(
    state: &mut GraphState,
    resource_pattern: &str,
    multiplicity_key: &str,
) -> usize {
    let pattern = Pattern::resource(resource_pattern);
    let mut expanded = 0;
    for node in state.graph.nodes_matching(&pattern) {
        if state.graph.is_expanded(&node) {
            continue;
        }
        let raw: Vec<Option<String>> = match state.metadata.attr(&node, multiplicity_key) {
            Some(Value::Array(items)) => items.iter().map(|v| v.as_str().map(str::to_string)).collect(),
            Some(Value::Number(n)) => {
                let count = n.as_u64().unwrap_or(0);
                if count > MAX_INSTANCES {
                    warn!(node = %node, count, "multiplicity too large, not expanding");
                    state.findings.push(Finding::new(
                        FindingKind::InvalidMultiplicity,
                        &node,
                        format!("{multiplicity_key} = {n} exceeds {MAX_INSTANCES} instances"),
                    ));
                    continue;
                }
                vec![None; count as usize]
            }
            _ => continue,
        };
        if raw.len() <= 1 {
            continue;
        }
        let mut refs = Vec::with_capacity(raw.len());
        for item in raw {
            let resolved = item.as_deref().and_then(|s| state.graph.resolve_reference(s));
            if resolved.is_none() {
                if let Some(addr) = item.as_deref().and_then(parse_reference) {
                    warn!(node = %node, reference = %addr, "multiplicity reference not in graph");
                    state.findings.push(Finding::new(
                        FindingKind::DanglingReference,
                        &addr,
                        format!("{node} {multiplicity_key} references missing {addr}"),
                    ));
                }
            }
            refs.push(resolved);
        }
        debug!(node = %node, count = refs.len(), "expanding to numbered instances");
        expand_node(state, &node, &refs);
        expanded += 1;
    }
    expanded
}

fn expand_node(state: &mut GraphState, node: &str, refs: &[Option<String>]) {
    let outgoing = state.graph.neighbors(node).to_vec();
    let parents = state.graph.parents(node);
    let attrs = state.metadata.cloned(node);
    let paired: BTreeSet<&String> = refs.iter().flatten().collect();
    state.remove_node(node);

    for (i, own) in refs.iter().enumerate() {
        let key = indexed_key(node, i + 1);
        state.graph.add_node(&key);
        state.metadata.insert(&key, attrs.clone());
        let foreign = |other: &String| paired.contains(other) && own.as_ref() != Some(other);
        for target in outgoing.iter().filter(|t| !foreign(t)) {
            state.graph.add_edge(&key, target);
        }
        for parent in parents.iter().filter(|p| !foreign(p)) {
            state.graph.add_edge(parent, &key);
        }
        if let Some(own) = own {
            if !state.graph.has_edge(own, &key) {
                state.graph.add_edge(&key, own);
            }
        }
    }
}

pub fn move_to_parent(
    state: &mut GraphState,
    resource_pattern: &str,
    from_parent_pattern: &str,
    to_parent_pattern: &str,
) -> usize {
    let to_pattern = Pattern::resource(to_parent_pattern);
    let to_parents = state.graph.nodes_matching(&to_pattern);
    if to_parents.is_empty() {
        debug!(pattern = to_parent_pattern, "no destination parent, skipping move");
        return 0;
    }
    let from_pattern = Pattern::resource(from_parent_pattern);
    let mut moved = 0;
    for resource in state.graph.nodes_matching(&Pattern::resource(resource_pattern)) {
        let old_parents: Vec<String> = state
            .graph
            .parents(&resource)
            .into_iter()
            .filter(|p| from_pattern.matches(p) && !to_pattern.matches(p))
            .collect();
        if old_parents.is_empty() {
            continue;
        }
        // Prefer destinations the resource already references.
        let linked: Vec<String> = to_parents
            .iter()
            .filter(|t| state.graph.has_edge(&resource, t))
            .cloned()
            .collect();
        let targets = if linked.is_empty() {
            pair_by_index(&resource, &to_parents)
        } else {
            linked
        };
        for parent in &old_parents {
            state.graph.remove_edge(parent, &resource);
        }
        for target in targets.iter().filter(|t| **t != resource) {
            state.graph.remove_edge(&resource, target);
            state.graph.add_edge(target, &resource);
        }
        moved += 1;
    }
    moved
}

pub fn delete_nodes(state: &mut GraphState, resource_pattern: &str, remove_from_parents: bool) -> usize {
    let doomed = state.graph.nodes_matching(&Pattern::resource(resource_pattern));
    for node in &doomed {
        state.graph.remove_node(node, remove_from_parents);
        state.metadata.remove(node);
        state.pinned_edges.retain(|(a, b)| a != node && b != node);
    }
    doomed.len()
}

pub fn link_resources(state: &mut GraphState, source_pattern: &str, target_pattern: &str) -> usize {
    let sources = state.graph.nodes_matching(&Pattern::resource(source_pattern));
    let targets = state.graph.nodes_matching(&Pattern::resource(target_pattern));
    let mut added = 0;
    for s in &sources {
        for t in &targets {
            if state.graph.add_edge(s, t) {
                added += 1;
            }
        }
    }
    added
}

pub fn unlink_resources(state: &mut GraphState, source_pattern: &str, target_pattern: &str) -> usize {
    let target = Pattern::resource(target_pattern);
    let mut removed = 0;
    for s in state.graph.nodes_matching(&Pattern::resource(source_pattern)) {
        let doomed: Vec<String> = state
            .graph
            .neighbors(&s)
            .iter()
            .filter(|t| target.matches(t))
            .cloned()
            .collect();
        for t in doomed {
            state.graph.remove_edge(&s, &t);
            state.pinned_edges.remove(&(s.clone(), t));
            removed += 1;
        }
    }
    removed
}

pub fn insert_intermediate_node(
    state: &mut GraphState,
    parent_pattern: &str,
    child_pattern: &str,
    generator: &Generator,
) -> usize {
    let child = Pattern::resource(child_pattern);
    let mut inserted = 0;
    for parent in state.graph.nodes_matching(&Pattern::resource(parent_pattern)) {
        let children: Vec<String> = state
            .graph
            .neighbors(&parent)
            .iter()
            .filter(|c| child.matches(c))
            .cloned()
            .collect();
        for c in children {
            let attrs = state.metadata.cloned(&c);
            let Some(mid) = generator.generate(&c, &attrs) else {
                continue;
            };
            if mid == parent || mid == c {
                continue;
            }
            state.graph.add_node(&mid);
            state.graph.remove_edge(&parent, &c);
            state.graph.add_edge(&parent, &mid);
            state.graph.add_edge(&mid, &c);
            inserted += 1;
        }
    }
    inserted
}

pub fn propagate_metadata(
    state: &mut GraphState,
    source_pattern: &str,
    target_pattern: &str,
    keys: &[String],
    direction: PropagateDirection,
    propagate_to_children: bool,
    overwrite: bool,
) -> usize {
    let source = Pattern::resource(source_pattern);
    let target = Pattern::resource(target_pattern);
    let mut pairs: Vec<(String, String)> = Vec::new();
    if direction != PropagateDirection::Reverse {
        for s in state.graph.nodes_matching(&source) {
            for t in state.graph.neighbors(&s).iter().filter(|t| target.matches(t)) {
                pairs.push((s.clone(), t.clone()));
            }
        }
    }
    if direction != PropagateDirection::Forward {
        for t in state.graph.nodes_matching(&target) {
            for s in state.graph.neighbors(&t).iter().filter(|s| source.matches(s)) {
                let pair = (s.clone(), t.clone());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
    }

    let mut written = 0;
    for (s, t) in pairs {
        let Some(attrs) = state.metadata.get(&s).cloned() else {
            continue;
        };
        let mut receivers = vec![t.clone()];
        if propagate_to_children {
            receivers.extend(state.graph.neighbors(&t).iter().filter(|c| **c != s).cloned());
        }
        for receiver in receivers {
            let entry = state.metadata.entry(&receiver);
            for (name, value) in attrs.iter() {
                if !keys.is_empty() && !keys.contains(name) {
                    continue;
                }
                if entry.get(name) == Some(value) || (!overwrite && entry.contains_key(name)) {
                    continue;
                }
                entry.insert(name.clone(), value.clone());
                written += 1;
            }
        }
    }
    written
}

pub fn consolidate_into_single_node(
    state: &mut GraphState,
    resource_pattern: &str,
    target_node_name: &str,
) -> usize {
    let sources: Vec<String> = state
        .graph
        .nodes_matching(&Pattern::resource(resource_pattern))
        .into_iter()
        .filter(|k| k != target_node_name)
        .collect();
    if sources.is_empty() {
        return 0;
    }
    let source_set: BTreeSet<&String> = sources.iter().collect();
    debug!(target = target_node_name, merged = sources.len(), "consolidating nodes");

    state.graph.add_node(target_node_name);
    let mut merged = state.metadata.cloned(target_node_name);
    for s in &sources {
        for (k, v) in state.metadata.cloned(s) {
            merged.entry(k).or_insert(v);
        }
        let outgoing: Vec<String> = state
            .graph
            .neighbors(s)
            .iter()
            .filter(|n| !source_set.contains(n) && *n != target_node_name)
            .cloned()
            .collect();
        for n in outgoing {
            state.graph.add_edge(target_node_name, &n);
        }
    }
    state.metadata.insert(target_node_name, merged);

    let holders: Vec<String> = state
        .graph
        .keys()
        .filter(|k| !source_set.contains(k) && *k != target_node_name)
        .cloned()
        .collect();
    for holder in holders {
        if let Some(neighbors) = state.graph.neighbors_mut(&holder) {
            let mut seen = BTreeSet::new();
            let rewired: Vec<String> = neighbors
                .drain(..)
                .map(|n| {
                    if source_set.contains(&n) {
                        target_node_name.to_string()
                    } else {
                        n
                    }
                })
                .filter(|n| seen.insert(n.clone()))
                .collect();
            *neighbors = rewired;
        }
    }
    for s in &sources {
        remap_pinned(state, s, target_node_name);
        state.graph.remove_node(s, true);
        state.metadata.remove(s);
    }
    sources.len()
}

pub fn bidirectional_link(
    state: &mut GraphState,
    source_pattern: &str,
    target_pattern: &str,
    cleanup_reverse: bool,
) -> usize {
    let sources = state.graph.nodes_matching(&Pattern::resource(source_pattern));
    let targets = state.graph.nodes_matching(&Pattern::resource(target_pattern));
    let mut changed = 0;
    for s in &sources {
        for t in pair_by_index(s, &targets) {
            if state.graph.add_edge(s, &t) {
                changed += 1;
            }
            if cleanup_reverse && state.graph.remove_edge(&t, s) {
                changed += 1;
            }
        }
    }
    changed
}

pub fn redirect_connections(state: &mut GraphState, old_pattern: &str, new_pattern: &str) -> usize {
    let news = state.graph.nodes_matching(&Pattern::resource(new_pattern));
    if news.is_empty() {
        return 0;
    }
    let mut redirected = 0;
    for old in state.graph.nodes_matching(&Pattern::resource(old_pattern)) {
        if news.contains(&old) {
            continue;
        }
        let Some(new) = corresponding(&old, &news) else {
            continue;
        };
        for parent in state.graph.parents(&old) {
            state.graph.remove_edge(&parent, &old);
            if parent != new {
                state.graph.add_edge(&parent, &new);
            }
            redirected += 1;
        }
    }
    redirected
}

pub fn replace_connection_targets(
    state: &mut GraphState,
    source_pattern: &str,
    old_pattern: &str,
    new_pattern: &str,
) -> usize {
    let old = Pattern::resource(old_pattern);
    let news = state.graph.nodes_matching(&Pattern::resource(new_pattern));
    if news.is_empty() {
        return 0;
    }
    let mut replaced = 0;
    for s in state.graph.nodes_matching(&Pattern::resource(source_pattern)) {
        let stale: Vec<String> = state
            .graph
            .neighbors(&s)
            .iter()
            .filter(|n| old.matches(n) && !news.contains(n))
            .cloned()
            .collect();
        for o in stale {
            let Some(new) = corresponding(&o, &news) else {
                continue;
            };
            if let Some(neighbors) = state.graph.neighbors_mut(&s) {
                for n in neighbors.iter_mut().filter(|n| **n == o) {
                    *n = new.clone();
                }
                let mut seen = BTreeSet::new();
                neighbors.retain(|n| *n != s && seen.insert(n.clone()));
            }
            replaced += 1;
        }
    }
    replaced
}

pub fn apply_resource_variants(
    state: &mut GraphState,
    resource_pattern: &str,
    variant_map: &IndexMap<String, String>,
    metadata_key: &str,
    precedence: VariantPrecedence,
) -> usize {
    let variant_types: BTreeSet<&str> = variant_map.values().map(String::as_str).collect();
    let mut renamed = 0;
    for node in state.graph.nodes_matching(&Pattern::resource(resource_pattern)) {
        let Ok(addr) = parse_address(&node) else {
            continue;
        };
        if variant_types.contains(addr.resource_type.as_str()) {
            continue;
        }
        let value = match state.metadata.attr(&node, metadata_key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => continue,
            Some(other) => other.to_string(),
        };
        let candidates: Vec<(&String, &String)> = variant_map
            .iter()
            .filter(|(needle, _)| value.contains(needle.as_str()))
            .collect();
        let chosen = match precedence {
            VariantPrecedence::FirstDeclared => candidates.first().copied(),
            VariantPrecedence::LongestMatch => candidates
                .iter()
                .copied()
                .fold(None, |best: Option<(&String, &String)>, c| match best {
                    Some(b) if b.0.len() >= c.0.len() => Some(b),
                    _ => Some(c),
                }),
        };
        let Some((needle, variant)) = chosen else {
            continue;
        };
        if candidates.len() > 1 {
            let names: Vec<&str> = candidates.iter().map(|(k, _)| k.as_str()).collect();
            warn!(node = %node, matches = ?names, chosen = %needle, "ambiguous resource variant");
            state.findings.push(Finding::new(
                FindingKind::AmbiguousVariant,
                &node,
                format!(
                    "{metadata_key} `{value}` matches variants {}; chose `{needle}`",
                    names.join(", ")
                ),
            ));
        }
        let new_key = addr.with_type(variant).to_string();
        if state.rename_node(&node, &new_key) {
            renamed += 1;
        } else {
            warn!(node = %node, variant = %new_key, "variant key already taken");
        }
    }
    renamed
}

pub fn match_by_suffix(state: &mut GraphState, source_pattern: &str, target_pattern: &str) -> usize {
    let target = Pattern::resource(target_pattern);
    let mut fixed = 0;
    for s in state.graph.nodes_matching(&Pattern::resource(source_pattern)) {
        let Some(i) = index_of(&s) else {
            continue;
        };
        let crossed: Vec<String> = state
            .graph
            .neighbors(&s)
            .iter()
            .filter(|t| target.matches(t) && matches!(index_of(t), Some(j) if j != i))
            .cloned()
            .collect();
        for t in crossed {
            state.graph.remove_edge(&s, &t);
            let own = indexed_key(base_key(&t), i);
            if state.graph.contains(&own) {
                state.graph.add_edge(&s, &own);
            }
            fixed += 1;
        }
        let crossed_parents: Vec<String> = state
            .graph
            .parents(&s)
            .into_iter()
            .filter(|p| target.matches(p) && matches!(index_of(p), Some(j) if j != i))
            .collect();
        for p in crossed_parents {
            state.graph.remove_edge(&p, &s);
            let own = indexed_key(base_key(&p), i);
            if state.graph.contains(&own) {
                state.graph.add_edge(&own, &s);
            }
            fixed += 1;
        }
    }
    fixed
}

pub fn bypass_nodes(state: &mut GraphState, resource_pattern: &str) -> usize {
    let doomed = state.graph.nodes_matching(&Pattern::resource(resource_pattern));
    for node in &doomed {
        let children = state.graph.neighbors(node).to_vec();
        let parents = state.graph.parents(node);
        state.remove_node(node);
        for p in &parents {
            for c in &children {
                state.graph.add_edge(p, c);
            }
        }
    }
    doomed.len()
}

pub fn reverse_connections(state: &mut GraphState, source_pattern: &str, target_pattern: &str) -> usize {
    let source = Pattern::resource(source_pattern);
    let target = Pattern::resource(target_pattern);
    let mut reversed = 0;
    for s in state.graph.nodes_matching(&source) {
        let flips: Vec<String> = state
            .graph
            .neighbors(&s)
            .iter()
            // Edges both patterns select either way would flip back on a rerun.
            .filter(|t| target.matches(t) && !(source.matches(t) && target.matches(&s)))
            .cloned()
            .collect();
        for t in flips {
            state.graph.remove_edge(&s, &t);
            state.graph.add_edge(&t, &s);
            reversed += 1;
        }
    }
    reversed
}

pub fn add_outer_node(
    state: &mut GraphState,
    node: &str,
    when_present: &str,
    link_to: Option<&str>,
    attributes: &Attributes,
) -> usize {
    let present = state.graph.nodes_matching(&Pattern::resource(when_present));
    if present.is_empty() {
        return 0;
    }
    let mut changed = usize::from(state.graph.add_node(node));
    let entry = state.metadata.entry(node);
    for (k, v) in attributes {
        if !entry.contains_key(k) {
            entry.insert(k.clone(), v.clone());
        }
    }
    let targets = match link_to {
        Some(p) => state.graph.nodes_matching(&Pattern::resource(p)),
        None => present,
    };
    for t in targets {
        if state.graph.add_edge(node, &t) {
            changed += 1;
        }
    }
    changed
}

pub fn set_metadata(state: &mut GraphState, resource_pattern: &str, key: &str, value: &Value) -> usize {
    let mut set = 0;
    for node in state.graph.nodes_matching(&Pattern::resource(resource_pattern)) {
        if state.metadata.attr(&node, key) != Some(value) {
            state.metadata.set(&node, key, value.clone());
            set += 1;
        }
    }
    set
}

pub fn delete_unconnected(state: &mut GraphState, resource_pattern: &str) -> usize {
    let lonely: Vec<String> = state
        .graph
        .nodes_matching(&Pattern::resource(resource_pattern))
        .into_iter()
        .filter(|k| state.graph.neighbors(k).is_empty() && state.graph.parents(k).is_empty())
        .collect();
    for node in &lonely {
        state.remove_node(node);
    }
    lonely.len()
}

pub fn expand_per_parent(state: &mut GraphState, resource_pattern: &str, parent_pattern: &str) -> usize {
    let parent = Pattern::resource(parent_pattern);
    let mut expanded = 0;
    for node in state.graph.nodes_matching(&Pattern::resource(resource_pattern)) {
        if state.graph.is_expanded(&node) {
            continue;
        }
        let (groups, others): (Vec<String>, Vec<String>) = state
            .graph
            .parents(&node)
            .into_iter()
            .partition(|p| parent.matches(p));
        if groups.len() <= 1 {
            continue;
        }
        let children = state.graph.neighbors(&node).to_vec();
        let attrs = state.metadata.cloned(&node);
        state.remove_node(&node);
        for (i, group) in groups.iter().enumerate() {
            let key = indexed_key(&node, i + 1);
            state.graph.add_edge(group, &key);
            for c in &children {
                state.graph.add_edge(&key, c);
            }
            for o in &others {
                state.graph.add_edge(o, &key);
            }
            state.metadata.insert(&key, attrs.clone());
        }
        expanded += 1;
    }
    expanded
}

pub fn group_into(state: &mut GraphState, resource_pattern: &str, group_node: &str) -> usize {
    let members: Vec<String> = state
        .graph
        .nodes_matching(&Pattern::resource(resource_pattern))
        .into_iter()
        .filter(|k| k != group_node)
        .collect();
    if members.is_empty() {
        return 0;
    }
    let mut changed = usize::from(state.graph.add_node(group_node));
    for m in &members {
        if state.graph.add_edge(group_node, m) {
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, Metadata};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state_from(edges: &[(&str, &str)]) -> GraphState {
        let mut graph = Graph::new();
        for (a, b) in edges {
            graph.add_edge(a, b);
        }
        GraphState::new(graph, Metadata::new(), Vec::new())
    }

    fn neighbors(state: &GraphState, key: &str) -> Vec<String> {
        state.graph.neighbors(key).to_vec()
    }

    #[test]
    fn expand_pairs_with_referenced_subnets() {
        let mut state = state_from(&[
            ("aws_autoscaling_group.web", "aws_subnet.s1"),
            ("aws_autoscaling_group.web", "aws_subnet.s2"),
            ("aws_autoscaling_group.web", "aws_launch_template.lt"),
        ]);
        state.graph.add_node("aws_subnet.s3");
        state.metadata.set(
            "aws_autoscaling_group.web",
            "vpc_zone_identifier",
            json!(["${aws_subnet.s1.id}", "${aws_subnet.s2.id}", "${aws_subnet.s3.id}"]),
        );
        assert_eq!(
            expand_to_numbered_instances(&mut state, "aws_autoscaling_group", "vpc_zone_identifier"),
            1
        );
        assert!(!state.graph.contains("aws_autoscaling_group.web"));
        assert_eq!(
            neighbors(&state, "aws_autoscaling_group.web~1"),
            vec!["aws_subnet.s1", "aws_launch_template.lt"]
        );
        assert_eq!(
            neighbors(&state, "aws_autoscaling_group.web~3"),
            vec!["aws_launch_template.lt", "aws_subnet.s3"]
        );
        assert!(state.metadata.get("aws_autoscaling_group.web~2").is_some());
    }

    #[test]
    fn expand_skips_single_and_expanded() {
        let mut state = state_from(&[("aws_instance.a", "aws_subnet.x"), ("aws_instance.b~1", "aws_subnet.x")]);
        state.metadata.set("aws_instance.a", "count", json!(1));
        state.metadata.set("aws_instance.b~1", "count", json!(3));
        assert_eq!(expand_to_numbered_instances(&mut state, "aws_instance", "count"), 0);
    }

    #[test]
    fn expand_by_count() {
        let mut state = state_from(&[("aws_instance.a", "aws_subnet.x")]);
        state.metadata.set("aws_instance.a", "count", json!(2));
        expand_to_numbered_instances(&mut state, "aws_instance", "count");
        assert_eq!(neighbors(&state, "aws_instance.a~1"), vec!["aws_subnet.x"]);
        assert_eq!(neighbors(&state, "aws_instance.a~2"), vec!["aws_subnet.x"]);
    }

    #[test]
    fn expand_reports_missing_subnet_reference() {
        let mut state = state_from(&[("aws_autoscaling_group.web", "aws_subnet.a")]);
        state.metadata.set(
            "aws_autoscaling_group.web",
            "vpc_zone_identifier",
            json!(["${aws_subnet.a.id}", "${aws_subnet.gone.id}", "subnet-0abc"]),
        );
        assert_eq!(
            expand_to_numbered_instances(&mut state, "aws_autoscaling_group", "vpc_zone_identifier"),
            1
        );
        assert_eq!(neighbors(&state, "aws_autoscaling_group.web~1"), vec!["aws_subnet.a"]);
        assert!(neighbors(&state, "aws_autoscaling_group.web~2").is_empty());
        assert!(state.graph.contains("aws_autoscaling_group.web~3"));
        assert_eq!(state.findings.len(), 1);
        assert_eq!(state.findings[0].kind, FindingKind::DanglingReference);
        assert_eq!(state.findings[0].subject, "aws_subnet.gone");
    }

    #[test]
    fn expand_refuses_huge_counts() {
        let mut state = state_from(&[("aws_instance.a", "aws_subnet.x")]);
        state.metadata.set("aws_instance.a", "count", json!(u64::MAX));
        assert_eq!(expand_to_numbered_instances(&mut state, "aws_instance", "count"), 0);
        assert!(state.graph.contains("aws_instance.a"));
        assert!(!state.graph.contains("aws_instance.a~1"));
        assert_eq!(state.findings.len(), 1);
        assert_eq!(state.findings[0].kind, FindingKind::InvalidMultiplicity);

        state.metadata.set("aws_instance.a", "count", json!(1024));
        assert_eq!(expand_to_numbered_instances(&mut state, "aws_instance", "count"), 1);
        assert!(state.graph.contains("aws_instance.a~1024"));
    }

    #[test]
    fn expansion_then_suffix_match_pairs_one_to_one() {
        let mut state = state_from(&[]);
        for i in 1..=3 {
            state.graph.add_edge("aws_instance.web", &format!("aws_subnet.s~{i}"));
        }
        state.metadata.set("aws_instance.web", "count", json!(3));
        expand_to_numbered_instances(&mut state, "aws_instance", "count");
        match_by_suffix(&mut state, "aws_instance", "aws_subnet");

        let edges = state.graph.edges();
        assert_eq!(edges.len(), 3);
        for i in 1..=3 {
            assert_eq!(
                neighbors(&state, &format!("aws_instance.web~{i}")),
                vec![format!("aws_subnet.s~{i}")]
            );
        }
    }

    #[test]
    fn move_to_parent_rehomes_resources() {
        let mut state = state_from(&[
            ("aws_vpc.main", "aws_instance.web"),
            ("aws_instance.web", "aws_subnet.a"),
        ]);
        assert_eq!(move_to_parent(&mut state, "aws_instance", "aws_vpc", "aws_subnet"), 1);
        assert!(neighbors(&state, "aws_vpc.main").is_empty());
        assert_eq!(neighbors(&state, "aws_subnet.a"), vec!["aws_instance.web"]);
        assert!(neighbors(&state, "aws_instance.web").is_empty());
    }

    #[test]
    fn move_to_parent_without_destination_is_noop() {
        let mut state = state_from(&[("aws_vpc.main", "aws_instance.web")]);
        let before = state.clone();
        assert_eq!(move_to_parent(&mut state, "aws_instance", "aws_vpc", "aws_subnet"), 0);
        assert_eq!(state, before);
    }

    #[test]
    fn delete_nodes_can_defer_cleanup() {
        let mut state = state_from(&[("aws_lb.a", "aws_lb_listener.l")]);
        delete_nodes(&mut state, "aws_lb_listener", false);
        assert_eq!(state.graph.dangling_edges().len(), 1);
        delete_nodes(&mut state, "aws_lb", true);
        assert!(state.graph.is_empty());
    }

    #[test]
    fn link_and_unlink_are_idempotent() {
        let mut state = state_from(&[]);
        state.graph.add_node("aws_lambda_function.f");
        state.graph.add_node("aws_sqs_queue.q");
        assert_eq!(link_resources(&mut state, "aws_lambda", "aws_sqs"), 1);
        assert_eq!(link_resources(&mut state, "aws_lambda", "aws_sqs"), 0);
        assert_eq!(unlink_resources(&mut state, "aws_lambda", "aws_sqs"), 1);
        assert_eq!(unlink_resources(&mut state, "aws_lambda", "aws_sqs"), 0);
    }

    #[test]
    fn insert_intermediate_node_by_zone() {
        let mut state = state_from(&[("aws_vpc.main", "aws_subnet.a"), ("aws_vpc.main", "aws_subnet.b")]);
        state.metadata.set("aws_subnet.a", "availability_zone", json!("us-east-1a"));
        state.metadata.set("aws_subnet.b", "availability_zone", json!("us-east-1a"));
        let generator = crate::procedures::generator("availability_zone").unwrap();
        assert_eq!(insert_intermediate_node(&mut state, "aws_vpc", "aws_subnet", &generator), 2);
        assert_eq!(neighbors(&state, "aws_vpc.main"), vec!["aws_az.us-east-1a"]);
        assert_eq!(
            neighbors(&state, "aws_az.us-east-1a"),
            vec!["aws_subnet.a", "aws_subnet.b"]
        );
        assert_eq!(insert_intermediate_node(&mut state, "aws_vpc", "aws_subnet", &generator), 0);
    }

    #[test]
    fn propagate_does_not_overwrite() {
        let mut state = state_from(&[("aws_subnet.a", "aws_instance.web")]);
        state.metadata.set("aws_subnet.a", "availability_zone", json!("eu-west-1b"));
        state.metadata.set("aws_subnet.a", "cidr_block", json!("10.0.1.0/24"));
        state.metadata.set("aws_instance.web", "cidr_block", json!("keep"));
        let written = propagate_metadata(
            &mut state,
            "aws_subnet",
            "aws_instance",
            &[],
            PropagateDirection::Forward,
            false,
            false,
        );
        assert_eq!(written, 1);
        assert_eq!(state.metadata.attr("aws_instance.web", "cidr_block"), Some(&json!("keep")));
        assert_eq!(
            state.metadata.attr("aws_instance.web", "availability_zone"),
            Some(&json!("eu-west-1b"))
        );
    }

    #[test]
    fn propagate_reverse_with_selected_keys() {
        let mut state = state_from(&[("aws_instance.web", "aws_subnet.a")]);
        state.metadata.set("aws_subnet.a", "availability_zone", json!("eu-west-1b"));
        state.metadata.set("aws_subnet.a", "cidr_block", json!("10.0.1.0/24"));
        propagate_metadata(
            &mut state,
            "aws_subnet",
            "aws_instance",
            &["availability_zone".to_string()],
            PropagateDirection::Reverse,
            false,
            false,
        );
        let attrs = state.metadata.get("aws_instance.web").unwrap();
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn propagate_reaches_children_of_targets() {
        let mut state = state_from(&[
            ("aws_subnet.a", "aws_instance.web"),
            ("aws_instance.web", "aws_ebs_volume.data"),
        ]);
        state.metadata.set("aws_subnet.a", "availability_zone", json!("eu-west-1b"));
        let written = propagate_metadata(
            &mut state,
            "aws_subnet",
            "aws_instance",
            &[],
            PropagateDirection::Forward,
            true,
            false,
        );
        assert_eq!(written, 2);
        assert_eq!(
            state.metadata.attr("aws_ebs_volume.data", "availability_zone"),
            Some(&json!("eu-west-1b"))
        );
        assert_eq!(state.metadata.attr("aws_subnet.a", "availability_zone"), Some(&json!("eu-west-1b")));
    }

    #[test]
    fn consolidate_into_existing_target_keeps_source_metadata() {
        let mut state = state_from(&[
            ("aws_route53_record.dns", "aws_route53_zone.z"),
            ("aws_route53_record.www", "aws_lb.front"),
        ]);
        state.metadata.set("aws_route53_record.dns", "ttl", json!(300));
        state.metadata.set("aws_route53_record.www", "ttl", json!(60));
        state.metadata.set("aws_route53_record.www", "type", json!("CNAME"));
        assert_eq!(
            consolidate_into_single_node(&mut state, "aws_route53_record", "aws_route53_record.dns"),
            1
        );
        assert_eq!(state.metadata.attr("aws_route53_record.dns", "ttl"), Some(&json!(300)));
        assert_eq!(state.metadata.attr("aws_route53_record.dns", "type"), Some(&json!("CNAME")));
        assert_eq!(
            neighbors(&state, "aws_route53_record.dns"),
            vec!["aws_route53_zone.z", "aws_lb.front"]
        );
    }

    #[test]
    fn consolidate_preserves_edge_union() {
        let mut state = state_from(&[
            ("aws_lb.front", "aws_route53_record.a"),
            ("aws_route53_record.a", "aws_route53_zone.z"),
            ("aws_route53_record.b", "aws_route53_zone.z"),
            ("aws_route53_record.b", "aws_route53_record.a"),
            ("aws_cloudfront_distribution.cdn", "aws_route53_record.b"),
        ]);
        let merged = consolidate_into_single_node(&mut state, "aws_route53_record", "aws_route53_record.dns");
        assert_eq!(merged, 2);
        assert_eq!(neighbors(&state, "aws_route53_record.dns"), vec!["aws_route53_zone.z"]);
        assert_eq!(neighbors(&state, "aws_lb.front"), vec!["aws_route53_record.dns"]);
        assert_eq!(
            neighbors(&state, "aws_cloudfront_distribution.cdn"),
            vec!["aws_route53_record.dns"]
        );
        assert!(state.graph.dangling_edges().is_empty());
        assert_eq!(
            consolidate_into_single_node(&mut state, "aws_route53_record", "aws_route53_record.dns"),
            0
        );
    }

    #[test]
    fn bidirectional_link_cleans_reverse() {
        let mut state = state_from(&[("aws_efs_file_system.fs1", "aws_efs_mount_target.mt1")]);
        bidirectional_link(&mut state, "aws_efs_mount_target", "aws_efs_file_system", true);
        assert_eq!(neighbors(&state, "aws_efs_mount_target.mt1"), vec!["aws_efs_file_system.fs1"]);
        assert!(neighbors(&state, "aws_efs_file_system.fs1").is_empty());
    }

    #[test]
    fn redirect_uses_matching_index() {
        let mut state = state_from(&[
            ("aws_instance.a~1", "aws_eip.old~1"),
            ("aws_instance.a~2", "aws_eip.old~2"),
        ]);
        state.graph.add_node("aws_nat_gateway.n~1");
        state.graph.add_node("aws_nat_gateway.n~2");
        assert_eq!(redirect_connections(&mut state, "aws_eip", "aws_nat_gateway"), 2);
        assert_eq!(neighbors(&state, "aws_instance.a~1"), vec!["aws_nat_gateway.n~1"]);
        assert_eq!(neighbors(&state, "aws_instance.a~2"), vec!["aws_nat_gateway.n~2"]);
    }

    #[test]
    fn replace_targets_only_for_sources() {
        let mut state = state_from(&[
            ("aws_instance.a", "aws_eip.e"),
            ("aws_lb.l", "aws_eip.e"),
        ]);
        state.graph.add_node("aws_internet_gateway.igw");
        replace_connection_targets(&mut state, "aws_instance", "aws_eip", "aws_internet_gateway");
        assert_eq!(neighbors(&state, "aws_instance.a"), vec!["aws_internet_gateway.igw"]);
        assert_eq!(neighbors(&state, "aws_lb.l"), vec!["aws_eip.e"]);
    }

    fn lb_variants() -> IndexMap<String, String> {
        let mut map = IndexMap::new();
        map.insert("network".to_string(), "aws_nlb".to_string());
        map.insert("application".to_string(), "aws_alb".to_string());
        map.insert("app".to_string(), "aws_app_lb".to_string());
        map
    }

    #[test]
    fn variants_rename_and_keep_edges() {
        let mut state = state_from(&[("aws_lb.front", "aws_instance.web"), ("aws_route53_record.r", "aws_lb.front")]);
        state.metadata.set("aws_lb.front", "load_balancer_type", json!("network"));
        let renamed = apply_resource_variants(
            &mut state,
            "aws_lb",
            &lb_variants(),
            "load_balancer_type",
            VariantPrecedence::FirstDeclared,
        );
        assert_eq!(renamed, 1);
        assert_eq!(neighbors(&state, "aws_nlb.front"), vec!["aws_instance.web"]);
        assert_eq!(neighbors(&state, "aws_route53_record.r"), vec!["aws_nlb.front"]);
        assert!(state.findings.is_empty());
    }

    #[test]
    fn ambiguous_variant_first_declared() {
        let mut state = state_from(&[("aws_lb.front", "aws_instance.web")]);
        state.metadata.set("aws_lb.front", "load_balancer_type", json!("application"));
        apply_resource_variants(
            &mut state,
            "aws_lb",
            &lb_variants(),
            "load_balancer_type",
            VariantPrecedence::FirstDeclared,
        );
        assert!(state.graph.contains("aws_alb.front"));
        assert_eq!(state.findings.len(), 1);
        assert_eq!(state.findings[0].kind, FindingKind::AmbiguousVariant);
    }

    #[test]
    fn ambiguous_variant_longest_match() {
        let mut map = IndexMap::new();
        map.insert("app".to_string(), "aws_app_lb".to_string());
        map.insert("application".to_string(), "aws_alb".to_string());
        let mut state = state_from(&[("aws_lb.front", "aws_instance.web")]);
        state.metadata.set("aws_lb.front", "load_balancer_type", json!("application"));
        apply_resource_variants(&mut state, "aws_lb", &map, "load_balancer_type", VariantPrecedence::LongestMatch);
        assert!(state.graph.contains("aws_alb.front"));

        let mut state = state_from(&[("aws_lb.front", "aws_instance.web")]);
        state.metadata.set("aws_lb.front", "load_balancer_type", json!("application"));
        apply_resource_variants(&mut state, "aws_lb", &map, "load_balancer_type", VariantPrecedence::FirstDeclared);
        assert!(state.graph.contains("aws_app_lb.front"));
    }

    #[test]
    fn match_by_suffix_drops_cross_index_edges() {
        let mut edges = Vec::new();
        let sources = ["aws_instance.a~1", "aws_instance.a~2"];
        let targets = ["aws_subnet.s~1", "aws_subnet.s~2"];
        for s in sources {
            for t in targets {
                edges.push((s, t));
            }
        }
        let mut state = state_from(&edges);
        assert_eq!(match_by_suffix(&mut state, "aws_instance", "aws_subnet"), 2);
        assert_eq!(neighbors(&state, "aws_instance.a~1"), vec!["aws_subnet.s~1"]);
        assert_eq!(neighbors(&state, "aws_instance.a~2"), vec!["aws_subnet.s~2"]);
    }

    #[test]
    fn bypass_reconnects_parents_to_children() {
        let mut state = state_from(&[
            ("aws_lb.l", "aws_lb_target_group.tg"),
            ("aws_lb_target_group.tg", "aws_instance.a"),
        ]);
        bypass_nodes(&mut state, "aws_lb_target_group");
        assert_eq!(neighbors(&state, "aws_lb.l"), vec!["aws_instance.a"]);
    }

    #[test]
    fn reverse_connections_flips_once() {
        let mut state = state_from(&[("aws_instance.a", "aws_security_group.sg")]);
        assert_eq!(reverse_connections(&mut state, "aws_instance", "aws_security_group"), 1);
        assert_eq!(neighbors(&state, "aws_security_group.sg"), vec!["aws_instance.a"]);
        assert_eq!(reverse_connections(&mut state, "aws_instance", "aws_security_group"), 0);
    }

    #[test]
    fn outer_node_only_when_present() {
        let mut state = state_from(&[]);
        let mut attrs = Attributes::new();
        attrs.insert("label".to_string(), json!("Users"));
        assert_eq!(
            add_outer_node(&mut state, "tv_aws_users.users", "aws_cloudfront", None, &attrs),
            0
        );
        state.graph.add_node("aws_cloudfront_distribution.cdn");
        add_outer_node(&mut state, "tv_aws_users.users", "aws_cloudfront", None, &attrs);
        assert_eq!(
            neighbors(&state, "tv_aws_users.users"),
            vec!["aws_cloudfront_distribution.cdn"]
        );
        assert_eq!(state.metadata.attr("tv_aws_users.users", "label"), Some(&json!("Users")));
    }

    #[test]
    fn set_metadata_and_delete_unconnected() {
        let mut state = state_from(&[("aws_instance.a", "aws_subnet.s")]);
        state.graph.add_node("aws_iam_policy.p");
        assert_eq!(set_metadata(&mut state, "aws_iam", "hidden", &json!(true)), 1);
        assert_eq!(set_metadata(&mut state, "aws_iam", "hidden", &json!(true)), 0);
        assert_eq!(delete_unconnected(&mut state, "aws_"), 1);
        assert!(!state.graph.contains("aws_iam_policy.p"));
    }

    #[test]
    fn expand_per_parent_splits_shared_node() {
        let mut state = state_from(&[
            ("aws_subnet.a", "aws_instance.web"),
            ("aws_subnet.b", "aws_instance.web"),
            ("aws_lb.l", "aws_instance.web"),
            ("aws_instance.web", "aws_ebs_volume.v"),
        ]);
        assert_eq!(expand_per_parent(&mut state, "aws_instance", "aws_subnet"), 1);
        assert_eq!(neighbors(&state, "aws_subnet.a"), vec!["aws_instance.web~1"]);
        assert_eq!(neighbors(&state, "aws_subnet.b"), vec!["aws_instance.web~2"]);
        assert_eq!(
            neighbors(&state, "aws_lb.l"),
            vec!["aws_instance.web~1", "aws_instance.web~2"]
        );
        assert_eq!(neighbors(&state, "aws_instance.web~2"), vec!["aws_ebs_volume.v"]);
        assert_eq!(expand_per_parent(&mut state, "aws_instance", "aws_subnet"), 0);
    }

    #[test]
    fn group_into_creates_group() {
        let mut state = state_from(&[]);
        state.graph.add_node("aws_iam_role.r");
        state.graph.add_node("aws_kms_key.k");
        group_into(&mut state, "aws_iam", "aws_group.shared_services");
        group_into(&mut state, "aws_kms", "aws_group.shared_services");
        assert_eq!(
            neighbors(&state, "aws_group.shared_services"),
            vec!["aws_iam_role.r", "aws_kms_key.k"]
        );
    }

    #[test]
    fn operation_names_round_trip_through_config() {
        let step: Transformation = serde_yaml::from_str(
            "operation: bypass_nodes\nparams:\n  resource_pattern: aws_lb_target_group\n",
        )
        .unwrap();
        assert_eq!(step.operation(), "bypass_nodes");
    }
}
