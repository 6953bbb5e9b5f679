pub mod annotations;
pub mod config;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod node_key;
pub mod orientation;
pub mod pattern;
pub mod pipeline;
pub mod procedures;
pub mod transform;
pub mod validator;

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, info};

pub use annotations::AnnotationDocument;
pub use config::{ProviderProfile, detect_provider};
pub use error::{ConfigError, Error, Result};
pub use graph::{Attributes, Graph, GraphState, Metadata};
pub use handlers::{DispatchReport, HandlerRegistry};
pub use orientation::OrientationRules;
pub use pattern::Pattern;
pub use validator::{Finding, FindingKind, StructuralValidator};

/// One provider's fully validated configuration. Building an engine is the
/// only place configuration can fail; running one never does.
#[derive(Debug, Clone)]
pub struct Engine {
    profile: ProviderProfile,
    handlers: HandlerRegistry,
    orientation: OrientationRules,
    validator: StructuralValidator,
}

impl Engine {
    pub fn for_provider(provider: &str) -> std::result::Result<Engine, ConfigError> {
        Engine::from_profile(ProviderProfile::builtin(provider)?)
    }

    pub fn from_profile(profile: ProviderProfile) -> std::result::Result<Engine, ConfigError> {
        let handlers = HandlerRegistry::from_profile(&profile)?;
        let orientation = OrientationRules::from_profile(&profile)?;
        let validator = StructuralValidator::from_profile(&profile);
        Ok(Engine {
            profile,
            handlers,
            orientation,
            validator,
        })
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn run(&self, mut state: GraphState, annotations: Option<&AnnotationDocument>) -> GraphState {
        info!(provider = %self.profile.provider, nodes = state.graph.len(), "processing graph");

        for (pattern, target) in &self.profile.consolidated_nodes {
            let merged = transform::consolidate_into_single_node(&mut state, pattern, target);
            if merged > 0 {
                info!(pattern = %pattern, target = %target, merged, "consolidated");
            }
        }

        let report = self.handlers.dispatch(&mut state);
        info!(ran = report.ran.len(), skipped = report.skipped, changes = report.changes, "handlers done");

        let hidden = bypass_hidden(&mut state);
        if hidden > 0 {
            info!(hidden, "bypassed hidden nodes");
        }
        detach_edge_nodes(&mut state, &self.profile);

        if let Some(doc) = annotations {
            doc.apply(&mut state);
        }

        let implied = self.orientation.add_implied_connections(&mut state);
        let flipped = self.orientation.resolve(&mut state);
        info!(implied, flipped, "edges oriented");

        state.graph.prune_dangling();
        let graph = state.graph.clone();
        state.metadata.retain_nodes(&graph);
        state.refresh_node_list();

        let findings = self.validator.validate(&state);
        state.findings.extend(findings);
        info!(nodes = state.graph.len(), findings = state.findings.len(), "done");
        state
    }
}

fn bypass_hidden(state: &mut GraphState) -> usize {
    let hidden: Vec<String> = state
        .graph
        .keys()
        .filter(|k| state.metadata.is_hidden(k))
        .cloned()
        .collect();
    for node in &hidden {
        let children = state.graph.neighbors(node).to_vec();
        let parents = state.graph.parents(node);
        state.remove_node(node);
        for p in &parents {
            for c in &children {
                state.graph.add_edge(p, c);
            }
        }
    }
    hidden.len()
}

fn detach_edge_nodes(state: &mut GraphState, profile: &ProviderProfile) -> usize {
    let edge: Vec<Pattern> = profile.edge_nodes.iter().map(|p| Pattern::resource(p)).collect();
    let groups: Vec<Pattern> = profile.group_nodes.iter().map(|p| Pattern::resource(p)).collect();
    let mut detached = 0;
    for (from, to) in state.graph.edges() {
        if groups.iter().any(|g| g.matches(&from)) && edge.iter().any(|e| e.matches(&to)) {
            debug!(group = %from, node = %to, "detaching edge node from group");
            state.graph.remove_edge(&from, &to);
            detached += 1;
        }
    }
    detached
}

#[derive(Deserialize)]
struct InputDocument {
    graph: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    node_list: Vec<String>,
}

pub fn parse_input(text: &str) -> Result<GraphState> {
    let doc: InputDocument =
        serde_json::from_str(text).map_err(|e| Error::Input(e.to_string()))?;
    let graph = Graph::from_adjacency(doc.graph);
    let mut metadata = doc.metadata;
    metadata.retain_nodes(&graph);
    let mut state = GraphState::new(graph, metadata, doc.node_list);
    state.refresh_node_list();
    Ok(state)
}

pub fn to_json(state: &GraphState, compact: bool) -> Result<String> {
    let text = if compact {
        serde_json::to_string(state)?
    } else {
        serde_json::to_string_pretty(state)?
    };
    Ok(text)
}
