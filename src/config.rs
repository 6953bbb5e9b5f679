use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::graph::Graph;
use crate::node_key::resource_type;
use crate::pipeline::RawStep;

const AWS_PROFILE: &str = include_str!("../providers/aws.yml");
const GCP_PROFILE: &str = include_str!("../providers/gcp.yml");

pub const BUILTIN_PROVIDERS: &[&str] = &["aws", "gcp"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    Before,
    #[default]
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationPrecedence {
    Origin,
    Destination,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerDescriptor {
    #[serde(default)]
    pub transformations: Vec<RawStep>,
    #[serde(default, alias = "handler_procedure")]
    pub custom_procedure: Option<String>,
    #[serde(default)]
    pub execution_order: ExecutionOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderProfile {
    pub provider: String,
    #[serde(default)]
    pub group_nodes: Vec<String>,
    #[serde(default)]
    pub edge_nodes: Vec<String>,
    #[serde(default)]
    pub outer_nodes: Vec<String>,
    #[serde(default)]
    pub drawable: Vec<String>,
    #[serde(default)]
    pub shared_services: Vec<String>,
    // pattern -> key of the merged node
    #[serde(default)]
    pub consolidated_nodes: IndexMap<String, String>,
    #[serde(default)]
    pub forced_origin: Vec<String>,
    #[serde(default)]
    pub forced_destination: Vec<String>,
    #[serde(default)]
    pub reverse_arrow_list: Vec<String>,
    #[serde(default)]
    pub orientation_precedence: Option<OrientationPrecedence>,
    #[serde(default)]
    pub implied_connections: IndexMap<String, String>,
    #[serde(default)]
    pub handlers: IndexMap<String, HandlerDescriptor>,
}

impl ProviderProfile {
    pub fn from_yaml(text: &str) -> Result<ProviderProfile, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            what: "provider profile",
            source,
        })
    }

    pub fn builtin(provider: &str) -> Result<ProviderProfile, ConfigError> {
        match provider {
            "aws" => ProviderProfile::from_yaml(AWS_PROFILE),
            "gcp" | "google" => ProviderProfile::from_yaml(GCP_PROFILE),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }

    pub fn orientation_conflicts(&self) -> Vec<String> {
        let mut conflicts = Vec::new();
        for origin in &self.forced_origin {
            for dest in &self.forced_destination {
                if origin.contains(dest.as_str()) || dest.contains(origin.as_str()) {
                    let longer = if origin.len() >= dest.len() { origin } else { dest };
                    if !conflicts.contains(longer) {
                        conflicts.push(longer.clone());
                    }
                }
            }
        }
        conflicts
    }
}

pub fn detect_provider(graph: &Graph) -> Option<&'static str> {
    let prefixes = [("aws", "aws_"), ("gcp", "google_")];
    prefixes
        .iter()
        .map(|(name, prefix)| {
            let count = graph
                .keys()
                .filter(|k| resource_type(k).starts_with(prefix))
                .count();
            (*name, count)
        })
        .filter(|(_, count)| *count > 0)
        .fold(None, |best: Option<(&'static str, usize)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .map(|(name, _)| name)
}
