use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::graph::{Attributes, GraphState};
use crate::pattern::Pattern;
use crate::transform;

pub type GeneratorFn = fn(&str, &Attributes) -> Option<String>;

/// Computes the key of a node inserted between a parent and `child`.
/// Must depend only on its inputs so reruns produce the same key.
#[derive(Clone, Copy)]
pub struct Generator {
    name: &'static str,
    func: GeneratorFn,
}

impl Generator {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn generate(&self, child: &str, attrs: &Attributes) -> Option<String> {
        (self.func)(child, attrs)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generator({})", self.name)
    }
}

impl PartialEq for Generator {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<'de> Deserialize<'de> for Generator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        generator(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown generator `{name}`")))
    }
}

pub const GENERATORS: &[Generator] = &[
    Generator {
        name: "availability_zone",
        func: availability_zone,
    },
    Generator {
        name: "region",
        func: region,
    },
    Generator {
        name: "gcp_zone",
        func: gcp_zone,
    },
];

pub fn generator(name: &str) -> Option<Generator> {
    GENERATORS.iter().find(|g| g.name == name).copied()
}

fn availability_zone(_child: &str, attrs: &Attributes) -> Option<String> {
    string_attr(attrs, "availability_zone").map(|az| format!("aws_az.{}", sanitize(&az)))
}

fn region(_child: &str, attrs: &Attributes) -> Option<String> {
    string_attr(attrs, "region").map(|r| format!("aws_region.{}", sanitize(&r)))
}

fn gcp_zone(_child: &str, attrs: &Attributes) -> Option<String> {
    string_attr(attrs, "zone").map(|z| format!("google_zone.{}", sanitize(&z)))
}

fn string_attr(attrs: &Attributes, key: &str) -> Option<String> {
    match attrs.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub type ProcedureFn = fn(&mut GraphState) -> usize;

#[derive(Clone, Copy)]
pub struct Procedure {
    name: &'static str,
    func: ProcedureFn,
}

impl Procedure {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn run(&self, state: &mut GraphState) -> usize {
        (self.func)(state)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Procedure({})", self.name)
    }
}

impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

pub const PROCEDURES: &[Procedure] = &[
    Procedure {
        name: "aws_wrap_security_groups",
        func: aws_wrap_security_groups,
    },
    Procedure {
        name: "aws_link_efs_mount_targets",
        func: aws_link_efs_mount_targets,
    },
    Procedure {
        name: "aws_attach_nat_gateways",
        func: aws_attach_nat_gateways,
    },
];

pub fn procedure(name: &str) -> Option<Procedure> {
    PROCEDURES.iter().find(|p| p.name == name).copied()
}

fn aws_wrap_security_groups(state: &mut GraphState) -> usize {
    let sg = Pattern::resource("aws_security_group");
    let subnet = Pattern::resource("aws_subnet");
    let mut changed = 0;
    for group in state.graph.nodes_matching(&sg) {
        if Pattern::resource("aws_security_group_rule").matches(&group) {
            continue;
        }
        let members: Vec<String> = state
            .graph
            .parents(&group)
            .into_iter()
            .filter(|m| !sg.matches(m) && !subnet.matches(m))
            .collect();
        for member in members {
            state.graph.remove_edge(&member, &group);
            state.graph.add_edge(&group, &member);
            for holder in state.graph.parents(&member) {
                if subnet.matches(&holder) {
                    state.graph.remove_edge(&holder, &member);
                    state.graph.add_edge(&holder, &group);
                }
            }
            changed += 1;
        }
    }
    changed + transform::bypass_nodes(state, "aws_security_group_rule")
}

fn aws_link_efs_mount_targets(state: &mut GraphState) -> usize {
    let linked =
        transform::bidirectional_link(state, "aws_efs_mount_target", "aws_efs_file_system", true);
    linked
        + transform::unlink_resources(state, "aws_subnet", "aws_efs_file_system")
        + transform::unlink_resources(state, "aws_efs_file_system", "aws_subnet")
}

// Elastic IPs used only by NAT gateways are folded into them.
fn aws_attach_nat_gateways(state: &mut GraphState) -> usize {
    let mut changed = transform::reverse_connections(state, "aws_nat_gateway", "aws_subnet");
    let nat = Pattern::resource("aws_nat_gateway");
    for eip in state.graph.nodes_matching(&Pattern::resource("aws_eip")) {
        let users = state.graph.parents(&eip);
        if users.is_empty() || !users.iter().all(|u| nat.matches(u)) {
            continue;
        }
        for user in &users {
            state.metadata.set(user, "public_ip", Value::Bool(true));
        }
        state.remove_node(&eip);
        changed += 1;
    }
    changed
}
