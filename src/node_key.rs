use std::fmt;

use winnow::prelude::*;
use winnow::ascii::dec_uint;
use winnow::combinator::{eof, opt, preceded, repeat};
use winnow::token::take_while;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub modules: Vec<String>,
    pub data_source: bool,
    pub resource_type: String,
    pub name: String,
    pub index: Option<usize>,
}

impl NodeAddress {
    pub fn base(&self) -> String {
        let mut out = String::new();
        for module in &self.modules {
            out.push_str("module.");
            out.push_str(module);
            out.push('.');
        }
        if self.data_source {
            out.push_str("data.");
        }
        out.push_str(&self.resource_type);
        out.push('.');
        out.push_str(&self.name);
        out
    }

    pub fn with_index(&self, index: usize) -> String {
        format!("{}~{index}", self.base())
    }

    pub fn with_type(&self, resource_type: &str) -> NodeAddress {
        NodeAddress {
            resource_type: resource_type.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}~{i}", self.base()),
            None => write!(f, "{}", self.base()),
        }
    }
}

pub fn parse_address(input: &str) -> Result<NodeAddress, String> {
    let mut rest = input;
    address(&mut rest).map_err(|_| format!("invalid node key `{input}`"))
}

pub fn resource_type(key: &str) -> String {
    match parse_address(key) {
        Ok(addr) => addr.resource_type,
        Err(_) => key.split('.').next().unwrap_or(key).to_string(),
    }
}

pub fn split_index(key: &str) -> (&str, Option<usize>) {
    match key.rsplit_once('~') {
        Some((base, idx)) if !base.is_empty() => match idx.parse::<usize>() {
            Ok(n) if n > 0 => (base, Some(n)),
            _ => (key, None),
        },
        _ => (key, None),
    }
}

pub fn base_key(key: &str) -> &str {
    split_index(key).0
}

pub fn index_of(key: &str) -> Option<usize> {
    split_index(key).1
}

pub fn indexed_key(base: &str, index: usize) -> String {
    format!("{base}~{index}")
}

/// Extracts the `type.name` address named by an attribute reference, e.g.
/// `${aws_subnet.private.id}` or `aws_subnet.private~2.id`.
pub fn parse_reference(input: &str) -> Option<String> {
    let mut rest = input.trim();
    reference(&mut rest).ok()
}

fn address(input: &mut &str) -> winnow::Result<NodeAddress> {
    let modules: Vec<String> = repeat(0.., module_prefix).parse_next(input)?;
    let data_source = opt("data.").parse_next(input)?.is_some();
    let resource_type = identifier.parse_next(input)?;
    ".".parse_next(input)?;
    let name = take_while(1.., |c: char| c != '~').parse_next(input)?;
    let index: Option<usize> = opt(preceded("~", dec_uint)).parse_next(input)?;
    eof.parse_next(input)?;
    Ok(NodeAddress {
        modules,
        data_source,
        resource_type: resource_type.to_string(),
        name: name.to_string(),
        index,
    })
}

fn module_prefix(input: &mut &str) -> winnow::Result<String> {
    "module.".parse_next(input)?;
    let name = take_while(1.., |c: char| c != '.').parse_next(input)?;
    ".".parse_next(input)?;
    Ok(name.to_string())
}

fn identifier<'s>(input: &mut &'s str) -> winnow::Result<&'s str> {
    take_while(1.., |c: char| c.is_alphanumeric() || c == '_' || c == '-').parse_next(input)
}

fn reference(input: &mut &str) -> winnow::Result<String> {
    opt("${").parse_next(input)?;
    let modules: Vec<String> = repeat(0.., module_prefix).parse_next(input)?;
    let data_source = opt("data.").parse_next(input)?.is_some();
    let resource_type = identifier.parse_next(input)?;
    ".".parse_next(input)?;
    let name = identifier.parse_next(input)?;
    let index: Option<usize> = opt(preceded("~", dec_uint)).parse_next(input)?;
    let addr = NodeAddress {
        modules,
        data_source,
        resource_type: resource_type.to_string(),
        name: name.to_string(),
        index,
    };
    Ok(addr.to_string())
}
