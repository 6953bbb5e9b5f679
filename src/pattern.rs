use std::fmt;

use crate::node_key::{base_key, resource_type};

#[derive(Debug, Clone)]
pub enum Pattern {
    TypeSubstring(String),
    KeySubstring(String),
    Address(String),
    Glob(GlobPattern),
}

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    full: Option<glob::Pattern>,
    name_suffix: Option<glob::Pattern>,
}

impl Pattern {
    pub fn resource(source: &str) -> Pattern {
        if source.contains('*') {
            Pattern::Glob(GlobPattern::new(source))
        } else if source.contains('.') {
            Pattern::KeySubstring(source.to_string())
        } else {
            Pattern::TypeSubstring(source.to_string())
        }
    }

    pub fn annotation(source: &str) -> Pattern {
        if source.contains('*') {
            Pattern::Glob(GlobPattern::new(source))
        } else {
            Pattern::Address(source.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::TypeSubstring(s) | Pattern::KeySubstring(s) | Pattern::Address(s) => s,
            Pattern::Glob(g) => &g.source,
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Pattern::TypeSubstring(s) => resource_type(candidate).contains(s.as_str()),
            Pattern::KeySubstring(s) => key_contains(candidate, s),
            Pattern::Address(s) => candidate == s || base_key(candidate) == s,
            Pattern::Glob(g) => g.matches(candidate),
        }
    }

    /// Whether this pattern selects the given resource type. Used by the
    /// dispatcher, which only knows which types are present.
    pub fn matches_type(&self, ty: &str) -> bool {
        match self {
            Pattern::TypeSubstring(s) => ty.contains(s.as_str()),
            Pattern::KeySubstring(s) | Pattern::Address(s) => {
                s.split('.').next().is_some_and(|t| ty.contains(t))
            }
            Pattern::Glob(g) => g.matches_type(ty),
        }
    }
}

// The match has to end where the name does, so `aws_lb.front` skips
// `aws_lb.frontend`. A trailing `.` already marks the type boundary.
fn key_contains(candidate: &str, needle: &str) -> bool {
    if needle.ends_with('.') {
        return candidate.contains(needle);
    }
    candidate
        .match_indices(needle)
        .any(|(i, _)| matches!(candidate[i + needle.len()..].chars().next(), None | Some('~' | '.')))
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GlobPattern {
    fn new(source: &str) -> GlobPattern {
        let full = glob::Pattern::new(source).ok();
        // `type*.name` also accepts names ending in `name`.
        let name_suffix = match source.rsplit_once('.') {
            Some((ty, name)) if !name.contains('*') && !name.is_empty() => {
                glob::Pattern::new(&format!("{ty}.*{name}")).ok()
            }
            _ => None,
        };
        GlobPattern {
            source: source.to_string(),
            full,
            name_suffix,
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        let base = base_key(candidate);
        [&self.full, &self.name_suffix]
            .into_iter()
            .flatten()
            .any(|p| p.matches(candidate) || p.matches(base))
    }

    fn matches_type(&self, ty: &str) -> bool {
        let type_part = self.source.split('.').next().unwrap_or(&self.source);
        glob::Pattern::new(type_part).is_ok_and(|p| p.matches(ty))
    }
}

pub fn matches(pattern: &str, candidate: &str) -> bool {
    Pattern::resource(pattern).matches(candidate)
}

pub fn matches_annotation(pattern: &str, candidate: &str) -> bool {
    Pattern::annotation(pattern).matches(candidate)
}
