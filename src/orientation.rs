use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::config::{OrientationPrecedence, ProviderProfile};
use crate::error::ConfigError;
use crate::graph::GraphState;
use crate::pattern::Pattern;
use crate::validator::{Finding, FindingKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Origin,
    Destination,
    Conflict,
    Free,
}

/// Decides final arrow direction. Precedence, highest first: pinned
/// annotation edges, forced origins, forced destinations, the reversal
/// list, then the dependency direction as ingested.
#[derive(Debug, Clone)]
pub struct OrientationRules {
    forced_origin: Vec<Pattern>,
    forced_destination: Vec<Pattern>,
    reverse: Vec<Pattern>,
    precedence: Option<OrientationPrecedence>,
    implied: IndexMap<String, Pattern>,
}

impl OrientationRules {
    pub fn from_profile(profile: &ProviderProfile) -> Result<OrientationRules, ConfigError> {
        let conflicts = profile.orientation_conflicts();
        if !conflicts.is_empty() && profile.orientation_precedence.is_none() {
            return Err(ConfigError::AmbiguousOrientation(conflicts));
        }
        let patterns = |list: &[String]| -> Vec<Pattern> {
            list.iter().map(|p| Pattern::resource(p)).collect()
        };
        Ok(OrientationRules {
            forced_origin: patterns(&profile.forced_origin),
            forced_destination: patterns(&profile.forced_destination),
            reverse: patterns(&profile.reverse_arrow_list),
            precedence: profile.orientation_precedence,
            implied: profile
                .implied_connections
                .iter()
                .map(|(keyword, target)| (keyword.clone(), Pattern::resource(target)))
                .collect(),
        })
    }

    fn role(&self, key: &str) -> Role {
        let origin = self.forced_origin.iter().any(|p| p.matches(key));
        let destination = self.forced_destination.iter().any(|p| p.matches(key));
        match (origin, destination, self.precedence) {
            (true, true, Some(OrientationPrecedence::Origin)) => Role::Origin,
            (true, true, Some(OrientationPrecedence::Destination)) => Role::Destination,
            (true, true, None) => Role::Conflict,
            (true, false, _) => Role::Origin,
            (false, true, _) => Role::Destination,
            (false, false, _) => Role::Free,
        }
    }

    fn should_flip(&self, state: &GraphState, from: &str, to: &str) -> bool {
        if state.pinned_edges.contains(&(from.to_string(), to.to_string())) {
            return false;
        }
        let (a, b) = (self.role(from), self.role(to));
        if a == Role::Conflict || b == Role::Conflict {
            return false;
        }
        if a == Role::Origin {
            return false;
        }
        if b == Role::Origin {
            return true;
        }
        if b == Role::Destination {
            return false;
        }
        if a == Role::Destination {
            return true;
        }
        let reversed = |k: &str| self.reverse.iter().any(|p| p.matches(k));
        reversed(from) && !reversed(to)
    }

    pub fn add_implied_connections(&self, state: &mut GraphState) -> usize {
        let mut added = 0;
        let keys: Vec<String> = state.graph.keys().cloned().collect();
        for node in &keys {
            let Some(attrs) = state.metadata.get(node) else {
                continue;
            };
            let hits: Vec<&Pattern> = self
                .implied
                .iter()
                .filter(|(keyword, _)| {
                    attrs.iter().any(|(name, value)| {
                        name == *keyword
                            || matches!(value, Value::String(s) if s.contains(keyword.as_str()))
                    })
                })
                .map(|(_, target)| target)
                .collect();
            let mut links = Vec::new();
            for target in hits {
                let found = state
                    .graph
                    .nodes_matching(target)
                    .into_iter()
                    .find(|t| t != node);
                if let Some(t) = found {
                    if !state.graph.has_edge(node, &t) && !state.graph.has_edge(&t, node) {
                        links.push(t);
                    }
                }
            }
            for t in links {
                debug!(from = %node, to = %t, "implied connection");
                if state.graph.add_edge(node, &t) {
                    added += 1;
                }
            }
        }
        added
    }

    pub fn resolve(&self, state: &mut GraphState) -> usize {
        let mut flips = Vec::new();
        for (from, to) in state.graph.edges() {
            let conflicted = [&from, &to]
                .into_iter()
                .filter(|k| self.role(k) == Role::Conflict)
                .cloned()
                .collect::<Vec<String>>();
            for k in conflicted {
                let already = state
                    .findings
                    .iter()
                    .any(|f| f.kind == FindingKind::OrientationConflict && f.subject == k);
                if !already {
                    state.findings.push(Finding::new(
                        FindingKind::OrientationConflict,
                        &k,
                        format!("{k} is both a forced origin and a forced destination; direction left unchanged"),
                    ));
                }
            }
            if self.should_flip(state, &from, &to) {
                flips.push((from, to));
            }
        }
        for (from, to) in &flips {
            state.graph.remove_edge(from, to);
            state.graph.add_edge(to, from);
        }
        flips.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, Metadata};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rules(yaml: &str) -> OrientationRules {
        OrientationRules::from_profile(&ProviderProfile::from_yaml(yaml).unwrap()).unwrap()
    }

    fn state_from(edges: &[(&str, &str)]) -> GraphState {
        let mut graph = Graph::new();
        for (a, b) in edges {
            graph.add_edge(a, b);
        }
        GraphState::new(graph, Metadata::new(), Vec::new())
    }

    #[test]
    fn default_keeps_dependency_direction() {
        let mut state = state_from(&[("aws_instance.web", "aws_s3_bucket.b")]);
        assert_eq!(rules("provider: t\n").resolve(&mut state), 0);
        assert!(state.graph.has_edge("aws_instance.web", "aws_s3_bucket.b"));
    }

    #[test]
    fn forced_origin_beats_forced_destination() {
        let r = rules("provider: t\nforced_origin: [aws_cloudfront]\nforced_destination: [aws_lb]\n");
        let mut state = state_from(&[("aws_lb.front", "aws_cloudfront_distribution.cdn")]);
        assert_eq!(r.resolve(&mut state), 1);
        assert!(state.graph.has_edge("aws_cloudfront_distribution.cdn", "aws_lb.front"));
        assert_eq!(r.resolve(&mut state), 0);
    }

    #[test]
    fn forced_destination_flips_outgoing() {
        let r = rules("provider: t\nforced_destination: [aws_cloudwatch]\n");
        let mut state = state_from(&[("aws_cloudwatch_log_group.l", "aws_lambda_function.f")]);
        r.resolve(&mut state);
        assert!(state.graph.has_edge("aws_lambda_function.f", "aws_cloudwatch_log_group.l"));
    }

    #[test]
    fn reversal_list_flips_once() {
        let r = rules("provider: t\nreverse_arrow_list: [aws_subnet]\n");
        let mut state = state_from(&[
            ("aws_subnet.a", "aws_vpc.main"),
            ("aws_subnet.a", "aws_subnet.b"),
        ]);
        assert_eq!(r.resolve(&mut state), 1);
        assert!(state.graph.has_edge("aws_vpc.main", "aws_subnet.a"));
        assert!(state.graph.has_edge("aws_subnet.a", "aws_subnet.b"));
        assert_eq!(r.resolve(&mut state), 0);
    }

    #[test]
    fn pinned_edges_are_never_flipped() {
        let r = rules("provider: t\nforced_origin: [aws_cloudfront]\n");
        let mut state = state_from(&[("aws_lb.front", "aws_cloudfront_distribution.cdn")]);
        state
            .pinned_edges
            .insert(("aws_lb.front".to_string(), "aws_cloudfront_distribution.cdn".to_string()));
        assert_eq!(r.resolve(&mut state), 0);
    }

    #[test]
    fn overlap_without_precedence_is_rejected() {
        let profile = ProviderProfile::from_yaml(
            "provider: t\nforced_origin: [aws_api_gateway]\nforced_destination: [aws_api_gateway]\n",
        )
        .unwrap();
        let err = OrientationRules::from_profile(&profile).unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousOrientation(_)));
    }

    #[test]
    fn explicit_precedence_resolves_overlap() {
        let r = rules(
            "provider: t
forced_origin: [aws_api_gateway]
forced_destination: [aws_api_gateway]
orientation_precedence: destination
",
        );
        let mut state = state_from(&[("aws_api_gateway_rest_api.api", "aws_lambda_function.f")]);
        assert_eq!(r.resolve(&mut state), 1);
        assert!(state.graph.has_edge("aws_lambda_function.f", "aws_api_gateway_rest_api.api"));
    }

    #[test]
    fn runtime_overlap_is_reported() {
        let r = rules("provider: t\nforced_origin: [cloudfront]\nforced_destination: [aws_cloud]\n");
        let mut state = state_from(&[("aws_cloudfront_distribution.cdn", "aws_s3_bucket.b")]);
        r.resolve(&mut state);
        r.resolve(&mut state);
        assert_eq!(state.findings.len(), 1);
        assert_eq!(state.findings[0].kind, FindingKind::OrientationConflict);
    }

    #[test]
    fn conflicted_node_skips_reversal_list() {
        let r = rules(
            "provider: t\nforced_origin: [cloudfront]\nforced_destination: [aws_cloud]\nreverse_arrow_list: [aws_cloudfront]\n",
        );
        let mut state = state_from(&[("aws_cloudfront_distribution.cdn", "aws_s3_bucket.b")]);
        assert_eq!(r.resolve(&mut state), 0);
        assert!(state.graph.has_edge("aws_cloudfront_distribution.cdn", "aws_s3_bucket.b"));
        assert_eq!(state.findings[0].subject, "aws_cloudfront_distribution.cdn");
    }

    #[test]
    fn implied_connection_from_metadata() {
        let r = rules("provider: t\nimplied_connections: { certificate_arn: aws_acm_certificate }\n");
        let mut state = state_from(&[]);
        state.graph.add_node("aws_lb_listener.https");
        state.graph.add_node("aws_acm_certificate.cert");
        state
            .metadata
            .set("aws_lb_listener.https", "certificate_arn", json!("${aws_acm_certificate.cert.arn}"));
        assert_eq!(r.add_implied_connections(&mut state), 1);
        assert!(state.graph.has_edge("aws_lb_listener.https", "aws_acm_certificate.cert"));
        assert_eq!(r.add_implied_connections(&mut state), 0);
    }
}
