use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::config::{ExecutionOrder, HandlerDescriptor, ProviderProfile};
use crate::error::ConfigError;
use crate::graph::GraphState;
use crate::node_key::resource_type;
use crate::pattern::Pattern;
use crate::pipeline::{Pipeline, parse_steps};
use crate::procedures::{self, Procedure};

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerAction {
    Transform(Pipeline),
    Procedure(Procedure),
    Both {
        pipeline: Pipeline,
        procedure: Procedure,
        order: ExecutionOrder,
    },
}

impl HandlerAction {
    fn from_descriptor(name: &str, descriptor: &HandlerDescriptor) -> Result<HandlerAction, ConfigError> {
        let pipeline = Pipeline::new(parse_steps(name, &descriptor.transformations)?);
        let Some(proc_name) = &descriptor.custom_procedure else {
            return Ok(HandlerAction::Transform(pipeline));
        };
        let procedure = procedures::procedure(proc_name).ok_or_else(|| ConfigError::UnknownProcedure {
            handler: name.to_string(),
            procedure: proc_name.clone(),
        })?;
        if pipeline.is_empty() {
            return Ok(HandlerAction::Procedure(procedure));
        }
        Ok(HandlerAction::Both {
            pipeline,
            procedure,
            order: descriptor.execution_order,
        })
    }

    pub fn run(&self, state: &mut GraphState) -> usize {
        match self {
            HandlerAction::Transform(pipeline) => pipeline.run(state),
            HandlerAction::Procedure(procedure) => procedure.run(state),
            HandlerAction::Both {
                pipeline,
                procedure,
                order: ExecutionOrder::Before,
            } => procedure.run(state) + pipeline.run(state),
            HandlerAction::Both {
                pipeline,
                procedure,
                order: ExecutionOrder::After,
            } => pipeline.run(state) + procedure.run(state),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Handler {
    pub name: String,
    pub pattern: Pattern,
    pub action: HandlerAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub ran: Vec<String>,
    pub skipped: usize,
    pub changes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Handler>,
}

impl HandlerRegistry {
    pub fn from_profile(profile: &ProviderProfile) -> Result<HandlerRegistry, ConfigError> {
        let handlers = profile
            .handlers
            .iter()
            .map(|(name, descriptor)| {
                Ok(Handler {
                    name: name.clone(),
                    pattern: Pattern::resource(name),
                    action: HandlerAction::from_descriptor(name, descriptor)?,
                })
            })
            .collect::<Result<Vec<Handler>, ConfigError>>()?;
        Ok(HandlerRegistry { handlers })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Runs every handler whose pattern selects a resource type present in
    /// the graph, in declaration order. Dangling edges are pruned after each
    /// handler.
    pub fn dispatch(&self, state: &mut GraphState) -> DispatchReport {
        let present: BTreeSet<String> = state.graph.keys().map(|k| resource_type(k)).collect();
        let mut report = DispatchReport::default();
        for handler in &self.handlers {
            if !present.iter().any(|ty| handler.pattern.matches_type(ty)) {
                debug!(handler = %handler.name, "no matching resource types");
                report.skipped += 1;
                continue;
            }
            let changed = handler.action.run(state);
            let pruned = state.graph.prune_dangling();
            info!(handler = %handler.name, changed, pruned, "handler applied");
            report.ran.push(handler.name.clone());
            report.changes += changed;
        }
        report
    }
}
