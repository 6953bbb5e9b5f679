use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::graph::GraphState;
use crate::procedures;
use crate::transform::Transformation;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawStep {
    pub operation: String,
    #[serde(default)]
    pub params: serde_yaml::Value,
}

pub fn parse_steps(handler: &str, raw: &[RawStep]) -> Result<Vec<Transformation>, ConfigError> {
    raw.iter().map(|step| parse_step(handler, step)).collect()
}

fn parse_step(handler: &str, step: &RawStep) -> Result<Transformation, ConfigError> {
    let operation = step.operation.as_str();
    if !Transformation::OPERATIONS.contains(&operation) {
        return Err(ConfigError::UnknownOperation {
            handler: handler.to_string(),
            operation: operation.to_string(),
        });
    }
    if let Some(name) = step.params.get("generator").and_then(|g| g.as_str()) {
        if procedures::generator(name).is_none() {
            return Err(ConfigError::UnknownGenerator {
                handler: handler.to_string(),
                generator: name.to_string(),
            });
        }
    }

    let mut tagged = serde_yaml::Mapping::new();
    tagged.insert("operation".into(), operation.into());
    tagged.insert("params".into(), step.params.clone());
    serde_yaml::from_value(serde_yaml::Value::Mapping(tagged)).map_err(|e| {
        ConfigError::InvalidParams {
            handler: handler.to_string(),
            operation: operation.to_string(),
            message: e.to_string(),
        }
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    steps: Vec<Transformation>,
}

impl Pipeline {
    pub fn new(steps: Vec<Transformation>) -> Pipeline {
        Pipeline { steps }
    }

    pub fn steps(&self) -> &[Transformation] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(&self, state: &mut GraphState) -> usize {
        let mut total = 0;
        for (i, step) in self.steps.iter().enumerate() {
            let changed = step.apply(state);
            if changed == 0 {
                debug!(step = i, operation = step.operation(), "no matches");
            } else {
                debug!(step = i, operation = step.operation(), changed, "applied");
            }
            total += changed;
        }
        total
    }
}
