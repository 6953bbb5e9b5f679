use thiserror::Error;

/// Problems with handler configuration or provider profiles. Always raised
/// before the graph is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    #[error("handler `{handler}`: unknown transformer operation `{operation}`")]
    UnknownOperation { handler: String, operation: String },

    #[error("handler `{handler}`: invalid params for `{operation}`: {message}")]
    InvalidParams {
        handler: String,
        operation: String,
        message: String,
    },

    #[error("handler `{handler}`: unknown generator `{generator}`")]
    UnknownGenerator { handler: String, generator: String },

    #[error("handler `{handler}`: unknown custom procedure `{procedure}`")]
    UnknownProcedure { handler: String, procedure: String },

    #[error(
        "resource types {0:?} are both forced origins and forced destinations; set `orientation_precedence`"
    )]
    AmbiguousOrientation(Vec<String>),

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid input graph: {0}")]
    Input(String),

    #[error("failed to encode graph: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
