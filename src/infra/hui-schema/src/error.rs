use thiserror::Error;

/// Schema-level errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid listen address: {0}")]
    InvalidListen(String),

    #[error("port out of range: {0}")]
    PortOutOfRange(String),
}
