//! Shared error type, duration handling and layered run configuration.

pub mod config;
pub mod duration;

pub type Result<T> = core::result::Result<T, LoadError>;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("invalid duration `{0}`")]
    InvalidDuration(String),
    #[error("invalid threshold `{expr}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expr: String,
        reason: String,
    },
    #[error("metric `{name}` is already declared as a {existing}")]
    MetricKind { name: String, existing: &'static str },
    #[error("unknown script `{0}`")]
    UnknownScript(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0}")]
    Message(String),
}
