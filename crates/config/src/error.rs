//! Configuration errors

use thiserror::Error;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variables could not be deserialized.
    #[error("invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    /// The invocation event is not a valid configuration document.
    #[error("invalid event document: {0}")]
    Event(#[from] serde_json::Error),

    /// A field has a value outside its accepted set.
    #[error("invalid value {value:?} for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        value: String,
        message: String,
    },

    /// A field required for the configured domains is empty.
    #[error("{0} is required when domains are configured")]
    Missing(&'static str),
}
