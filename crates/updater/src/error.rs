//! Error types for the updater
//!
//! Layer errors ([`StoreError`], [`CodecError`], [`ClientError`],
//! [`NotifyError`], [`ConfigError`]) are folded into [`UpdaterError`] at the
//! orchestration boundary.

use thiserror::Error;

use cert_updater_config::ConfigError;

use crate::acme::ClientError;
use crate::codec::CodecError;
use crate::notify::NotifyError;
use crate::store::StoreError;

/// Top-level updater error
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// No object at the key. Before first issuance this is the normal state.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error("ACME client failure: {0}")]
    Client(#[from] ClientError),

    /// Local working-directory read or write failed
    #[error("working directory failure: {0}")]
    Io(#[from] CodecError),

    #[error("invalid manifest at {key}: {source}")]
    Manifest {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("notification failure: {0}")]
    Notify(#[from] NotifyError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StoreError> for UpdaterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::NotFound(key),
            other => Self::Storage(other),
        }
    }
}

impl UpdaterError {
    /// Taxonomy label reported in `failed` notifications
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Storage(_) | Self::Notify(_) => "storage_failure",
            Self::Client(_) => "client_failure",
            Self::Io(_) => "io_failure",
            Self::Manifest { .. } => "invalid_manifest",
            Self::Config(_) => "invalid_config",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for updater operations
pub type Result<T> = std::result::Result<T, UpdaterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_routes_to_not_found() {
        let err: UpdaterError = StoreError::NotFound("certs/example.com.json".into()).into();
        assert!(err.is_not_found());
        assert_eq!(err.kind(), "not_found");

        let err: UpdaterError = StoreError::backend("certs/example.com.json", "throttled").into();
        assert!(matches!(err, UpdaterError::Storage(_)));
        assert_eq!(err.kind(), "storage_failure");
    }

    #[test]
    fn test_client_kind() {
        let err: UpdaterError = ClientError::Failed {
            command: "certbot renew".into(),
            exit_code: 1,
            stderr: "boom".into(),
        }
        .into();
        assert_eq!(err.kind(), "client_failure");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_codec_kind() {
        let err: UpdaterError = CodecError::UnsafePath("../x".into()).into();
        assert_eq!(err.kind(), "io_failure");
    }
}
