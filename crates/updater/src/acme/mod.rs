//! ACME client seam
//!
//! The updater drives an external ACME client (certbot) against an
//! ephemeral working directory. [`AcmeClient`] is the seam: production uses
//! [`CertbotClient`], tests substitute a fake that writes the files certbot
//! would write.

mod certbot;
pub mod layout;

pub use certbot::{CertbotClient, CertbotCommand, CommandOutput};
pub use layout::{PemFile, WorkingDir};

use async_trait::async_trait;
use thiserror::Error;

use cert_updater_common::CertIdentity;

/// Result of a renewal attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// The certificate was replaced; the post-renewal hook ran
    Renewed,
    /// The client decided the certificate is not yet due
    NotDue,
}

/// Errors raised by the ACME client
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client executable could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The client ran and exited unsuccessfully
    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Preparing the working directory for the client failed
    #[error("failed to prepare working directory: {0}")]
    Io(#[from] std::io::Error),
}

/// An ACME client operating on a certbot-layout working directory.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Obtain a new certificate for `identity` into an empty working directory.
    ///
    /// On success the working directory holds the account, key, CSR, renewal
    /// descriptor and live certificate files for `identity.cert_name()`.
    async fn obtain(&self, workdir: &WorkingDir, identity: &CertIdentity)
        -> Result<(), ClientError>;

    /// Renew the certificate already restored into the working directory.
    async fn renew(&self, workdir: &WorkingDir) -> Result<RenewOutcome, ClientError>;
}
