//! cert-updater
//!
//! Issues and renews a certificate with certbot on hosts that keep no local
//! state between runs. Certbot's working directory is snapshotted into
//! object storage after every issuance or renewal and restored into a fresh
//! temporary directory before the next renewal.
//!
//! # Layout
//!
//! - [`store`]: object storage abstraction and backends
//! - [`codec`]: directory trees and the certbot renewal descriptor
//! - [`archive`]: manifest snapshot and restore
//! - [`decision`]: issuance-vs-renewal branch
//! - [`acme`]: certbot working-directory layout and client adapter
//! - [`notify`]: lifecycle notifications
//! - [`updater`]: the orchestrator

pub mod acme;
pub mod archive;
pub mod codec;
pub mod decision;
pub mod error;
pub mod notify;
pub mod store;
pub mod updater;

pub use acme::{AcmeClient, CertbotClient, ClientError, RenewOutcome, WorkingDir};
pub use archive::{CertKeys, Manifest, ManifestConfig, StateArchive};
pub use decision::needs_init;
pub use error::{Result, UpdaterError};
pub use notify::{Envelope, MemoryPublisher, Notifier, NotifyError, Publisher};
pub use store::{FileStore, MemoryStore, ObjectStore, StoreError};
pub use updater::{RunOutcome, Updater};

pub use cert_updater_common::CertIdentity;
pub use cert_updater_config::UpdaterConfig;
