//! Orchestrator
//!
//! One invocation runs exactly one of two flows:
//!
//! - issuance: allocate working dir, `certonly`, snapshot, notify
//! - renewal: allocate working dir, restore, `renew`, snapshot and notify
//!   only if the certificate was actually renewed
//!
//! The working directory is released on every exit path.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use cert_updater_common::CertIdentity;
use cert_updater_config::{IssuanceFallback, UpdaterConfig};

use crate::acme::{AcmeClient, RenewOutcome, WorkingDir};
use crate::archive::{Manifest, StateArchive};
use crate::codec::CodecError;
use crate::decision::needs_init;
use crate::error::{Result, UpdaterError};
use crate::notify::{Notifier, Publisher};
use crate::store::ObjectStore;

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No domains configured
    Skipped,
    /// First certificate issued and snapshotted
    Issued(Manifest),
    /// Existing certificate renewed and snapshotted
    Renewed(Manifest),
    /// Existing certificate restored but not yet due
    NotDue,
}

impl RunOutcome {
    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            Self::Issued(manifest) | Self::Renewed(manifest) => Some(manifest),
            Self::Skipped | Self::NotDue => None,
        }
    }
}

/// Drives issuance or renewal for one certificate identity
pub struct Updater {
    identity: CertIdentity,
    archive: StateArchive,
    client: Arc<dyn AcmeClient>,
    notifier: Notifier,
    fallback: IssuanceFallback,
    workdir_parent: Option<PathBuf>,
}

impl Updater {
    pub fn new(
        identity: CertIdentity,
        archive: StateArchive,
        client: Arc<dyn AcmeClient>,
        notifier: Notifier,
    ) -> Self {
        Self {
            identity,
            archive,
            client,
            notifier,
            fallback: IssuanceFallback::default(),
            workdir_parent: None,
        }
    }

    /// Wire an updater from resolved configuration and its collaborators
    pub fn from_config(
        config: &UpdaterConfig,
        store: Arc<dyn ObjectStore>,
        publisher: Arc<dyn Publisher>,
        client: Arc<dyn AcmeClient>,
    ) -> Self {
        let archive = StateArchive::new(store, &config.prefix);
        let notifier = Notifier::new(publisher, config.notification.clone(), &config.bucket);
        Self::new(config.identity.clone(), archive, client, notifier)
            .with_issuance_fallback(config.issuance_fallback)
    }

    pub fn with_issuance_fallback(mut self, fallback: IssuanceFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Allocate working directories under `parent` instead of the system temp dir
    pub fn with_workdir_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.workdir_parent = Some(parent.into());
        self
    }

    pub fn identity(&self) -> &CertIdentity {
        &self.identity
    }

    pub fn archive(&self) -> &StateArchive {
        &self.archive
    }

    /// Run one invocation.
    ///
    /// On failure a `failed` notification is attempted before the error is
    /// returned; a failure to publish it is logged and otherwise ignored.
    #[instrument(skip(self), fields(cert_name = %self.identity.cert_name()))]
    pub async fn run(&self) -> Result<RunOutcome> {
        if self.identity.is_empty() {
            info!("No domains configured, nothing to do");
            return Ok(RunOutcome::Skipped);
        }

        match self.dispatch().await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(error = %err, kind = err.kind(), "Certificate update failed");
                if let Err(notify_err) = self.notifier.failed(&self.identity, &err).await {
                    warn!(error = %notify_err, "Failed to publish failure notification");
                }
                Err(err)
            }
        }
    }

    async fn dispatch(&self) -> Result<RunOutcome> {
        if !needs_init(&self.archive, self.identity.cert_name()).await? {
            return self.renew().await;
        }

        let workdir = self.allocate()?;
        if let Err(err) = self.client.obtain(&workdir, &self.identity).await {
            release(workdir);
            return self.fall_back(err.into()).await;
        }

        // The certificate exists from here on; later errors skip the fallback
        let manifest = self.persist_issued(&workdir).await?;
        release(workdir);
        Ok(RunOutcome::Issued(manifest))
    }

    async fn fall_back(&self, issue_err: UpdaterError) -> Result<RunOutcome> {
        let attempt = match self.fallback {
            IssuanceFallback::Never => false,
            IssuanceFallback::Always => true,
            IssuanceFallback::IfInitialized => {
                match needs_init(&self.archive, self.identity.cert_name()).await {
                    Ok(needs_init) => !needs_init,
                    Err(probe_err) => {
                        warn!(error = %probe_err, "Manifest probe after failed issuance failed");
                        false
                    }
                }
            }
        };
        if !attempt {
            return Err(issue_err);
        }

        warn!(
            error = %issue_err,
            fallback = %self.fallback,
            "Issuance failed, attempting renewal instead"
        );
        match self.renew().await {
            // Nothing to renew: the issuance error is the meaningful one
            Err(err) if err.is_not_found() => Err(issue_err),
            other => other,
        }
    }

    async fn persist_issued(&self, workdir: &WorkingDir) -> Result<Manifest> {
        let manifest = self.archive.snapshot(&self.identity, workdir.root()).await?;
        self.announce(&manifest).await?;
        info!(timestamp = %manifest.timestamp, "Issued new certificate");
        Ok(manifest)
    }

    async fn renew(&self) -> Result<RunOutcome> {
        let workdir = self.allocate()?;

        self.archive
            .restore(self.identity.cert_name(), workdir.root())
            .await?;

        let outcome = match self.client.renew(&workdir).await? {
            RenewOutcome::NotDue => {
                info!("Certificate not due for renewal");
                RunOutcome::NotDue
            }
            RenewOutcome::Renewed => {
                let manifest = self.archive.snapshot(&self.identity, workdir.root()).await?;
                self.announce(&manifest).await?;
                info!(timestamp = %manifest.timestamp, "Renewed certificate");
                RunOutcome::Renewed(manifest)
            }
        };

        release(workdir);
        Ok(outcome)
    }

    async fn announce(&self, manifest: &Manifest) -> Result<()> {
        let key = self.archive.manifest_key(&manifest.cert_name);
        self.notifier.renewed(manifest, &key).await?;
        Ok(())
    }

    fn allocate(&self) -> Result<WorkingDir> {
        let workdir = match &self.workdir_parent {
            Some(parent) => WorkingDir::create_in(parent).map_err(|e| CodecError::io(parent, e))?,
            None => WorkingDir::create().map_err(|e| CodecError::io(&std::env::temp_dir(), e))?,
        };
        Ok(workdir)
    }
}

fn release(workdir: WorkingDir) {
    let root = workdir.root().to_path_buf();
    if let Err(e) = workdir.close() {
        warn!(root = %root.display(), error = %e, "Failed to remove working directory");
    }
}
