//! State archive
//!
//! Snapshots a certbot working directory into object storage and restores it
//! on the next run. Per certificate the store holds:
//!
//! - `<prefix>/<cert_name>.json`: the manifest, overwritten on every update
//! - `<prefix>/<cert_name>/<timestamp>/<file>.pem`: the PEM artifacts of
//!   each update, never overwritten

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, instrument};

use cert_updater_common::{build_key, CertIdentity};

use crate::acme::layout::{self, PemFile};
use crate::codec::{
    read_renewal_descriptor, read_tree, write_renewal_descriptor, write_tree, CodecError,
    FileTree, RenewalDescriptor,
};
use crate::error::{Result, UpdaterError};
use crate::store::ObjectStore;

const MANIFEST_CONTENT_TYPE: &str = "application/json";
const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

/// Persisted state of one certificate identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Snapshot creation time, RFC 3339
    pub timestamp: String,
    /// Certificate name, kept under its historical field name
    pub domain: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub cert_name: String,
    pub config: ManifestConfig,
    pub cert: CertKeys,
}

/// Certbot state subtrees and the renewal descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default)]
    pub account: FileTree,
    #[serde(default)]
    pub csr: FileTree,
    #[serde(default)]
    pub keys: FileTree,
    /// Path fields relative to the working root
    pub renewal: RenewalDescriptor,
}

/// Storage keys of the four PEM artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertKeys {
    pub cert: String,
    pub chain: String,
    pub fullchain: String,
    pub privkey: String,
}

impl CertKeys {
    fn from_fn(mut key: impl FnMut(PemFile) -> String) -> Self {
        Self {
            cert: key(PemFile::Cert),
            chain: key(PemFile::Chain),
            fullchain: key(PemFile::Fullchain),
            privkey: key(PemFile::Privkey),
        }
    }

    pub fn get(&self, pem: PemFile) -> &str {
        match pem {
            PemFile::Cert => &self.cert,
            PemFile::Chain => &self.chain,
            PemFile::Fullchain => &self.fullchain,
            PemFile::Privkey => &self.privkey,
        }
    }
}

impl Manifest {
    /// Decode a stored manifest, filling fields older manifests lack
    pub fn from_slice(key: &str, bytes: &[u8]) -> Result<Self> {
        let mut manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|source| UpdaterError::Manifest {
                key: key.to_string(),
                source,
            })?;
        if manifest.cert_name.is_empty() {
            manifest.cert_name = manifest.domain.clone();
        }
        if manifest.domains.is_empty() && !manifest.cert_name.is_empty() {
            manifest.domains = vec![manifest.cert_name.clone()];
        }
        Ok(manifest)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| UpdaterError::Manifest {
            key: self.cert_name.clone(),
            source,
        })
    }
}

/// Reads and writes certificate state in an [`ObjectStore`].
#[derive(Clone)]
pub struct StateArchive {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl StateArchive {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stable key of the manifest for `cert_name`
    pub fn manifest_key(&self, cert_name: &str) -> String {
        build_key(&[self.prefix.as_str(), format!("{cert_name}.json").as_str()])
    }

    pub fn pem_key(&self, cert_name: &str, timestamp: &str, pem: PemFile) -> String {
        build_key(&[
            self.prefix.as_str(),
            cert_name,
            timestamp,
            pem.file_name().as_str(),
        ])
    }

    /// Probe for the manifest. Only "not found" is `false`.
    #[instrument(skip(self), fields(location = %self.store.location()))]
    pub async fn exists(&self, cert_name: &str) -> Result<bool> {
        let key = self.manifest_key(cert_name);
        let exists = self.store.exists(&key).await?;
        debug!(key = %key, exists, "Probed manifest");
        Ok(exists)
    }

    /// Fetch and decode the manifest for `cert_name`
    pub async fn load(&self, cert_name: &str) -> Result<Manifest> {
        let key = self.manifest_key(cert_name);
        let bytes = self.store.get(&key).await?;
        Manifest::from_slice(&key, &bytes)
    }

    /// Timestamps of every stored PEM generation, oldest first
    pub async fn generations(&self, cert_name: &str) -> Result<Vec<String>> {
        let dir = build_key(&[self.prefix.as_str(), cert_name, ""]);
        let keys = self.store.list(&dir).await?;
        let timestamps: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&dir))
            .filter_map(|rest| rest.split_once('/').map(|(ts, _)| ts.to_string()))
            .collect();
        Ok(timestamps.into_iter().collect())
    }

    /// Persist the working directory state for `identity`.
    ///
    /// PEM artifacts are uploaded first and the manifest last, so a manifest
    /// never references objects that were not written.
    #[instrument(skip_all, fields(cert_name = %identity.cert_name()))]
    pub async fn snapshot(&self, identity: &CertIdentity, root: &Path) -> Result<Manifest> {
        let cert_name = identity.cert_name();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let config = ManifestConfig {
            account: read_tree(root, layout::ACCOUNTS_DIR)?,
            csr: read_tree(root, layout::CSR_DIR)?,
            keys: read_tree(root, layout::KEYS_DIR)?,
            renewal: read_renewal_descriptor(root, cert_name)?,
        };

        for pem in PemFile::ALL {
            let path = layout::live_path(root, cert_name, pem);
            let body = fs::read(&path)
                .await
                .map_err(|e| CodecError::io(&path, e))?;
            let key = self.pem_key(cert_name, &timestamp, pem);
            self.store.put(&key, body, PEM_CONTENT_TYPE).await?;
            debug!(key = %key, "Uploaded certificate file");
        }

        let manifest = Manifest {
            cert: CertKeys::from_fn(|pem| self.pem_key(cert_name, &timestamp, pem)),
            timestamp,
            domain: cert_name.to_string(),
            domains: identity.domains().to_vec(),
            cert_name: cert_name.to_string(),
            config,
        };

        let key = self.manifest_key(cert_name);
        self.store
            .put(&key, manifest.to_vec()?, MANIFEST_CONTENT_TYPE)
            .await?;
        info!(key = %key, timestamp = %manifest.timestamp, "Wrote manifest");

        Ok(manifest)
    }

    /// Rebuild the working directory for `cert_name` from its manifest.
    ///
    /// Fails with [`UpdaterError::NotFound`] when no manifest exists.
    #[instrument(skip_all, fields(cert_name = %cert_name))]
    pub async fn restore(&self, cert_name: &str, root: &Path) -> Result<Manifest> {
        let manifest = self.load(cert_name).await?;

        write_tree(root, layout::ACCOUNTS_DIR, &manifest.config.account)?;
        write_tree(root, layout::CSR_DIR, &manifest.config.csr)?;
        write_tree(root, layout::KEYS_DIR, &manifest.config.keys)?;
        write_renewal_descriptor(root, cert_name, &manifest.config.renewal)?;

        let archive_dir = layout::archive_dir(root, cert_name);
        let live_dir = layout::live_dir(root, cert_name);
        for dir in [&archive_dir, &live_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| CodecError::io(dir, e))?;
        }

        for pem in PemFile::ALL {
            let key = manifest.cert.get(pem);
            let body = self.store.get(key).await?;

            let archived = layout::archive_path(root, cert_name, pem);
            fs::write(&archived, body)
                .await
                .map_err(|e| CodecError::io(&archived, e))?;

            let live = layout::live_path(root, cert_name, pem);
            link_live(&archived, &live).await?;
            debug!(key = %key, path = %archived.display(), "Restored certificate file");
        }

        info!(timestamp = %manifest.timestamp, "Restored working directory");
        Ok(manifest)
    }
}

#[cfg(unix)]
async fn link_live(archived: &Path, live: &Path) -> std::result::Result<(), CodecError> {
    if fs::symlink_metadata(live).await.is_ok() {
        fs::remove_file(live)
            .await
            .map_err(|e| CodecError::io(live, e))?;
    }
    fs::symlink(archived, live)
        .await
        .map_err(|e| CodecError::io(live, e))
}

#[cfg(not(unix))]
async fn link_live(archived: &Path, live: &Path) -> std::result::Result<(), CodecError> {
    fs::copy(archived, live)
        .await
        .map(|_| ())
        .map_err(|e| CodecError::io(live, e))
}
