//! Shared fixtures for updater integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cert_updater_common::parse_domain_str;
use parking_lot::Mutex;

use cert_updater::acme::layout::{self, PemFile};
use cert_updater::codec::{
    read_renewal_descriptor, write_renewal_descriptor, write_tree, ConfValue, FileTree,
    RenewalDescriptor,
};
use cert_updater::{
    AcmeClient, CertIdentity, ClientError, Envelope, MemoryPublisher, Notifier, NotifyError,
    ObjectStore, Publisher, RenewOutcome, StateArchive, Updater, WorkingDir,
};

pub const TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:cert-updates";
pub const BUCKET: &str = "cert-bucket";
pub const PREFIX: &str = "certs";

/// What the fake client does when invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    NotDue,
    Fail,
}

#[derive(Debug)]
struct FakeState {
    obtain: Behavior,
    renew: Behavior,
    obtain_calls: usize,
    renew_calls: usize,
    /// Working roots seen by the client
    roots: Vec<PathBuf>,
    /// Whether each renew call found a correctly restored directory
    restored: Vec<bool>,
    generation: u32,
}

/// Scripted [`AcmeClient`] writing what certbot would write
#[derive(Clone)]
pub struct FakeAcme {
    state: Arc<Mutex<FakeState>>,
    /// Snapshots a manifest through this archive when issuance fails,
    /// standing in for a concurrent run that initialized the identity
    concurrent: Option<StateArchive>,
}

impl FakeAcme {
    pub fn new(obtain: Behavior, renew: Behavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                obtain,
                renew,
                obtain_calls: 0,
                renew_calls: 0,
                roots: Vec::new(),
                restored: Vec::new(),
                generation: 1,
            })),
            concurrent: None,
        }
    }

    pub fn with_concurrent_initializer(mut self, archive: StateArchive) -> Self {
        self.concurrent = Some(archive);
        self
    }

    pub fn set_renew(&self, behavior: Behavior) {
        self.state.lock().renew = behavior;
    }

    pub fn obtain_calls(&self) -> usize {
        self.state.lock().obtain_calls
    }

    pub fn renew_calls(&self) -> usize {
        self.state.lock().renew_calls
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.state.lock().roots.clone()
    }

    pub fn restored(&self) -> Vec<bool> {
        self.state.lock().restored.clone()
    }

    fn failure(subcommand: &str) -> ClientError {
        ClientError::Failed {
            command: format!("certbot {subcommand}"),
            exit_code: 1,
            stderr: "An unexpected error occurred: DNS problem".to_string(),
        }
    }
}

#[async_trait]
impl AcmeClient for FakeAcme {
    async fn obtain(&self, workdir: &WorkingDir, identity: &CertIdentity) -> Result<(), ClientError> {
        let behavior = {
            let mut state = self.state.lock();
            state.obtain_calls += 1;
            state.roots.push(workdir.root().to_path_buf());
            state.obtain
        };

        if behavior == Behavior::Fail {
            if let Some(archive) = &self.concurrent {
                let other = WorkingDir::create()?;
                issue_into(other.root(), identity.cert_name(), "concurrent");
                archive
                    .snapshot(identity, other.root())
                    .await
                    .map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))?;
            }
            return Err(Self::failure("certonly"));
        }

        issue_into(workdir.root(), identity.cert_name(), "issued");
        Ok(())
    }

    async fn renew(&self, workdir: &WorkingDir) -> Result<RenewOutcome, ClientError> {
        let root = workdir.root();
        let cert_name = single_cert_name(root);
        let restored = cert_name
            .as_deref()
            .map(|name| is_restored(root, name))
            .unwrap_or(false);

        let (behavior, generation) = {
            let mut state = self.state.lock();
            state.renew_calls += 1;
            state.roots.push(root.to_path_buf());
            state.restored.push(restored);
            if state.renew == Behavior::Succeed {
                state.generation += 1;
            }
            (state.renew, state.generation)
        };

        match behavior {
            Behavior::Fail => Err(Self::failure("renew")),
            Behavior::NotDue => Ok(RenewOutcome::NotDue),
            Behavior::Succeed => {
                if let Some(name) = cert_name {
                    replace_live(root, &name, generation)?;
                }
                fs::write(layout::marker_path(root), "")?;
                Ok(RenewOutcome::Renewed)
            }
        }
    }
}

/// PEM content written by the fake for a generation
pub fn pem_content(cert_name: &str, pem: PemFile, tag: &str) -> String {
    format!("-----BEGIN {}-----\n{cert_name} {tag}\n-----END-----\n", pem.stem())
}

/// Lay out the state `certbot certonly` leaves behind
pub fn issue_into(root: &Path, cert_name: &str, tag: &str) {
    write_tree(
        root,
        layout::ACCOUNTS_DIR,
        &FileTree::from([
            (
                "acme-staging-v02.api.letsencrypt.org/directory/4f2a/meta.json".to_string(),
                "{\"creation_host\": \"runner\"}".to_string(),
            ),
            (
                "acme-staging-v02.api.letsencrypt.org/directory/4f2a/private_key.json".to_string(),
                "{\"n\": \"...\"}".to_string(),
            ),
        ]),
    )
    .unwrap();
    write_tree(
        root,
        layout::KEYS_DIR,
        &FileTree::from([("0000_key-certbot.pem".to_string(), format!("KEY {tag}"))]),
    )
    .unwrap();
    write_tree(
        root,
        layout::CSR_DIR,
        &FileTree::from([("0000_csr-certbot.pem".to_string(), format!("CSR {tag}"))]),
    )
    .unwrap();

    let mut descriptor = RenewalDescriptor::new();
    descriptor.set("version", ConfValue::Scalar("2.11.0".into()));
    descriptor.set(
        "archive_dir",
        ConfValue::Scalar(format!("config-dir/archive/{cert_name}")),
    );
    for pem in PemFile::ALL {
        descriptor.set(
            pem.stem(),
            ConfValue::Scalar(format!("config-dir/live/{cert_name}/{}", pem.file_name())),
        );
    }
    for (key, value) in [
        ("account", "4f2a"),
        ("authenticator", "dns-route53"),
        ("server", "https://acme-staging-v02.api.letsencrypt.org/directory"),
        ("config_dir", "config-dir"),
        ("work_dir", "work-dir"),
        ("logs_dir", "logs-dir"),
    ] {
        descriptor.set_in_section("renewalparams", key, ConfValue::Scalar(value.into()));
    }
    descriptor.set_in_section(
        "renewalparams",
        "pref_challs",
        ConfValue::List(vec!["dns-01".into()]),
    );
    write_renewal_descriptor(root, cert_name, &descriptor).unwrap();

    fs::create_dir_all(layout::archive_dir(root, cert_name)).unwrap();
    fs::create_dir_all(layout::live_dir(root, cert_name)).unwrap();
    for pem in PemFile::ALL {
        let archived = layout::archive_path(root, cert_name, pem);
        fs::write(&archived, pem_content(cert_name, pem, tag)).unwrap();
        link_or_copy(&archived, &layout::live_path(root, cert_name, pem));
    }
}

fn replace_live(root: &Path, cert_name: &str, generation: u32) -> std::io::Result<()> {
    let archive = layout::archive_dir(root, cert_name);
    for pem in PemFile::ALL {
        let archived = archive.join(pem.archive_name(generation));
        fs::write(&archived, pem_content(cert_name, pem, &format!("renewed {generation}")))?;
        let live = layout::live_path(root, cert_name, pem);
        fs::remove_file(&live)?;
        link_or_copy(&archived, &live);
    }
    Ok(())
}

fn link_or_copy(target: &Path, link: &Path) {
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link).unwrap();
    #[cfg(not(unix))]
    fs::copy(target, link).map(|_| ()).unwrap();
}

fn single_cert_name(root: &Path) -> Option<String> {
    let renewal = layout::config_dir(root).join("renewal");
    let entry = fs::read_dir(renewal).ok()?.flatten().next()?;
    entry
        .path()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}

/// Descriptor paths rebased onto `root` and every live file readable
fn is_restored(root: &Path, cert_name: &str) -> bool {
    read_renewal_descriptor(root, cert_name).is_ok()
        && PemFile::ALL
            .iter()
            .all(|pem| fs::read_to_string(layout::live_path(root, cert_name, *pem)).is_ok())
}

/// [`Publisher`] that records every attempt and rejects it
#[derive(Debug, Clone, Default)]
pub struct FailingPublisher {
    pub attempts: MemoryPublisher,
}

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(
        &self,
        topic: &str,
        subject: &str,
        envelope: &Envelope,
    ) -> Result<(), NotifyError> {
        self.attempts.publish(topic, subject, envelope).await?;
        Err(NotifyError::Publish {
            topic: topic.to_string(),
            message: "AuthorizationError: not authorized to perform SNS:Publish".to_string(),
        })
    }
}

pub struct Harness {
    pub store: Arc<dyn ObjectStore>,
    pub publisher: MemoryPublisher,
    pub client: FakeAcme,
    pub workdirs: tempfile::TempDir,
}

impl Harness {
    pub fn new(store: Arc<dyn ObjectStore>, client: FakeAcme) -> Self {
        Self {
            store,
            publisher: MemoryPublisher::new(),
            client,
            workdirs: tempfile::TempDir::new().unwrap(),
        }
    }

    pub fn archive(&self) -> StateArchive {
        StateArchive::new(self.store.clone(), PREFIX)
    }

    pub fn updater(&self, domains: &[&str]) -> Updater {
        self.updater_publishing_to(domains, Arc::new(self.publisher.clone()))
    }

    pub fn updater_publishing_to(&self, domains: &[&str], publisher: Arc<dyn Publisher>) -> Updater {
        let identity = CertIdentity::new(parse_domain_str(&domains.join(",")), None);
        let notifier = Notifier::new(publisher, Some(TOPIC.to_string()), BUCKET);
        Updater::new(identity, self.archive(), Arc::new(self.client.clone()), notifier)
            .with_workdir_parent(self.workdirs.path())
    }

    /// Number of working directories still present
    pub fn leftover_workdirs(&self) -> usize {
        fs::read_dir(self.workdirs.path()).unwrap().count()
    }
}
