//! Certbot working-directory layout
//!
//! Every fixed relative path certbot expects lives here:
//!
//! ```text
//! <root>/
//! ├── config-dir/
//! │   ├── accounts/...
//! │   ├── csr/...
//! │   ├── keys/...
//! │   ├── renewal/<cert_name>.conf
//! │   ├── renewal-hooks/post/mark-renewed.sh
//! │   ├── archive/<cert_name>/{cert,chain,fullchain,privkey}1.pem
//! │   └── live/<cert_name>/{cert,chain,fullchain,privkey}.pem
//! │         -> <root>/config-dir/archive/<cert_name>/...
//! ├── work-dir/
//! ├── logs-dir/
//! └── renewed.marker
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

pub const CONFIG_DIR: &str = "config-dir";
pub const WORK_DIR: &str = "work-dir";
pub const LOGS_DIR: &str = "logs-dir";

/// State subtrees persisted verbatim, relative to the working root
pub const ACCOUNTS_DIR: &str = "config-dir/accounts";
pub const CSR_DIR: &str = "config-dir/csr";
pub const KEYS_DIR: &str = "config-dir/keys";

/// Archive generation certbot expects for the first archived certificate
pub const FIRST_ARCHIVE_GENERATION: u32 = 1;

const RENEWAL_DIR: &str = "renewal";
const ARCHIVE_DIR: &str = "archive";
const LIVE_DIR: &str = "live";
const POST_HOOK_DIR: &str = "renewal-hooks/post";
const POST_HOOK_NAME: &str = "mark-renewed.sh";
const MARKER_NAME: &str = "renewed.marker";

/// The four PEM artifacts of an issued certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PemFile {
    Cert,
    Chain,
    Fullchain,
    Privkey,
}

impl PemFile {
    pub const ALL: [PemFile; 4] = [Self::Cert, Self::Chain, Self::Fullchain, Self::Privkey];

    pub fn stem(self) -> &'static str {
        match self {
            Self::Cert => "cert",
            Self::Chain => "chain",
            Self::Fullchain => "fullchain",
            Self::Privkey => "privkey",
        }
    }

    /// Name below `live/<cert_name>/`, e.g. `cert.pem`
    pub fn file_name(self) -> String {
        format!("{}.pem", self.stem())
    }

    /// Name below `archive/<cert_name>/` for a generation, e.g. `cert1.pem`
    pub fn archive_name(self, generation: u32) -> String {
        format!("{}{}.pem", self.stem(), generation)
    }
}

impl fmt::Display for PemFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

pub fn config_dir(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR)
}

pub fn renewal_conf_path(root: &Path, cert_name: &str) -> PathBuf {
    config_dir(root)
        .join(RENEWAL_DIR)
        .join(format!("{cert_name}.conf"))
}

pub fn archive_dir(root: &Path, cert_name: &str) -> PathBuf {
    config_dir(root).join(ARCHIVE_DIR).join(cert_name)
}

pub fn live_dir(root: &Path, cert_name: &str) -> PathBuf {
    config_dir(root).join(LIVE_DIR).join(cert_name)
}

pub fn live_path(root: &Path, cert_name: &str, pem: PemFile) -> PathBuf {
    live_dir(root, cert_name).join(pem.file_name())
}

pub fn archive_path(root: &Path, cert_name: &str, pem: PemFile) -> PathBuf {
    archive_dir(root, cert_name).join(pem.archive_name(FIRST_ARCHIVE_GENERATION))
}

pub fn post_hook_path(root: &Path) -> PathBuf {
    config_dir(root).join(POST_HOOK_DIR).join(POST_HOOK_NAME)
}

pub fn marker_path(root: &Path) -> PathBuf {
    root.join(MARKER_NAME)
}

/// Install the post-renewal hook that creates the marker file.
///
/// Certbot only runs post hooks when it actually renewed something, so the
/// marker distinguishes a renewal from a "not yet due" skip.
pub fn install_renewal_hook(root: &Path) -> io::Result<PathBuf> {
    let hook = post_hook_path(root);
    if let Some(parent) = hook.parent() {
        fs::create_dir_all(parent)?;
    }

    let marker = marker_path(root);
    let script = format!(
        "#!/bin/sh\n\ntouch {}\n",
        shell_quote(&marker.to_string_lossy())
    );
    fs::write(&hook, script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))?;
    }

    debug!(hook = %hook.display(), "Installed post-renewal hook");
    Ok(hook)
}

/// Whether the post-renewal hook ran
pub fn renewal_marker_fired(root: &Path) -> bool {
    marker_path(root).exists()
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Ephemeral working directory for one invocation.
///
/// The directory and everything below it is removed when the value is
/// dropped, on success and error paths alike.
#[derive(Debug)]
pub struct WorkingDir {
    dir: TempDir,
}

impl WorkingDir {
    /// Allocate a fresh directory under the system temp dir
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("cert-updater-").tempdir()?;
        Self::init(dir)
    }

    /// Allocate a fresh directory under `parent`
    pub fn create_in(parent: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("cert-updater-")
            .tempdir_in(parent)?;
        Self::init(dir)
    }

    fn init(dir: TempDir) -> io::Result<Self> {
        for sub in [CONFIG_DIR, WORK_DIR, LOGS_DIR] {
            fs::create_dir_all(dir.path().join(sub))?;
        }
        debug!(root = %dir.path().display(), "Allocated working directory");
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root().join(CONFIG_DIR)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root().join(WORK_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root().join(LOGS_DIR)
    }

    /// Remove the directory now, reporting any error
    pub fn close(self) -> io::Result<()> {
        let root = self.root().to_path_buf();
        self.dir.close()?;
        debug!(root = %root.display(), "Released working directory");
        Ok(())
    }
}
