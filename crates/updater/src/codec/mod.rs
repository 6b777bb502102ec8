//! Directory codec
//!
//! Maps directory subtrees of text files to flat `relative path -> content`
//! maps and back, and reads/writes the certbot renewal descriptor with its
//! path fields rebased onto the working-directory root.

mod renewal;

pub use renewal::{
    read_renewal_descriptor, write_renewal_descriptor, ConfEntry, ConfValue, RenewalDescriptor,
    PATH_FIELDS, RENEWAL_PARAMS, RENEWAL_PARAMS_PATH_FIELDS,
};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::trace;
use walkdir::WalkDir;

/// Relative path (forward slashes) to file content
pub type FileTree = BTreeMap<String, String>;

/// Errors raised by the directory codec
#[derive(Debug, Error)]
pub enum CodecError {
    /// A local file or directory could not be read or written
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The renewal descriptor does not exist
    #[error("renewal descriptor not found: {0}")]
    DescriptorNotFound(PathBuf),

    /// The renewal descriptor is malformed
    #[error("invalid renewal descriptor at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A descriptor value cannot be written in the file format
    #[error("cannot write descriptor value {0:?}")]
    Unrepresentable(String),

    /// A required descriptor field is absent or not a single path
    #[error("renewal descriptor field {0} is missing or not a path")]
    MissingField(String),

    /// A path field does not lie under the working root
    #[error("path {path} is not under {root}")]
    PathOutsideRoot { path: String, root: PathBuf },

    /// A tree entry would be written outside its subtree
    #[error("unsafe relative path in tree: {0}")]
    UnsafePath(String),
}

impl CodecError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read every regular file below `root/subpath` as text.
///
/// Keys are relative to `root/subpath` and always use `/`. A missing
/// directory yields an empty map.
pub fn read_tree(root: &Path, subpath: &str) -> Result<FileTree, CodecError> {
    let base = root.join(subpath);
    let mut tree = FileTree::new();

    if !base.is_dir() {
        trace!(path = %base.display(), "Subtree absent, nothing to read");
        return Ok(tree);
    }

    for entry in WalkDir::new(&base) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(&base).to_path_buf();
            CodecError::Io {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let content = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
        let relative = path.strip_prefix(&base).unwrap_or(path);
        tree.insert(slash_path(relative), content);
    }

    trace!(path = %base.display(), files = tree.len(), "Read subtree");
    Ok(tree)
}

/// Write every entry of `tree` below `root/subpath`.
///
/// Parent directories are created and existing files overwritten. Files not
/// named in `tree` are left in place.
pub fn write_tree(root: &Path, subpath: &str, tree: &FileTree) -> Result<(), CodecError> {
    let base = root.join(subpath);
    fs::create_dir_all(&base).map_err(|e| CodecError::io(&base, e))?;

    for (relative, content) in tree {
        let path = base.join(safe_relative(relative)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CodecError::io(parent, e))?;
        }
        fs::write(&path, content).map_err(|e| CodecError::io(&path, e))?;
    }

    trace!(path = %base.display(), files = tree.len(), "Wrote subtree");
    Ok(())
}

fn safe_relative(relative: &str) -> Result<PathBuf, CodecError> {
    let path = Path::new(relative);
    let safe = !relative.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(path.to_path_buf())
    } else {
        Err(CodecError::UnsafePath(relative.to_string()))
    }
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
