//! Certbot renewal descriptor
//!
//! Certbot keeps one `renewal/<cert_name>.conf` per certificate in a
//! ConfigObj-style format:
//!
//! ```text
//! version = 2.11.0
//! archive_dir = /tmp/run/config-dir/archive/example.com
//! cert = /tmp/run/config-dir/live/example.com/cert.pem
//! ...
//!
//! # Options used in the renewal process
//! [renewalparams]
//! account = 0123456789abcdef
//! authenticator = dns-route53
//! config_dir = /tmp/run/config-dir
//! ...
//! ```
//!
//! Paths in the file are absolute under the working root of the run that
//! wrote it. The persisted form keeps them relative to that root so they can
//! be rebased onto the next run's root.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{slash_path, CodecError};
use crate::acme::layout;

/// Top-level fields holding paths
pub const PATH_FIELDS: [&str; 5] = ["archive_dir", "cert", "privkey", "chain", "fullchain"];

/// Section holding the renewal parameters
pub const RENEWAL_PARAMS: &str = "renewalparams";

/// `renewalparams` fields holding paths
pub const RENEWAL_PARAMS_PATH_FIELDS: [&str; 3] = ["config_dir", "work_dir", "logs_dir"];

/// A single descriptor value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfValue {
    Scalar(String),
    /// Written with commas, e.g. `pref_challs = dns-01,`
    List(Vec<String>),
}

impl ConfValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::List(_) => None,
        }
    }
}

/// A top-level descriptor entry: a value or a section of values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfEntry {
    Value(ConfValue),
    Section(IndexMap<String, ConfValue>),
}

/// Parsed renewal descriptor, preserving key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenewalDescriptor {
    entries: IndexMap<String, ConfEntry>,
}

impl RenewalDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a top-level value
    pub fn get(&self, key: &str) -> Option<&ConfValue> {
        match self.entries.get(key)? {
            ConfEntry::Value(value) => Some(value),
            ConfEntry::Section(_) => None,
        }
    }

    /// Get a section
    pub fn section(&self, name: &str) -> Option<&IndexMap<String, ConfValue>> {
        match self.entries.get(name)? {
            ConfEntry::Section(section) => Some(section),
            ConfEntry::Value(_) => None,
        }
    }

    /// Set a top-level value, keeping its position if it already exists
    pub fn set(&mut self, key: impl Into<String>, value: ConfValue) {
        self.entries.insert(key.into(), ConfEntry::Value(value));
    }

    /// Set a value inside a section, creating the section if needed
    pub fn set_in_section(&mut self, section: &str, key: impl Into<String>, value: ConfValue) {
        let entry = self
            .entries
            .entry(section.to_string())
            .or_insert_with(|| ConfEntry::Section(IndexMap::new()));
        if let ConfEntry::Value(_) = entry {
            *entry = ConfEntry::Section(IndexMap::new());
        }
        if let ConfEntry::Section(values) = entry {
            values.insert(key.into(), value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the descriptor file format
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let mut descriptor = Self::new();
        let mut section: Option<String> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                let name = parse_section_header(line, line_no)?;
                if descriptor.entries.contains_key(&name) {
                    return Err(parse_error(line_no, format!("duplicate section {name:?}")));
                }
                descriptor
                    .entries
                    .insert(name.clone(), ConfEntry::Section(IndexMap::new()));
                section = Some(name);
                continue;
            }

            let Some((key, raw_value)) = line.split_once('=') else {
                return Err(parse_error(line_no, "expected `key = value`"));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_error(line_no, "empty key"));
            }
            let value = parse_value(raw_value, line_no)?;

            match &section {
                None => {
                    if descriptor.entries.contains_key(key) {
                        return Err(parse_error(line_no, format!("duplicate key {key:?}")));
                    }
                    descriptor.set(key, value);
                }
                Some(name) => {
                    if let Some(ConfEntry::Section(values)) = descriptor.entries.get_mut(name) {
                        if values.contains_key(key) {
                            return Err(parse_error(line_no, format!("duplicate key {key:?}")));
                        }
                        values.insert(key.to_string(), value);
                    }
                }
            }
        }

        Ok(descriptor)
    }

    /// Render in the descriptor file format.
    ///
    /// Top-level values come first, then each section.
    pub fn to_conf_string(&self) -> Result<String, CodecError> {
        let mut out = String::new();

        for (key, entry) in &self.entries {
            if let ConfEntry::Value(value) = entry {
                out.push_str(&format!("{key} = {}\n", render_value(value)?));
            }
        }

        for (name, entry) in &self.entries {
            if let ConfEntry::Section(values) = entry {
                out.push_str(&format!("\n[{name}]\n"));
                for (key, value) in values {
                    out.push_str(&format!("{key} = {}\n", render_value(value)?));
                }
            }
        }

        Ok(out)
    }

    /// Rewrite path fields from absolute under `root` to relative to `root`
    pub fn relative_to(&self, root: &Path) -> Result<Self, CodecError> {
        self.map_paths(|value| {
            Path::new(value)
                .strip_prefix(root)
                .map(slash_path)
                .map_err(|_| CodecError::PathOutsideRoot {
                    path: value.to_string(),
                    root: root.to_path_buf(),
                })
        })
    }

    /// Rewrite path fields from relative to `root` to absolute under `root`
    pub fn absolute_under(&self, root: &Path) -> Result<Self, CodecError> {
        self.map_paths(|value| Ok(root.join(value).to_string_lossy().into_owned()))
    }

    fn map_paths<F>(&self, rewrite: F) -> Result<Self, CodecError>
    where
        F: Fn(&str) -> Result<String, CodecError>,
    {
        let mut rebased = self.clone();

        for field in PATH_FIELDS {
            let value = self
                .get(field)
                .and_then(ConfValue::as_scalar)
                .ok_or_else(|| CodecError::MissingField(field.to_string()))?;
            rebased.set(field, ConfValue::Scalar(rewrite(value)?));
        }

        let params = self
            .section(RENEWAL_PARAMS)
            .ok_or_else(|| CodecError::MissingField(RENEWAL_PARAMS.to_string()))?;
        for field in RENEWAL_PARAMS_PATH_FIELDS {
            let value = params
                .get(field)
                .and_then(ConfValue::as_scalar)
                .ok_or_else(|| CodecError::MissingField(format!("{RENEWAL_PARAMS}.{field}")))?;
            rebased.set_in_section(RENEWAL_PARAMS, field, ConfValue::Scalar(rewrite(value)?));
        }

        Ok(rebased)
    }
}

/// Read `<cert_name>.conf` and rebase its paths to be relative to `root`.
///
/// Fails with [`CodecError::DescriptorNotFound`] if the file does not exist,
/// which is the normal state before first issuance.
pub fn read_renewal_descriptor(root: &Path, cert_name: &str) -> Result<RenewalDescriptor, CodecError> {
    let path = layout::renewal_conf_path(root, cert_name);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CodecError::DescriptorNotFound(path));
        }
        Err(e) => return Err(CodecError::io(&path, e)),
    };
    RenewalDescriptor::parse(&text)?.relative_to(root)
}

/// Rebase `descriptor` onto `root` and write it as `<cert_name>.conf`,
/// replacing any existing file.
pub fn write_renewal_descriptor(
    root: &Path,
    cert_name: &str,
    descriptor: &RenewalDescriptor,
) -> Result<(), CodecError> {
    let path = layout::renewal_conf_path(root, cert_name);
    let text = descriptor.absolute_under(root)?.to_conf_string()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CodecError::io(parent, e))?;
    }
    fs::write(&path, text).map_err(|e| CodecError::io(&path, e))
}

// ============================================================================
// Line format
// ============================================================================

fn parse_error(line: usize, message: impl Into<String>) -> CodecError {
    CodecError::Parse {
        line,
        message: message.into(),
    }
}

fn parse_section_header(line: &str, line_no: usize) -> Result<String, CodecError> {
    if line.starts_with("[[") {
        return Err(parse_error(line_no, "nested sections are not supported"));
    }
    let inner = line
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(name, tail)| (name.trim(), tail.trim()));
    match inner {
        Some((name, tail)) if !name.is_empty() && (tail.is_empty() || tail.starts_with('#')) => {
            Ok(name.to_string())
        }
        _ => Err(parse_error(line_no, "malformed section header")),
    }
}

fn parse_value(raw: &str, line_no: usize) -> Result<ConfValue, CodecError> {
    let mut items = Vec::new();
    let mut is_list = false;
    let mut chars = raw.trim().chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        match chars.peek().copied() {
            None | Some('#') => break,
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let mut item = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => item.push(c),
                        None => return Err(parse_error(line_no, "unterminated quoted value")),
                    }
                }
                items.push(item);
            }
            Some(_) => {
                let mut item = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ',' || c == '#' {
                        break;
                    }
                    item.push(c);
                    chars.next();
                }
                let item = item.trim_end();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
            }
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        match chars.peek() {
            None | Some('#') => break,
            Some(',') => {
                chars.next();
                is_list = true;
            }
            Some(_) => return Err(parse_error(line_no, "unexpected text after quoted value")),
        }
    }

    if is_list {
        Ok(ConfValue::List(items))
    } else {
        Ok(ConfValue::Scalar(items.pop().unwrap_or_default()))
    }
}

fn render_value(value: &ConfValue) -> Result<String, CodecError> {
    match value {
        ConfValue::Scalar(s) => quote(s),
        ConfValue::List(items) => match items.as_slice() {
            [] => Ok(",".to_string()),
            [single] => Ok(format!("{},", quote(single)?)),
            many => Ok(many.iter().map(|s| quote(s)).collect::<Result<Vec<_>, _>>()?.join(", ")),
        },
    }
}

fn quote(value: &str) -> Result<String, CodecError> {
    if value.contains(['\n', '\r']) {
        return Err(CodecError::Unrepresentable(value.to_string()));
    }
    let needs_quotes = value.is_empty()
        || value.contains([',', '#', '"', '\''])
        || value.trim() != value;
    if !needs_quotes {
        return Ok(value.to_string());
    }
    if !value.contains('"') {
        Ok(format!("\"{value}\""))
    } else if !value.contains('\'') {
        Ok(format!("'{value}'"))
    } else {
        Err(CodecError::Unrepresentable(value.to_string()))
    }
}
