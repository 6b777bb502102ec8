//! Certificate identity.
//!
//! A certificate is identified by its `cert_name`, not by its domain set:
//! two configurations with the same name share one stored manifest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wildcard marker stripped from the first domain when deriving a name.
const WILDCARD_PREFIX: &str = "*.";

/// The canonical name and ordered subject domains of one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertIdentity {
    cert_name: String,
    domains: Vec<String>,
}

impl CertIdentity {
    /// Build an identity from normalized domains and an optional explicit name.
    ///
    /// An explicit name is trimmed and lower-cased and takes precedence.
    /// Without one, the name is the first domain with a leading `*.` removed.
    pub fn new(domains: Vec<String>, cert_name: Option<&str>) -> Self {
        let explicit = cert_name
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty());

        let cert_name = match explicit {
            Some(name) => name,
            None => domains
                .first()
                .map(|first| default_cert_name(first))
                .unwrap_or_default(),
        };

        Self { cert_name, domains }
    }

    /// Get the certificate name
    pub fn cert_name(&self) -> &str {
        &self.cert_name
    }

    /// Get the subject domains in configured order
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// An identity without domains has nothing to issue.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl fmt::Display for CertIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.cert_name, self.domains.join(", "))
    }
}

fn default_cert_name(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    match domain.strip_prefix(WILDCARD_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => domain,
    }
}

/// Trim and lower-case a single domain; `None` if nothing is left.
pub fn normalize_domain(domain: &str) -> Option<String> {
    let domain = domain.trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}

/// Parse a comma-separated domain list.
///
/// ```
/// use cert_updater_common::parse_domain_str;
///
/// assert_eq!(
///     parse_domain_str("example.com, *.EXAMPLE.com ,"),
///     vec!["example.com".to_string(), "*.example.com".to_string()],
/// );
/// ```
pub fn parse_domain_str(domains: &str) -> Vec<String> {
    dedup(domains.split(',').filter_map(normalize_domain))
}

/// Parse a domain list given as a JSON string or array.
///
/// Array entries that are not strings are discarded, as is anything that is
/// neither a string nor an array.
pub fn parse_domain_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => parse_domain_str(s),
        Value::Array(items) => dedup(
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(normalize_domain),
        ),
        _ => Vec::new(),
    }
}

fn dedup(domains: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for domain in domains {
        if !out.contains(&domain) {
            out.push(domain);
        }
    }
    out
}
