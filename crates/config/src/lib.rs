//! Configuration for cert-updater
//!
//! The configuration is an explicit value object built once at the process
//! boundary and passed into the updater core. It is loaded from `UPDATER_*`
//! environment variables and may be layered with an invocation event
//! document (a JSON object using the same field names, without the prefix).
//!
//! ```text
//! UPDATER_DOMAINS=example.com,*.example.com
//! UPDATER_EMAIL=admin@example.com
//! UPDATER_BUCKET_NAME=my-cert-bucket
//! UPDATER_PREFIX=certs
//! UPDATER_ENVIRONMENT=production
//! UPDATER_NOTIFICATION=arn:aws:sns:us-east-1:123456789012:cert-updates
//! ```

mod error;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use cert_updater_common::{parse_domain_list, CertIdentity};

pub use error::ConfigError;

/// Prefix of every recognized environment variable
pub const ENV_PREFIX: &str = "UPDATER_";

/// Default ACME directory used in production
pub const DEFAULT_ACME_SERVER: &str = "https://acme-v02.api.letsencrypt.org/directory";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CERTBOT: &str = "certbot";
const DEFAULT_DNS_PLUGIN: &str = "dns-route53";

// ============================================================================
// Raw configuration
// ============================================================================

/// Unresolved configuration fields as they appear in a source.
///
/// Field names match the lower-cased environment variables without the
/// `UPDATER_` prefix, and the keys of an event document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    /// Comma-separated string or array of domains
    #[serde(default)]
    pub domains: Option<Value>,
    pub cert_name: Option<String>,
    pub email: Option<String>,
    pub bucket_name: Option<String>,
    pub prefix: Option<String>,
    pub environment: Option<String>,
    pub acme_server: Option<String>,
    pub notification: Option<String>,
    pub log_level: Option<String>,
    pub certbot: Option<String>,
    pub dns_plugin: Option<String>,
    pub store: Option<String>,
    pub issuance_fallback: Option<String>,
}

impl RawConfig {
    /// Read `UPDATER_*` variables from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_env()?)
    }

    /// Read `UPDATER_*` variables from an explicit set of pairs
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(vars)?)
    }

    /// Parse an invocation event document
    pub fn from_event(event: Value) -> Result<Self, ConfigError> {
        if event.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(event)?)
    }

    /// Overlay `other` on top of `self`: fields set in `other` win.
    pub fn merge(self, other: RawConfig) -> Self {
        Self {
            domains: other.domains.or(self.domains),
            cert_name: other.cert_name.or(self.cert_name),
            email: other.email.or(self.email),
            bucket_name: other.bucket_name.or(self.bucket_name),
            prefix: other.prefix.or(self.prefix),
            environment: other.environment.or(self.environment),
            acme_server: other.acme_server.or(self.acme_server),
            notification: other.notification.or(self.notification),
            log_level: other.log_level.or(self.log_level),
            certbot: other.certbot.or(self.certbot),
            dns_plugin: other.dns_plugin.or(self.dns_plugin),
            store: other.store.or(self.store),
            issuance_fallback: other.issuance_fallback.or(self.issuance_fallback),
        }
    }

    /// Resolve defaults and parse typed fields
    pub fn resolve(self) -> Result<UpdaterConfig, ConfigError> {
        let domains = self
            .domains
            .as_ref()
            .map(parse_domain_list)
            .unwrap_or_default();
        let identity = CertIdentity::new(domains, self.cert_name.as_deref());

        let environment = self
            .environment
            .as_deref()
            .map(Environment::from_tag)
            .unwrap_or_default();

        let store = match non_empty(self.store) {
            Some(location) => location.parse()?,
            None => StoreLocation::S3,
        };

        let issuance_fallback = match non_empty(self.issuance_fallback) {
            Some(policy) => policy.parse()?,
            None => IssuanceFallback::default(),
        };

        let config = UpdaterConfig {
            identity,
            email: self.email.unwrap_or_default().trim().to_string(),
            bucket: self.bucket_name.unwrap_or_default().trim().to_string(),
            prefix: self.prefix.unwrap_or_default(),
            environment,
            acme_server: non_empty(self.acme_server)
                .unwrap_or_else(|| DEFAULT_ACME_SERVER.to_string()),
            notification: non_empty(self.notification),
            log_level: non_empty(self.log_level).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            certbot: PathBuf::from(
                non_empty(self.certbot).unwrap_or_else(|| DEFAULT_CERTBOT.to_string()),
            ),
            dns_plugin: non_empty(self.dns_plugin)
                .unwrap_or_else(|| DEFAULT_DNS_PLUGIN.to_string()),
            store,
            issuance_fallback,
        };

        debug!(
            cert_name = %config.identity.cert_name(),
            domains = config.identity.domains().len(),
            environment = %config.environment,
            "Resolved updater configuration"
        );

        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Typed fields
// ============================================================================

/// ACME deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// The configured ACME server, normal renewal schedule
    Production,
    /// Staging endpoint with forced renewal
    #[default]
    Staging,
}

impl Environment {
    /// `production` selects [`Environment::Production`]; any other tag is staging.
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim() == "production" {
            Self::Production
        } else {
            Self::Staging
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Staging => write!(f, "staging"),
        }
    }
}

/// Where certificate state is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Amazon S3, bucket taken from `bucket_name`
    S3,
    /// A local directory standing in for a bucket
    File(PathBuf),
}

impl FromStr for StoreLocation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "s3" {
            return Ok(Self::S3);
        }
        match s.strip_prefix("file:") {
            Some(path) if !path.is_empty() => Ok(Self::File(PathBuf::from(path))),
            _ => Err(ConfigError::InvalidValue {
                field: "store",
                value: s.to_string(),
                message: "expected `s3` or `file:<directory>`".to_string(),
            }),
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 => write!(f, "s3"),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// What to do when first issuance fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IssuanceFallback {
    /// Always retry the invocation as a renewal
    Always,
    /// Retry as a renewal only if the manifest appeared in the meantime
    #[default]
    IfInitialized,
    /// Surface the issuance error
    Never,
}

impl FromStr for IssuanceFallback {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(Self::Always),
            "if-initialized" => Ok(Self::IfInitialized),
            "never" => Ok(Self::Never),
            other => Err(ConfigError::InvalidValue {
                field: "issuance_fallback",
                value: other.to_string(),
                message: "expected `always`, `if-initialized` or `never`".to_string(),
            }),
        }
    }
}

impl fmt::Display for IssuanceFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::IfInitialized => write!(f, "if-initialized"),
            Self::Never => write!(f, "never"),
        }
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Resolved configuration for one updater invocation.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Certificate name and subject domains
    pub identity: CertIdentity,
    /// ACME account contact email
    pub email: String,
    /// Bucket holding manifests and PEM objects
    pub bucket: String,
    /// Key prefix for every stored object
    pub prefix: String,
    pub environment: Environment,
    /// ACME directory URL used in production
    pub acme_server: String,
    /// Notification topic; `None` disables notifications
    pub notification: Option<String>,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Path or name of the certbot executable
    pub certbot: PathBuf,
    /// Certbot DNS plugin, passed as `--<plugin>`
    pub dns_plugin: String,
    pub store: StoreLocation,
    pub issuance_fallback: IssuanceFallback,
}

impl UpdaterConfig {
    /// Load from the process environment, optionally overlaid with an event
    pub fn load(event: Option<Value>) -> Result<Self, ConfigError> {
        let mut raw = RawConfig::from_env()?;
        if let Some(event) = event {
            raw = raw.merge(RawConfig::from_event(event)?);
        }
        raw.resolve()
    }

    /// Check the fields a real invocation needs.
    ///
    /// A configuration without domains is valid: the invocation is a no-op.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.is_empty() {
            return Ok(());
        }
        if self.email.is_empty() {
            return Err(ConfigError::Missing("email"));
        }
        if self.store == StoreLocation::S3 && self.bucket.is_empty() {
            return Err(ConfigError::Missing("bucket_name"));
        }
        if self.identity.domains().iter().any(|d| d.contains(char::is_whitespace)) {
            return Err(ConfigError::InvalidValue {
                field: "domains",
                value: self.identity.domains().join(","),
                message: "domains must not contain whitespace".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars() {
        let config = RawConfig::from_vars(vars(&[
            ("UPDATER_DOMAINS", "example.com, *.EXAMPLE.com ,"),
            ("UPDATER_EMAIL", "admin@example.com"),
            ("UPDATER_BUCKET_NAME", "bucket"),
            ("UPDATER_PREFIX", "certs"),
            ("UPDATER_ENVIRONMENT", "production"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap()
        .resolve()
        .unwrap();

        assert_eq!(config.identity.domains(), ["example.com", "*.example.com"]);
        assert_eq!(config.identity.cert_name(), "example.com");
        assert_eq!(config.email, "admin@example.com");
        assert_eq!(config.bucket, "bucket");
        assert_eq!(config.prefix, "certs");
        assert!(config.environment.is_production());
        assert_eq!(config.acme_server, DEFAULT_ACME_SERVER);
        assert_eq!(config.notification, None);
        assert_eq!(config.store, StoreLocation::S3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = RawConfig::default().resolve().unwrap();
        assert!(config.identity.is_empty());
        assert_eq!(config.identity.cert_name(), "");
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.certbot, PathBuf::from("certbot"));
        assert_eq!(config.dns_plugin, "dns-route53");
        assert_eq!(config.issuance_fallback, IssuanceFallback::IfInitialized);
        // Nothing to do, nothing to validate
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_event_domains_array() {
        let raw = RawConfig::from_event(json!({
            "domains": ["example.com", " *.EXAMPLE.com ", " ", 123],
        }))
        .unwrap();
        let config = raw.resolve().unwrap();
        assert_eq!(config.identity.domains(), ["example.com", "*.example.com"]);
    }

    #[test]
    fn test_event_overrides_env() {
        let env = RawConfig::from_vars(vars(&[
            ("UPDATER_DOMAINS", "env.example.com"),
            ("UPDATER_EMAIL", "env@example.com"),
        ]))
        .unwrap();
        let event = RawConfig::from_event(json!({
            "domains": "event.example.com",
            "cert_name": "EXAMPLE.com",
        }))
        .unwrap();

        let config = env.merge(event).resolve().unwrap();
        assert_eq!(config.identity.domains(), ["event.example.com"]);
        assert_eq!(config.identity.cert_name(), "example.com");
        assert_eq!(config.email, "env@example.com");
    }

    #[test]
    fn test_null_event() {
        let raw = RawConfig::from_event(Value::Null).unwrap();
        assert!(raw.domains.is_none());
    }

    #[test]
    fn test_environment_tag() {
        assert_eq!(Environment::from_tag("production"), Environment::Production);
        assert_eq!(Environment::from_tag("staging"), Environment::Staging);
        assert_eq!(Environment::from_tag("Production"), Environment::Staging);
        assert_eq!(Environment::from_tag(""), Environment::Staging);
    }

    #[test]
    fn test_store_location() {
        assert_eq!("s3".parse::<StoreLocation>().unwrap(), StoreLocation::S3);
        assert_eq!(
            "file:/var/lib/certs".parse::<StoreLocation>().unwrap(),
            StoreLocation::File(PathBuf::from("/var/lib/certs"))
        );
        assert!("file:".parse::<StoreLocation>().is_err());
        assert!("gcs".parse::<StoreLocation>().is_err());
    }

    #[test]
    fn test_issuance_fallback() {
        assert_eq!("always".parse::<IssuanceFallback>().unwrap(), IssuanceFallback::Always);
        assert_eq!("never".parse::<IssuanceFallback>().unwrap(), IssuanceFallback::Never);
        assert!("sometimes".parse::<IssuanceFallback>().is_err());
    }

    #[test]
    fn test_validate_requires_email_and_bucket() {
        let raw = RawConfig::from_event(json!({ "domains": "example.com" })).unwrap();
        let config = raw.clone().resolve().unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("email"))));

        let config = raw
            .clone()
            .merge(RawConfig::from_event(json!({ "email": "a@example.com" })).unwrap())
            .resolve()
            .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("bucket_name"))));

        let config = raw
            .merge(
                RawConfig::from_event(json!({
                    "email": "a@example.com",
                    "store": "file:/tmp/certs",
                }))
                .unwrap(),
            )
            .resolve()
            .unwrap();
        assert!(config.validate().is_ok());
    }
}
