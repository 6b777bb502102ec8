//! Common types for cert-updater
//!
//! Shared by the configuration layer and the updater core:
//!
//! - [`CertIdentity`]: the certificate name and the normalized domain list
//! - [`build_key`]: construction of object storage keys from path segments

pub mod identity;
pub mod keys;

pub use identity::{normalize_domain, parse_domain_list, parse_domain_str, CertIdentity};
pub use keys::build_key;
