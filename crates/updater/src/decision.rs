//! Issuance-vs-renewal decision

use tracing::debug;

use crate::archive::StateArchive;
use crate::error::Result;

/// Whether `cert_name` has never been snapshotted and needs first issuance.
///
/// Evaluated against the store on every call; nothing is cached.
pub async fn needs_init(archive: &StateArchive, cert_name: &str) -> Result<bool> {
    let initialized = archive.exists(cert_name).await?;
    debug!(cert_name = %cert_name, initialized, "Evaluated renewal decision");
    Ok(!initialized)
}
