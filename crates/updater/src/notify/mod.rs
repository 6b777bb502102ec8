//! Lifecycle notifications
//!
//! Every message is published as a dual-format envelope:
//!
//! ```json
//! {"default": "<JSON payload as a string>", "email": "<plain text>"}
//! ```
//!
//! Subscribers on machine protocols receive `default`, email subscribers the
//! text body.

#[cfg(feature = "aws")]
mod sns;

#[cfg(feature = "aws")]
pub use sns::SnsPublisher;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use cert_updater_common::CertIdentity;

use crate::archive::Manifest;
use crate::error::UpdaterError;

const SUBJECT_PREFIX: &str = "cert-updater";

/// Errors raised while publishing
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },
}

/// Dual-format message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// Machine-readable JSON payload, serialized to a string
    pub default: String,
    /// Human-readable text
    pub email: String,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String, NotifyError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A pub/sub transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, subject: &str, envelope: &Envelope)
        -> Result<(), NotifyError>;
}

/// A message captured by [`MemoryPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub subject: String,
    pub envelope: Envelope,
}

impl PublishedMessage {
    /// The decoded `default` payload
    pub fn payload(&self) -> serde_json::Value {
        serde_json::from_str(&self.envelope.default).unwrap_or(serde_json::Value::Null)
    }
}

/// Publisher that records messages in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(
        &self,
        topic: &str,
        subject: &str,
        envelope: &Envelope,
    ) -> Result<(), NotifyError> {
        self.messages.lock().push(PublishedMessage {
            topic: topic.to_string(),
            subject: subject.to_string(),
            envelope: envelope.clone(),
        });
        Ok(())
    }
}

/// Renders and publishes `renewed` and `failed` messages
#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn Publisher>,
    topic: Option<String>,
    bucket: String,
}

impl Notifier {
    /// `topic = None` disables publishing
    pub fn new(publisher: Arc<dyn Publisher>, topic: Option<String>, bucket: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.filter(|t| !t.is_empty()),
            bucket: bucket.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.topic.is_some()
    }

    /// Announce a new manifest stored at `key`
    pub async fn renewed(&self, manifest: &Manifest, key: &str) -> Result<(), NotifyError> {
        let payload = json!({
            "type": "renewed",
            "cert_name": manifest.cert_name,
            "domains": manifest.domains,
            "timestamp": manifest.timestamp,
            "bucket": self.bucket,
            "key": key,
            "cert": manifest.cert,
        });
        let text = format!(
            "{SUBJECT_PREFIX}\n\
             the certificate is updated.\n\
             \n\
             - cert name: {}\n\
             - domains: {}\n\
             - bucket: {}\n\
             - object key: {}\n",
            manifest.cert_name,
            manifest.domains.join(", "),
            self.bucket,
            key,
        );
        let subject = format!("{SUBJECT_PREFIX}: renewed {}", manifest.cert_name);

        self.send(&subject, payload, text).await
    }

    /// Announce that the invocation for `identity` failed
    pub async fn failed(&self, identity: &CertIdentity, error: &UpdaterError) -> Result<(), NotifyError> {
        let payload = json!({
            "type": "failed",
            "cert_name": identity.cert_name(),
            "domains": identity.domains(),
            "kind": error.kind(),
            "error": error.to_string(),
        });
        let text = format!(
            "{SUBJECT_PREFIX}\n\
             the certificate update failed.\n\
             \n\
             - cert name: {}\n\
             - domains: {}\n\
             - error: {}\n",
            identity.cert_name(),
            identity.domains().join(", "),
            error,
        );
        let subject = format!("{SUBJECT_PREFIX}: failed {}", identity.cert_name());

        self.send(&subject, payload, text).await
    }

    async fn send(
        &self,
        subject: &str,
        payload: serde_json::Value,
        text: String,
    ) -> Result<(), NotifyError> {
        let Some(topic) = &self.topic else {
            debug!(subject = %subject, "No notification topic configured, skipping");
            return Ok(());
        };

        let envelope = Envelope {
            default: serde_json::to_string(&payload)?,
            email: text,
        };
        self.publisher.publish(topic, subject, &envelope).await?;
        info!(topic = %topic, subject = %subject, "Published notification");
        Ok(())
    }
}
