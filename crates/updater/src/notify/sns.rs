//! Amazon SNS publisher

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use tracing::{debug, info};

use super::{Envelope, NotifyError, Publisher};

/// SNS limits subjects to 100 characters
const MAX_SUBJECT_LEN: usize = 100;

/// Publisher sending envelopes with the `json` message structure
#[derive(Debug, Clone)]
pub struct SnsPublisher {
    client: SnsClient,
}

impl SnsPublisher {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }

    /// Create a publisher using credentials and region from the environment
    pub async fn from_env() -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        info!("Initialized SNS publisher");
        Self::new(SnsClient::new(&aws_config))
    }
}

#[async_trait]
impl Publisher for SnsPublisher {
    async fn publish(
        &self,
        topic: &str,
        subject: &str,
        envelope: &Envelope,
    ) -> Result<(), NotifyError> {
        let subject: String = subject.chars().take(MAX_SUBJECT_LEN).collect();
        let response = self
            .client
            .publish()
            .topic_arn(topic)
            .subject(subject)
            .message(envelope.to_json()?)
            .message_structure("json")
            .send()
            .await
            .map_err(|e| NotifyError::Publish {
                topic: topic.to_string(),
                message: e.into_service_error().to_string(),
            })?;

        debug!(topic = %topic, message_id = ?response.message_id(), "Published to SNS");
        Ok(())
    }
}
