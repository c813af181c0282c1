use async_trait::async_trait;

use super::{PushMessage, PushTarget};
use crate::error::DeliveryError;

/// A push transport. Implementations are stateless between calls.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Unique identifier (e.g. "fcm", "log").
    fn name(&self) -> &str;

    /// Send one message to one target. Returns the provider's message id.
    async fn send(&self, target: &PushTarget, message: &PushMessage)
        -> Result<String, DeliveryError>;
}

/// Writes every message to the log and reports success.
///
/// Used when no push credentials are configured.
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

#[async_trait]
impl PushChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        target: &PushTarget,
        message: &PushMessage,
    ) -> Result<String, DeliveryError> {
        tracing::info!(
            target_label = target.label(),
            title = %message.title,
            channel = %message.android_channel,
            "push (log channel)"
        );
        Ok(format!("log:{}", target.label()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_channel_always_succeeds() {
        let id = LogChannel
            .send(
                &PushTarget::Topic("org_1_alerts".into()),
                &PushMessage::snooze_reminder(1, 1, 2),
            )
            .await
            .unwrap();
        assert_eq!(id, "log:org_1_alerts");
    }
}
