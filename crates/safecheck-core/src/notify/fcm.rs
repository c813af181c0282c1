//! Firebase Cloud Messaging (HTTP v1) channel.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;

use super::{PushChannel, PushMessage, PushTarget};
use crate::error::DeliveryError;

pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/";

pub struct FcmChannel {
    client: Client,
    send_url: Url,
    access_token: String,
}

impl FcmChannel {
    /// `endpoint` is the API base; tests point it at a local server.
    pub fn new(endpoint: &str, project_id: &str, access_token: &str) -> Result<Self, DeliveryError> {
        if project_id.is_empty() {
            return Err(DeliveryError::NotConfigured("fcm.project_id is empty".into()));
        }
        if access_token.is_empty() {
            return Err(DeliveryError::NotConfigured("FCM access token is empty".into()));
        }
        let base = Url::parse(endpoint)
            .map_err(|e| DeliveryError::NotConfigured(format!("bad FCM endpoint: {e}")))?;
        let send_url = base
            .join(&format!("v1/projects/{project_id}/messages:send"))
            .map_err(|e| DeliveryError::NotConfigured(format!("bad FCM endpoint: {e}")))?;
        Ok(Self {
            client: Client::new(),
            send_url,
            access_token: access_token.to_string(),
        })
    }

    pub fn send_url(&self) -> &Url {
        &self.send_url
    }

    /// Request body for one send.
    pub fn payload(target: &PushTarget, message: &PushMessage) -> Value {
        let mut body = json!({
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
            "android": {
                "priority": "high",
                "notification": {
                    "channel_id": message.android_channel,
                    "sound": "default",
                },
            },
            "apns": {
                "payload": {
                    "aps": {
                        "sound": "default",
                        "content-available": 1,
                    },
                },
            },
        });
        match target {
            PushTarget::Device(token) => body["token"] = json!(token),
            PushTarget::Topic(topic) => body["topic"] = json!(topic),
        }
        json!({ "message": body })
    }
}

fn is_unregistered(status: StatusCode, body: &Value) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    let details = body["error"]["details"].as_array();
    details.is_some_and(|items| {
        items
            .iter()
            .any(|d| d["errorCode"].as_str() == Some("UNREGISTERED"))
    })
}

#[async_trait]
impl PushChannel for FcmChannel {
    fn name(&self) -> &str {
        "fcm"
    }

    async fn send(
        &self,
        target: &PushTarget,
        message: &PushMessage,
    ) -> Result<String, DeliveryError> {
        let resp = self
            .client
            .post(self.send_url.clone())
            .bearer_auth(&self.access_token)
            .json(&Self::payload(target, message))
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(body["name"].as_str().unwrap_or_default().to_string());
        }
        if is_unregistered(status, &body) {
            return Err(DeliveryError::Unregistered);
        }
        Err(DeliveryError::Provider {
            status: status.as_u16(),
            message: body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_url_includes_project() {
        let ch = FcmChannel::new(DEFAULT_FCM_ENDPOINT, "safe-app", "tok").unwrap();
        assert_eq!(
            ch.send_url().as_str(),
            "https://fcm.googleapis.com/v1/projects/safe-app/messages:send"
        );
    }

    #[test]
    fn missing_credentials_are_not_configured() {
        assert!(matches!(
            FcmChannel::new(DEFAULT_FCM_ENDPOINT, "", "tok"),
            Err(DeliveryError::NotConfigured(_))
        ));
        assert!(matches!(
            FcmChannel::new(DEFAULT_FCM_ENDPOINT, "p", ""),
            Err(DeliveryError::NotConfigured(_))
        ));
    }

    #[test]
    fn payload_addresses_token_or_topic() {
        let msg = PushMessage::checkin_due(4, "morning", "08:00");
        let device = FcmChannel::payload(&PushTarget::Device("abc".into()), &msg);
        assert_eq!(device["message"]["token"], "abc");
        assert!(device["message"].get("topic").is_none());
        assert_eq!(device["message"]["data"]["checkin_id"], "4");
        assert_eq!(device["message"]["android"]["priority"], "high");

        let topic = FcmChannel::payload(&PushTarget::Topic("org_1_alerts".into()), &msg);
        assert_eq!(topic["message"]["topic"], "org_1_alerts");
    }

    #[test]
    fn unregistered_detection() {
        assert!(is_unregistered(StatusCode::NOT_FOUND, &Value::Null));
        let body = json!({"error": {"details": [{"errorCode": "UNREGISTERED"}]}});
        assert!(is_unregistered(StatusCode::BAD_REQUEST, &body));
        assert!(!is_unregistered(StatusCode::INTERNAL_SERVER_ERROR, &Value::Null));
    }

    #[tokio::test]
    async fn send_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("POST", "/v1/projects/safe-app/messages:send")
            .match_header("authorization", "Bearer tok")
            .match_body(mockito::Matcher::PartialJson(json!({
                "message": {"token": "good"}
            })))
            .with_status(200)
            .with_body(r#"{"name":"projects/safe-app/messages/1"}"#)
            .create_async()
            .await;
        let gone = server
            .mock("POST", "/v1/projects/safe-app/messages:send")
            .match_body(mockito::Matcher::PartialJson(json!({
                "message": {"token": "stale"}
            })))
            .with_status(404)
            .with_body(r#"{"error":{"message":"Requested entity was not found."}}"#)
            .create_async()
            .await;

        let ch = FcmChannel::new(&server.url(), "safe-app", "tok").unwrap();
        let msg = PushMessage::snooze_reminder(1, 1, 2);

        let id = ch.send(&PushTarget::Device("good".into()), &msg).await.unwrap();
        assert_eq!(id, "projects/safe-app/messages/1");
        assert_eq!(
            ch.send(&PushTarget::Device("stale".into()), &msg).await,
            Err(DeliveryError::Unregistered)
        );
        ok.assert_async().await;
        gone.assert_async().await;
    }

    #[tokio::test]
    async fn provider_error_keeps_status_and_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/projects/p/messages:send")
            .with_status(503)
            .with_body(r#"{"error":{"message":"backend unavailable"}}"#)
            .create_async()
            .await;
        let ch = FcmChannel::new(&server.url(), "p", "tok").unwrap();
        let err = ch
            .send(&PushTarget::Topic("org_1_alerts".into()), &PushMessage::snooze_reminder(1, 1, 2))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Provider {
                status: 503,
                message: "backend unavailable".into()
            }
        );
    }
}
