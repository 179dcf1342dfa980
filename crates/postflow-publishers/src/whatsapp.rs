//! WhatsApp adapter (Cloud API)
//!
//! The Cloud API downloads media from a link, so every attachment must have a
//! public URL. Each recipient gets its own sequence of messages.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use postflow_core::models::{MediaKind, Platform, Post};
use postflow_core::{PublishError, WhatsAppSettings};
use postflow_db::CredentialStore;
use postflow_media::ResolvedMedia;

use crate::constraints::MediaConstraints;
use crate::format::truncate_chars;
use crate::http::{build_client, check_response, network_error, read_json};
use crate::publisher::{store_error, DeliveryReport, PublishReceipt, Publisher};
use crate::recipients::{clean_phones, normalize_phone};

const TEXT_LIMIT: usize = 4096;
const CAPTION_LIMIT: usize = 1024;
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(120);

static CONSTRAINTS: MediaConstraints = MediaConstraints::new(
    10,
    &[MediaKind::Image, MediaKind::Video, MediaKind::Audio],
)
.with_public_urls();

#[derive(Debug, Clone)]
pub struct WhatsAppOptions {
    pub api_base_url: String,
    /// Prepended to national numbers written without a `+` prefix.
    pub default_country_code: String,
    pub send_delay: Duration,
    /// Bound on all messages to a single recipient.
    pub delivery_timeout: Duration,
}

impl Default for WhatsAppOptions {
    fn default() -> Self {
        Self {
            api_base_url: "https://graph.facebook.com/v21.0".to_string(),
            default_country_code: "34".to_string(),
            send_delay: Duration::ZERO,
            delivery_timeout: DELIVERY_TIMEOUT,
        }
    }
}

impl WhatsAppOptions {
    pub fn from_settings(settings: &WhatsAppSettings) -> Self {
        Self {
            default_country_code: settings.default_country_code.clone(),
            send_delay: Duration::from_millis(settings.send_delay_ms),
            ..Self::default()
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

struct Account {
    access_token: String,
    phone_number_id: String,
}

pub struct WhatsAppPublisher {
    http_client: Client,
    credentials: Arc<dyn CredentialStore>,
    options: WhatsAppOptions,
}

impl Debug for WhatsAppPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("WhatsAppPublisher")
            .field("api_base_url", &self.options.api_base_url)
            .finish()
    }
}

/// Message payloads for one recipient, without the `to` field.
fn build_messages(body: &str, media: &[ResolvedMedia]) -> Vec<Value> {
    let body = body.trim();
    let caption_slot = if body.is_empty() {
        None
    } else {
        media
            .iter()
            .position(|m| matches!(m.kind(), MediaKind::Image | MediaKind::Video))
    };

    let mut messages = Vec::with_capacity(media.len() + 1);
    if !body.is_empty() && caption_slot.is_none() {
        messages.push(json!({
            "type": "text",
            "text": { "body": truncate_chars(body, TEXT_LIMIT), "preview_url": true },
        }));
    }

    for (i, item) in media.iter().enumerate() {
        let kind = item.kind().to_string();
        let mut object = json!({ "link": item.public_url });
        if caption_slot == Some(i) {
            object["caption"] = json!(truncate_chars(body, CAPTION_LIMIT));
        }
        let mut message = json!({ "type": kind });
        message[kind.as_str()] = object;
        messages.push(message);
    }
    messages
}

impl WhatsAppPublisher {
    pub fn new(credentials: Arc<dyn CredentialStore>, options: WhatsAppOptions) -> Result<Self> {
        Ok(Self {
            http_client: build_client()?,
            credentials,
            options,
        })
    }

    async fn account(&self) -> Result<Account, PublishError> {
        let credential = self
            .credentials
            .get_credential(Platform::WhatsApp)
            .await
            .map_err(store_error)?
            .ok_or_else(|| PublishError::Misconfigured("No WhatsApp credential stored".into()))?;
        match (
            credential.auth_str("access_token"),
            credential.auth_str("phone_number_id"),
        ) {
            (Some(token), Some(phone_number_id)) => Ok(Account {
                access_token: token.to_string(),
                phone_number_id: phone_number_id.to_string(),
            }),
            _ => Err(PublishError::Misconfigured(
                "WhatsApp access token or phone number id missing".into(),
            )),
        }
    }

    async fn send(
        &self,
        account: &Account,
        to: &str,
        message: &Value,
    ) -> Result<Option<String>, PublishError> {
        let url = format!(
            "{}/{}/messages",
            self.options.api_base_url.trim_end_matches('/'),
            account.phone_number_id
        );
        let mut payload = message.clone();
        payload["messaging_product"] = json!("whatsapp");
        payload["recipient_type"] = json!("individual");
        payload["to"] = json!(to);

        let response = self
            .http_client
            .post(url)
            .bearer_auth(&account.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| network_error("WhatsApp send", e))?;
        let response = check_response("WhatsApp send", response).await?;
        let sent: SendResponse = read_json("WhatsApp send", response).await?;
        Ok(sent.messages.into_iter().next().map(|m| m.id))
    }

    /// Every message for one recipient; stops at the first failure.
    async fn deliver(
        &self,
        account: &Account,
        to: &str,
        messages: &[Value],
    ) -> Result<Vec<String>, PublishError> {
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            if let Some(id) = self.send(account, to, message).await? {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl Publisher for WhatsAppPublisher {
    fn platform(&self) -> Platform {
        Platform::WhatsApp
    }

    fn constraints(&self) -> &MediaConstraints {
        &CONSTRAINTS
    }

    fn delivers_per_recipient(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self, post, media), fields(post_id = %post.id))]
    async fn publish(
        &self,
        post: &Post,
        media: &[ResolvedMedia],
    ) -> Result<PublishReceipt, PublishError> {
        CONSTRAINTS.check(Platform::WhatsApp, media)?;

        let messages = build_messages(&post.body, media);
        if messages.is_empty() {
            return Err(PublishError::Misconfigured(
                "WhatsApp post has neither text nor media".into(),
            ));
        }

        let mut report = DeliveryReport::default();
        let mut numbers = Vec::new();
        for raw in clean_phones(&post.recipients) {
            match normalize_phone(&raw, &self.options.default_country_code) {
                Some(number) => {
                    if !numbers.contains(&number) {
                        numbers.push(number);
                    }
                }
                None => report.record_failure(
                    raw.clone(),
                    &PublishError::Misconfigured(format!("Invalid phone number: {}", raw)),
                ),
            }
        }
        if numbers.is_empty() {
            return Err(PublishError::Misconfigured(
                "WhatsApp post has no valid phone numbers".into(),
            ));
        }

        let account = self.account().await?;

        let mut message_ids = Vec::new();
        let mut first_error = None;
        for (i, number) in numbers.iter().enumerate() {
            if i > 0 && !self.options.send_delay.is_zero() {
                tokio::time::sleep(self.options.send_delay).await;
            }
            let timeout = self.options.delivery_timeout;
            let delivered = tokio::time::timeout(timeout, self.deliver(&account, number, &messages))
                .await
                .unwrap_or(Err(PublishError::Timeout(timeout)));
            match delivered {
                Ok(ids) => {
                    message_ids.extend(ids);
                    report.delivered.push(number.clone());
                }
                Err(e) => {
                    tracing::warn!(recipient = %number, error = %e, "WhatsApp delivery failed");
                    report.record_failure(number.clone(), &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "WhatsApp batch sent"
        );

        if report.delivered.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                PublishError::Misconfigured("No recipient could be reached".into())
            }));
        }

        let remote_id = message_ids
            .first()
            .cloned()
            .unwrap_or_else(|| post.id.to_string());
        let mut details = report.to_json();
        details["message_ids"] = json!(message_ids);
        Ok(PublishReceipt::new(remote_id).with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{credentials, post_to, resolved, StallingServer};
    use mockito::Matcher;

    async fn publisher(server: &mockito::Server) -> WhatsAppPublisher {
        WhatsAppPublisher::new(
            credentials(
                Platform::WhatsApp,
                json!({"access_token": "wa-token", "phone_number_id": "1055"}),
            )
            .await,
            WhatsAppOptions {
                api_base_url: server.url(),
                ..WhatsAppOptions::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn text_to_each_normalized_number() {
        let mut server = mockito::Server::new_async().await;
        let spain = server
            .mock("POST", "/1055/messages")
            .match_header("authorization", "Bearer wa-token")
            .match_body(Matcher::PartialJson(json!({
                "messaging_product": "whatsapp",
                "to": "34612345678",
                "type": "text",
                "text": {"body": "Doors open at 9"}
            })))
            .with_body(r#"{"messages":[{"id":"wamid.A"}]}"#)
            .create_async()
            .await;
        let uk = server
            .mock("POST", "/1055/messages")
            .match_body(Matcher::PartialJson(json!({"to": "447700900123"})))
            .with_body(r#"{"messages":[{"id":"wamid.B"}]}"#)
            .create_async()
            .await;

        let publisher = publisher(&server).await;
        let post = post_to(
            Platform::WhatsApp,
            "Doors open at 9",
            &["612 345 678, +44 7700 900123"],
        );

        let receipt = publisher.publish(&post, &[]).await.unwrap();
        assert_eq!(receipt.remote_id, "wamid.A");
        assert_eq!(receipt.details["message_ids"], json!(["wamid.A", "wamid.B"]));
        spain.assert_async().await;
        uk.assert_async().await;
    }

    #[tokio::test]
    async fn media_without_public_url_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let any = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let publisher = publisher(&server).await;
        let post = post_to(Platform::WhatsApp, "Look", &["+34612345678"]);
        let err = publisher
            .publish(&post, &[resolved(MediaKind::Image, None)])
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::MediaUnsupported(_)));
        any.assert_async().await;
    }

    #[tokio::test]
    async fn invalid_numbers_are_reported_not_sent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/1055/messages")
            .with_body(r#"{"messages":[{"id":"wamid.C"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let publisher = publisher(&server).await;
        let post = post_to(Platform::WhatsApp, "Hi", &["+34612345678", "12"]);
        let receipt = publisher.publish(&post, &[]).await.unwrap();

        assert_eq!(receipt.details["delivered"], json!(["34612345678"]));
        assert_eq!(receipt.details["failed"][0]["recipient"], "12");
    }

    #[tokio::test]
    async fn no_valid_numbers_is_misconfigured() {
        let server = mockito::Server::new_async().await;
        let publisher = publisher(&server).await;
        let post = post_to(Platform::WhatsApp, "Hi", &["call me"]);

        let err = publisher.publish(&post, &[]).await.unwrap_err();
        assert!(matches!(err, PublishError::Misconfigured(_)));
    }

    async fn stalling_publisher(api: &StallingServer) -> WhatsAppPublisher {
        WhatsAppPublisher::new(
            credentials(
                Platform::WhatsApp,
                json!({"access_token": "wa-token", "phone_number_id": "1055"}),
            )
            .await,
            WhatsAppOptions {
                api_base_url: api.url(),
                ..WhatsAppOptions::default()
            }
            .with_delivery_timeout(Duration::from_millis(300)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stalled_recipient_is_reported_and_earlier_ones_kept() {
        let api = StallingServer::start(1, r#"{"messages":[{"id":"wamid.A"}]}"#).await;
        let publisher = stalling_publisher(&api).await;
        let post = post_to(Platform::WhatsApp, "Hi", &["+34612345678", "+447700900123"]);

        let receipt = publisher.publish(&post, &[]).await.unwrap();

        assert_eq!(receipt.remote_id, "wamid.A");
        assert_eq!(receipt.details["delivered"], json!(["34612345678"]));
        assert_eq!(receipt.details["failed"][0]["recipient"], "447700900123");
        assert_eq!(api.requests(), 2);
    }

    #[tokio::test]
    async fn nobody_reached_before_timeout_is_retryable() {
        let api = StallingServer::start(0, "").await;
        let publisher = stalling_publisher(&api).await;
        let post = post_to(Platform::WhatsApp, "Hi", &["+34612345678"]);

        let err = publisher.publish(&post, &[]).await.unwrap_err();

        assert!(matches!(err, PublishError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn options_follow_settings() {
        let options = WhatsAppOptions::from_settings(&WhatsAppSettings {
            access_token: "wa-token".to_string(),
            phone_number_id: "1055".to_string(),
            default_country_code: "49".to_string(),
            send_delay_ms: 250,
        });
        assert_eq!(options.default_country_code, "49");
        assert_eq!(options.send_delay, Duration::from_millis(250));
        assert_eq!(options.delivery_timeout, DELIVERY_TIMEOUT);
    }

    #[tokio::test]
    async fn every_recipient_failing_returns_first_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/1055/messages")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Recipient not on WhatsApp"}}"#)
            .create_async()
            .await;

        let publisher = publisher(&server).await;
        let post = post_to(Platform::WhatsApp, "Hi", &["+34612345678"]);
        let err = publisher.publish(&post, &[]).await.unwrap_err();
        assert!(matches!(err, PublishError::PlatformRejected { status: Some(400), .. }));
    }

    #[test]
    fn caption_goes_on_first_visual_item() {
        let audio = resolved(MediaKind::Audio, Some("https://cdn.example.com/a.mp3"));
        let image = resolved(MediaKind::Image, Some("https://cdn.example.com/b.jpg"));
        let messages = build_messages("Listen and look", &[audio, image]);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "audio");
        assert!(messages[0]["audio"].get("caption").is_none());
        assert_eq!(messages[1]["image"]["caption"], "Listen and look");
    }

    #[test]
    fn audio_only_sends_text_first() {
        let audio = resolved(MediaKind::Audio, Some("https://cdn.example.com/a.mp3"));
        let messages = build_messages("Episode 4", &[audio]);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["text"]["body"], "Episode 4");
        assert_eq!(messages[1]["audio"]["link"], "https://cdn.example.com/a.mp3");
    }
}
