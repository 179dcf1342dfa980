//! Email adapter (Microsoft Graph)
//!
//! Sends with an app-only token from the client-credentials grant, one message
//! per recipient so recipients never see each other.

pub mod html;

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use postflow_core::models::{MediaKind, Platform, Post};
use postflow_core::{GraphMailSettings, PublishError};
use postflow_db::CredentialStore;
use postflow_media::{MediaLibrary, ResolvedMedia};

use crate::constraints::MediaConstraints;
use crate::format::first_line;
use crate::http::{build_client, check_response, network_error, read_json};
use crate::publisher::{store_error, DeliveryReport, PublishReceipt, Publisher};
use crate::recipients::clean_emails;

use self::html::{
    ensure_footer_once, ensure_html, extract_preferences, inline_image_tag, insert_before_footer,
};

const SUBJECT_LIMIT: usize = 200;
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(120);

static CONSTRAINTS: MediaConstraints = MediaConstraints::new(
    10,
    &[MediaKind::Image, MediaKind::Video, MediaKind::Audio],
);

#[derive(Debug, Clone)]
pub struct GraphMailOptions {
    pub graph_base_url: String,
    pub login_base_url: String,
    pub sender: String,
    pub footer_html: Option<String>,
    /// Pause between two recipients.
    pub send_delay: Duration,
    /// Bound on the send to a single recipient.
    pub delivery_timeout: Duration,
}

impl GraphMailOptions {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            graph_base_url: "https://graph.microsoft.com".to_string(),
            login_base_url: "https://login.microsoftonline.com".to_string(),
            sender: sender.into(),
            footer_html: None,
            send_delay: Duration::ZERO,
            delivery_timeout: DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn from_settings(settings: &GraphMailSettings) -> Self {
        Self {
            footer_html: settings.footer_html.clone(),
            send_delay: Duration::from_millis(settings.send_delay_ms),
            ..Self::new(settings.sender.clone())
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Everything about the message that is the same for every recipient.
struct PreparedMessage {
    subject: String,
    html: String,
    attachments: Vec<serde_json::Value>,
    batch_id: String,
}

pub struct GraphMailPublisher {
    http_client: Client,
    credentials: Arc<dyn CredentialStore>,
    library: MediaLibrary,
    options: GraphMailOptions,
    token: Mutex<Option<CachedToken>>,
}

impl Debug for GraphMailPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GraphMailPublisher")
            .field("sender", &self.options.sender)
            .finish()
    }
}

impl GraphMailPublisher {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        library: MediaLibrary,
        options: GraphMailOptions,
    ) -> Result<Self> {
        Ok(Self {
            http_client: build_client()?,
            credentials,
            library,
            options,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, PublishError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let credential = self
            .credentials
            .get_credential(Platform::Email)
            .await
            .map_err(store_error)?
            .ok_or_else(|| PublishError::Misconfigured("No Microsoft Graph credential stored".into()))?;
        let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
            credential.auth_str("tenant_id"),
            credential.auth_str("client_id"),
            credential.auth_str("client_secret"),
        ) else {
            return Err(PublishError::Misconfigured(
                "Microsoft Graph tenant, client id or client secret missing".into(),
            ));
        };

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.options.login_base_url.trim_end_matches('/'),
            tenant_id
        );
        let response = self
            .http_client
            .post(url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| network_error("Graph token", e))?;
        let response = check_response("Graph token", response)
            .await
            .map_err(|e| match e {
                PublishError::PlatformRejected { diagnostic, .. } => PublishError::Misconfigured(
                    format!("Microsoft Graph refused the client credentials: {}", diagnostic),
                ),
                other => other,
            })?;
        let token: TokenResponse = read_json("Graph token", response).await?;

        let expires_at = Instant::now() + Duration::from_secs(token.expires_in.unwrap_or(3600));
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        tracing::debug!("Microsoft Graph token acquired");
        Ok(token.access_token)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    async fn prepare(&self, post: &Post, media: &[ResolvedMedia]) -> Result<PreparedMessage, PublishError> {
        let (html, prefs) = extract_preferences(&ensure_html(&post.body));

        let mut attachments = Vec::with_capacity(media.len());
        let mut inline_tags = String::new();
        for item in media {
            let data = self.library.fetch(item).await.map_err(|e| {
                PublishError::MediaUnavailable(format!("Asset {}: {}", item.id(), e))
            })?;
            let name = item.asset.file_name();

            let mut attachment = json!({
                "@odata.type": "#microsoft.graph.fileAttachment",
                "name": name,
                "contentType": item.asset.content_type,
                "contentBytes": STANDARD.encode(&data),
                "isInline": false,
            });
            if prefs.inline_images && item.kind() == MediaKind::Image {
                let content_id = Uuid::new_v4().to_string();
                attachment["isInline"] = json!(true);
                attachment["contentId"] = json!(content_id);
                inline_tags.push_str(&inline_image_tag(&content_id, &name, &prefs.image_width));
            }
            attachments.push(attachment);
        }

        let html = match self.options.footer_html.as_deref() {
            Some(footer) => ensure_footer_once(&html, footer),
            None => html,
        };
        let html = insert_before_footer(&html, &inline_tags);

        let subject = post
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| first_line(t, SUBJECT_LIMIT))
            .unwrap_or_else(|| first_line(&post.body, SUBJECT_LIMIT));

        Ok(PreparedMessage {
            subject,
            html,
            attachments,
            batch_id: Uuid::new_v4().to_string(),
        })
    }

    async fn send_one(&self, message: &PreparedMessage, recipient: &str) -> Result<(), PublishError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v1.0/users/{}/sendMail",
            self.options.graph_base_url.trim_end_matches('/'),
            utf8_percent_encode(&self.options.sender, NON_ALPHANUMERIC)
        );
        let payload = json!({
            "message": {
                "subject": message.subject,
                "body": { "contentType": "HTML", "content": message.html },
                "toRecipients": [{ "emailAddress": { "address": recipient } }],
                "attachments": message.attachments,
                "internetMessageHeaders": [{ "name": "x-postflow-batch", "value": message.batch_id }],
            },
            "saveToSentItems": true,
        });

        let response = self
            .http_client
            .post(url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| network_error("Graph sendMail", e))?;

        match check_response("Graph sendMail", response).await {
            Ok(_) => Ok(()),
            Err(e @ PublishError::AuthExpired(_)) => {
                self.forget_token().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Publisher for GraphMailPublisher {
    fn platform(&self) -> Platform {
        Platform::Email
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
        CONSTRAINTS.check(Platform::Email, media)?;

        let recipients = clean_emails(&post.recipients);
        if recipients.is_empty() {
            return Err(PublishError::Misconfigured(
                "Email post has no valid recipients".into(),
            ));
        }

        let message = self.prepare(post, media).await?;

        let mut report = DeliveryReport::default();
        let mut first_error = None;
        for (i, recipient) in recipients.iter().enumerate() {
            if i > 0 && !self.options.send_delay.is_zero() {
                tokio::time::sleep(self.options.send_delay).await;
            }
            let timeout = self.options.delivery_timeout;
            let sent = tokio::time::timeout(timeout, self.send_one(&message, recipient))
                .await
                .unwrap_or(Err(PublishError::Timeout(timeout)));
            match sent {
                Ok(()) => report.delivered.push(recipient.clone()),
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Email delivery failed");
                    report.record_failure(recipient.clone(), &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Email batch sent"
        );

        if report.delivered.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                PublishError::Misconfigured("No recipient could be reached".into())
            }));
        }

        Ok(PublishReceipt::new(message.batch_id.clone()).with_details(report.to_json()))
    }
}
