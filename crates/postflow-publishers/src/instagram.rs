//! Instagram adapter
//!
//! Session-based: a login yields an authorization header value that is
//! persisted with the credential and rehydrated at startup, so restarts do not
//! trigger fresh logins. A rejected session gets exactly one re-login; a second
//! rejection, or a login that demands a challenge, needs a human.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use tokio::sync::RwLock;

use postflow_core::models::{MediaKind, Platform, Post};
use postflow_core::{InstagramSettings, PublishError};
use postflow_db::CredentialStore;
use postflow_media::{MediaLibrary, ResolvedMedia};

use crate::constraints::MediaConstraints;
use crate::format::{limit_hashtags, truncate_chars};
use crate::http::{build_client, classify_status, diagnostic, network_error};
use crate::publisher::{store_error, PublishReceipt, Publisher};

const CAPTION_LIMIT: usize = 2200;
const HASHTAG_LIMIT: usize = 30;
const AUTHORIZATION_HEADER: &str = "ig-set-authorization";

static CONSTRAINTS: MediaConstraints =
    MediaConstraints::new(10, &[MediaKind::Image, MediaKind::Video]).with_min_items(1);

#[derive(Debug, Clone)]
pub struct InstagramOptions {
    pub api_base_url: String,
}

impl Default for InstagramOptions {
    fn default() -> Self {
        Self {
            api_base_url: "https://i.instagram.com/api/v1".to_string(),
        }
    }
}

impl InstagramOptions {
    pub fn from_settings(settings: &InstagramSettings) -> Self {
        Self {
            api_base_url: settings
                .api_base_url
                .clone()
                .unwrap_or_else(|| Self::default().api_base_url),
        }
    }
}

/// What a login leaves behind; persisted as the credential's session blob.
#[derive(Clone, Serialize, Deserialize)]
struct Session {
    authorization: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    logged_in_user: Option<LoggedInUser>,
    #[serde(default)]
    authorization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoggedInUser {
    pk: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct ConfigureResponse {
    media: ConfiguredMedia,
}

#[derive(Debug, Deserialize)]
struct ConfiguredMedia {
    pk: serde_json::Value,
    #[serde(default)]
    code: Option<String>,
}

/// One publish attempt either succeeds, hits an invalid session, or fails otherwise.
enum AttemptError {
    SessionInvalid(String),
    Failed(PublishError),
}

impl From<PublishError> for AttemptError {
    fn from(e: PublishError) -> Self {
        AttemptError::Failed(e)
    }
}

fn is_session_invalid(status: StatusCode, body: &str) -> bool {
    status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || body.contains("login_required")
}

fn requires_challenge(body: &str) -> bool {
    ["challenge_required", "checkpoint_required", "two_factor_required"]
        .iter()
        .any(|marker| body.contains(marker))
}

fn json_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct InstagramPublisher {
    http_client: Client,
    credentials: Arc<dyn CredentialStore>,
    library: MediaLibrary,
    options: InstagramOptions,
    session: RwLock<Option<Session>>,
}

impl Debug for InstagramPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("InstagramPublisher")
            .field("api_base_url", &self.options.api_base_url)
            .finish()
    }
}

impl InstagramPublisher {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        library: MediaLibrary,
        options: InstagramOptions,
    ) -> Result<Self> {
        Ok(Self {
            http_client: build_client()?,
            credentials,
            library,
            options,
            session: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.api_base_url.trim_end_matches('/'), path)
    }

    async fn persisted_session(&self) -> Result<Option<Session>, PublishError> {
        let credential = self
            .credentials
            .get_credential(Platform::Instagram)
            .await
            .map_err(store_error)?;
        Ok(credential
            .and_then(|c| c.session)
            .and_then(|s| serde_json::from_value(s).ok()))
    }

    /// Session in memory, else the persisted one, else a fresh login.
    async fn current_session(&self) -> Result<Session, PublishError> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        if let Some(session) = self.persisted_session().await? {
            *self.session.write().await = Some(session.clone());
            return Ok(session);
        }
        self.login().await
    }

    #[tracing::instrument(skip(self))]
    async fn login(&self) -> Result<Session, PublishError> {
        let credential = self
            .credentials
            .get_credential(Platform::Instagram)
            .await
            .map_err(store_error)?
            .ok_or_else(|| PublishError::Misconfigured("No Instagram credential stored".into()))?;
        let (Some(username), Some(password)) = (
            credential.auth_str("username"),
            credential.auth_str("password"),
        ) else {
            return Err(PublishError::Misconfigured(
                "Instagram username or password missing".into(),
            ));
        };

        let response = self
            .http_client
            .post(self.url("/accounts/login/"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| network_error("Instagram login", e))?;

        let status = response.status();
        let header_auth = response
            .headers()
            .get(AUTHORIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        if requires_challenge(&body) {
            tracing::warn!("Instagram login requires a challenge");
            return Err(PublishError::ManualInterventionRequired(
                "Instagram login requires a challenge or two-factor confirmation".into(),
            ));
        }
        if !status.is_success() {
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    PublishError::ManualInterventionRequired(format!(
                        "Instagram rejected the login: {}",
                        diagnostic(&body)
                    ))
                }
                _ => classify_status("Instagram login", status, &headers, &body),
            });
        }

        let login: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| PublishError::rejected(Some(status.as_u16()), e.to_string()))?;
        let authorization = header_auth.or(login.authorization).ok_or_else(|| {
            PublishError::rejected(Some(status.as_u16()), "Instagram login returned no session")
        })?;

        let session = Session {
            authorization,
            user_id: login.logged_in_user.map(|u| json_id(&u.pk)),
        };
        let blob = serde_json::to_value(&session)
            .map_err(|e| PublishError::Misconfigured(e.to_string()))?;
        self.credentials
            .put_session(Platform::Instagram, blob)
            .await
            .map_err(store_error)?;
        *self.session.write().await = Some(session.clone());

        tracing::info!("Instagram session established");
        Ok(session)
    }

    async fn forget_session(&self) -> Result<(), PublishError> {
        *self.session.write().await = None;
        self.credentials
            .clear_session(Platform::Instagram)
            .await
            .map_err(store_error)
    }

    async fn checked(&self, context: &str, response: Response) -> Result<String, AttemptError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        if is_session_invalid(status, &body) {
            return Err(AttemptError::SessionInvalid(format!(
                "{}: {} {}",
                context,
                status,
                body.trim()
            )));
        }
        if requires_challenge(&body) {
            return Err(AttemptError::Failed(
                PublishError::ManualInterventionRequired(format!(
                    "{}: Instagram requires a challenge",
                    context
                )),
            ));
        }
        if !status.is_success() {
            return Err(classify_status(context, status, &headers, &body).into());
        }
        Ok(body)
    }

    async fn upload(
        &self,
        session: &Session,
        item: &ResolvedMedia,
    ) -> Result<String, AttemptError> {
        let data = self.library.fetch(item).await.map_err(|e| {
            PublishError::MediaUnavailable(format!("Asset {}: {}", item.id(), e))
        })?;

        let upload_id = chrono::Utc::now().timestamp_millis().to_string();
        let (path, params) = match item.kind() {
            MediaKind::Video => (
                format!("/rupload_igvideo/{}_{}", upload_id, item.id().simple()),
                json!({
                    "upload_id": upload_id,
                    "media_type": 2,
                    "upload_media_duration_ms": item.asset.duration_ms.unwrap_or(0),
                }),
            ),
            _ => (
                format!("/rupload_igphoto/{}_{}", upload_id, item.id().simple()),
                json!({ "upload_id": upload_id, "media_type": 1 }),
            ),
        };

        let response = self
            .http_client
            .post(self.url(&path))
            .header(reqwest::header::AUTHORIZATION, &session.authorization)
            .header("X-Instagram-Rupload-Params", params.to_string())
            .header("X-Entity-Length", data.len().to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| network_error("Instagram upload", e))?;
        let body = self.checked("Instagram upload", response).await?;

        let uploaded: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| PublishError::rejected(None, format!("Instagram upload: {}", e)))?;
        Ok(uploaded.upload_id)
    }

    async fn attempt(
        &self,
        session: &Session,
        caption: &str,
        media: &[ResolvedMedia],
    ) -> Result<PublishReceipt, AttemptError> {
        let mut upload_ids = Vec::with_capacity(media.len());
        for item in media {
            upload_ids.push(self.upload(session, item).await?);
        }

        let request = match (media, upload_ids.as_slice()) {
            ([single], [upload_id]) => {
                let path = if single.kind() == MediaKind::Video {
                    "/media/configure/?video=1"
                } else {
                    "/media/configure/"
                };
                self.http_client
                    .post(self.url(path))
                    .json(&json!({ "upload_id": upload_id, "caption": caption }))
            }
            _ => {
                let children: Vec<_> = upload_ids
                    .iter()
                    .map(|id| json!({ "upload_id": id }))
                    .collect();
                self.http_client
                    .post(self.url("/media/configure_sidecar/"))
                    .json(&json!({ "caption": caption, "children_metadata": children }))
            }
        };

        let response = request
            .header(reqwest::header::AUTHORIZATION, &session.authorization)
            .send()
            .await
            .map_err(|e| network_error("Instagram configure", e))?;
        let body = self.checked("Instagram configure", response).await?;

        let configured: ConfigureResponse = serde_json::from_str(&body)
            .map_err(|e| PublishError::rejected(None, format!("Instagram configure: {}", e)))?;

        let remote_id = json_id(&configured.media.pk);
        Ok(PublishReceipt::new(remote_id).with_details(json!({
            "code": configured.media.code,
            "permalink": configured
                .media
                .code
                .as_ref()
                .map(|c| format!("https://www.instagram.com/p/{}/", c)),
            "items": upload_ids.len(),
        })))
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn constraints(&self) -> &MediaConstraints {
        &CONSTRAINTS
    }

    async fn rehydrate(&self) -> Result<(), PublishError> {
        let session = self.persisted_session().await?;
        let found = session.is_some();
        *self.session.write().await = session;
        tracing::info!(session_found = found, "Instagram session rehydrated");
        Ok(())
    }

    #[tracing::instrument(skip(self, post, media), fields(post_id = %post.id))]
    async fn publish(
        &self,
        post: &Post,
        media: &[ResolvedMedia],
    ) -> Result<PublishReceipt, PublishError> {
        CONSTRAINTS.check(Platform::Instagram, media)?;
        let caption = truncate_chars(&limit_hashtags(&post.body, HASHTAG_LIMIT), CAPTION_LIMIT);

        let session = self.current_session().await?;
        let reason = match self.attempt(&session, &caption, media).await {
            Ok(receipt) => return Ok(receipt),
            Err(AttemptError::Failed(e)) => return Err(e),
            Err(AttemptError::SessionInvalid(reason)) => reason,
        };

        tracing::warn!(reason = %reason, "Instagram session rejected, logging in again");
        self.forget_session().await?;
        let session = self.login().await?;

        match self.attempt(&session, &caption, media).await {
            Ok(receipt) => Ok(receipt),
            Err(AttemptError::Failed(e)) => Err(e),
            Err(AttemptError::SessionInvalid(reason)) => {
                Err(PublishError::ManualInterventionRequired(format!(
                    "Instagram rejected a fresh session: {}",
                    reason
                )))
            }
        }
    }
}
