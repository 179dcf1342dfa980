//! LinkedIn adapter
//!
//! Posts through the UGC API as the configured organization, or as the member
//! owning the token. Images and videos are uploaded directly (register upload,
//! then PUT the bytes) before the post referencing them is created.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use postflow_core::models::{MediaKind, Platform, Post};
use postflow_core::{LinkedInSettings, PublishError};
use postflow_db::CredentialStore;
use postflow_media::{MediaLibrary, ResolvedMedia};

use crate::constraints::MediaConstraints;
use crate::format::truncate_chars;
use crate::http::{build_client, check_response, network_error, read_json};
use crate::publisher::{store_error, PublishReceipt, Publisher};

const TEXT_LIMIT: usize = 3000;
const RESTLI_PROTOCOL_VERSION: &str = "2.0.0";
const LINKEDIN_VERSION: &str = "202601";
const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";

static CONSTRAINTS: MediaConstraints =
    MediaConstraints::new(9, &[MediaKind::Image, MediaKind::Video]);

#[derive(Debug, Clone)]
pub struct LinkedInOptions {
    pub api_base_url: String,
    pub oauth_base_url: String,
    /// Publish as `urn:li:organization:{id}` instead of the token's member.
    pub organization_id: Option<String>,
    pub visibility: String,
}

impl Default for LinkedInOptions {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.linkedin.com".to_string(),
            oauth_base_url: "https://www.linkedin.com".to_string(),
            organization_id: None,
            visibility: "PUBLIC".to_string(),
        }
    }
}

impl LinkedInOptions {
    pub fn from_settings(settings: &LinkedInSettings) -> Self {
        Self {
            organization_id: settings.organization_id.clone(),
            visibility: settings.visibility.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterUploadResponse {
    value: RegisterUploadValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUploadValue {
    asset: String,
    upload_mechanism: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UgcPostResponse {
    #[serde(default)]
    id: Option<String>,
}

struct Token {
    access_token: String,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

pub struct LinkedInPublisher {
    http_client: Client,
    credentials: Arc<dyn CredentialStore>,
    library: MediaLibrary,
    options: LinkedInOptions,
}

impl Debug for LinkedInPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LinkedInPublisher")
            .field("organization_id", &self.options.organization_id)
            .field("visibility", &self.options.visibility)
            .finish()
    }
}

impl LinkedInPublisher {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        library: MediaLibrary,
        options: LinkedInOptions,
    ) -> Result<Self> {
        Ok(Self {
            http_client: build_client()?,
            credentials,
            library,
            options,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.options.api_base_url.trim_end_matches('/'), path)
    }

    /// Current token: a refreshed one from the session wins over the configured one.
    async fn load_token(&self) -> Result<Token, PublishError> {
        let credential = self
            .credentials
            .get_credential(Platform::LinkedIn)
            .await
            .map_err(store_error)?
            .ok_or_else(|| PublishError::Misconfigured("No LinkedIn credential stored".into()))?;

        let session_token = credential
            .session
            .as_ref()
            .and_then(|s| s.get("access_token"))
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let session_refresh = credential
            .session
            .as_ref()
            .and_then(|s| s.get("refresh_token"))
            .and_then(|t| t.as_str())
            .map(str::to_string);

        let access_token = session_token
            .or_else(|| credential.auth_str("access_token").map(str::to_string))
            .ok_or_else(|| PublishError::Misconfigured("LinkedIn access token missing".into()))?;

        Ok(Token {
            access_token,
            refresh_token: session_refresh
                .or_else(|| credential.auth_str("refresh_token").map(str::to_string)),
            client_id: credential.auth_str("client_id").map(str::to_string),
            client_secret: credential.auth_str("client_secret").map(str::to_string),
        })
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, PublishError> {
        let response = self
            .http_client
            .get(self.api_url("/v2/userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| network_error("LinkedIn userinfo", e))?;
        let response = check_response("LinkedIn userinfo", response).await?;
        read_json("LinkedIn userinfo", response).await
    }

    /// Exchange the refresh token for a new access token and persist it.
    async fn refresh(&self, token: &Token) -> Result<String, PublishError> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) =
            (&token.refresh_token, &token.client_id, &token.client_secret)
        else {
            return Err(PublishError::AuthExpired(
                "LinkedIn token expired and no refresh material is configured".into(),
            ));
        };

        let url = format!(
            "{}/oauth/v2/accessToken",
            self.options.oauth_base_url.trim_end_matches('/')
        );
        let response = self
            .http_client
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| network_error("LinkedIn token refresh", e))?;
        let response = check_response("LinkedIn token refresh", response)
            .await
            .map_err(|e| match e {
                // a rejected refresh grant will not heal by retrying
                PublishError::PlatformRejected { diagnostic, .. } => PublishError::AuthExpired(
                    format!("LinkedIn refresh grant rejected: {}", diagnostic),
                ),
                other => other,
            })?;
        let refreshed: RefreshResponse = read_json("LinkedIn token refresh", response).await?;

        let session = json!({
            "access_token": refreshed.access_token,
            "refresh_token": refreshed.refresh_token.as_ref().unwrap_or(refresh_token),
            "expires_in": refreshed.expires_in,
            "refreshed_at": chrono::Utc::now(),
        });
        self.credentials
            .put_session(Platform::LinkedIn, session)
            .await
            .map_err(store_error)?;

        tracing::info!("LinkedIn access token refreshed");
        Ok(refreshed.access_token)
    }

    /// Validate the token (refreshing it once if expired) and resolve the author URN.
    async fn authenticate(&self) -> Result<(String, String), PublishError> {
        let token = self.load_token().await?;

        let (access_token, user) = match self.user_info(&token.access_token).await {
            Ok(user) => (token.access_token.clone(), user),
            Err(PublishError::AuthExpired(_)) => {
                let access_token = self.refresh(&token).await?;
                let user = self.user_info(&access_token).await?;
                (access_token, user)
            }
            Err(e) => return Err(e),
        };

        let author = match &self.options.organization_id {
            Some(org) => format!("urn:li:organization:{}", org),
            None => format!("urn:li:person:{}", user.sub),
        };
        Ok((access_token, author))
    }

    async fn upload(
        &self,
        access_token: &str,
        author: &str,
        media: &ResolvedMedia,
    ) -> Result<String, PublishError> {
        let recipe = match media.kind() {
            MediaKind::Video => "urn:li:digitalmediaRecipe:feedshare-video",
            _ => "urn:li:digitalmediaRecipe:feedshare-image",
        };
        let payload = json!({
            "registerUploadRequest": {
                "recipes": [recipe],
                "owner": author,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });

        let response = self
            .http_client
            .post(self.api_url("/v2/assets?action=registerUpload"))
            .bearer_auth(access_token)
            .header("X-Restli-Protocol-Version", RESTLI_PROTOCOL_VERSION)
            .header("LinkedIn-Version", LINKEDIN_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| network_error("LinkedIn register upload", e))?;
        let response = check_response("LinkedIn register upload", response).await?;
        let registered: RegisterUploadResponse =
            read_json("LinkedIn register upload", response).await?;

        let upload_url = registered
            .value
            .upload_mechanism
            .get(UPLOAD_MECHANISM)
            .and_then(|m| m.get("uploadUrl"))
            .and_then(|u| u.as_str())
            .ok_or_else(|| {
                PublishError::rejected(None, "LinkedIn register upload returned no upload URL")
            })?
            .to_string();

        let data = self.library.fetch(media).await.map_err(|e| {
            PublishError::MediaUnavailable(format!("Asset {}: {}", media.id(), e))
        })?;

        let response = self
            .http_client
            .put(upload_url)
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| network_error("LinkedIn media upload", e))?;
        check_response("LinkedIn media upload", response).await?;

        tracing::debug!(asset = %registered.value.asset, "LinkedIn media uploaded");
        Ok(registered.value.asset)
    }
}

/// A video wins over images; everything else goes through as given.
fn select_media(media: &[ResolvedMedia]) -> Vec<ResolvedMedia> {
    match media.iter().find(|m| m.kind() == MediaKind::Video) {
        Some(video) => vec![video.clone()],
        None => media.to_vec(),
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    fn constraints(&self) -> &MediaConstraints {
        &CONSTRAINTS
    }

    #[tracing::instrument(skip(self, post, media), fields(post_id = %post.id))]
    async fn publish(
        &self,
        post: &Post,
        media: &[ResolvedMedia],
    ) -> Result<PublishReceipt, PublishError> {
        let media = select_media(media);
        CONSTRAINTS.check(Platform::LinkedIn, &media)?;

        let (access_token, author) = self.authenticate().await?;

        let mut assets = Vec::with_capacity(media.len());
        for item in &media {
            assets.push(self.upload(&access_token, &author, item).await?);
        }

        let category = match media.first().map(|m| m.kind()) {
            Some(MediaKind::Video) => "VIDEO",
            Some(_) => "IMAGE",
            None => "NONE",
        };

        let mut share_content = json!({
            "shareCommentary": { "text": truncate_chars(&post.body, TEXT_LIMIT) },
            "shareMediaCategory": category,
        });
        if !assets.is_empty() {
            share_content["media"] = assets
                .iter()
                .map(|urn| json!({ "status": "READY", "media": urn }))
                .collect();
        }

        let payload = json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share_content },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": self.options.visibility },
        });

        let response = self
            .http_client
            .post(self.api_url("/v2/ugcPosts"))
            .bearer_auth(&access_token)
            .header("X-Restli-Protocol-Version", RESTLI_PROTOCOL_VERSION)
            .header("LinkedIn-Version", LINKEDIN_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| network_error("LinkedIn create post", e))?;
        let response = check_response("LinkedIn create post", response).await?;

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let created: UgcPostResponse = read_json("LinkedIn create post", response).await?;
        let remote_id = created
            .id
            .or(header_id)
            .ok_or_else(|| PublishError::rejected(None, "LinkedIn returned no post id"))?;

        tracing::info!(remote_id = %remote_id, media_count = assets.len(), "Published to LinkedIn");

        Ok(PublishReceipt::new(remote_id.clone()).with_details(json!({
            "permalink": format!("https://www.linkedin.com/feed/update/{}", remote_id),
            "author": author,
            "media": assets,
        })))
    }
}
