//! WordPress adapter (REST API with application passwords)

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use postflow_core::models::{MediaKind, Platform, Post};
use postflow_core::{PublishError, WordPressSettings};
use postflow_db::CredentialStore;
use postflow_media::{MediaLibrary, ResolvedMedia};

use crate::constraints::MediaConstraints;
use crate::format::{escape_html, first_line, looks_like_html, text_to_paragraphs};
use crate::http::{build_client, check_response, network_error, read_json};
use crate::publisher::{store_error, PublishReceipt, Publisher};

const TITLE_LIMIT: usize = 200;

static CONSTRAINTS: MediaConstraints =
    MediaConstraints::new(20, &[MediaKind::Image, MediaKind::Video]);

#[derive(Debug, Clone)]
pub struct WordPressOptions {
    pub site_url: String,
    /// `publish` or `draft`.
    pub status: String,
}

impl WordPressOptions {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            status: "publish".to_string(),
        }
    }

    pub fn from_settings(settings: &WordPressSettings) -> Self {
        Self::new(settings.site_url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct UploadedMedia {
    id: u64,
    source_url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: u64,
    #[serde(default)]
    link: Option<String>,
}

pub struct WordPressPublisher {
    http_client: Client,
    credentials: Arc<dyn CredentialStore>,
    library: MediaLibrary,
    options: WordPressOptions,
}

impl Debug for WordPressPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("WordPressPublisher")
            .field("site_url", &self.options.site_url)
            .finish()
    }
}

impl WordPressPublisher {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        library: MediaLibrary,
        options: WordPressOptions,
    ) -> Result<Self> {
        Ok(Self {
            http_client: build_client()?,
            credentials,
            library,
            options,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.site_url.trim_end_matches('/'), path)
    }

    async fn authorization(&self) -> Result<String, PublishError> {
        let credential = self
            .credentials
            .get_credential(Platform::WordPress)
            .await
            .map_err(store_error)?
            .ok_or_else(|| PublishError::Misconfigured("No WordPress credential stored".into()))?;

        match (
            credential.auth_str("username"),
            credential.auth_str("app_password"),
        ) {
            (Some(user), Some(password)) => Ok(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", user, password))
            )),
            _ => Err(PublishError::Misconfigured(
                "WordPress username or application password missing".into(),
            )),
        }
    }

    async fn verify(&self, authorization: &str) -> Result<(), PublishError> {
        let response = self
            .http_client
            .get(self.url("/wp-json/wp/v2/users/me"))
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| network_error("WordPress credential check", e))?;
        check_response("WordPress credential check", response).await?;
        Ok(())
    }

    async fn upload(
        &self,
        authorization: &str,
        item: &ResolvedMedia,
    ) -> Result<UploadedMedia, PublishError> {
        let data = self.library.fetch(item).await.map_err(|e| {
            PublishError::MediaUnavailable(format!("Asset {}: {}", item.id(), e))
        })?;

        let response = self
            .http_client
            .post(self.url("/wp-json/wp/v2/media"))
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(reqwest::header::CONTENT_TYPE, &item.asset.content_type)
            .header(
                reqwest::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", item.asset.file_name()),
            )
            .body(data)
            .send()
            .await
            .map_err(|e| network_error("WordPress media upload", e))?;
        let response = check_response("WordPress media upload", response).await?;
        read_json("WordPress media upload", response).await
    }
}

fn render_content(body: &str, uploaded: &[(MediaKind, UploadedMedia)]) -> String {
    let mut content = if looks_like_html(body) {
        body.to_string()
    } else {
        text_to_paragraphs(body)
    };

    for (kind, media) in uploaded {
        let url = escape_html(&media.source_url);
        let block = match kind {
            MediaKind::Video => format!(
                "\n<figure class=\"wp-block-video\"><video controls src=\"{}\"></video></figure>",
                url
            ),
            _ => format!(
                "\n<figure class=\"wp-block-image\"><img src=\"{}\" alt=\"\" class=\"wp-image-{}\"/></figure>",
                url, media.id
            ),
        };
        content.push_str(&block);
    }
    content
}

#[async_trait]
impl Publisher for WordPressPublisher {
    fn platform(&self) -> Platform {
        Platform::WordPress
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
        CONSTRAINTS.check(Platform::WordPress, media)?;

        let authorization = self.authorization().await?;
        self.verify(&authorization).await?;

        let mut uploaded = Vec::with_capacity(media.len());
        for item in media {
            let result = self.upload(&authorization, item).await?;
            uploaded.push((item.kind(), result));
        }

        let title = post
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| first_line(t, TITLE_LIMIT))
            .unwrap_or_else(|| first_line(&post.body, TITLE_LIMIT));

        let mut payload = json!({
            "title": title,
            "content": render_content(&post.body, &uploaded),
            "status": self.options.status,
        });
        if let Some((_, featured)) = uploaded.iter().find(|(kind, _)| *kind == MediaKind::Image) {
            payload["featured_media"] = json!(featured.id);
        }

        let response = self
            .http_client
            .post(self.url("/wp-json/wp/v2/posts"))
            .header(reqwest::header::AUTHORIZATION, &authorization)
            .json(&payload)
            .send()
            .await
            .map_err(|e| network_error("WordPress create post", e))?;
        let response = check_response("WordPress create post", response).await?;
        let created: CreatedPost = read_json("WordPress create post", response).await?;

        tracing::info!(remote_id = created.id, media_count = uploaded.len(), "Published to WordPress");

        Ok(PublishReceipt::new(created.id.to_string()).with_details(json!({
            "link": created.link,
            "media_ids": uploaded.iter().map(|(_, m)| m.id).collect::<Vec<_>>(),
        })))
    }
}
