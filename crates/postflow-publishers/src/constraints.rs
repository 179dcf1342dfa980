use postflow_core::models::{MediaKind, Platform};
use postflow_core::PublishError;
use postflow_media::ResolvedMedia;

/// Media a platform accepts on one post.
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub min_items: usize,
    pub max_items: usize,
    pub kinds: &'static [MediaKind],
    /// The platform fetches media itself, so every item needs a public URL.
    pub requires_public_url: bool,
}

impl MediaConstraints {
    pub const fn new(max_items: usize, kinds: &'static [MediaKind]) -> Self {
        Self {
            min_items: 0,
            max_items,
            kinds,
            requires_public_url: false,
        }
    }

    pub const fn text_only() -> Self {
        Self::new(0, &[])
    }

    pub const fn with_min_items(mut self, min_items: usize) -> Self {
        self.min_items = min_items;
        self
    }

    pub const fn with_public_urls(mut self) -> Self {
        self.requires_public_url = true;
        self
    }

    pub fn allows(&self, kind: MediaKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Reject media the platform cannot take, before anything is sent.
    pub fn check(&self, platform: Platform, media: &[ResolvedMedia]) -> Result<(), PublishError> {
        if media.len() < self.min_items {
            return Err(PublishError::MediaUnsupported(format!(
                "{} needs at least {} media item(s), got {}",
                platform,
                self.min_items,
                media.len()
            )));
        }

        if media.len() > self.max_items {
            return Err(PublishError::MediaUnsupported(format!(
                "{} accepts at most {} media item(s), got {}",
                platform,
                self.max_items,
                media.len()
            )));
        }

        if let Some(item) = media.iter().find(|m| !self.allows(m.kind())) {
            return Err(PublishError::MediaUnsupported(format!(
                "{} does not accept {} media (asset {})",
                platform,
                item.kind(),
                item.id()
            )));
        }

        if self.requires_public_url {
            if let Some(item) = media.iter().find(|m| m.public_url.is_none()) {
                return Err(PublishError::MediaUnsupported(format!(
                    "{} fetches media by URL but asset {} has no public URL; \
                     serve the media directory publicly and set PUBLIC_MEDIA_BASE_URL",
                    platform,
                    item.id()
                )));
            }
        }

        Ok(())
    }
}
