//! Configuration module
//!
//! Environment-driven configuration for the scheduler, the video pipeline, media
//! storage and every platform adapter. A platform section is `None` unless all of
//! its required variables are set, and the adapter for it is then not registered.

use std::env;
use std::time::Duration;

use crate::backoff::{BackoffPolicy, DEFAULT_BACKOFF_BASE_SECS, DEFAULT_BACKOFF_CAP_SECS};

const POLL_INTERVAL_SECS: u64 = 60;
const MAX_RETRIES: i32 = 3;
const PUBLISH_TIMEOUT_SECS: u64 = 120;
const STUCK_PUBLISHING_SECS: u64 = 3600;
const DUE_BATCH_SIZE: i64 = 50;
const PIPELINE_POLL_INTERVAL_SECS: u64 = 15;
const PIPELINE_MAX_STAGE_ATTEMPTS: i32 = 3;
const SCRIPT_TIMEOUT_SECS: u64 = 120;
const SPEECH_TIMEOUT_SECS: u64 = 300;
const ASSEMBLY_TIMEOUT_SECS: u64 = 900;
const DB_MAX_CONNECTIONS: u32 = 10;
const EMAIL_SEND_DELAY_MS: u64 = 2000;
const WHATSAPP_DEFAULT_COUNTRY_CODE: &str = "34";
const WHATSAPP_SEND_DELAY_MS: u64 = 0;
const PLATFORM_RATE_LIMIT_PER_MINUTE: f64 = 30.0;

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn flag(name: &str, default: bool) -> bool {
    var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn list(name: &str, default: &str) -> Vec<String> {
    var(name)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub max_retries: i32,
    pub publish_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Delete posts once published instead of keeping them as `published`.
    pub delete_on_publish: bool,
    pub due_batch_size: i64,
    pub platform_rate_limit_per_minute: f64,
    /// A post still `publishing` this long after its claim is failed for manual review.
    pub stuck_publishing_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: POLL_INTERVAL_SECS,
            max_retries: MAX_RETRIES,
            publish_timeout_secs: PUBLISH_TIMEOUT_SECS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            backoff_cap_secs: DEFAULT_BACKOFF_CAP_SECS,
            delete_on_publish: false,
            due_batch_size: DUE_BATCH_SIZE,
            platform_rate_limit_per_minute: PLATFORM_RATE_LIMIT_PER_MINUTE,
            stuck_publishing_secs: STUCK_PUBLISHING_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval_secs: parse_or("SCHEDULER_POLL_INTERVAL_SECS", POLL_INTERVAL_SECS),
            max_retries: parse_or("SCHEDULER_MAX_RETRIES", MAX_RETRIES),
            publish_timeout_secs: parse_or("SCHEDULER_PUBLISH_TIMEOUT_SECS", PUBLISH_TIMEOUT_SECS),
            backoff_base_secs: parse_or("SCHEDULER_BACKOFF_BASE_SECS", DEFAULT_BACKOFF_BASE_SECS),
            backoff_cap_secs: parse_or("SCHEDULER_BACKOFF_CAP_SECS", DEFAULT_BACKOFF_CAP_SECS),
            delete_on_publish: flag("DELETE_ON_PUBLISH", false),
            due_batch_size: parse_or("SCHEDULER_DUE_BATCH_SIZE", DUE_BATCH_SIZE),
            platform_rate_limit_per_minute: parse_or(
                "PLATFORM_RATE_LIMIT_PER_MINUTE",
                PLATFORM_RATE_LIMIT_PER_MINUTE,
            ),
            stuck_publishing_secs: parse_or(
                "SCHEDULER_STUCK_PUBLISHING_SECS",
                STUCK_PUBLISHING_SECS,
            ),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn stuck_publishing_after(&self) -> Duration {
        Duration::from_secs(self.stuck_publishing_secs)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_cap_secs),
        )
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub poll_interval_secs: u64,
    pub max_stage_attempts: i32,
    pub script_timeout_secs: u64,
    pub speech_timeout_secs: u64,
    pub assembly_timeout_secs: u64,
    /// Voices the speech service accepts. Jobs asking for any other voice fail.
    pub voice_catalog: Vec<String>,
    /// Prompt template for script generation; `{topic}`, `{tone}` and `{lines}` are substituted.
    pub script_prompt_template: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub script_model: String,
    pub speech_model: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: PIPELINE_POLL_INTERVAL_SECS,
            max_stage_attempts: PIPELINE_MAX_STAGE_ATTEMPTS,
            script_timeout_secs: SCRIPT_TIMEOUT_SECS,
            speech_timeout_secs: SPEECH_TIMEOUT_SECS,
            assembly_timeout_secs: ASSEMBLY_TIMEOUT_SECS,
            voice_catalog: default_voices(),
            script_prompt_template: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            script_model: "gpt-4o-mini".to_string(),
            speech_model: "tts-1".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

fn default_voices() -> Vec<String> {
    ["alloy", "echo", "fable", "onyx", "nova", "shimmer"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_secs: parse_or("PIPELINE_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            max_stage_attempts: parse_or("PIPELINE_MAX_STAGE_ATTEMPTS", defaults.max_stage_attempts),
            script_timeout_secs: parse_or("PIPELINE_SCRIPT_TIMEOUT_SECS", defaults.script_timeout_secs),
            speech_timeout_secs: parse_or("PIPELINE_SPEECH_TIMEOUT_SECS", defaults.speech_timeout_secs),
            assembly_timeout_secs: parse_or(
                "PIPELINE_ASSEMBLY_TIMEOUT_SECS",
                defaults.assembly_timeout_secs,
            ),
            voice_catalog: list("VOICE_CATALOG", &defaults.voice_catalog.join(",")),
            script_prompt_template: var("SCRIPT_PROMPT_TEMPLATE"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            script_model: var("OPENAI_SCRIPT_MODEL").unwrap_or(defaults.script_model),
            speech_model: var("OPENAI_SPEECH_MODEL").unwrap_or(defaults.speech_model),
            ffmpeg_path: var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub local_storage_path: String,
    /// Base URL under which the storage directory is served publicly, if it is.
    pub public_base_url: Option<String>,
}

#[derive(Clone)]
pub struct LinkedInSettings {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub organization_id: Option<String>,
    pub visibility: String,
}

#[derive(Clone)]
pub struct InstagramSettings {
    pub username: String,
    pub password: String,
    pub api_base_url: Option<String>,
}

#[derive(Clone)]
pub struct WordPressSettings {
    pub site_url: String,
    pub username: String,
    pub app_password: String,
}

#[derive(Clone)]
pub struct GraphMailSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub sender: String,
    pub footer_html: Option<String>,
    pub send_delay_ms: u64,
}

#[derive(Clone)]
pub struct WhatsAppSettings {
    pub access_token: String,
    pub phone_number_id: String,
    /// Prepended to national numbers written without an international prefix.
    pub default_country_code: String,
    pub send_delay_ms: u64,
}

/// Per-platform settings. Secrets are never printed by `Debug`.
#[derive(Clone, Default)]
pub struct PlatformSettings {
    pub linkedin: Option<LinkedInSettings>,
    pub instagram: Option<InstagramSettings>,
    pub wordpress: Option<WordPressSettings>,
    pub email: Option<GraphMailSettings>,
    pub whatsapp: Option<WhatsAppSettings>,
}

impl std::fmt::Debug for PlatformSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSettings")
            .field("linkedin", &self.linkedin.is_some())
            .field("instagram", &self.instagram.is_some())
            .field("wordpress", &self.wordpress.is_some())
            .field("email", &self.email.is_some())
            .field("whatsapp", &self.whatsapp.is_some())
            .finish()
    }
}

impl PlatformSettings {
    pub fn from_env() -> Self {
        let linkedin = var("LINKEDIN_ACCESS_TOKEN").map(|access_token| LinkedInSettings {
            access_token,
            refresh_token: var("LINKEDIN_REFRESH_TOKEN"),
            client_id: var("LINKEDIN_CLIENT_ID"),
            client_secret: var("LINKEDIN_CLIENT_SECRET"),
            organization_id: var("LINKEDIN_ORGANIZATION_ID"),
            visibility: var("POST_VISIBILITY").unwrap_or_else(|| "PUBLIC".to_string()),
        });

        let instagram = match (var("INSTAGRAM_USERNAME"), var("INSTAGRAM_PASSWORD")) {
            (Some(username), Some(password)) => Some(InstagramSettings {
                username,
                password,
                api_base_url: var("INSTAGRAM_API_BASE_URL"),
            }),
            _ => None,
        };

        let wordpress = match (
            var("WORDPRESS_URL"),
            var("WORDPRESS_USERNAME"),
            var("WORDPRESS_APP_PASSWORD"),
        ) {
            (Some(site_url), Some(username), Some(app_password)) => Some(WordPressSettings {
                site_url,
                username,
                app_password,
            }),
            _ => None,
        };

        let email = match (
            var("MICROSOFT_TENANT_ID"),
            var("MICROSOFT_CLIENT_ID"),
            var("MICROSOFT_CLIENT_SECRET"),
            var("MICROSOFT_SENDER_EMAIL"),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret), Some(sender)) => {
                Some(GraphMailSettings {
                    tenant_id,
                    client_id,
                    client_secret,
                    sender,
                    footer_html: var("EMAIL_FOOTER_HTML"),
                    send_delay_ms: parse_or("EMAIL_SEND_DELAY_MS", EMAIL_SEND_DELAY_MS),
                })
            }
            _ => None,
        };

        let whatsapp = match (var("WHATSAPP_ACCESS_TOKEN"), var("WHATSAPP_PHONE_NUMBER_ID")) {
            (Some(access_token), Some(phone_number_id)) => Some(WhatsAppSettings {
                access_token,
                phone_number_id,
                default_country_code: var("WHATSAPP_DEFAULT_COUNTRY_CODE")
                    .unwrap_or_else(|| WHATSAPP_DEFAULT_COUNTRY_CODE.to_string()),
                send_delay_ms: parse_or("WHATSAPP_SEND_DELAY_MS", WHATSAPP_SEND_DELAY_MS),
            }),
            _ => None,
        };

        Self {
            linkedin,
            instagram,
            wordpress,
            email,
            whatsapp,
        }
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub platforms: PlatformSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let database_url = var("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let config = Self {
            environment,
            database_url,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            scheduler: SchedulerConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            storage: StorageConfig {
                local_storage_path: var("LOCAL_STORAGE_PATH")
                    .unwrap_or_else(|| "./data/media".to_string()),
                public_base_url: var("PUBLIC_MEDIA_BASE_URL"),
            },
            platforms: PlatformSettings::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.scheduler.poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("SCHEDULER_POLL_INTERVAL_SECS must be positive"));
        }

        if self.scheduler.max_retries < 1 {
            return Err(anyhow::anyhow!("SCHEDULER_MAX_RETRIES must be at least 1"));
        }

        if self.scheduler.publish_timeout_secs == 0 {
            return Err(anyhow::anyhow!("SCHEDULER_PUBLISH_TIMEOUT_SECS must be positive"));
        }

        if self.scheduler.stuck_publishing_secs <= self.scheduler.publish_timeout_secs {
            return Err(anyhow::anyhow!(
                "SCHEDULER_STUCK_PUBLISHING_SECS must be larger than SCHEDULER_PUBLISH_TIMEOUT_SECS"
            ));
        }

        if self.scheduler.backoff_cap_secs < self.scheduler.backoff_base_secs {
            return Err(anyhow::anyhow!(
                "SCHEDULER_BACKOFF_CAP_SECS must not be smaller than SCHEDULER_BACKOFF_BASE_SECS"
            ));
        }

        if self.pipeline.max_stage_attempts < 1 {
            return Err(anyhow::anyhow!("PIPELINE_MAX_STAGE_ATTEMPTS must be at least 1"));
        }

        if self.pipeline.voice_catalog.is_empty() {
            return Err(anyhow::anyhow!("VOICE_CATALOG must list at least one voice"));
        }

        if self.is_production()
            && self.platforms.whatsapp.is_some()
            && self.storage.public_base_url.is_none()
        {
            return Err(anyhow::anyhow!(
                "WhatsApp publishing requires PUBLIC_MEDIA_BASE_URL in production"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            environment: "development".to_string(),
            database_url: "postgres://localhost/postflow".to_string(),
            db_max_connections: 5,
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig {
                local_storage_path: "/tmp/postflow".to_string(),
                public_base_url: None,
            },
            platforms: PlatformSettings::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler.max_retries, 3);
    }

    #[test]
    fn rejects_inverted_backoff() {
        let mut config = config();
        config.scheduler.backoff_base_secs = 600;
        config.scheduler.backoff_cap_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn stuck_threshold_must_exceed_publish_timeout() {
        let mut config = config();
        config.scheduler.stuck_publishing_secs = config.scheduler.publish_timeout_secs;
        assert!(config.validate().is_err());

        config.scheduler.stuck_publishing_secs = config.scheduler.publish_timeout_secs + 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_whatsapp_needs_public_media() {
        let mut config = config();
        config.environment = "production".to_string();
        config.platforms.whatsapp = Some(WhatsAppSettings {
            access_token: "token".to_string(),
            phone_number_id: "123".to_string(),
            default_country_code: "34".to_string(),
            send_delay_ms: 0,
        });
        assert!(config.validate().is_err());

        config.storage.public_base_url = Some("https://cdn.example.com/media".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn platform_settings_debug_hides_secrets() {
        let settings = PlatformSettings {
            wordpress: Some(WordPressSettings {
                site_url: "https://blog.example.com".to_string(),
                username: "editor".to_string(),
                app_password: "abcd efgh".to_string(),
            }),
            ..Default::default()
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("abcd"));
        assert!(rendered.contains("wordpress: true"));
    }
}
