use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};

use postflow_core::models::{Platform, PlatformCredential};

use crate::traits::CredentialStore;

#[derive(Clone)]
pub struct CredentialRepository {
    pool: PgPool,
}

impl CredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    #[tracing::instrument(skip(self))]
    async fn get_credential(&self, platform: Platform) -> Result<Option<PlatformCredential>> {
        sqlx::query_as::<Postgres, PlatformCredential>(
            "SELECT platform, auth, session, updated_at FROM platform_credentials WHERE platform = $1",
        )
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load credentials for {}", platform))
    }

    #[tracing::instrument(skip(self, credential), fields(platform = %credential.platform))]
    async fn upsert_credential(&self, credential: PlatformCredential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_credentials (platform, auth, session, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (platform) DO UPDATE
            SET auth = EXCLUDED.auth,
                session = COALESCE(EXCLUDED.session, platform_credentials.session),
                updated_at = NOW()
            "#,
        )
        .bind(credential.platform.as_str())
        .bind(&credential.auth)
        .bind(&credential.session)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store credentials for {}", credential.platform))?;

        Ok(())
    }

    #[tracing::instrument(skip(self, session))]
    async fn put_session(&self, platform: Platform, session: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_credentials (platform, auth, session, updated_at)
            VALUES ($1, '{}'::jsonb, $2, NOW())
            ON CONFLICT (platform) DO UPDATE
            SET session = EXCLUDED.session,
                updated_at = NOW()
            "#,
        )
        .bind(platform.as_str())
        .bind(session)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to persist session for {}", platform))?;

        tracing::debug!(platform = %platform, "Session persisted");
        Ok(())
    }

    async fn clear_session(&self, platform: Platform) -> Result<()> {
        sqlx::query(
            "UPDATE platform_credentials SET session = NULL, updated_at = NOW() WHERE platform = $1",
        )
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to clear session for {}", platform))?;

        Ok(())
    }
}
