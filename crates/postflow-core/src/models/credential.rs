use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Platform;

/// Authentication material for one platform.
///
/// `auth` holds whatever the platform's adapter needs (tokens, app passwords,
/// client secrets). `session` is state the adapter itself persisted, such as a
/// serialized login session or a refreshed access token.
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformCredential {
    pub platform: Platform,
    pub auth: serde_json::Value,
    pub session: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for PlatformCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCredential")
            .field("platform", &self.platform)
            .field("auth", &"<redacted>")
            .field("session", &self.session.as_ref().map(|_| "<redacted>"))
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for PlatformCredential {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(PlatformCredential {
            platform: row.get::<String, _>("platform").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse platform: {}", e).into())
            })?,
            auth: row.get("auth"),
            session: row.get("session"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl PlatformCredential {
    pub fn new(platform: Platform, auth: serde_json::Value) -> Self {
        Self {
            platform,
            auth,
            session: None,
            updated_at: Utc::now(),
        }
    }

    /// String field from the auth material, ignoring blanks.
    pub fn auth_str(&self, key: &str) -> Option<&str> {
        self.auth
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
