use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use shared::{error::ErrorCode, protocol::AuthSession};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::{config::Settings, IdentityGateway};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECONDS: i64 = 30;

/// Keeps the signed-in session on disk between invocations.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(settings.session_file_path()?))
    }

    pub async fn load(&self) -> Result<Option<AuthSession>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read session file '{}'", self.path.display())
                })
            }
        };
        let session = serde_json::from_slice(&raw).with_context(|| {
            format!("session file '{}' is corrupt", self.path.display())
        })?;
        Ok(Some(session))
    }

    pub async fn save(&self, session: &AuthSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("failed to create session directory '{}'", parent.display())
            })?;
        }
        let raw = serde_json::to_vec_pretty(session)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open session file '{}'", self.path.display()))?;

        // `mode` only applies on creation; an older file may still be group/world readable.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| {
                    format!("failed to restrict session file '{}'", self.path.display())
                })?;
        }

        file.write_all(&raw)
            .await
            .with_context(|| format!("failed to write session file '{}'", self.path.display()))?;
        file.flush().await?;

        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Removes the stored session. Returns whether there was one.
    pub async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove session file '{}'", self.path.display())
            }),
        }
    }

    /// The stored session, refreshed if its access token has expired and confirmed with the
    /// backend. A session the backend no longer accepts is discarded and `None` returned.
    pub async fn current_session(
        &self,
        identity: &dyn IdentityGateway,
    ) -> Result<Option<AuthSession>> {
        let Some(mut session) = self.load().await? else {
            return Ok(None);
        };

        let mut refreshed = false;
        if needs_refresh(&session, Utc::now()) {
            match identity.refresh(&session).await {
                Ok(fresh) => {
                    session = fresh;
                    refreshed = true;
                }
                Err(err) if is_rejected_session(err.code()) => {
                    warn!(error = %err, "stored session could not be refreshed; discarding");
                    self.clear().await?;
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            }
        }

        match identity.current_user(&session).await {
            Ok(user) => {
                if user != session.user {
                    session.user = user;
                    refreshed = true;
                }
            }
            Err(err) if is_rejected_session(err.code()) => {
                warn!(error = %err, "stored session rejected by backend; discarding");
                self.clear().await?;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        }

        if refreshed {
            self.save(&session).await?;
            info!(user_id = %session.user.id, "stored session updated");
        }
        Ok(Some(session))
    }
}

fn is_rejected_session(code: ErrorCode) -> bool {
    matches!(code, ErrorCode::Unauthorized | ErrorCode::Forbidden | ErrorCode::Validation)
}

pub fn needs_refresh(session: &AuthSession, now: DateTime<Utc>) -> bool {
    effective_expiry(session)
        .is_some_and(|expires_at| expires_at <= now + Duration::seconds(EXPIRY_SKEW_SECONDS))
}

/// Stored expiry, or the `exp` claim of the access token when none was recorded.
pub fn effective_expiry(session: &AuthSession) -> Option<DateTime<Utc>> {
    session
        .expires_at
        .or_else(|| jwt_expiry(&session.access_token))
}

fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
