use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use url::Url;

pub const SETTINGS_FILE: &str = "petmatch.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub anon_key: String,
    pub page_size: u32,
    pub avatar_bucket: String,
    pub redirect_url: String,
    pub request_timeout_seconds: u64,
    pub session_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            anon_key: String::new(),
            page_size: 20,
            avatar_bucket: "avatars".into(),
            redirect_url: "http://localhost:3000/auth/callback".into(),
            request_timeout_seconds: 15,
            session_file: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend_url.trim().is_empty() {
            bail!("backend url is not configured (set SUPABASE_URL or backend_url in {SETTINGS_FILE})");
        }
        if self.anon_key.trim().is_empty() {
            bail!("anon key is not configured (set SUPABASE_ANON_KEY or anon_key in {SETTINGS_FILE})");
        }
        if self.page_size == 0 {
            bail!("page size must be at least 1");
        }
        if self.avatar_bucket.trim().is_empty() {
            bail!("avatar bucket must not be empty");
        }
        normalize_backend_url(&self.backend_url)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn session_file_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.session_file {
            return Ok(path.clone());
        }
        let base = dirs::config_dir().context("no per-user config directory on this platform")?;
        Ok(base.join("petmatch").join("session.json"))
    }
}

/// Defaults, then `petmatch.toml` in the working directory, then the environment.
pub fn load_settings() -> Settings {
    let raw = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_with(raw.as_deref(), |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file_contents {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) {
            let text = |key: &str| file_cfg.get(key).and_then(|v| v.as_str()).map(str::to_string);
            let number = |key: &str| file_cfg.get(key).and_then(|v| v.as_integer());

            if let Some(v) = text("backend_url") {
                settings.backend_url = v;
            }
            if let Some(v) = text("anon_key") {
                settings.anon_key = v;
            }
            if let Some(v) = number("page_size").and_then(|n| u32::try_from(n).ok()) {
                settings.page_size = v;
            }
            if let Some(v) = text("avatar_bucket") {
                settings.avatar_bucket = v;
            }
            if let Some(v) = text("redirect_url") {
                settings.redirect_url = v;
            }
            if let Some(v) = number("request_timeout_seconds").and_then(|n| u64::try_from(n).ok())
            {
                settings.request_timeout_seconds = v;
            }
            if let Some(v) = text("session_file") {
                settings.session_file = Some(PathBuf::from(v));
            }
        }
    }

    if let Some(v) = env("SUPABASE_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = env("APP__BACKEND_URL") {
        settings.backend_url = v;
    }

    if let Some(v) = env("SUPABASE_ANON_KEY") {
        settings.anon_key = v;
    }
    if let Some(v) = env("APP__ANON_KEY") {
        settings.anon_key = v;
    }

    if let Some(v) = env("APP__PAGE_SIZE") {
        if let Ok(parsed) = v.trim().parse::<u32>() {
            settings.page_size = parsed;
        }
    }

    if let Some(v) = env("APP__AVATAR_BUCKET") {
        settings.avatar_bucket = v;
    }

    if let Some(v) = env("APP__REDIRECT_URL") {
        settings.redirect_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.request_timeout_seconds = parsed;
        }
    }

    if let Some(v) = env("APP__SESSION_FILE") {
        settings.session_file = Some(PathBuf::from(v));
    }

    settings
}

pub fn normalize_backend_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed =
        Url::parse(trimmed).with_context(|| format!("backend url '{trimmed}' is not a valid url"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("backend url '{trimmed}' must use http or https");
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
