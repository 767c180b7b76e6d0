use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Postgres SQLSTATE for unique constraint violations, as relayed by the REST layer.
const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::Validation,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Builds an error from a failed backend response.
    ///
    /// The auth, REST and storage services each shape their error bodies differently
    /// (`msg`, `error_description`, `message` or a bare `error` string). The first
    /// non-empty one wins; a non-JSON body is used verbatim.
    pub fn from_response(status: u16, body: &str) -> Self {
        let mut code = ErrorCode::from_status(status);
        let parsed = serde_json::from_str::<Value>(body).ok();

        let message = parsed
            .as_ref()
            .and_then(|value| {
                ["msg", "error_description", "message", "error"]
                    .iter()
                    .filter_map(|key| value.get(*key).and_then(Value::as_str))
                    .map(str::trim)
                    .find(|text| !text.is_empty())
                    .map(str::to_string)
            })
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| format!("backend request failed with status {status}"));

        if let Some(value) = parsed.as_ref() {
            let sql_state = value.get("code").and_then(Value::as_str);
            let auth_code = value.get("error_code").and_then(Value::as_str);
            if sql_state == Some(PG_UNIQUE_VIOLATION)
                || matches!(auth_code, Some("user_already_exists" | "email_exists"))
            {
                code = ErrorCode::Conflict;
            }
        }

        Self { code, message }
    }
}
