use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CandidateId, UserId};

/// One animal listing presented for a swipe decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    pub name: String,
    pub species: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Candidate {
    pub fn age_label(&self) -> Option<String> {
        match self.age? {
            1 => Some("1 year".to_string()),
            n => Some(format!("{n} years")),
        }
    }

    /// "Species • Breed", or just the species when no breed is listed.
    pub fn headline(&self) -> String {
        match self.breed.as_deref() {
            Some(breed) => format!("{} • {breed}", self.species),
            None => self.species.clone(),
        }
    }
}

/// Row shape of the `animals` table as returned by the REST layer. Everything is optional
/// here; [`Candidate::try_from`] decides what is acceptable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnimalRow {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub age: Option<i64>,
    pub location: Option<String>,
    pub behavior: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowValidationError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("field `{0}` must not be empty")]
    Empty(&'static str),
    #[error("field `{field}` is not a valid id: `{value}`")]
    InvalidId { field: &'static str, value: String },
    #[error("age must be a non-negative number of years, got {0}")]
    InvalidAge(i64),
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, RowValidationError> {
    let value = value.ok_or(RowValidationError::Missing(field))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RowValidationError::Empty(field));
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TryFrom<AnimalRow> for Candidate {
    type Error = RowValidationError;

    fn try_from(row: AnimalRow) -> Result<Self, Self::Error> {
        let raw_id = row.id.ok_or(RowValidationError::Missing("id"))?;
        let id = raw_id
            .parse::<CandidateId>()
            .map_err(|_| RowValidationError::InvalidId {
                field: "id",
                value: raw_id.clone(),
            })?;

        let owner_id = match optional_text(row.user_id) {
            Some(raw) => Some(raw.parse::<UserId>().map_err(|_| {
                RowValidationError::InvalidId {
                    field: "user_id",
                    value: raw.clone(),
                }
            })?),
            None => None,
        };

        let age = match row.age {
            Some(age) => Some(u32::try_from(age).map_err(|_| RowValidationError::InvalidAge(age))?),
            None => None,
        };

        Ok(Self {
            id,
            owner_id,
            name: required_text("name", row.name)?,
            species: required_text("species", row.species)?,
            breed: optional_text(row.breed),
            age,
            location: optional_text(row.location),
            behavior: optional_text(row.behavior),
            photo_url: optional_text(row.photo_url),
            created_at: row.created_at,
        })
    }
}

/// A like/dislike event. The backend assigns the row id and creation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub user_id: UserId,
    #[serde(rename = "animal_id")]
    pub candidate_id: CandidateId,
    pub liked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

/// Partial profile update; only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.bio.is_none()
            && self.avatar_url.is_none()
            && self.location.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: SessionUser,
}

impl AuthSession {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Body returned by the token endpoint for password and refresh grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrantResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: SessionUser,
}

impl TokenGrantResponse {
    pub fn into_session(self, now: DateTime<Utc>) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| {
                self.expires_in
                    .and_then(Duration::try_seconds)
                    .and_then(|ttl| now.checked_add_signed(ttl))
            });
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Sign-up answers with a full session when e-mail confirmation is disabled, and with the
/// bare user record otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenGrantResponse),
    User(SessionUser),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredAccount {
    pub user: SessionUser,
    /// Present when the account is usable immediately; `None` while confirmation is pending.
    pub session: Option<AuthSession>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> AnimalRow {
        AnimalRow {
            id: Some("6a1f3c1e-8d0b-4f8e-9a51-0c2b7f0f9e11".into()),
            user_id: Some("0d9e2b6c-3f4a-4c55-8f0e-1b2c3d4e5f60".into()),
            name: Some("  Luna ".into()),
            species: Some("Dog".into()),
            breed: Some("".into()),
            age: Some(3),
            ..AnimalRow::default()
        }
    }

    #[test]
    fn converts_valid_row_and_normalizes_text() {
        let candidate = Candidate::try_from(row()).expect("valid row");
        assert_eq!(candidate.name, "Luna");
        assert_eq!(candidate.breed, None);
        assert_eq!(candidate.age, Some(3));
        assert!(candidate.owner_id.is_some());
        assert_eq!(candidate.headline(), "Dog");
        assert_eq!(candidate.age_label().as_deref(), Some("3 years"));
    }

    #[test]
    fn rejects_rows_the_feed_cannot_show() {
        let mut bad_id = row();
        bad_id.id = Some("not-a-uuid".into());
        assert!(matches!(
            Candidate::try_from(bad_id),
            Err(RowValidationError::InvalidId { field: "id", .. })
        ));

        let mut no_species = row();
        no_species.species = Some("   ".into());
        assert_eq!(
            Candidate::try_from(no_species),
            Err(RowValidationError::Empty("species"))
        );

        let mut negative_age = row();
        negative_age.age = Some(-2);
        assert_eq!(
            Candidate::try_from(negative_age),
            Err(RowValidationError::InvalidAge(-2))
        );
    }

    #[test]
    fn response_uses_animal_id_on_the_wire() {
        let response = Response {
            user_id: "0d9e2b6c-3f4a-4c55-8f0e-1b2c3d4e5f60".parse().expect("uuid"),
            candidate_id: "6a1f3c1e-8d0b-4f8e-9a51-0c2b7f0f9e11".parse().expect("uuid"),
            liked: true,
        };
        let json = serde_json::to_value(response).expect("json");
        assert_eq!(json["animal_id"], "6a1f3c1e-8d0b-4f8e-9a51-0c2b7f0f9e11");
        assert_eq!(json["liked"], true);
        assert!(json.get("candidate_id").is_none());
    }

    #[test]
    fn sign_up_without_confirmation_yields_session() {
        let body = r#"{"access_token":"a","refresh_token":"r","expires_in":3600,
            "user":{"id":"0d9e2b6c-3f4a-4c55-8f0e-1b2c3d4e5f60","email":"a@b.c"}}"#;
        let parsed: SignUpResponse = serde_json::from_str(body).expect("parse");
        assert!(matches!(parsed, SignUpResponse::Session(_)));

        let body = r#"{"id":"0d9e2b6c-3f4a-4c55-8f0e-1b2c3d4e5f60","email":"a@b.c","aud":"authenticated"}"#;
        let parsed: SignUpResponse = serde_json::from_str(body).expect("parse");
        assert!(matches!(parsed, SignUpResponse::User(_)));
    }

    #[test]
    fn out_of_range_lifetime_leaves_expiry_unknown() {
        let grant = TokenGrantResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: Some(i64::MAX),
            expires_at: None,
            user: SessionUser {
                id: "0d9e2b6c-3f4a-4c55-8f0e-1b2c3d4e5f60".parse().expect("uuid"),
                email: None,
            },
        };
        let now = Utc::now();

        assert_eq!(grant.clone().into_session(now).expires_at, None);

        let grant = TokenGrantResponse {
            expires_in: Some(3600),
            ..grant
        };
        assert_eq!(
            grant.into_session(now).expires_at,
            Some(now + Duration::seconds(3600))
        );
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = AuthSession {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            expires_at: None,
            user: SessionUser {
                id: "0d9e2b6c-3f4a-4c55-8f0e-1b2c3d4e5f60".parse().expect("uuid"),
                email: None,
            },
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret"));
    }
}
