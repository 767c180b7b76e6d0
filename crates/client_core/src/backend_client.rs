use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Client, Method, RequestBuilder,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use shared::{
    domain::{FederatedProvider, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AnimalRow, AuthSession, Candidate, NewProfile, Profile, ProfileUpdate, RegisteredAccount,
        Response, SessionUser, SignUpResponse, TokenGrantResponse,
    },
};
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};
use uuid::Uuid;

use crate::{
    config::{normalize_backend_url, Settings},
    error::GatewayError,
    CandidateGateway, IdentityGateway, ProfileGateway,
};

const CANDIDATES_TABLE: &str = "animals";
const RESPONSES_TABLE: &str = "matches";
const PROFILES_TABLE: &str = "profiles";

/// Client for the hosted backend: auth under `/auth/v1`, tables under `/rest/v1`, objects
/// under `/storage/v1`.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    anon_key: String,
    avatar_bucket: String,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

impl BackendClient {
    pub fn new(settings: &Settings) -> Result<Self, GatewayError> {
        let base_url = normalize_backend_url(&settings.backend_url)
            .map_err(|err| GatewayError::Config(err.to_string()))?;
        if settings.anon_key.trim().is_empty() {
            return Err(GatewayError::Config("anon key is empty".into()));
        }
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url,
            anon_key: settings.anon_key.trim().to_string(),
            avatar_bucket: settings.avatar_bucket.clone(),
        })
    }

    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(self.anon_key.as_str());
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {token}"))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = ApiError::from_response(status.as_u16(), &body);
        debug!(status = status.as_u16(), code = ?error.code, "backend request failed");
        Err(GatewayError::Api {
            status: status.as_u16(),
            error,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let response = self.send(builder).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| GatewayError::InvalidPayload(err.to_string()))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<SessionUser, GatewayError> {
        self.send_json(self.request(Method::GET, "/auth/v1/user", Some(access_token)))
            .await
    }

    async fn token_grant<B: Serialize + Sync>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<AuthSession, GatewayError> {
        let grant: TokenGrantResponse = self
            .send_json(
                self.request(Method::POST, "/auth/v1/token", None)
                    .query(&[("grant_type", grant_type)])
                    .json(body),
            )
            .await?;
        Ok(grant.into_session(Utc::now()))
    }

    fn single_profile(mut rows: Vec<Profile>, user_id: UserId) -> Result<Profile, GatewayError> {
        match rows.len() {
            0 => Err(GatewayError::NotFound(format!("profile {user_id}"))),
            1 => Ok(rows.remove(0)),
            n => Err(GatewayError::InvalidPayload(format!(
                "expected one profile for {user_id}, got {n}"
            ))),
        }
    }
}

#[async_trait]
impl CandidateGateway for BackendClient {
    async fn fetch_candidates(
        &self,
        identity: &AuthSession,
        limit: u32,
    ) -> Result<Vec<Candidate>, GatewayError> {
        let limit = limit.to_string();
        let rows: Vec<AnimalRow> = self
            .send_json(
                self.request(
                    Method::GET,
                    &format!("/rest/v1/{CANDIDATES_TABLE}"),
                    Some(&identity.access_token),
                )
                .query(&[
                    ("select", "*"),
                    ("order", "created_at.desc"),
                    ("limit", limit.as_str()),
                ]),
            )
            .await?;

        let candidates = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                Candidate::try_from(row).map_err(|err| {
                    GatewayError::InvalidPayload(format!("candidate row {index}: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = candidates.len(), "fetched candidates");
        Ok(candidates)
    }

    async fn record_response(
        &self,
        identity: &AuthSession,
        response: &Response,
    ) -> Result<(), GatewayError> {
        self.send(
            self.request(
                Method::POST,
                &format!("/rest/v1/{RESPONSES_TABLE}"),
                Some(&identity.access_token),
            )
            .header("Prefer", "return=minimal")
            .json(response),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityGateway for BackendClient {
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<RegisteredAccount, GatewayError> {
        let signed_up: SignUpResponse = self
            .send_json(
                self.request(Method::POST, "/auth/v1/signup", None)
                    .json(&json!({
                        "email": email,
                        "password": password,
                        "data": { "name": display_name },
                    })),
            )
            .await?;

        let (user, session) = match signed_up {
            SignUpResponse::Session(grant) => {
                let session = grant.into_session(Utc::now());
                (session.user.clone(), Some(session))
            }
            SignUpResponse::User(user) => (user, None),
        };

        let profile = NewProfile {
            id: user.id,
            email: user.email.clone().unwrap_or_else(|| email.to_string()),
            name: display_name.to_string(),
        };
        self.send(
            self.request(
                Method::POST,
                &format!("/rest/v1/{PROFILES_TABLE}"),
                session.as_ref().map(|s| s.access_token.as_str()),
            )
            .header("Prefer", "return=minimal")
            .json(&profile),
        )
        .await?;

        info!(user_id = %user.id, confirmed = session.is_some(), "account registered");
        Ok(RegisteredAccount { user, session })
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthSession, GatewayError> {
        let session = self
            .token_grant("password", &Credentials { email, password })
            .await?;
        info!(user_id = %session.user.id, "signed in");
        Ok(session)
    }

    fn federated_authorize_url(
        &self,
        provider: FederatedProvider,
        redirect_to: &str,
    ) -> Result<Url, GatewayError> {
        Url::parse_with_params(
            &format!("{}/auth/v1/authorize", self.base_url),
            &[("provider", provider.as_str()), ("redirect_to", redirect_to)],
        )
        .map_err(|err| GatewayError::Config(format!("invalid authorize url: {err}")))
    }

    async fn complete_federated(&self, callback_url: &str) -> Result<AuthSession, GatewayError> {
        let callback = parse_callback(callback_url)?;
        let user = self.fetch_user(&callback.access_token).await?;
        info!(user_id = %user.id, "federated sign-in completed");
        Ok(AuthSession {
            access_token: callback.access_token,
            refresh_token: callback.refresh_token,
            expires_at: callback.expires_at,
            user,
        })
    }

    async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, GatewayError> {
        self.token_grant(
            "refresh_token",
            &RefreshRequest {
                refresh_token: &session.refresh_token,
            },
        )
        .await
    }

    async fn current_user(&self, session: &AuthSession) -> Result<SessionUser, GatewayError> {
        self.fetch_user(&session.access_token).await
    }

    async fn end_session(&self, session: &AuthSession) -> Result<(), GatewayError> {
        self.send(self.request(Method::POST, "/auth/v1/logout", Some(&session.access_token)))
            .await?;
        info!(user_id = %session.user.id, "signed out");
        Ok(())
    }
}

#[async_trait]
impl ProfileGateway for BackendClient {
    async fn get_profile(
        &self,
        identity: &AuthSession,
        user_id: UserId,
    ) -> Result<Profile, GatewayError> {
        let filter = format!("eq.{user_id}");
        let rows: Vec<Profile> = self
            .send_json(
                self.request(
                    Method::GET,
                    &format!("/rest/v1/{PROFILES_TABLE}"),
                    Some(&identity.access_token),
                )
                .query(&[("select", "*"), ("id", filter.as_str())]),
            )
            .await?;
        Self::single_profile(rows, user_id)
    }

    async fn update_profile(
        &self,
        identity: &AuthSession,
        user_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<Profile, GatewayError> {
        if update.is_empty() {
            return self.get_profile(identity, user_id).await;
        }
        let filter = format!("eq.{user_id}");
        let rows: Vec<Profile> = self
            .send_json(
                self.request(
                    Method::PATCH,
                    &format!("/rest/v1/{PROFILES_TABLE}"),
                    Some(&identity.access_token),
                )
                .query(&[("id", filter.as_str())])
                .header("Prefer", "return=representation")
                .json(update),
            )
            .await?;
        Self::single_profile(rows, user_id)
    }

    async fn upload_avatar(
        &self,
        identity: &AuthSession,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, GatewayError> {
        let path = avatar_object_path(identity.user_id(), file_name);
        let content_type = mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        self.send(
            self.request(
                Method::POST,
                &format!("/storage/v1/object/{}/{path}", self.avatar_bucket),
                Some(&identity.access_token),
            )
            .header(CONTENT_TYPE, content_type)
            .body(bytes),
        )
        .await?;

        let url = self.public_object_url(&self.avatar_bucket, &path);
        info!(user_id = %identity.user.id, %path, "avatar uploaded");
        Ok(url)
    }
}

/// `<user id>-<random>.<extension of the original file>`, so uploads never overwrite each
/// other.
fn avatar_object_path(user_id: UserId, file_name: &str) -> String {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    format!("{user_id}-{}.{extension}", Uuid::new_v4().simple())
}

#[derive(Debug)]
struct FederatedCallback {
    access_token: String,
    refresh_token: String,
    expires_at: Option<chrono::DateTime<Utc>>,
}

/// Reads the session the provider redirect carries. Tokens normally arrive in the fragment;
/// some flows put them (or an error) in the query string instead.
fn parse_callback(callback_url: &str) -> Result<FederatedCallback, GatewayError> {
    let url = Url::parse(callback_url.trim())
        .map_err(|err| GatewayError::InvalidPayload(format!("invalid callback url: {err}")))?;

    let mut params: Vec<(String, String)> = Vec::new();
    if let Some(fragment) = url.fragment() {
        params.extend(form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }
    params.extend(url.query_pairs().into_owned());
    let get = |key: &str| {
        params
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
    };

    if let Some(error) = get("error") {
        let message = get("error_description").unwrap_or(error);
        warn!(%message, "identity provider returned an error");
        return Err(GatewayError::Api {
            status: 401,
            error: ApiError::new(ErrorCode::Unauthorized, message),
        });
    }

    let access_token = get("access_token").ok_or_else(|| {
        GatewayError::InvalidPayload("callback url carries no access_token".into())
    })?;
    let refresh_token = get("refresh_token").ok_or_else(|| {
        GatewayError::InvalidPayload("callback url carries no refresh_token".into())
    })?;

    let expires_at = match get("expires_at")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    {
        Some(at) => Some(at),
        None => match get("expires_in") {
            Some(value) => {
                let expires_at = value
                    .parse::<i64>()
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| {
                        GatewayError::InvalidPayload(format!(
                            "callback url carries an unusable expires_in '{value}'"
                        ))
                    })?;
                Some(expires_at)
            }
            None => None,
        },
    };

    Ok(FederatedCallback {
        access_token,
        refresh_token,
        expires_at,
    })
}

#[cfg(test)]
#[path = "tests/backend_client_tests.rs"]
mod tests;
