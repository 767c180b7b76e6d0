use super::*;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method as HttpMethod, StatusCode, Uri},
    Router,
};
use serde_json::Value;
use shared::{domain::CandidateId, protocol::SessionUser};
use std::{collections::HashMap, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

const ANON_KEY: &str = "anon-key";
const USER_ID: &str = "0d9e2b6c-3f4a-4c55-8f0e-1b2c3d4e5f60";
const ANIMAL_ID: &str = "6a1f3c1e-8d0b-4f8e-9a51-0c2b7f0f9e11";

#[derive(Debug, Clone)]
struct Captured {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Captured {
    fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

struct Reply {
    method: &'static str,
    path_prefix: &'static str,
    status: u16,
    body: String,
}

fn reply(
    method: &'static str,
    path_prefix: &'static str,
    status: u16,
    body: impl Into<String>,
) -> Reply {
    Reply {
        method,
        path_prefix,
        status,
        body: body.into(),
    }
}

#[derive(Clone)]
struct MockState {
    replies: Arc<Vec<Reply>>,
    captured: Arc<Mutex<Vec<Captured>>>,
}

async fn handle_any(
    State(state): State<MockState>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let captured = Captured {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body,
    };

    let matched = state
        .replies
        .iter()
        .find(|r| r.method == captured.method && captured.path.starts_with(r.path_prefix))
        .map(|r| (r.status, r.body.clone()));
    state.captured.lock().await.push(captured);

    let (status, body) = matched.unwrap_or((404, r#"{"message":"no route"}"#.to_string()));
    (
        StatusCode::from_u16(status).expect("status"),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

async fn spawn_backend(replies: Vec<Reply>) -> (BackendClient, Arc<Mutex<Vec<Captured>>>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = MockState {
        replies: Arc::new(replies),
        captured: Arc::new(Mutex::new(Vec::new())),
    };
    let captured = state.captured.clone();
    let app = Router::new().fallback(handle_any).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let settings = Settings {
        backend_url: format!("http://{addr}/"),
        anon_key: ANON_KEY.into(),
        ..Settings::default()
    };
    (BackendClient::new(&settings).expect("client"), captured)
}

fn identity() -> AuthSession {
    AuthSession {
        access_token: "user-access".into(),
        refresh_token: "user-refresh".into(),
        expires_at: None,
        user: SessionUser {
            id: USER_ID.parse().expect("uuid"),
            email: Some("ana@example.com".into()),
        },
    }
}

fn token_body() -> String {
    json!({
        "access_token": "fresh-access",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "fresh-refresh",
        "user": { "id": USER_ID, "email": "ana@example.com", "aud": "authenticated" }
    })
    .to_string()
}

#[tokio::test]
async fn fetch_candidates_sends_feed_query_and_converts_rows() {
    let rows = json!([
        {
            "id": ANIMAL_ID,
            "user_id": USER_ID,
            "name": "Luna",
            "species": "Dog",
            "breed": "Vira-lata",
            "age": 1,
            "location": "Recife",
            "behavior": "Calm and friendly",
            "photo_url": null,
            "created_at": "2024-05-01T12:00:00+00:00"
        },
        {
            "id": "11111111-2222-4333-8444-555555555555",
            "user_id": USER_ID,
            "name": "Mingau",
            "species": "Cat",
            "breed": null,
            "age": null,
            "location": null,
            "behavior": null,
            "photo_url": "https://cdn.example.co/mingau.jpg",
            "created_at": "2024-04-01T12:00:00+00:00"
        }
    ]);
    let (client, captured) =
        spawn_backend(vec![reply("GET", "/rest/v1/animals", 200, rows.to_string())]).await;

    let candidates = client
        .fetch_candidates(&identity(), 20)
        .await
        .expect("fetch");

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].id, ANIMAL_ID.parse::<CandidateId>().expect("uuid"));
    assert_eq!(candidates[0].age_label().as_deref(), Some("1 year"));
    assert_eq!(candidates[1].headline(), "Cat");

    let captured = captured.lock().await;
    let request = &captured[0];
    assert_eq!(request.query_value("select"), Some("*"));
    assert_eq!(request.query_value("order"), Some("created_at.desc"));
    assert_eq!(request.query_value("limit"), Some("20"));
    assert_eq!(request.header("apikey"), Some(ANON_KEY));
    assert_eq!(request.header("authorization"), Some("Bearer user-access"));
}

#[tokio::test]
async fn fetch_candidates_rejects_batch_with_malformed_row() {
    let rows = json!([
        { "id": ANIMAL_ID, "name": "Luna", "species": "Dog" },
        { "id": "11111111-2222-4333-8444-555555555555", "species": "Cat" }
    ]);
    let (client, _captured) =
        spawn_backend(vec![reply("GET", "/rest/v1/animals", 200, rows.to_string())]).await;

    let err = client
        .fetch_candidates(&identity(), 20)
        .await
        .expect_err("row without name");
    match err {
        GatewayError::InvalidPayload(message) => {
            assert!(message.contains("row 1"), "unexpected message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn record_response_inserts_match_row() {
    let (client, captured) = spawn_backend(vec![reply("POST", "/rest/v1/matches", 201, "")]).await;
    let response = Response {
        user_id: USER_ID.parse().expect("uuid"),
        candidate_id: ANIMAL_ID.parse().expect("uuid"),
        liked: true,
    };

    client
        .record_response(&identity(), &response)
        .await
        .expect("record");

    let captured = captured.lock().await;
    let request = &captured[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.header("prefer"), Some("return=minimal"));
    assert_eq!(
        request.json(),
        json!({ "user_id": USER_ID, "animal_id": ANIMAL_ID, "liked": true })
    );
}

#[tokio::test]
async fn record_response_surfaces_policy_rejection() {
    let (client, _captured) = spawn_backend(vec![reply(
        "POST",
        "/rest/v1/matches",
        403,
        r#"{"code":"42501","message":"new row violates row-level security policy","details":null,"hint":null}"#,
    )])
    .await;
    let response = Response {
        user_id: USER_ID.parse().expect("uuid"),
        candidate_id: ANIMAL_ID.parse().expect("uuid"),
        liked: false,
    };

    let err = client
        .record_response(&identity(), &response)
        .await
        .expect_err("forbidden");
    assert!(matches!(err, GatewayError::Api { status: 403, .. }));
    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert_eq!(
        err.user_message(),
        "new row violates row-level security policy"
    );
}

#[tokio::test]
async fn authenticate_uses_password_grant_with_anon_key() {
    let (client, captured) =
        spawn_backend(vec![reply("POST", "/auth/v1/token", 200, token_body())]).await;

    let session = client
        .authenticate("ana@example.com", "hunter22")
        .await
        .expect("sign in");

    assert_eq!(session.access_token, "fresh-access");
    assert_eq!(session.user.id, USER_ID.parse::<UserId>().expect("uuid"));
    assert!(session.expires_at.expect("expiry") > Utc::now());

    let captured = captured.lock().await;
    let request = &captured[0];
    assert_eq!(request.query_value("grant_type"), Some("password"));
    assert_eq!(request.header("authorization"), Some("Bearer anon-key"));
    assert_eq!(
        request.json(),
        json!({ "email": "ana@example.com", "password": "hunter22" })
    );
}

#[tokio::test]
async fn authenticate_reports_invalid_credentials() {
    let (client, _captured) = spawn_backend(vec![reply(
        "POST",
        "/auth/v1/token",
        400,
        r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
    )])
    .await;

    let err = client
        .authenticate("ana@example.com", "wrong")
        .await
        .expect_err("bad password");
    assert_eq!(err.user_message(), "Invalid login credentials");
}

#[tokio::test]
async fn refresh_uses_refresh_token_grant() {
    let (client, captured) =
        spawn_backend(vec![reply("POST", "/auth/v1/token", 200, token_body())]).await;

    let refreshed = client.refresh(&identity()).await.expect("refresh");

    assert_eq!(refreshed.refresh_token, "fresh-refresh");
    let captured = captured.lock().await;
    assert_eq!(captured[0].query_value("grant_type"), Some("refresh_token"));
    assert_eq!(captured[0].json(), json!({ "refresh_token": "user-refresh" }));
}

#[tokio::test]
async fn register_with_immediate_session_inserts_profile_as_user() {
    let (client, captured) = spawn_backend(vec![
        reply("POST", "/auth/v1/signup", 200, token_body()),
        reply("POST", "/rest/v1/profiles", 201, ""),
    ])
    .await;

    let account = client
        .register("ana@example.com", "hunter22", "Ana")
        .await
        .expect("register");

    assert!(account.session.is_some());
    let captured = captured.lock().await;
    assert_eq!(captured.len(), 2);
    assert_eq!(
        captured[0].json()["data"]["name"],
        Value::String("Ana".into())
    );
    let profile_insert = &captured[1];
    assert_eq!(profile_insert.path, "/rest/v1/profiles");
    assert_eq!(
        profile_insert.header("authorization"),
        Some("Bearer fresh-access")
    );
    assert_eq!(
        profile_insert.json(),
        json!({ "id": USER_ID, "email": "ana@example.com", "name": "Ana" })
    );
}

#[tokio::test]
async fn register_pending_confirmation_has_no_session() {
    let (client, captured) = spawn_backend(vec![
        reply(
            "POST",
            "/auth/v1/signup",
            200,
            json!({ "id": USER_ID, "email": "ana@example.com", "aud": "authenticated" }).to_string(),
        ),
        reply("POST", "/rest/v1/profiles", 201, ""),
    ])
    .await;

    let account = client
        .register("ana@example.com", "hunter22", "Ana")
        .await
        .expect("register");

    assert!(account.session.is_none());
    let captured = captured.lock().await;
    assert_eq!(captured[1].header("authorization"), Some("Bearer anon-key"));
}

#[tokio::test]
async fn register_duplicate_account_is_a_conflict_and_skips_profile() {
    let (client, captured) = spawn_backend(vec![reply(
        "POST",
        "/auth/v1/signup",
        422,
        r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#,
    )])
    .await;

    let err = client
        .register("ana@example.com", "hunter22", "Ana")
        .await
        .expect_err("duplicate");

    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(err.user_message(), "User already registered");
    assert_eq!(captured.lock().await.len(), 1);
}

#[tokio::test]
async fn get_profile_filters_by_id_and_requires_a_row() {
    let (client, captured) = spawn_backend(vec![reply("GET", "/rest/v1/profiles", 200, "[]")]).await;
    let who = identity();

    let err = client
        .get_profile(&who, who.user_id())
        .await
        .expect_err("no profile");

    assert!(matches!(err, GatewayError::NotFound(_)));
    let captured = captured.lock().await;
    assert_eq!(
        captured[0].query_value("id"),
        Some(format!("eq.{USER_ID}").as_str())
    );
}

#[tokio::test]
async fn update_profile_sends_only_changed_fields() {
    let updated = json!([{
        "id": USER_ID,
        "email": "ana@example.com",
        "name": "Ana Paula",
        "bio": "Cat person",
        "avatar_url": null,
        "location": null,
        "created_at": "2024-05-01T12:00:00+00:00"
    }]);
    let (client, captured) =
        spawn_backend(vec![reply("PATCH", "/rest/v1/profiles", 200, updated.to_string())]).await;
    let who = identity();
    let update = ProfileUpdate {
        name: Some("Ana Paula".into()),
        bio: Some("Cat person".into()),
        ..ProfileUpdate::default()
    };

    let profile = client
        .update_profile(&who, who.user_id(), &update)
        .await
        .expect("update");

    assert_eq!(profile.name, "Ana Paula");
    let captured = captured.lock().await;
    let request = &captured[0];
    assert_eq!(request.header("prefer"), Some("return=representation"));
    assert_eq!(
        request.json(),
        json!({ "name": "Ana Paula", "bio": "Cat person" })
    );
}

#[tokio::test]
async fn upload_avatar_stores_object_and_returns_public_url() {
    let (client, captured) = spawn_backend(vec![reply(
        "POST",
        "/storage/v1/object/avatars/",
        200,
        r#"{"Key":"avatars/x"}"#,
    )])
    .await;
    let who = identity();

    let url = client
        .upload_avatar(&who, "me.PNG", b"png-bytes".to_vec())
        .await
        .expect("upload");

    let captured = captured.lock().await;
    let request = &captured[0];
    let object = request
        .path
        .strip_prefix("/storage/v1/object/avatars/")
        .expect("bucket path");
    assert!(object.starts_with(&format!("{USER_ID}-")));
    assert!(object.ends_with(".png"));
    assert_eq!(request.header("content-type"), Some("image/png"));
    assert_eq!(request.body.as_ref(), b"png-bytes");
    assert_eq!(url, client.public_object_url("avatars", object));
    assert!(url.contains("/storage/v1/object/public/avatars/"));
}

#[tokio::test]
async fn end_session_posts_logout_with_user_token() {
    let (client, captured) = spawn_backend(vec![reply("POST", "/auth/v1/logout", 204, "")]).await;

    client.end_session(&identity()).await.expect("logout");

    let captured = captured.lock().await;
    assert_eq!(captured[0].header("authorization"), Some("Bearer user-access"));
}

#[tokio::test]
async fn complete_federated_reads_fragment_and_resolves_user() {
    let (client, captured) = spawn_backend(vec![reply(
        "GET",
        "/auth/v1/user",
        200,
        json!({ "id": USER_ID, "email": "ana@example.com" }).to_string(),
    )])
    .await;

    let session = client
        .complete_federated(
            "http://localhost:3000/auth/callback#access_token=oauth-access&expires_in=3600&refresh_token=oauth-refresh&token_type=bearer",
        )
        .await
        .expect("callback");

    assert_eq!(session.access_token, "oauth-access");
    assert_eq!(session.refresh_token, "oauth-refresh");
    assert_eq!(session.user.email.as_deref(), Some("ana@example.com"));
    let captured = captured.lock().await;
    assert_eq!(captured[0].header("authorization"), Some("Bearer oauth-access"));
}

#[test]
fn callback_with_provider_error_is_unauthorized() {
    let err = parse_callback(
        "http://localhost:3000/auth/callback?error=access_denied&error_description=User+cancelled",
    )
    .expect_err("provider error");
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert_eq!(err.user_message(), "User cancelled");
}

#[test]
fn callback_without_tokens_is_invalid() {
    let err = parse_callback("http://localhost:3000/auth/callback").expect_err("no tokens");
    assert!(matches!(err, GatewayError::InvalidPayload(_)));
}

#[test]
fn callback_with_out_of_range_lifetime_is_invalid() {
    let err = parse_callback(
        "http://localhost:3000/auth/callback#access_token=a&refresh_token=r&expires_in=9223372036854775807",
    )
    .expect_err("lifetime overflows");
    assert!(matches!(err, GatewayError::InvalidPayload(_)));

    let err = parse_callback(
        "http://localhost:3000/auth/callback#access_token=a&refresh_token=r&expires_in=soon",
    )
    .expect_err("lifetime is not a number");
    assert!(matches!(err, GatewayError::InvalidPayload(_)));
}

#[test]
fn authorize_url_names_provider_and_redirect() {
    let settings = Settings {
        backend_url: "https://abc.example.co".into(),
        anon_key: ANON_KEY.into(),
        ..Settings::default()
    };
    let client = BackendClient::new(&settings).expect("client");

    let url = client
        .federated_authorize_url(FederatedProvider::Google, "http://localhost:3000/auth/callback")
        .expect("url");

    assert_eq!(url.path(), "/auth/v1/authorize");
    let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs.get("provider").map(String::as_str), Some("google"));
    assert_eq!(
        pairs.get("redirect_to").map(String::as_str),
        Some("http://localhost:3000/auth/callback")
    );
}

#[test]
fn avatar_path_falls_back_to_bin_extension() {
    let user: UserId = USER_ID.parse().expect("uuid");
    assert!(avatar_object_path(user, "photo").ends_with(".bin"));
    assert!(avatar_object_path(user, "weird.j p g").ends_with(".bin"));
    assert!(avatar_object_path(user, "cat.JPeG").ends_with(".jpeg"));
}

#[test]
fn client_requires_anon_key() {
    let settings = Settings {
        backend_url: "https://abc.example.co".into(),
        ..Settings::default()
    };
    assert!(matches!(
        BackendClient::new(&settings),
        Err(GatewayError::Config(_))
    ));
}
