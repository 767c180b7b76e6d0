use async_trait::async_trait;
use shared::{
    domain::{FederatedProvider, UserId},
    protocol::{
        AuthSession, Candidate, Profile, ProfileUpdate, RegisteredAccount, Response, SessionUser,
    },
};
use url::Url;

mod backend_client;
pub mod config;
pub mod error;
pub mod session;
pub mod session_store;

pub use backend_client::BackendClient;
pub use error::{GatewayError, SessionError};
pub use session::{SwipeOutcome, SwipeSession};
pub use session_store::SessionStore;

/// Candidate feed and swipe recording.
#[async_trait]
pub trait CandidateGateway: Send + Sync {
    /// Newest listings first, at most `limit` of them.
    async fn fetch_candidates(
        &self,
        identity: &AuthSession,
        limit: u32,
    ) -> Result<Vec<Candidate>, GatewayError>;
    async fn record_response(
        &self,
        identity: &AuthSession,
        response: &Response,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<RegisteredAccount, GatewayError>;
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthSession, GatewayError>;
    /// Where to send the user to sign in with `provider`. The provider redirects back to
    /// `redirect_to` with the session in the URL fragment.
    fn federated_authorize_url(
        &self,
        provider: FederatedProvider,
        redirect_to: &str,
    ) -> Result<Url, GatewayError>;
    async fn complete_federated(&self, callback_url: &str) -> Result<AuthSession, GatewayError>;
    async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, GatewayError>;
    async fn current_user(&self, session: &AuthSession) -> Result<SessionUser, GatewayError>;
    async fn end_session(&self, session: &AuthSession) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait ProfileGateway: Send + Sync {
    async fn get_profile(
        &self,
        identity: &AuthSession,
        user_id: UserId,
    ) -> Result<Profile, GatewayError>;
    async fn update_profile(
        &self,
        identity: &AuthSession,
        user_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<Profile, GatewayError>;
    /// Stores `bytes` in the avatar bucket and returns the public URL of the object.
    async fn upload_avatar(
        &self,
        identity: &AuthSession,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, GatewayError>;
}
