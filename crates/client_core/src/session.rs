//! Swipe feed state: a fetched batch of candidates, a cursor into it and a running count of
//! likes.
//!
//! The cursor only moves forward, one step per acknowledged response, and is reset to 0 by
//! [`SwipeSession::load`]. The like counter belongs to the whole browsing pass and survives
//! reloads.

use std::sync::Arc;

use shared::protocol::{AuthSession, Candidate, Response};
use tracing::{debug, info, warn};

use crate::{error::SessionError, CandidateGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwipeOutcome {
    pub candidate: Candidate,
    pub response: Response,
}

pub struct SwipeSession {
    gateway: Arc<dyn CandidateGateway>,
    page_size: u32,
    candidates: Vec<Candidate>,
    cursor: usize,
    liked_count: u64,
}

impl SwipeSession {
    pub fn new(gateway: Arc<dyn CandidateGateway>, page_size: u32) -> Self {
        Self {
            gateway,
            page_size,
            candidates: Vec::new(),
            cursor: 0,
            liked_count: 0,
        }
    }

    pub fn load(&mut self, batch: Vec<Candidate>) {
        debug!(batch_len = batch.len(), "loading candidate batch");
        self.candidates = batch;
        self.cursor = 0;
    }

    pub fn current(&self) -> Option<&Candidate> {
        self.candidates.get(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == self.candidates.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn batch_len(&self) -> usize {
        self.candidates.len()
    }

    pub fn liked_count(&self) -> u64 {
        self.liked_count
    }

    /// Records `liked` for the current candidate on behalf of `identity`.
    ///
    /// Cursor and counter change only after the gateway acknowledges the response; on any
    /// error the session is exactly as it was before the call.
    pub async fn respond(
        &mut self,
        identity: &AuthSession,
        liked: bool,
    ) -> Result<SwipeOutcome, SessionError> {
        let candidate = self
            .current()
            .cloned()
            .ok_or(SessionError::NoCurrentCandidate)?;

        let response = Response {
            user_id: identity.user_id(),
            candidate_id: candidate.id,
            liked,
        };

        if let Err(err) = self.gateway.record_response(identity, &response).await {
            warn!(candidate_id = %candidate.id, liked, error = %err, "response not recorded");
            return Err(SessionError::Emit(err));
        }

        if liked {
            self.liked_count += 1;
        }
        self.cursor += 1;
        debug!(
            candidate_id = %candidate.id,
            liked,
            cursor = self.cursor,
            liked_count = self.liked_count,
            "response recorded"
        );

        Ok(SwipeOutcome {
            candidate,
            response,
        })
    }

    pub async fn like(&mut self, identity: &AuthSession) -> Result<SwipeOutcome, SessionError> {
        self.respond(identity, true).await
    }

    pub async fn dislike(&mut self, identity: &AuthSession) -> Result<SwipeOutcome, SessionError> {
        self.respond(identity, false).await
    }

    /// Fetches a fresh batch and loads it. A failed fetch leaves the current batch and cursor
    /// in place.
    pub async fn reload(&mut self, identity: &AuthSession) -> Result<usize, SessionError> {
        let batch = self
            .gateway
            .fetch_candidates(identity, self.page_size)
            .await
            .map_err(|err| {
                warn!(error = %err, "candidate fetch failed");
                SessionError::Fetch(err)
            })?;
        let fetched = batch.len();
        self.load(batch);
        info!(fetched, liked_count = self.liked_count, "candidate feed reloaded");
        Ok(fetched)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
