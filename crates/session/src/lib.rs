//! In-memory session store holding OAuth state, access token and region.
//!
//! Sessions live only for the lifetime of the process. A restart drops every
//! session and clients must authenticate again. Sessions that never finish
//! the OAuth round-trip are pruned once they outlive the pending TTL.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

const MAX_SESSION_ID_LENGTH: usize = 128;
const OAUTH_STATE_LENGTH: usize = 32;
/// How long an unauthenticated session is kept before pruning
pub const DEFAULT_PENDING_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("unknown session")]
    UnknownSession,
    #[error("OAuth state does not match the pending authorization")]
    StateMismatch,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// CSRF state; set by `/login`, consumed by `/callback`
    pub oauth_state: Option<String>,
    pub access_token: Option<String>,
    pub region: Option<String>,
    /// Registry key for this session's push channel
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            oauth_state: None,
            access_token: None,
            region: None,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Everything a fetch-and-push trigger needs, if the session has it all.
    pub fn push_target(&self, default_region: &str) -> Option<PushTarget> {
        Some(PushTarget {
            user_id: self.user_id.clone()?,
            access_token: self.access_token.clone()?,
            region: self
                .region
                .clone()
                .unwrap_or_else(|| default_region.to_string()),
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] (created: {})",
            self.id,
            if self.is_authenticated() {
                "authenticated"
            } else {
                "anonymous"
            },
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Credentials and routing key for one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub user_id: String,
    pub access_token: String,
    pub region: String,
}

/// Process-wide session store
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    pending_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_pending_ttl(Duration::seconds(DEFAULT_PENDING_TTL_SECS))
    }

    pub fn with_pending_ttl(pending_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            pending_ttl,
        }
    }

    /// Creating a session also prunes stale unauthenticated ones, so the
    /// store stays bounded by the login rate within one TTL window.
    pub async fn create(&self) -> Session {
        let session = Session::new();
        let mut sessions = self.sessions.write().await;
        let pruned = prune_stale(&mut sessions, self.pending_ttl, session.created_at);
        sessions.insert(session.id.clone(), session.clone());
        drop(sessions);

        if pruned > 0 {
            tracing::debug!("Pruned {} abandoned session(s)", pruned);
        }
        tracing::debug!("Session created: {}", session.id);
        session
    }

    /// Drop unauthenticated sessions older than the pending TTL.
    pub async fn prune_pending(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        prune_stale(&mut sessions, self.pending_ttl, Utc::now())
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        if validate_session_id(id).is_err() {
            return None;
        }
        self.sessions.read().await.get(id).cloned()
    }

    /// Return the session for `id` if it exists, otherwise start a new one.
    pub async fn get_or_create(&self, id: Option<&str>) -> Session {
        if let Some(id) = id {
            if let Some(session) = self.get(id).await {
                return session;
            }
        }
        self.create().await
    }

    /// Generate and store a fresh CSRF state for the authorization round-trip.
    pub async fn begin_authorization(&self, id: &str) -> Result<String, SessionError> {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(OAUTH_STATE_LENGTH)
            .map(char::from)
            .collect();

        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(SessionError::UnknownSession)?;
        session.oauth_state = Some(state.clone());
        Ok(state)
    }

    /// Consume the pending state and check it against the callback's.
    ///
    /// The stored state is cleared whether or not it matches.
    pub async fn verify_state(&self, id: &str, state: &str) -> Result<(), SessionError> {
        validate_session_id(id)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(SessionError::UnknownSession)?;
        match session.oauth_state.take() {
            Some(expected) if !state.is_empty() && expected == state => Ok(()),
            _ => Err(SessionError::StateMismatch),
        }
    }

    pub async fn attach_token(
        &self,
        id: &str,
        access_token: String,
        region: String,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(SessionError::UnknownSession)?;
        session.access_token = Some(access_token);
        session.region = Some(region);
        tracing::info!("Session {} authenticated", id);
        Ok(())
    }

    /// Return the session's user identifier, minting one on first use.
    pub async fn ensure_user_id(&self, id: &str) -> Result<String, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(SessionError::UnknownSession)?;
        let user_id = session
            .user_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        Ok(user_id)
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            tracing::info!("Session {} removed", id);
        }
        removed
    }

    /// Sessions that are authenticated and have a user identifier.
    pub async fn push_targets(&self, default_region: &str) -> Vec<PushTarget> {
        self.sessions
            .read()
            .await
            .values()
            .filter_map(|s| s.push_target(default_region))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn prune_stale(
    sessions: &mut HashMap<String, Session>,
    ttl: Duration,
    now: DateTime<Utc>,
) -> usize {
    let before = sessions.len();
    sessions.retain(|_, s| s.is_authenticated() || now - s.created_at <= ttl);
    before - sessions.len()
}

fn validate_session_id(id: &str) -> Result<(), SessionError> {
    if id.is_empty() || id.len() > MAX_SESSION_ID_LENGTH {
        return Err(SessionError::InvalidSessionId(
            "length out of range".to_string(),
        ));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(SessionError::InvalidSessionId(
            "contains unsupported characters".to_string(),
        ));
    }
    Ok(())
}
