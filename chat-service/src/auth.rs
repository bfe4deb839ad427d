use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use redis::{AsyncCommands, aio::MultiplexedConnection};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

use crate::{
    error::{ChatError, StoreError},
    models::UserId,
    state::AppState,
};

pub const TOKEN_PREFIX: &str = "cstok_";

/// Value the auth service stores under each session token key.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionToken {
    pub user_id: String,
    pub expires_at: u64,
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Option<UserId>, StoreError>;
}

/// Shares one multiplexed connection across requests; clones are cheap handles.
pub struct RedisTokenVerifier {
    connection: MultiplexedConnection,
}

impl RedisTokenVerifier {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(client: &redis::Client) -> Result<Self, StoreError> {
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection))
    }
}

#[async_trait]
impl TokenVerifier for RedisTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Ok(None);
        }

        let mut con = self.connection.clone();
        let data: Option<String> = con.get(token).await?;

        Ok(data.and_then(|raw| decode_session_token(&raw, unix_now())))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn decode_session_token(raw: &str, now: u64) -> Option<UserId> {
    let parsed: SessionToken = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(%e, "unreadable session token payload");
            return None;
        }
    };

    if now > parsed.expires_at {
        debug!(user_id = %parsed.user_id, "session token expired");
        return None;
    }

    UserId::parse(&parsed.user_id).ok()
}

/// Fixed token table, for local runs and tests.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// The caller of a request, resolved from its bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            ChatError::Unauthorized("Access denied. No token provided.".to_string())
        })?;

        match state.tokens.verify(token).await? {
            Some(user_id) => Ok(Self { user_id }),
            None => Err(ChatError::Unauthorized("Invalid token.".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn live_token_resolves_its_user() {
        let raw = r#"{"user_id":"64f1c0ffee0123456789abcd","expires_at":200}"#;
        let user = decode_session_token(raw, 100).unwrap();
        assert_eq!(user.as_str(), "64f1c0ffee0123456789abcd");
    }

    #[test]
    fn expired_or_garbled_tokens_resolve_to_nobody() {
        let raw = r#"{"user_id":"alice","expires_at":100}"#;
        assert!(decode_session_token(raw, 101).is_none());
        assert!(decode_session_token("not json", 0).is_none());
        assert!(decode_session_token(r#"{"user_id":"a.b","expires_at":100}"#, 0).is_none());
    }

    #[test]
    fn bearer_scheme_is_required() {
        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Bearer cstok_abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("cstok_abc"));

        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Basic abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);

        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert_eq!(bearer_token(&parts), None);
    }

    #[tokio::test]
    #[ignore = "needs a Redis instance at REDIS_URL"]
    async fn test_redis_verifier_reuses_its_connection() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let client = redis::Client::open(url.as_str()).unwrap();
        let verifier = RedisTokenVerifier::connect(&client).await.unwrap();

        let token = format!("{}{}", TOKEN_PREFIX, uuid::Uuid::new_v4().simple());
        let payload = serde_json::json!({ "user_id": "alice", "expires_at": unix_now() + 60 });
        let mut con = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = con.set_ex(&token, payload.to_string(), 60).await.unwrap();

        for _ in 0..3 {
            let user = verifier.verify(&token).await.unwrap();
            assert_eq!(user.unwrap().as_str(), "alice");
        }
        assert!(verifier.verify("cstok_unknown").await.unwrap().is_none());
        assert!(verifier.verify("no-prefix").await.unwrap().is_none());

        let _: () = con.del(&token).await.unwrap();
    }

    #[tokio::test]
    async fn static_verifier_knows_only_its_tokens() {
        let verifier =
            StaticTokenVerifier::new().with_token("t1", UserId::parse("alice").unwrap());
        assert!(verifier.verify("t1").await.unwrap().is_some());
        assert!(verifier.verify("t2").await.unwrap().is_none());
    }
}
