//! # Authentication Manager
//!
//! Owns the signed-in user's credentials and answers "is this session still
//! good?" without ever logging the user out on a network hiccup.
//!
//! ## Validation policy
//!
//! 1. No stored token: [`SessionStatus::Invalid`].
//! 2. Token validated recently and not about to expire: [`SessionStatus::Valid`]
//!    with no network round trip.
//! 3. Otherwise `POST /api/authorize` under the validation timeout:
//!    - 2xx: `Valid`, freshness window restarts
//!    - 401/403: `Invalid`, tokens erased, `AuthEvent::SignedOut` emitted
//!    - anything else (timeout, socket error, 5xx): `Stale`, tokens kept,
//!      `AuthEvent::SessionStale` emitted
//!
//! ## Usage
//!
//! ```ignore
//! let manager = AuthManager::new(server_url, secure_store, http_client, event_bus, clock);
//! manager.sign_in("reader", "hunter2").await?;
//!
//! match manager.validate_session().await {
//!     SessionStatus::Invalid => show_login(),
//!     _ => show_library(),
//! }
//! ```

use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::{AuthTokens, SessionStatus};
use async_trait::async_trait;
use bridge_traits::{
    http::{HttpClient, HttpMethod, HttpRequest},
    Clock, SecureStore,
};
use chrono::{DateTime, Utc};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, SignOutReason};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};

/// Default upper bound for a session validation round trip
const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a successful validation is trusted without asking again
const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 300;

/// Tokens expiring within this margin are never considered fresh
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Sign-in/credential bookkeeping timeout
const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only access to the current bearer token.
///
/// The remote client depends on this rather than on [`AuthManager`] so it
/// can be driven by a fixed token in tests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

struct CachedSession {
    tokens: AuthTokens,
    validated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginUser {
    id: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    user: LoginUser,
}

pub struct AuthManager {
    base_url: String,
    http_client: Arc<dyn HttpClient>,
    token_store: TokenStore,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    validation_timeout: Duration,
    freshness_window: chrono::Duration,
    session: RwLock<Option<CachedSession>>,
}

impl AuthManager {
    pub fn new(
        base_url: impl Into<String>,
        secure_store: Arc<dyn SecureStore>,
        http_client: Arc<dyn HttpClient>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            token_store: TokenStore::new(secure_store),
            event_bus,
            clock,
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            freshness_window: chrono::Duration::seconds(DEFAULT_FRESHNESS_WINDOW_SECS),
            session: RwLock::new(None),
        }
    }

    pub fn with_validation_timeout(mut self, validation_timeout: Duration) -> Self {
        self.validation_timeout = validation_timeout;
        self
    }

    pub fn with_freshness_window(mut self, window: chrono::Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Sign in with username and password via `POST /login`.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<AuthTokens> {
        let request = HttpRequest::new(HttpMethod::Post, format!("{}/login", self.base_url))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?
            .timeout(SIGN_IN_TIMEOUT);

        let response = match timeout(SIGN_IN_TIMEOUT, self.http_client.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(AuthError::Network(e.to_string())),
            Err(_) => return Err(AuthError::Network("sign-in timed out".to_string())),
        };

        if !response.is_success() {
            warn!(status = response.status, "Sign-in rejected");
            return Err(AuthError::SignInRejected {
                status: response.status,
            });
        }

        let login: LoginResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let access_token = login
            .user
            .access_token
            .or(login.user.token)
            .ok_or_else(|| AuthError::InvalidResponse("login response has no token".into()))?;

        let mut tokens = AuthTokens::new(access_token, login.user.id);
        tokens.refresh_token = login.user.refresh_token;

        self.sign_in_with_tokens(tokens.clone()).await?;
        Ok(tokens)
    }

    /// Adopt credentials obtained elsewhere (SSO, migration from an older
    /// install). They are treated as freshly validated.
    pub async fn sign_in_with_tokens(&self, tokens: AuthTokens) -> Result<()> {
        self.token_store.store_tokens(&tokens).await?;

        let user_id = tokens.user_id.clone();
        *self.session.write().await = Some(CachedSession {
            tokens,
            validated_at: Some(self.clock.now()),
        });

        info!(user_id = %user_id, "Signed in");
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SignedIn { user_id }))
            .ok();
        Ok(())
    }

    /// Current tokens, loading them from secure storage on first use.
    pub async fn current_tokens(&self) -> Option<AuthTokens> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Some(session.tokens.clone());
        }

        let stored = match self.token_store.retrieve_tokens().await {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(error = %e, "Could not load stored credentials");
                return None;
            }
        };

        let mut session = self.session.write().await;
        let cached = session.get_or_insert(CachedSession {
            tokens: stored,
            validated_at: None,
        });
        Some(cached.tokens.clone())
    }

    pub async fn current_user_id(&self) -> Option<String> {
        self.current_tokens().await.map(|t| t.user_id)
    }

    /// Local fast path: true when the token was validated within the
    /// freshness window and does not expire soon.
    pub async fn is_token_fresh(&self) -> bool {
        let session = self.session.read().await;
        let Some(session) = session.as_ref() else {
            return false;
        };
        let now = self.clock.now();

        if session
            .tokens
            .expires_within(now, chrono::Duration::seconds(EXPIRY_MARGIN_SECS))
        {
            return false;
        }
        match session.validated_at {
            Some(validated_at) => now - validated_at < self.freshness_window,
            None => false,
        }
    }

    /// Validate the session, preferring a stale-but-present login over a
    /// false logout.
    #[instrument(skip(self))]
    pub async fn validate_session(&self) -> SessionStatus {
        let Some(tokens) = self.current_tokens().await else {
            debug!("No credentials to validate");
            return SessionStatus::Invalid;
        };

        if self.is_token_fresh().await {
            debug!("Token fresh, skipping network validation");
            return SessionStatus::Valid;
        }

        let request = HttpRequest::new(
            HttpMethod::Post,
            format!("{}/api/authorize", self.base_url),
        )
        .bearer_token(&tokens.access_token)
        .timeout(self.validation_timeout);

        match timeout(self.validation_timeout, self.http_client.execute(request)).await {
            Ok(Ok(response)) if response.is_success() => {
                if let Some(session) = self.session.write().await.as_mut() {
                    session.validated_at = Some(self.clock.now());
                }
                debug!(user_id = %tokens.user_id, "Session validated");
                SessionStatus::Valid
            }
            Ok(Ok(response)) if response.status == 401 || response.status == 403 => {
                warn!(
                    user_id = %tokens.user_id,
                    status = response.status,
                    "Server rejected session"
                );
                self.end_session(SignOutReason::Rejected).await;
                SessionStatus::Invalid
            }
            Ok(Ok(response)) => self.stale(format!("HTTP {}", response.status)),
            Ok(Err(e)) => self.stale(e.to_string()),
            Err(_) => self.stale(format!(
                "validation timed out after {:?}",
                self.validation_timeout
            )),
        }
    }

    fn stale(&self, message: String) -> SessionStatus {
        warn!(reason = %message, "Session validation inconclusive, keeping credentials");
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SessionStale { message }))
            .ok();
        SessionStatus::Stale
    }

    /// Erase credentials at the user's request.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        self.token_store.delete_tokens().await?;
        let user_id = self.session.write().await.take().map(|s| s.tokens.user_id);

        info!(user_id = ?user_id, "Signed out");
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SignedOut {
                user_id,
                reason: SignOutReason::UserRequested,
            }))
            .ok();
        Ok(())
    }

    async fn end_session(&self, reason: SignOutReason) {
        if let Err(e) = self.token_store.delete_tokens().await {
            warn!(error = %e, "Failed to erase rejected credentials");
        }
        let user_id = self.session.write().await.take().map(|s| s.tokens.user_id);
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SignedOut { user_id, reason }))
            .ok();
    }
}

#[async_trait]
impl TokenProvider for AuthManager {
    async fn access_token(&self) -> Option<String> {
        self.current_tokens().await.map(|t| t.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::tests::MemorySecureStore;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use bridge_traits::ManualClock;
    use chrono::TimeZone;
    use mockall::mock;

    mock! {
        pub Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    /// Never answers; used to exercise the validation deadline.
    struct HangingHttp;

    #[async_trait]
    impl HttpClient for HangingHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(HttpResponse::new(200, ""))
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn manager(http: Arc<dyn HttpClient>, clock: Arc<ManualClock>, bus: EventBus) -> AuthManager {
        AuthManager::new(
            "https://abs.example.com/",
            Arc::new(MemorySecureStore::default()),
            http,
            bus,
            clock,
        )
    }

    #[tokio::test]
    async fn test_sign_in_stores_tokens_and_emits() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|req| req.url == "https://abs.example.com/login")
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"user":{"id":"usr_1","token":"tok_abc"}}"#,
                ))
            });
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let manager = manager(Arc::new(http), clock(), bus);

        let tokens = manager.sign_in("reader", "pw").await.unwrap();

        assert_eq!(tokens.access_token, "tok_abc");
        assert_eq!(manager.access_token().await.as_deref(), Some("tok_abc"));
        assert!(manager.is_token_fresh().await);
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SignedIn {
                user_id: "usr_1".into()
            })
        );
    }

    #[tokio::test]
    async fn test_sign_in_rejected() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(401, "Unauthorized")));
        let manager = manager(Arc::new(http), clock(), EventBus::new(16));

        let err = manager.sign_in("reader", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::SignInRejected { status: 401 }));
        assert!(manager.access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_token_skips_network() {
        let mut http = MockHttp::new();
        http.expect_execute().never();
        let manager = manager(Arc::new(http), clock(), EventBus::new(16));
        manager
            .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();

        assert_eq!(manager.validate_session().await, SessionStatus::Valid);
    }

    #[tokio::test]
    async fn test_expiring_token_is_not_fresh() {
        let clock = clock();
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "{}")));
        let manager = manager(Arc::new(http), clock.clone(), EventBus::new(16));
        let expiring = AuthTokens::new("tok", "usr_1")
            .with_expiry(clock.now() + chrono::Duration::seconds(30));
        manager.sign_in_with_tokens(expiring).await.unwrap();

        assert!(!manager.is_token_fresh().await);
        assert_eq!(manager.validate_session().await, SessionStatus::Valid);
    }

    #[tokio::test]
    async fn test_validation_after_window_hits_server() {
        let clock = clock();
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|req| {
                req.url == "https://abs.example.com/api/authorize"
                    && req.method == HttpMethod::Post
                    && req.headers.get("Authorization").map(String::as_str) == Some("Bearer tok")
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "{}")));
        let manager = manager(Arc::new(http), clock.clone(), EventBus::new(16));
        manager
            .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(10));
        assert!(!manager.is_token_fresh().await);
        assert_eq!(manager.validate_session().await, SessionStatus::Valid);
        assert!(manager.is_token_fresh().await);
    }

    #[tokio::test]
    async fn test_rejection_signs_out() {
        let clock = clock();
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(401, "Unauthorized")));
        let bus = EventBus::new(16);
        let manager = manager(Arc::new(http), clock.clone(), bus.clone());
        manager
            .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();
        let mut events = bus.subscribe();

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(manager.validate_session().await, SessionStatus::Invalid);
        assert!(manager.access_token().await.is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SignedOut {
                user_id: Some("usr_1".into()),
                reason: SignOutReason::Rejected,
            })
        );
    }

    #[tokio::test]
    async fn test_network_error_keeps_session() {
        let clock = clock();
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::Network("connection reset".into())));
        let bus = EventBus::new(16);
        let manager = manager(Arc::new(http), clock.clone(), bus.clone());
        manager
            .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();
        let mut events = bus.subscribe();

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(manager.validate_session().await, SessionStatus::Stale);
        assert_eq!(manager.access_token().await.as_deref(), Some("tok"));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SessionStale { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_not_a_rejection() {
        let clock = clock();
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(503, "maintenance")));
        let manager = manager(Arc::new(http), clock.clone(), EventBus::new(16));
        manager
            .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(manager.validate_session().await, SessionStatus::Stale);
        assert!(manager.current_tokens().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_timeout_is_stale() {
        let clock = clock();
        let manager = manager(Arc::new(HangingHttp), clock.clone(), EventBus::new(16))
            .with_validation_timeout(Duration::from_secs(3));
        manager
            .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(manager.validate_session().await, SessionStatus::Stale);
        assert_eq!(manager.access_token().await.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_no_credentials_is_invalid() {
        let mut http = MockHttp::new();
        http.expect_execute().never();
        let manager = manager(Arc::new(http), clock(), EventBus::new(16));

        assert_eq!(manager.validate_session().await, SessionStatus::Invalid);
    }

    #[tokio::test]
    async fn test_restored_tokens_need_validation() {
        let secure = Arc::new(MemorySecureStore::default());
        TokenStore::new(secure.clone())
            .store_tokens(&AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();
        let manager = AuthManager::new(
            "https://abs.example.com",
            secure,
            Arc::new(MockHttp::new()),
            EventBus::new(16),
            clock(),
        );

        assert_eq!(manager.current_user_id().await.as_deref(), Some("usr_1"));
        assert!(!manager.is_token_fresh().await);
    }

    #[tokio::test]
    async fn test_sign_out_clears_and_emits() {
        let bus = EventBus::new(16);
        let manager = manager(Arc::new(MockHttp::new()), clock(), bus.clone());
        manager
            .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
            .await
            .unwrap();
        let mut events = bus.subscribe();

        manager.sign_out().await.unwrap();

        assert!(manager.access_token().await.is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SignedOut {
                user_id: Some("usr_1".into()),
                reason: SignOutReason::UserRequested,
            })
        );
    }
}
