//! # Authentication Module
//!
//! Bearer-token session handling for the audiobook server.
//!
//! ## Overview
//!
//! - Tokens are persisted through the platform `SecureStore` ([`TokenStore`])
//! - [`AuthManager::is_token_fresh`] is a local fast path that never touches
//!   the network
//! - [`AuthManager::validate_session`] falls back to a bounded
//!   `POST /api/authorize`; an unreachable server keeps the user signed in
//!   ([`SessionStatus::Stale`]), only an explicit 401/403 signs them out
//! - [`TokenProvider`] is the narrow accessor the remote client depends on

pub mod error;
pub mod manager;
pub mod token_store;
pub mod types;

pub use error::{AuthError, Result};
pub use manager::{AuthManager, TokenProvider};
pub use token_store::TokenStore;
pub use types::{AuthTokens, SessionStatus};
