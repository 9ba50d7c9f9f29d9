//! Secure Token Storage
//!
//! Persists the signed-in user's [`AuthTokens`] through the platform
//! `SecureStore` (Keychain, Keystore, Secret Service).
//!
//! - Tokens are serialized to JSON under a single key
//! - Token values are never logged
//! - Corrupted entries are erased so the next launch starts signed out

use crate::error::{AuthError, Result};
use crate::types::AuthTokens;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Secure store key holding the serialized tokens.
pub const TOKEN_STORAGE_KEY: &str = "abs_auth_tokens";

#[derive(Clone)]
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
}

impl TokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self { secure_store }
    }

    /// Store tokens, overwriting any previous credentials.
    pub async fn store_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        let json = serde_json::to_vec(tokens)
            .map_err(|e| AuthError::TokenCorrupted(format!("serialization failed: {}", e)))?;

        self.secure_store
            .set_secret(TOKEN_STORAGE_KEY, &json)
            .await
            .map_err(|e| {
                warn!(user_id = %tokens.user_id, error = %e, "Failed to store tokens");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            user_id = %tokens.user_id,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Tokens stored securely"
        );
        Ok(())
    }

    /// Load stored tokens.
    ///
    /// Returns `Ok(None)` when nobody is signed in. Unreadable entries are
    /// deleted and reported as [`AuthError::TokenCorrupted`].
    pub async fn retrieve_tokens(&self) -> Result<Option<AuthTokens>> {
        let data = self
            .secure_store
            .get_secret(TOKEN_STORAGE_KEY)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to read tokens from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        let Some(data) = data else {
            debug!("No stored tokens");
            return Ok(None);
        };

        match serde_json::from_slice::<AuthTokens>(&data) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                warn!(error = %e, "Stored tokens are corrupted, erasing");
                if let Err(delete_err) = self.secure_store.delete_secret(TOKEN_STORAGE_KEY).await {
                    warn!(error = %delete_err, "Failed to erase corrupted tokens");
                }
                Err(AuthError::TokenCorrupted(e.to_string()))
            }
        }
    }

    /// Erase stored tokens. Succeeds when nothing is stored.
    pub async fn delete_tokens(&self) -> Result<()> {
        self.secure_store
            .delete_secret(TOKEN_STORAGE_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;
        info!("Tokens deleted");
        Ok(())
    }

    pub async fn has_tokens(&self) -> Result<bool> {
        self.secure_store
            .has_secret(TOKEN_STORAGE_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }
}
