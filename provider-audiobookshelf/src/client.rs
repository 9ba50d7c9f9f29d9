//! Authenticated request plumbing.
//!
//! Every call is bearer-authenticated, deadline-bounded and classified into
//! a [`RemoteError`] kind before it leaves this module.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use core_auth::TokenProvider;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{RemoteError, Result};

/// Low-level client for the audiobook server API.
#[derive(Clone)]
pub struct ApiClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a server-relative path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn access_token(&self) -> Result<String> {
        self.tokens
            .access_token()
            .await
            .ok_or(RemoteError::NotAuthenticated)
    }

    /// Send `method path` with an optional JSON body.
    ///
    /// Returns the response for any 2xx status. Idempotent requests are
    /// replayed on transient failures by the HTTP bridge; the whole exchange,
    /// retries included, is bounded by `deadline`.
    #[instrument(skip(self, body), fields(method = %method, path = %path))]
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
        deadline: Duration,
    ) -> Result<HttpResponse> {
        let token = self.access_token().await?;

        let mut request = HttpRequest::new(method, self.url(path))
            .bearer_token(token)
            .header("Accept", "application/json")
            .timeout(deadline);
        if let Some(body) = body {
            request = request.json(body)?;
        }

        let policy = if method.is_idempotent() {
            self.retry_policy
        } else {
            RetryPolicy::none()
        };

        let response = match timeout(
            deadline,
            self.http_client.execute_with_retry(request, policy),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Request failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Request timed out");
                return Err(RemoteError::Timeout(format!(
                    "{} {} exceeded {:?}",
                    method, path, deadline
                )));
            }
        };

        Self::classify(response, path)
    }

    /// `request` without a body.
    pub async fn send(&self, method: HttpMethod, path: &str, deadline: Duration) -> Result<HttpResponse> {
        self.request::<()>(method, path, None, deadline).await
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, deadline: Duration) -> Result<T> {
        let response = self.send(HttpMethod::Get, path, deadline).await?;
        response
            .json()
            .map_err(|e| RemoteError::Parse(format!("{}: {}", path, e)))
    }

    fn classify(response: HttpResponse, path: &str) -> Result<HttpResponse> {
        let status = response.status;
        if response.is_success() {
            debug!(status, "Request succeeded");
            return Ok(response);
        }

        match status {
            401 | 403 => Err(RemoteError::Unauthorized { status }),
            404 => Err(RemoteError::NotFound {
                path: path.to_string(),
            }),
            _ => {
                let message = response
                    .text()
                    .map(|t| t.chars().take(200).collect::<String>())
                    .unwrap_or_default();
                Err(RemoteError::Api { status, message })
            }
        }
    }
}
