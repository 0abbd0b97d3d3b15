//! Blocking REST client for the telemetry backend.

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{ApiError, API_TIMEOUT, DEFAULT_API_URL};
use crate::store::RecordBatch;

// ==================== Response Types ====================

/// Standard envelope the backend wraps payloads in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

/// Anonymous identity token minted by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppToken {
    pub token: String,
    pub user_id: Option<String>,
}

/// Registration state of the identity behind a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginState {
    pub registered: bool,
    pub user_name: Option<String>,
}

/// What the backend did with a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Records accepted and stored.
    Accepted,
    /// The account behind the token no longer exists; the records
    /// have no home and never will.
    AccountDeactivated,
}

/// True when an error response means the account was deactivated
/// rather than the token merely expiring.
pub fn is_deactivated_response(status: u16, message: &str) -> bool {
    (status == 403 || status == 410) && message.to_lowercase().contains("deactivat")
}

// ==================== Client ====================

/// Blocking client for the backend REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Creates a client against the default backend.
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::with_url(DEFAULT_API_URL)
    }

    /// Creates a client against a specific backend URL.
    pub fn with_url(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Attaches an identity token for authenticated calls.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    #[allow(dead_code)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn token(&self) -> Result<&str, ApiError> {
        self.token.as_deref().ok_or(ApiError::MissingToken)
    }

    /// Mints a fresh anonymous identity token. Unauthenticated.
    pub fn app_token(&self) -> Result<AppToken, ApiError> {
        let response = self
            .client
            .get(format!("{}/data/apptoken", self.base_url))
            .send()?;

        let response = check(response)?;
        let body: ApiResponse<AppToken> = response.json()?;
        Ok(body.data)
    }

    /// Confirms the backend recognizes our token.
    pub fn ping_user(&self) -> Result<(), ApiError> {
        let token = self.token()?;
        let response = self
            .client
            .get(format!("{}/users/ping", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .send()?;

        check(response)?;
        Ok(())
    }

    /// Fetches the registration state behind our token.
    pub fn plugin_state(&self) -> Result<PluginState, ApiError> {
        let token = self.token()?;
        let response = self
            .client
            .get(format!("{}/users/plugin/state", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .send()?;

        let response = check(response)?;
        let body: ApiResponse<PluginState> = response.json()?;
        Ok(body.data)
    }

    /// Submits a batch of telemetry records.
    ///
    /// Deactivation is reported as a successful [`BatchOutcome`], not
    /// an error: the caller must treat it as terminal and stop
    /// retrying the batch.
    pub fn send_batch(&self, batch: &RecordBatch) -> Result<BatchOutcome, ApiError> {
        let token = self.token()?;
        let response = self
            .client
            .post(format!("{}/data/batch", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .json(batch)
            .send()?;

        if response.status().is_success() {
            return Ok(BatchOutcome::Accepted);
        }

        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Unknown error".to_string());

        // Deactivation shares status codes with auth expiry, so it
        // must be recognized first.
        if is_deactivated_response(status, &message) {
            return Ok(BatchOutcome::AccountDeactivated);
        }

        if status == 401 || status == 403 {
            return Err(ApiError::AuthExpired);
        }

        Err(ApiError::Server { status, message })
    }
}

/// Maps a non-success response to the right error.
fn check(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    if status == 401 || status == 403 {
        return Err(ApiError::AuthExpired);
    }

    let message = response
        .text()
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ApiError::Server { status, message })
}
