use std::time::Duration;

use reqwest::{Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use ticketdesk_core::{RateLimitPayload, RetryAfterHint};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// User record returned by the backend and persisted for the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Token plus user record, as issued at login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub token: String,
    pub user: AuthenticatedUser,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend signalled too-many-requests; the payload carries the
    /// retry hint and any limit/window fields it chose to include.
    #[error("{}", .0.friendly_message())]
    RateLimited(RateLimitPayload),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message} (status {status})")]
    Status { status: u16, message: String },
    #[error("unexpected response shape: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Wait hint for rate-limited failures; `None` for everything else.
    pub fn retry_wait(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited(payload) => Some(payload.retry_wait()),
            _ => None,
        }
    }

    /// Message fit for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::RateLimited(payload) => payload.friendly_message(),
            ApiError::Http(err) if err.is_timeout() => {
                "The server took too long to respond. Please try again.".to_owned()
            }
            ApiError::Http(_) => {
                "Could not reach the server. Check your connection and try again.".to_owned()
            }
            ApiError::Status { message, .. } => message.clone(),
            ApiError::InvalidResponse(_) => {
                "The server returned an unexpected response.".to_owned()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// REST base URL, e.g. `https://backend.example/api`.
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Thin REST client for the handful of account endpoints this layer
/// owns. Anything non-2xx is translated into [`ApiError`]; callers never
/// see raw status codes.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SessionRecord, ApiError> {
        let response = self
            .http
            .post(self.endpoint("auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json::<SessionRecord>()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    pub async fn change_password(
        &self,
        token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.endpoint("auth/change-password"))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "currentPassword": current_password,
                "newPassword": new_password,
            }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.endpoint("auth/forgot-password"))
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited(rate_limit_payload(response).await));
    }

    let message = error_message(response)
        .await
        .unwrap_or_else(|| default_status_message(status));
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Decodes the 429 body, falling back to the `Retry-After` header when
/// the body carries no hint. An undecodable body degrades to an empty
/// payload (which in turn degrades to the default wait) rather than an
/// error.
async fn rate_limit_payload(response: Response) -> RateLimitPayload {
    let header_seconds = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    let mut payload = match response.json::<RateLimitPayload>().await {
        Ok(payload) => payload,
        Err(err) => {
            warn!("undecodable rate limit body: {err}");
            RateLimitPayload::default()
        }
    };

    if payload.retry_after.is_none()
        && payload.retry_after_ms.is_none()
        && let Some(seconds) = header_seconds
    {
        payload.retry_after = Some(RetryAfterHint::Seconds(seconds));
    }
    payload
}

async fn error_message(response: Response) -> Option<String> {
    let body = response.json::<ErrorBody>().await.ok()?;
    body.message
        .or(body.error)
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

fn default_status_message(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED => "Invalid credentials.".to_owned(),
        StatusCode::FORBIDDEN => "You do not have permission to do that.".to_owned(),
        _ => format!("Request failed with status {}", status.as_u16()),
    }
}
