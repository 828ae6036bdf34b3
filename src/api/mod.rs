//! HTTP client for the remote back-office admin service. All handshake
//! traffic goes through here: one `reqwest` client with a fixed user agent
//! and timeout, per-request `x-request-id` correlation, and a hook that
//! clears the persisted session whenever a 401 is observed.

pub mod error;
pub mod types;

pub use error::ApiError;

use crate::api::types::{
    BindRequest, CaptchaChallenge, CaptchaResponse, Envelope, HealthResponse, LoginOutcome,
    LoginRequest, PermissionSet, ProvisioningContext, ProvisioningRequest,
};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};
use ulid::Ulid;
use url::Url;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Maximum number of error body characters surfaced to the operator.
const MAX_ERROR_CHARS: usize = 200;

/// Builds an absolute endpoint URL from the configured base, validating
/// scheme, host, and port.
pub fn endpoint_url(base_url: &str, endpoint: &str) -> Result<String, ApiError> {
    let url = Url::parse(base_url)
        .map_err(|err| ApiError::Config(format!("Error parsing URL: {err}")))?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| ApiError::Config("Error parsing URL: no host specified".to_string()))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => {
                return Err(ApiError::Config(format!(
                    "Error parsing URL: unsupported scheme {scheme}"
                )))
            }
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{endpoint}");

    debug!("endpoint URL: {}", endpoint);

    Ok(endpoint_url)
}

/// Trims and truncates an HTTP error body for display.
fn sanitize_body(body: String) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        // Validate the base URL up front so every later call can assume it.
        endpoint_url(base_url, "/")?;

        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| ApiError::Config(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            on_unauthorized: None,
        })
    }

    /// Registers the hook invoked whenever any response comes back 401.
    /// The shared session store uses this to clear stale credentials.
    #[must_use]
    pub fn with_unauthorized_hook(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = Some(hook);
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let url = endpoint_url(&self.base_url, endpoint)?;
        let response = self
            .http
            .get(&url)
            .header("x-request-id", Ulid::new().to_string())
            .send()
            .await?;
        self.handle_json_response(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = endpoint_url(&self.base_url, endpoint)?;
        let response = self
            .http
            .post(&url)
            .header("x-request-id", Ulid::new().to_string())
            .json(body)
            .send()
            .await?;
        self.handle_json_response(response).await
    }

    async fn handle_json_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            if let Some(hook) = &self.on_unauthorized {
                hook();
            }
        }

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|err| ApiError::Parse(format!("Failed to decode response: {err}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Http {
                status: status.as_u16(),
                message: sanitize_body(body),
            })
        }
    }

    /// Unwraps a coded envelope, mapping any non-`"200"` code to an error.
    fn envelope_data(envelope: Envelope) -> Result<Option<serde_json::Value>, ApiError> {
        if envelope.code == types::CODE_OK {
            Ok(envelope.data)
        } else {
            Err(ApiError::Http {
                status: envelope.code.parse::<u16>().unwrap_or(0),
                message: sanitize_body(envelope.message.unwrap_or_default()),
            })
        }
    }

    /// Fetches a fresh CAPTCHA challenge, invalidating the previous key
    /// server-side.
    #[instrument(skip_all)]
    pub async fn captcha(&self) -> Result<CaptchaChallenge, ApiError> {
        let response: CaptchaResponse = self.get_json("/v1/auth/captcha").await?;
        CaptchaChallenge::from_response(response)
    }

    /// Submits a login attempt (initial or replay) and maps the coded
    /// envelope onto a typed outcome.
    #[instrument(skip_all, fields(mode = ?request.mode))]
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, ApiError> {
        let envelope: Envelope = self.post_json("/v1/auth/login", request).await?;
        LoginOutcome::from_envelope(envelope)
    }

    /// Requests a new authenticator secret for the operator. Only the
    /// account field of the profile is meaningful.
    #[instrument(skip_all)]
    pub async fn provision_secret(&self, operator: &str) -> Result<ProvisioningContext, ApiError> {
        let request = ProvisioningRequest::for_account(operator);
        let envelope: Envelope = self.post_json("/v1/auth/totp/provision", &request).await?;
        let data = Self::envelope_data(envelope)?
            .ok_or_else(|| ApiError::Parse("Provisioning returned no payload".to_string()))?;
        let payload: String = serde_json::from_value(data)
            .map_err(|err| ApiError::Parse(format!("Invalid provisioning payload: {err}")))?;
        Ok(ProvisioningContext { payload })
    }

    /// Registers the provisioned secret against the account using the
    /// operator's first 6-digit code.
    #[instrument(skip_all)]
    pub async fn bind_secret(&self, request: &BindRequest) -> Result<(), ApiError> {
        let envelope: Envelope = self.post_json("/v1/auth/totp/bind", request).await?;
        Self::envelope_data(envelope)?;
        Ok(())
    }

    /// Fetches the authorization set for the signed-in operator.
    #[instrument(skip_all)]
    pub async fn permissions(&self) -> Result<PermissionSet, ApiError> {
        self.get_json("/v1/auth/permissions").await
    }

    /// Service health probe, used for a best-effort startup banner.
    #[instrument(skip_all)]
    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.get_json("/health").await
    }
}
