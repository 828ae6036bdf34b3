//! Request and response types for the back-office admin API. The login
//! endpoint answers with a coded envelope rather than plain HTTP status
//! codes; the helpers here turn that envelope into a typed outcome so
//! callers never branch on raw strings.

use crate::api::error::ApiError;
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

/// Login accepted, session payload attached.
pub const CODE_OK: &str = "200";
/// No authenticator secret bound to the account yet.
pub const CODE_BIND_REQUIRED: &str = "202";
/// An authenticator secret is bound; a 6-digit code is required.
pub const CODE_VERIFY_REQUIRED: &str = "203";

/// Wire envelope shared by the coded admin endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    Login,
    Confirm,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginRequest {
    pub account: String,
    pub secret: String,
    pub captcha_key: String,
    pub captcha_text: String,
    pub mode: LoginMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_code: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub account: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Session summary returned on a successful login and persisted between
/// runs. Contains the bearer token; must never be logged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub profile: UserProfile,
}

/// Typed outcome of a call to the login endpoint.
#[derive(Clone, Debug)]
pub enum LoginOutcome {
    Success(Session),
    /// `"202"`: the envelope message carries the operator identity to use
    /// for provisioning.
    NeedsBind { operator: String },
    NeedsVerify,
    Rejected { message: Option<String> },
}

impl LoginOutcome {
    /// Maps a login envelope onto its outcome. Unknown codes are
    /// rejections; a `"200"` without a session payload is a parse error.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ApiError> {
        match envelope.code.as_str() {
            CODE_OK => {
                let data = envelope.data.ok_or_else(|| {
                    ApiError::Parse("Login succeeded but no session payload".to_string())
                })?;
                let session: Session = serde_json::from_value(data)
                    .map_err(|err| ApiError::Parse(format!("Invalid session payload: {err}")))?;
                Ok(LoginOutcome::Success(session))
            }
            CODE_BIND_REQUIRED => Ok(LoginOutcome::NeedsBind {
                operator: envelope.message.unwrap_or_default(),
            }),
            CODE_VERIFY_REQUIRED => Ok(LoginOutcome::NeedsVerify),
            _ => Ok(LoginOutcome::Rejected {
                message: envelope.message,
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CaptchaResponse {
    pub image: String,
    pub key: String,
}

/// A live CAPTCHA challenge: decoded image bytes plus the opaque key the
/// server expects back on login. Exactly one challenge is live at a time.
#[derive(Clone, Debug)]
pub struct CaptchaChallenge {
    pub image: Vec<u8>,
    pub key: String,
}

impl CaptchaChallenge {
    pub fn from_response(response: CaptchaResponse) -> Result<Self, ApiError> {
        let image = Base64::decode_vec(&response.image)
            .map_err(|err| ApiError::Parse(format!("Invalid CAPTCHA image: {err}")))?;
        Ok(Self {
            image,
            key: response.key,
        })
    }
}

/// The provisioning endpoint expects a full operator profile; only the
/// account is meaningful, the remaining fields are schema placeholders.
#[derive(Clone, Debug, Serialize)]
pub struct ProvisioningRequest {
    pub account: String,
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub role_id: u32,
}

impl ProvisioningRequest {
    #[must_use]
    pub fn for_account(account: &str) -> Self {
        Self {
            account: account.to_string(),
            display_name: String::new(),
            email: String::new(),
            phone: String::new(),
            role_id: 0,
        }
    }
}

/// Base64 scannable payload returned by the provisioning endpoint. Lives
/// only between a `"202"` login answer and a successful bind-confirm.
#[derive(Clone, Debug)]
pub struct ProvisioningContext {
    pub payload: String,
}

impl ProvisioningContext {
    /// Decodes the payload into the `otpauth://` text rendered as a QR
    /// code.
    pub fn decode(&self) -> Result<String, ApiError> {
        let bytes = Base64::decode_vec(&self.payload)
            .map_err(|err| ApiError::Parse(format!("Invalid provisioning payload: {err}")))?;
        String::from_utf8(bytes)
            .map_err(|err| ApiError::Parse(format!("Invalid provisioning payload: {err}")))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BindRequest {
    pub account: String,
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionUser {
    pub role_id: u32,
    pub account: String,
}

/// Authorization set fetched after a session is established. On fetch
/// failure a minimal fallback is installed instead; see
/// [`crate::auth::session::fallback_permission_set`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub menu: Vec<MenuEntry>,
    pub user: PermissionUser,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub name: String,
    pub version: String,
    pub build: String,
}
