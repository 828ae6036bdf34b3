//! Handshake driver. Owns the captured credentials, the live CAPTCHA
//! challenge, and the state machine, and executes the machine's effects
//! against the API client, the session establisher, and two narrow
//! capability traits for the front-end. The driver never reaches into a
//! terminal or a clock directly, so the whole protocol is exercisable
//! from tests.

use crate::{
    api::{
        types::{BindRequest, CaptchaChallenge, LoginMode, LoginOutcome, LoginRequest, Session},
        ApiClient, ApiError,
    },
    auth::{
        machine::{transition, Effect, HandshakeEvent, HandshakeState},
        session::SessionEstablisher,
    },
};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Delay before moving input focus to the code field, so the dialog's
/// open transition can finish. UI nicety only; never blocks a state
/// transition.
pub const FOCUS_DELAY: Duration = Duration::from_millis(150);

const GENERIC_FAILURE: &str = "Sign-in failed. Please try again.";

static CODE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn code_pattern() -> &'static Regex {
    CODE_PATTERN.get_or_init(|| Regex::new(r"^[0-9]{6}$").expect("valid code pattern"))
}

/// A second-factor code is exactly six ASCII digits.
#[must_use]
pub fn is_valid_code(code: &str) -> bool {
    code_pattern().is_match(code)
}

/// Client-side validation failures. Reported inline; no network call is
/// made and the state machine does not move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    MissingAccount,
    MissingSecret,
    MissingCaptcha,
    CaptchaNotLoaded,
    MalformedCode,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingAccount => write!(formatter, "Account is required."),
            ValidationError::MissingSecret => write!(formatter, "Password is required."),
            ValidationError::MissingCaptcha => write!(formatter, "CAPTCHA text is required."),
            ValidationError::CaptchaNotLoaded => {
                write!(formatter, "No CAPTCHA challenge loaded. Refresh and retry.")
            }
            ValidationError::MalformedCode => {
                write!(formatter, "The authenticator code must be 6 digits.")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Primary credentials captured at submit time. Immutable for the
/// lifetime of the attempt and dropped when it resolves, so a replay can
/// only ever carry the credentials that produced the second-factor
/// challenge in the first place.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub account: String,
    pub secret: SecretString,
    pub captcha_key: String,
    pub captcha_text: String,
}

impl Credentials {
    fn login_request(&self, mode: LoginMode, code: Option<String>) -> LoginRequest {
        LoginRequest {
            account: self.account.clone(),
            secret: self.secret.expose_secret().to_string(),
            captcha_key: self.captcha_key.clone(),
            captcha_text: self.captcha_text.clone(),
            mode,
            authenticator_code: code,
        }
    }
}

/// Front-end affordances the handshake drives. All methods are
/// infallible; an implementation whose view is gone must no-op rather
/// than fail.
pub trait HandshakeUi: Send + Sync {
    fn open_bind_dialog(&self, otpauth: &str);
    fn open_verify_dialog(&self);
    fn focus_code_input(&self);
    fn close_dialogs(&self);
    fn show_error(&self, message: &str);
}

/// Post-login navigation. Called exactly once per successful handshake.
pub trait Navigator: Send + Sync {
    fn navigate(&self, destination: &str);
}

/// Cancelable deferred focus. The task is aborted whenever the state
/// moves on before the delay elapses.
#[derive(Default)]
struct FocusScheduler {
    handle: Option<JoinHandle<()>>,
}

impl FocusScheduler {
    fn schedule(&mut self, ui: Arc<dyn HandshakeUi>) {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(FOCUS_DELAY).await;
            ui.focus_code_input();
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for FocusScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The sign-in handshake controller: sequences the CAPTCHA, the login
/// attempt, the bind/verify second-factor branches, the login replay,
/// and session establishment.
pub struct Handshake {
    api: ApiClient,
    ui: Arc<dyn HandshakeUi>,
    navigator: Arc<dyn Navigator>,
    establisher: SessionEstablisher,
    state: HandshakeState,
    captcha: Option<CaptchaChallenge>,
    attempt: Option<Credentials>,
    operator: Option<String>,
    otpauth: Option<String>,
    pending_code: Option<String>,
    pending_session: Option<Session>,
    pending_error: Option<String>,
    destination: String,
    navigated: bool,
    focus: FocusScheduler,
}

impl Handshake {
    #[must_use]
    pub fn new(
        api: ApiClient,
        ui: Arc<dyn HandshakeUi>,
        navigator: Arc<dyn Navigator>,
        establisher: SessionEstablisher,
    ) -> Self {
        Self {
            api,
            ui,
            navigator,
            establisher,
            state: HandshakeState::Idle,
            captcha: None,
            attempt: None,
            operator: None,
            otpauth: None,
            pending_code: None,
            pending_session: None,
            pending_error: None,
            destination: "/".to_string(),
            navigated: false,
            focus: FocusScheduler::default(),
        }
    }

    /// Sets the destination navigated to after a successful sign-in.
    #[must_use]
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = destination.to_string();
        self
    }

    #[must_use]
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    #[must_use]
    pub fn captcha(&self) -> Option<&CaptchaChallenge> {
        self.captcha.as_ref()
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Fetches a fresh challenge, replacing the live one.
    pub async fn refresh_captcha(&mut self) -> Result<&CaptchaChallenge, ApiError> {
        let challenge = self.api.captcha().await?;
        Ok(self.captcha.insert(challenge))
    }

    /// Validates and submits the primary credentials. Ignored while an
    /// attempt is in flight; validation failures make no network call and
    /// do not move the state machine.
    #[instrument(skip_all)]
    pub async fn submit(
        &mut self,
        account: &str,
        secret: SecretString,
        captcha_text: &str,
    ) -> Result<(), ValidationError> {
        if self.state != HandshakeState::Idle {
            debug!("submit ignored: handshake not idle");
            return Ok(());
        }

        let account = account.trim();
        if account.is_empty() {
            return Err(ValidationError::MissingAccount);
        }
        if secret.expose_secret().trim().is_empty() {
            return Err(ValidationError::MissingSecret);
        }
        let captcha_text = captcha_text.trim();
        if captcha_text.is_empty() {
            return Err(ValidationError::MissingCaptcha);
        }
        let Some(challenge) = &self.captcha else {
            return Err(ValidationError::CaptchaNotLoaded);
        };

        self.attempt = Some(Credentials {
            account: account.to_string(),
            secret,
            captcha_key: challenge.key.clone(),
            captcha_text: captcha_text.to_string(),
        });

        self.apply(HandshakeEvent::SubmitRequested).await;

        Ok(())
    }

    /// Confirms a 6-digit code in either second-factor dialog. Ignored
    /// outside the two code-entry states.
    #[instrument(skip_all)]
    pub async fn confirm(&mut self, code: &str) -> Result<(), ValidationError> {
        if !self.state.awaits_code() {
            debug!("confirm ignored: no code-entry dialog open");
            return Ok(());
        }

        let code = code.trim();
        if !is_valid_code(code) {
            return Err(ValidationError::MalformedCode);
        }

        self.pending_code = Some(code.to_string());
        self.apply(HandshakeEvent::CodeConfirmed).await;

        Ok(())
    }

    async fn apply(&mut self, event: HandshakeEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let step = transition(&self.state, &event);
            debug!("handshake: {:?} --{:?}--> {:?}", self.state, event, step.next);
            self.state = step.next;

            for effect in step.effects {
                if let Some(follow_up) = self.perform(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn perform(&mut self, effect: Effect) -> Option<HandshakeEvent> {
        match effect {
            Effect::CallLogin => self.call_login().await,
            Effect::FetchProvisioning => self.fetch_provisioning().await,
            Effect::OpenBindDialog => {
                if let Some(otpauth) = &self.otpauth {
                    self.ui.open_bind_dialog(otpauth);
                }
                None
            }
            Effect::OpenVerifyDialog => {
                self.ui.open_verify_dialog();
                None
            }
            Effect::ScheduleFocus => {
                self.focus.schedule(self.ui.clone());
                None
            }
            Effect::CallBindConfirm => self.call_bind_confirm().await,
            Effect::CallReplay => self.call_replay().await,
            Effect::CompleteLogin => {
                self.complete_login().await;
                None
            }
            Effect::FailAttempt => Some(self.fail_attempt().await),
            Effect::SurfaceBindError => {
                let message = self
                    .pending_error
                    .take()
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                self.ui.show_error(&message);
                None
            }
        }
    }

    async fn call_login(&mut self) -> Option<HandshakeEvent> {
        let Some(credentials) = self.attempt.clone() else {
            warn!("login requested without captured credentials");
            return Some(HandshakeEvent::LoginFailed);
        };

        let request = credentials.login_request(LoginMode::Login, None);

        match self.api.login(&request).await {
            Ok(LoginOutcome::Success(session)) => {
                self.pending_session = Some(session);
                Some(HandshakeEvent::LoginSucceeded)
            }
            Ok(LoginOutcome::NeedsBind { operator }) => {
                let operator = if operator.is_empty() {
                    credentials.account.clone()
                } else {
                    operator
                };
                self.operator = Some(operator);
                Some(HandshakeEvent::BindRequired)
            }
            Ok(LoginOutcome::NeedsVerify) => Some(HandshakeEvent::VerifyRequired),
            Ok(LoginOutcome::Rejected { message }) => {
                self.pending_error = message;
                Some(HandshakeEvent::LoginFailed)
            }
            Err(err) => {
                // Transport failure is treated like an explicit rejection.
                self.pending_error = Some(err.to_string());
                Some(HandshakeEvent::LoginFailed)
            }
        }
    }

    async fn fetch_provisioning(&mut self) -> Option<HandshakeEvent> {
        let operator = self.operator.clone().unwrap_or_default();

        match self.api.provision_secret(&operator).await {
            Ok(context) => match context.decode() {
                Ok(otpauth) => {
                    self.otpauth = Some(otpauth);
                    Some(HandshakeEvent::ProvisioningSucceeded)
                }
                Err(err) => {
                    self.pending_error = Some(err.to_string());
                    Some(HandshakeEvent::ProvisioningFailed)
                }
            },
            Err(err) => {
                self.pending_error = Some(err.to_string());
                Some(HandshakeEvent::ProvisioningFailed)
            }
        }
    }

    async fn call_bind_confirm(&mut self) -> Option<HandshakeEvent> {
        let Some(credentials) = self.attempt.as_ref() else {
            warn!("bind confirm without captured credentials");
            return Some(HandshakeEvent::ReplayFailed);
        };
        let Some(code) = self.pending_code.clone() else {
            warn!("bind confirm without a pending code");
            return Some(HandshakeEvent::ReplayFailed);
        };

        let request = BindRequest {
            account: credentials.account.clone(),
            code,
        };

        match self.api.bind_secret(&request).await {
            Ok(()) => Some(HandshakeEvent::BindConfirmSucceeded),
            Err(err) => {
                self.pending_error = Some(err.to_string());
                Some(HandshakeEvent::BindConfirmFailed)
            }
        }
    }

    async fn call_replay(&mut self) -> Option<HandshakeEvent> {
        let Some(credentials) = self.attempt.clone() else {
            warn!("replay without captured credentials");
            return Some(HandshakeEvent::ReplayFailed);
        };
        let Some(code) = self.pending_code.clone() else {
            warn!("replay without a confirmed code");
            return Some(HandshakeEvent::ReplayFailed);
        };

        let request = credentials.login_request(LoginMode::Confirm, Some(code));

        match self.api.login(&request).await {
            Ok(LoginOutcome::Success(session)) => {
                self.pending_session = Some(session);
                Some(HandshakeEvent::ReplaySucceeded)
            }
            // A replay never legitimately asks for a second factor again.
            Ok(LoginOutcome::NeedsBind { .. } | LoginOutcome::NeedsVerify) => {
                self.pending_error = Some(GENERIC_FAILURE.to_string());
                Some(HandshakeEvent::ReplayFailed)
            }
            Ok(LoginOutcome::Rejected { message }) => {
                self.pending_error = message;
                Some(HandshakeEvent::ReplayFailed)
            }
            Err(err) => {
                self.pending_error = Some(err.to_string());
                Some(HandshakeEvent::ReplayFailed)
            }
        }
    }

    async fn complete_login(&mut self) {
        self.focus.cancel();
        self.ui.close_dialogs();

        let Some(session) = self.pending_session.take() else {
            warn!("authenticated without a session payload");
            return;
        };

        self.establisher.establish(&self.api, session).await;

        self.clear_attempt();

        if !self.navigated {
            self.navigated = true;
            self.navigator.navigate(&self.destination);
        }
    }

    /// Shared terminal-failure path: one visible error, dialogs closed,
    /// CAPTCHA refreshed defensively whether or not the server consumed
    /// the previous one.
    async fn fail_attempt(&mut self) -> HandshakeEvent {
        self.focus.cancel();
        self.ui.close_dialogs();

        let message = self
            .pending_error
            .take()
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());
        self.ui.show_error(&message);

        self.clear_attempt();

        match self.api.captcha().await {
            Ok(challenge) => self.captcha = Some(challenge),
            Err(err) => {
                warn!("CAPTCHA refresh failed: {err}");
                self.captcha = None;
            }
        }

        HandshakeEvent::Reset
    }

    fn clear_attempt(&mut self) {
        self.attempt = None;
        self.operator = None;
        self.otpauth = None;
        self.pending_code = None;
        self.pending_session = None;
        self.pending_error = None;
    }
}
