//! Sign-in handshake state machine. One tagged state value plus an
//! explicit transition function; no I/O, no timers. The driver in
//! [`crate::auth::flow`] executes the returned effects. Keeping the
//! machine pure rules out contradictory flag combinations (both
//! second-factor dialogs open at once) and makes every row of the
//! protocol testable without a server.

/// Which second-factor branch a confirmation is traveling through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondFactor {
    Bind,
    Verify,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    /// Initial login call in flight.
    Submitting,
    /// Server answered "no secret bound"; provisioning call in flight.
    Provisioning,
    /// Bind dialog open, waiting for the operator's first code.
    NeedsBind,
    /// Verify dialog open, waiting for a code for the bound secret.
    NeedsVerify,
    /// Bind-confirm and/or login replay in flight.
    ConfirmingSecondFactor { via: SecondFactor },
    Authenticated,
    /// Terminal failure of the attempt; a `Reset` returns to `Idle`.
    Rejected,
}

impl HandshakeState {
    /// Busy states gate re-entrant submit/confirm triggers: a second
    /// user-triggered call while one is outstanding is ignored.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            HandshakeState::Submitting
                | HandshakeState::Provisioning
                | HandshakeState::ConfirmingSecondFactor { .. }
        )
    }

    /// States in which a 6-digit code may be confirmed.
    #[must_use]
    pub fn awaits_code(&self) -> bool {
        matches!(self, HandshakeState::NeedsBind | HandshakeState::NeedsVerify)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeEvent {
    SubmitRequested,
    /// `"200"` on the initial attempt.
    LoginSucceeded,
    /// `"202"`: no secret bound.
    BindRequired,
    /// `"203"`: secret bound, code required.
    VerifyRequired,
    /// Any other code, or a transport failure, on the initial attempt.
    LoginFailed,
    ProvisioningSucceeded,
    ProvisioningFailed,
    CodeConfirmed,
    /// The bind endpoint rejected the code; the dialog stays open.
    BindConfirmFailed,
    /// The bind endpoint accepted the code; replay the login.
    BindConfirmSucceeded,
    ReplaySucceeded,
    /// Replay rejected, transport failure, or an unexpected
    /// `"202"`/`"203"` on a replay.
    ReplayFailed,
    Reset,
}

/// Side effects the driver must perform after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    CallLogin,
    FetchProvisioning,
    OpenBindDialog,
    OpenVerifyDialog,
    ScheduleFocus,
    CallBindConfirm,
    CallReplay,
    /// Persist the session, fetch permissions, close dialogs, navigate.
    CompleteLogin,
    /// Close dialogs, show one error, refresh the CAPTCHA.
    FailAttempt,
    /// Show the server's message but keep the bind dialog open.
    SurfaceBindError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: HandshakeState,
    pub effects: Vec<Effect>,
}

/// Applies an event to a state. Pairs outside the table leave the state
/// unchanged with no effects, which is what makes duplicate triggers
/// idempotent.
#[must_use]
pub fn transition(state: &HandshakeState, event: &HandshakeEvent) -> Transition {
    use Effect::*;
    use HandshakeEvent as Ev;
    use HandshakeState as St;

    let (next, effects) = match (state, event) {
        (St::Idle, Ev::SubmitRequested) => (St::Submitting, vec![CallLogin]),

        (St::Submitting, Ev::LoginSucceeded) => (St::Authenticated, vec![CompleteLogin]),
        (St::Submitting, Ev::BindRequired) => (St::Provisioning, vec![FetchProvisioning]),
        (St::Submitting, Ev::VerifyRequired) => {
            (St::NeedsVerify, vec![OpenVerifyDialog, ScheduleFocus])
        }
        (St::Submitting, Ev::LoginFailed) => (St::Rejected, vec![FailAttempt]),

        (St::Provisioning, Ev::ProvisioningSucceeded) => {
            (St::NeedsBind, vec![OpenBindDialog, ScheduleFocus])
        }
        (St::Provisioning, Ev::ProvisioningFailed) => (St::Rejected, vec![FailAttempt]),

        (St::NeedsBind, Ev::CodeConfirmed) => (
            St::ConfirmingSecondFactor {
                via: SecondFactor::Bind,
            },
            vec![CallBindConfirm],
        ),
        (St::NeedsVerify, Ev::CodeConfirmed) => (
            St::ConfirmingSecondFactor {
                via: SecondFactor::Verify,
            },
            vec![CallReplay],
        ),

        (
            St::ConfirmingSecondFactor {
                via: SecondFactor::Bind,
            },
            Ev::BindConfirmSucceeded,
        ) => (
            St::ConfirmingSecondFactor {
                via: SecondFactor::Bind,
            },
            vec![CallReplay],
        ),
        (
            St::ConfirmingSecondFactor {
                via: SecondFactor::Bind,
            },
            Ev::BindConfirmFailed,
        ) => (St::NeedsBind, vec![SurfaceBindError, ScheduleFocus]),

        (St::ConfirmingSecondFactor { .. }, Ev::ReplaySucceeded) => {
            (St::Authenticated, vec![CompleteLogin])
        }
        (St::ConfirmingSecondFactor { .. }, Ev::ReplayFailed) => (St::Rejected, vec![FailAttempt]),

        (St::Rejected, Ev::Reset) => (St::Idle, vec![]),

        // Everything else is ignored.
        (current, _) => (current.clone(), vec![]),
    };

    Transition { next, effects }
}
