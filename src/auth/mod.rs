//! Sign-in handshake core. The state machine in [`machine`] decides what
//! happens next; the driver in [`flow`] talks to the network and the
//! front-end; [`session`] owns the persisted session and the permission
//! set. This module touches security boundaries and must avoid logging
//! secrets or token material.

pub mod flow;
pub mod machine;
pub mod session;

pub use flow::{Handshake, HandshakeUi, Navigator, ValidationError};
pub use machine::{HandshakeEvent, HandshakeState, SecondFactor};
pub use session::{FileSessionStore, SessionEstablisher, SessionHandle, SessionStore};
