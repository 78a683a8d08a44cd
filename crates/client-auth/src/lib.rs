//! Client authentication for Docsight.
//!
//! This crate provides:
//! - Redemption of one-time third-party authorization codes, guarded by a
//!   TTL lock so a code is redeemed at most once per storage origin
//! - Code and credential exchange with a legacy fallback endpoint
//! - A bounded handshake that lets the shell adopt a new session before the
//!   login flow navigates away
//! - The application shell's session state, route guard and cold start
//! - Callback and login entry points that converge on one redemption path

mod api;
mod bus;
mod code_lock;
mod entry;
mod error;
mod handshake;
mod navigator;
mod oauth;
mod orchestrator;
mod runtime;
mod settings;
mod shell;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use api::{AuthApi, HttpAuthApi, LoginResponse};
pub use bus::{SessionBus, SessionEvent};
pub use code_lock::{
    code_digest, AuthorizationCodeLock, Clock, CodeLockGuard, LockRecord, ManualClock, SystemClock,
};
pub use entry::{
    CallbackEntryPoint, CallbackOutcome, LoginEntryPoint, LoginMountOutcome, SubmitOutcome,
};
pub use error::{AuthError, AuthResult};
pub use handshake::handshake_machine;
pub use handshake::{
    HandshakeCoordinator, HandshakeMachine, HandshakeMachineInput, HandshakeMachineState,
    HandshakeOutcome, HandshakeState,
};
pub use navigator::{Navigator, RecordingNavigator};
pub use oauth::{authorization_request, callback_target, AuthorizationRequest, CallbackParams};
pub use orchestrator::{LoginAttemptResult, LoginFailureKind, LoginOrchestrator};
pub use runtime::{AuthRuntime, AuthSnapshot};
pub use settings::{AuthSettings, IdentityProvider};
pub use shell::{AppShell, RouteDecision, ShellHandle};
