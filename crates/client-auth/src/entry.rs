//! Entry points that can observe a one-time code.
//!
//! The callback route is the only redeemer. The login screen forwards any code
//! it sees to the callback route instead of redeeming it, so both entries end
//! up on one code path.

use crate::bus::{SessionBus, SessionEvent};
use crate::code_lock::{code_digest, AuthorizationCodeLock};
use crate::handshake::{HandshakeCoordinator, HandshakeOutcome};
use crate::navigator::Navigator;
use crate::oauth::{self, AuthorizationRequest, CallbackParams};
use crate::orchestrator::{LoginAttemptResult, LoginOrchestrator};
use crate::settings::AuthSettings;
use crate::{AuthError, AuthResult};
use client_config_and_utils::Messages;
use client_storage::SessionStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// What a callback mount did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// Session stored and handed to the shell; navigated to `target`.
    LoggedIn {
        target: String,
        #[serde(skip)]
        handshake: HandshakeOutcome,
    },
    /// Redemption failed; navigated to the login screen.
    Failed { message: String },
    /// The provider redirected back with an error.
    ProviderError { error: String },
    /// No code in the URL.
    MissingCode,
    /// This entry point is already handling a code.
    AlreadyProcessing,
    /// Someone else holds the lock for this code.
    Abandoned,
}

/// What a login screen mount did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginMountOutcome {
    RedirectedToCallback { target: String },
    AlreadyLoggedIn { target: String },
    ShowForm,
}

/// Result of submitting the credential form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    LoggedIn {
        target: String,
        #[serde(skip)]
        handshake: HandshakeOutcome,
    },
    Failed { message: String },
}

/// Last steps shared by every successful exchange: store, hand off, navigate.
pub(crate) struct SessionHandoff {
    pub(crate) handshake: Arc<HandshakeCoordinator>,
    pub(crate) bus: SessionBus,
    pub(crate) navigator: Arc<dyn Navigator>,
    pub(crate) settings: Arc<AuthSettings>,
    pub(crate) messages: Messages,
}

impl SessionHandoff {
    /// On success returns where it navigated. On failure returns the message
    /// to show, after publishing `LoginFailed`.
    async fn complete(&self, result: LoginAttemptResult) -> Result<(String, HandshakeOutcome), String> {
        let message = result
            .message
            .clone()
            .unwrap_or_else(|| self.messages.login_failed().to_string());
        let Some(session) = result.into_session() else {
            return Err(self.fail(message));
        };
        let uid = session.user.uid.clone();

        let outcome = match self.handshake.establish(&session).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, uid = %uid, "Login succeeded but the session was not stored");
                return Err(self.fail(self.messages.session_not_saved().to_string()));
            }
        };

        self.bus.publish(SessionEvent::LoginSucceeded { uid });
        let target = self.settings.home_path.clone();
        self.navigator.navigate(&target);
        Ok((target, outcome))
    }

    fn fail(&self, message: String) -> String {
        self.bus.publish(SessionEvent::LoginFailed {
            message: message.clone(),
        });
        message
    }
}

/// The callback route: redeems the code it was opened with.
pub struct CallbackEntryPoint {
    lock: Arc<AuthorizationCodeLock>,
    orchestrator: Arc<LoginOrchestrator>,
    handoff: Arc<SessionHandoff>,
    /// Set on first mount and never reset.
    processing: AtomicBool,
}

impl CallbackEntryPoint {
    pub(crate) fn new(
        lock: Arc<AuthorizationCodeLock>,
        orchestrator: Arc<LoginOrchestrator>,
        handoff: Arc<SessionHandoff>,
    ) -> Self {
        Self {
            lock,
            orchestrator,
            handoff,
            processing: AtomicBool::new(false),
        }
    }

    /// Handle the redirect. Steps run in order: lock, exchange, store,
    /// publish, wait for confirmation or deadline, navigate.
    ///
    /// The code lock is released only after navigation, so another mount of
    /// the same code during the handshake is abandoned without a server call.
    pub async fn on_mount(&self, params: &CallbackParams) -> CallbackOutcome {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!("Callback already processing, ignoring repeated mount");
            return CallbackOutcome::AlreadyProcessing;
        }

        let login_path = &self.handoff.settings.login_path;

        if let Some(error) = &params.error {
            warn!(error = %error, "Identity provider returned an error");
            self.handoff
                .fail(self.handoff.messages.provider_denied().to_string());
            self.handoff.navigator.navigate(login_path);
            return CallbackOutcome::ProviderError {
                error: error.clone(),
            };
        }

        let Some(code) = params.code.as_deref() else {
            info!("Callback opened without a code");
            self.handoff.navigator.navigate(login_path);
            return CallbackOutcome::MissingCode;
        };
        let digest = code_digest(code);
        let code_id = &digest[..12];

        let ttl = self.handoff.settings.code_lock_ttl;
        let guard = match self.lock.acquire(code, ttl) {
            Ok(guard) => guard,
            Err(e) if !e.is_user_visible() => {
                info!(error = %e, code = code_id, "Abandoning redemption");
                return CallbackOutcome::Abandoned;
            }
            Err(e) => {
                warn!(error = %e, code = code_id, "Could not lock authorization code");
                let message = self.handoff.fail(self.handoff.messages.login_failed().to_string());
                self.handoff.navigator.navigate(login_path);
                return CallbackOutcome::Failed { message };
            }
        };

        self.handoff.bus.publish(SessionEvent::LoginStarted);
        let result = self.orchestrator.exchange_code(code).await;

        let outcome = match self.handoff.complete(result).await {
            Ok((target, handshake)) => CallbackOutcome::LoggedIn { target, handshake },
            Err(message) => {
                self.handoff.navigator.navigate(login_path);
                CallbackOutcome::Failed { message }
            }
        };
        // Held until navigation so a late mount of the same code sees contention.
        drop(guard);
        outcome
    }
}

/// The login screen.
pub struct LoginEntryPoint {
    store: SessionStore,
    orchestrator: Arc<LoginOrchestrator>,
    handoff: Arc<SessionHandoff>,
}

impl LoginEntryPoint {
    pub(crate) fn new(
        store: SessionStore,
        orchestrator: Arc<LoginOrchestrator>,
        handoff: Arc<SessionHandoff>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            handoff,
        }
    }

    /// Decide what the login screen does when opened with `params`.
    ///
    /// A code in the URL is forwarded to the callback route unredeemed.
    pub fn on_mount(&self, params: &CallbackParams) -> AuthResult<LoginMountOutcome> {
        let settings = &self.handoff.settings;

        if let Some(code) = params.code.as_deref() {
            let target = oauth::callback_target(&settings.callback_path, code, params.state.as_deref());
            info!("Login screen received a code, forwarding to callback");
            self.handoff.navigator.navigate(&target);
            return Ok(LoginMountOutcome::RedirectedToCallback { target });
        }

        if self.store.read()?.is_some() {
            let target = settings.home_path.clone();
            self.handoff.navigator.navigate(&target);
            return Ok(LoginMountOutcome::AlreadyLoggedIn { target });
        }

        Ok(LoginMountOutcome::ShowForm)
    }

    /// Log in with the credential form. Failures stay on the login screen.
    pub async fn submit_credentials(&self, username: &str, password: &str) -> SubmitOutcome {
        self.handoff.bus.publish(SessionEvent::LoginStarted);
        let result = self
            .orchestrator
            .exchange_credentials(username, password)
            .await;

        match self.handoff.complete(result).await {
            Ok((target, handshake)) => SubmitOutcome::LoggedIn { target, handshake },
            Err(message) => SubmitOutcome::Failed { message },
        }
    }

    /// Where the "log in with provider" button points.
    ///
    /// The provider is told to come back to the callback route on the API's
    /// origin.
    pub fn authorization_url(&self) -> AuthResult<AuthorizationRequest> {
        let settings = &self.handoff.settings;
        let provider = settings.identity_provider.as_ref().ok_or_else(|| {
            AuthError::Config("no identity provider configured".to_string())
        })?;
        let redirect_uri = Url::parse(&settings.api_url)?.join(&settings.callback_path)?;
        oauth::authorization_request(provider, redirect_uri.as_str())
    }
}
