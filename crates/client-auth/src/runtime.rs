//! Client-oriented authentication runtime.
//!
//! Wires storage, the code lock, the orchestrator, the session bus and the
//! shell together, so callers only deal with entry points and status.

use crate::api::{AuthApi, HttpAuthApi};
use crate::bus::{SessionBus, SessionEvent};
use crate::code_lock::{AuthorizationCodeLock, Clock, SystemClock};
use crate::entry::{CallbackEntryPoint, LoginEntryPoint, SessionHandoff};
use crate::handshake::HandshakeCoordinator;
use crate::navigator::Navigator;
use crate::orchestrator::LoginOrchestrator;
use crate::settings::AuthSettings;
use crate::shell::AppShell;
use crate::{AuthError, AuthResult};
use client_config_and_utils::{Config, Messages};
use client_storage::{KeyValueStorage, SessionStore, UserRecord};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Snapshot of authentication state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSnapshot {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRecord>,
}

/// Shared client auth runtime.
#[derive(Clone)]
pub struct AuthRuntime {
    settings: Arc<AuthSettings>,
    store: SessionStore,
    lock: Arc<AuthorizationCodeLock>,
    api: Arc<dyn AuthApi>,
    orchestrator: Arc<LoginOrchestrator>,
    bus: SessionBus,
    shell: Arc<AppShell>,
    handoff: Arc<SessionHandoff>,
}

impl AuthRuntime {
    /// Create a runtime talking to the configured API over HTTP.
    pub fn from_config(
        config: &Config,
        storage: Arc<dyn KeyValueStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> AuthResult<Self> {
        let settings = AuthSettings::from_config(config)?;
        let api = Arc::new(HttpAuthApi::new(
            &settings.api_url,
            &settings.legacy_exchange_path,
        )?);
        Ok(Self::new(settings, storage, api, navigator))
    }

    pub fn new(
        settings: AuthSettings,
        storage: Arc<dyn KeyValueStorage>,
        api: Arc<dyn AuthApi>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_clock(settings, storage, api, navigator, Arc::new(SystemClock))
    }

    /// Same as [`AuthRuntime::new`] with a custom clock for lock expiry.
    pub fn with_clock(
        settings: AuthSettings,
        storage: Arc<dyn KeyValueStorage>,
        api: Arc<dyn AuthApi>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = Arc::new(settings);
        let messages = Messages::new(settings.locale);
        let store = SessionStore::new(storage.clone());
        let bus = SessionBus::default();
        let lock = Arc::new(AuthorizationCodeLock::with_clock(storage, clock));
        let orchestrator = Arc::new(LoginOrchestrator::new(api.clone(), messages));
        let handshake = Arc::new(HandshakeCoordinator::new(
            store.clone(),
            bus.clone(),
            settings.handshake_timeout,
        ));
        let shell = Arc::new(AppShell::new(
            store.clone(),
            bus.clone(),
            api.clone(),
            settings.clone(),
        ));
        let handoff = Arc::new(SessionHandoff {
            handshake,
            bus: bus.clone(),
            navigator,
            settings: settings.clone(),
            messages,
        });

        Self {
            settings,
            store,
            lock,
            api,
            orchestrator,
            bus,
            shell,
            handoff,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn bus(&self) -> &SessionBus {
        &self.bus
    }

    pub fn shell(&self) -> &Arc<AppShell> {
        &self.shell
    }

    pub fn code_lock(&self) -> &Arc<AuthorizationCodeLock> {
        &self.lock
    }

    /// A freshly mounted callback route.
    pub fn callback_entry(&self) -> CallbackEntryPoint {
        CallbackEntryPoint::new(
            self.lock.clone(),
            self.orchestrator.clone(),
            self.handoff.clone(),
        )
    }

    /// A freshly mounted login screen.
    pub fn login_entry(&self) -> LoginEntryPoint {
        LoginEntryPoint::new(
            self.store.clone(),
            self.orchestrator.clone(),
            self.handoff.clone(),
        )
    }

    /// Current auth status from the session store.
    pub fn status(&self) -> AuthResult<AuthSnapshot> {
        let session = self.store.read()?;
        Ok(AuthSnapshot {
            authenticated: session.is_some(),
            user: session.map(|session| session.user),
        })
    }

    /// Ask the server who the stored token belongs to.
    pub async fn whoami(&self) -> AuthResult<UserRecord> {
        let session = self
            .store
            .read()?
            .ok_or_else(|| AuthError::AuthRejected("not logged in".to_string()))?;
        self.api.current_user(&session.token).await
    }

    /// Clear the session and tell the shell.
    pub fn logout(&self) -> AuthResult<()> {
        let had_session = self.store.read()?.is_some();
        self.store.clear()?;
        self.bus.publish(SessionEvent::SessionCleared);
        info!(had_session, "Logged out");
        Ok(())
    }
}
