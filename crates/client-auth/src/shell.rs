//! Application shell: owns the adopted session and guards routes.
//!
//! The shell learns about sessions three ways: `SessionEstablished` on the
//! bus (answered with `SessionConfirmed`), changes to persisted storage made
//! by someone else, and cold-start hydration. Adoption is idempotent, so the
//! same session arriving through several of them is applied once.

use crate::api::AuthApi;
use crate::bus::{SessionBus, SessionEvent};
use crate::settings::AuthSettings;
use crate::{AuthError, AuthResult};
use client_storage::{AuthSession, SessionStore, StorageKeys};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of checking a route against the adopted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    Allow,
    RedirectToLogin { target: String },
}

/// Background tasks of a running shell. Dropping the handle stops them.
pub struct ShellHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ShellHandle {
    pub fn stop(self) {}
}

impl Drop for ShellHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct AppShell {
    store: SessionStore,
    bus: SessionBus,
    api: Arc<dyn AuthApi>,
    settings: Arc<AuthSettings>,
    session: watch::Sender<Option<AuthSession>>,
    adoptions: AtomicU64,
}

impl AppShell {
    pub fn new(
        store: SessionStore,
        bus: SessionBus,
        api: Arc<dyn AuthApi>,
        settings: Arc<AuthSettings>,
    ) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            store,
            bus,
            api,
            settings,
            session,
            adoptions: AtomicU64::new(0),
        }
    }

    /// The adopted session, if any.
    pub fn current(&self) -> Option<AuthSession> {
        self.session.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Observe changes to the adopted session.
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthSession>> {
        self.session.subscribe()
    }

    /// Number of times the adopted session actually changed to a new value.
    pub fn adoption_count(&self) -> u64 {
        self.adoptions.load(Ordering::SeqCst)
    }

    /// Make `session` the adopted one. Re-adopting the current value is a no-op.
    pub fn adopt(&self, session: AuthSession) {
        let uid = session.user.uid.clone();
        let changed = self.session.send_if_modified(|current| {
            if current.as_ref() == Some(&session) {
                false
            } else {
                *current = Some(session);
                true
            }
        });
        if changed {
            self.adoptions.fetch_add(1, Ordering::SeqCst);
            info!(uid = %uid, "Shell adopted session");
        } else {
            debug!(uid = %uid, "Session already adopted");
        }
    }

    /// Forget the adopted session.
    pub fn drop_session(&self) {
        let changed = self.session.send_if_modified(|current| current.take().is_some());
        if changed {
            info!("Shell dropped session");
        }
    }

    /// Check whether `route` may be shown.
    pub fn guard(&self, route: &str) -> RouteDecision {
        if self.settings.is_public_route(route) || self.is_authenticated() {
            RouteDecision::Allow
        } else {
            debug!(route, "Protected route without session");
            RouteDecision::RedirectToLogin {
                target: self.settings.login_path.clone(),
            }
        }
    }

    /// Cold start: adopt the stored session after checking it with the server.
    ///
    /// A refused token clears the store. An unreachable server keeps the
    /// stored session so the shell works offline.
    pub async fn hydrate(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored) = self.store.read()? else {
            self.drop_session();
            return Ok(None);
        };

        match self.api.current_user(&stored.token).await {
            Ok(user) => {
                if !self.still_stored(&stored)? {
                    debug!("Session replaced during hydration, keeping the newer one");
                    return Ok(self.sync_from_store());
                }
                let refreshed = AuthSession::new(user, stored.token.clone());
                if refreshed != stored {
                    self.store
                        .write(&refreshed)
                        .map_err(|e| AuthError::SessionWrite(e.to_string()))?;
                }
                self.adopt(refreshed.clone());
                Ok(Some(refreshed))
            }
            Err(AuthError::AuthRejected(reason)) => {
                if !self.still_stored(&stored)? {
                    return Ok(self.sync_from_store());
                }
                warn!(uid = %stored.user.uid, reason = %reason, "Stored session rejected by server, clearing");
                self.store.clear()?;
                self.drop_session();
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Could not verify stored session, keeping it");
                self.adopt(stored.clone());
                Ok(Some(stored))
            }
        }
    }

    fn still_stored(&self, session: &AuthSession) -> AuthResult<bool> {
        Ok(self
            .store
            .read()?
            .is_some_and(|current| current.token == session.token))
    }

    /// Align the adopted session with storage.
    pub fn sync_from_store(&self) -> Option<AuthSession> {
        match self.store.read() {
            Ok(Some(session)) => {
                self.adopt(session.clone());
                Some(session)
            }
            Ok(None) => {
                self.drop_session();
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to read session store");
                self.current()
            }
        }
    }

    /// Start the bus listener and the storage watcher.
    pub fn start(self: &Arc<Self>) -> ShellHandle {
        ShellHandle {
            tasks: vec![self.listen(), self.watch_storage()],
        }
    }

    /// Adopt established sessions and confirm them on the bus.
    ///
    /// Subscribes before returning, so every event published afterwards is
    /// seen.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.bus.subscribe();
        let shell = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::SessionEstablished {
                        handshake_id,
                        session,
                    }) => {
                        let uid = session.user.uid.clone();
                        shell.adopt(session);
                        shell.bus.publish(SessionEvent::SessionConfirmed { handshake_id, uid });
                    }
                    Ok(SessionEvent::SessionCleared) => shell.drop_session(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Shell missed session events, resyncing from storage");
                        shell.sync_from_store();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Follow session changes made directly in storage.
    ///
    /// Uses the backend's change notification when it has one, otherwise
    /// polls at the configured interval.
    pub fn watch_storage(self: &Arc<Self>) -> JoinHandle<()> {
        let shell = Arc::clone(self);
        match self.store.storage().subscribe_changes() {
            Some(mut changes) => tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(change) if is_session_key(&change.key) => {
                            shell.sync_from_store();
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => {
                            shell.sync_from_store();
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }),
            None => {
                let period = self.settings.storage_poll_interval;
                debug!(interval_ms = period.as_millis() as u64, "Polling storage for session changes");
                tokio::spawn(async move { shell.poll_storage(period).await })
            }
        }
    }

    async fn poll_storage(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sync_from_store();
        }
    }
}

fn is_session_key(key: &str) -> bool {
    key == StorageKeys::TOKEN || key == StorageKeys::USER
}
