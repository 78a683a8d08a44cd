//! End-to-end login flows across entry points, shell and storage.

use client_auth::testing::ScriptedAuthApi;
use client_auth::{
    AuthRuntime, AuthSettings, CallbackOutcome, CallbackParams, HandshakeState,
    LoginMountOutcome, ManualClock, RecordingNavigator, SessionEvent, SubmitOutcome,
};
use client_config_and_utils::{Locale, Messages};
use client_storage::{
    AuthSession, FileStorage, KeyValueStorage, MemoryStorage, StorageError, StorageKeys,
    StorageResult, UserRecord,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Memory storage that counts writes to the token slot.
#[derive(Default)]
struct CountingStorage {
    inner: MemoryStorage,
    token_writes: AtomicUsize,
}

impl CountingStorage {
    fn token_writes(&self) -> usize {
        self.token_writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStorage for CountingStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if key == StorageKeys::TOKEN {
            self.token_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.set(key, value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key)
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list_keys_with_prefix(prefix)
    }
}

/// Storage whose session slots reject writes, as when the quota is exhausted.
#[derive(Default)]
struct QuotaExceededStorage {
    inner: MemoryStorage,
}

impl KeyValueStorage for QuotaExceededStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if key == StorageKeys::TOKEN {
            return Err(StorageError::Platform("quota exceeded".to_string()));
        }
        self.inner.set(key, value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key)
    }
}

struct Harness {
    api: Arc<ScriptedAuthApi>,
    navigator: Arc<RecordingNavigator>,
    runtime: AuthRuntime,
}

impl Harness {
    fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_api(storage, ScriptedAuthApi::new())
    }

    fn with_api(storage: Arc<dyn KeyValueStorage>, api: ScriptedAuthApi) -> Self {
        let api = Arc::new(api);
        let navigator = Arc::new(RecordingNavigator::new());
        let runtime = AuthRuntime::new(
            AuthSettings::default(),
            storage,
            api.clone(),
            navigator.clone(),
        );
        Self {
            api,
            navigator,
            runtime,
        }
    }
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn established_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SessionEvent::SessionEstablished { .. }))
        .count()
}

#[tokio::test]
async fn test_mock_code_logs_in_and_lands_home() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();
    let mut events = harness.runtime.bus().subscribe();

    let outcome = harness
        .runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("mock_auth_code_1"))
        .await;

    let CallbackOutcome::LoggedIn { target, handshake } = outcome else {
        panic!("expected login, got {:?}", outcome);
    };
    assert_eq!(target, "/");
    assert_eq!(handshake.state, HandshakeState::Confirmed);
    assert!(handshake.elapsed < Duration::from_millis(1000));

    assert_eq!(
        harness.runtime.store().read().unwrap(),
        Some(AuthSession::new(UserRecord::with_uid("u1"), "t1"))
    );
    assert_eq!(harness.runtime.shell().current().unwrap().token, "t1");
    assert_eq!(harness.navigator.visits(), vec!["/".to_string()]);
    assert_eq!(established_count(&drain(&mut events)), 1);
    assert_eq!(harness.api.primary_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_redemption_calls_server_once() {
    let storage = Arc::new(CountingStorage::default());
    let harness = Harness::with_api(
        storage.clone(),
        ScriptedAuthApi::new().with_latency(Duration::from_millis(50)),
    );
    harness.api.primary_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();
    let mut events = harness.runtime.bus().subscribe();

    let first = harness.runtime.callback_entry();
    let second = harness.runtime.callback_entry();
    let params = CallbackParams::with_code("mock_auth_code_1");
    let (a, b) = tokio::join!(first.on_mount(&params), second.on_mount(&params));

    let outcomes = [a, b];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, CallbackOutcome::LoggedIn { .. }))
            .count(),
        1
    );
    assert!(outcomes.contains(&CallbackOutcome::Abandoned));
    assert_eq!(harness.api.primary_calls(), 1);
    assert_eq!(storage.token_writes(), 1);
    assert_eq!(established_count(&drain(&mut events)), 1);
    // The abandoned attempt does not navigate.
    assert_eq!(harness.navigator.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_mount_during_handshake_is_abandoned() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_succeeds("u1", "t1");
    let deadline = harness.runtime.settings().handshake_timeout;

    let first = harness.runtime.callback_entry();
    let second = harness.runtime.callback_entry();
    let params = CallbackParams::with_code("mock_auth_code_1");
    let late_mount = async {
        // No shell is running, so the first mount waits out the full deadline.
        tokio::time::sleep(deadline / 2).await;
        second.on_mount(&params).await
    };
    let (a, b) = tokio::join!(first.on_mount(&params), late_mount);

    assert!(matches!(
        a,
        CallbackOutcome::LoggedIn { ref handshake, .. } if handshake.state == HandshakeState::TimedOut
    ));
    assert_eq!(b, CallbackOutcome::Abandoned);
    assert_eq!(harness.api.primary_calls(), 1);
    assert!(!harness
        .runtime
        .code_lock()
        .is_held("mock_auth_code_1")
        .unwrap());
}

#[tokio::test]
async fn test_repeated_mount_is_a_no_op() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();

    let entry = harness.runtime.callback_entry();
    let params = CallbackParams::with_code("c");
    assert!(matches!(
        entry.on_mount(&params).await,
        CallbackOutcome::LoggedIn { .. }
    ));
    assert_eq!(entry.on_mount(&params).await, CallbackOutcome::AlreadyProcessing);
    assert_eq!(harness.api.total_calls(), 1);
}

#[tokio::test]
async fn test_redemption_across_processes_sharing_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let tab_a = Harness::with_api(
        Arc::new(FileStorage::new(&path).unwrap()),
        ScriptedAuthApi::new().with_latency(Duration::from_millis(50)),
    );
    let tab_b = Harness::new(Arc::new(FileStorage::new(&path).unwrap()));
    tab_a.api.primary_succeeds("u1", "t1");
    tab_b.api.primary_succeeds("u1", "t1");
    let _shell = tab_a.runtime.shell().start();

    let params = CallbackParams::with_code("shared-code");
    let entry_a = tab_a.runtime.callback_entry();
    let entry_b = tab_b.runtime.callback_entry();
    let (a, b) = tokio::join!(entry_a.on_mount(&params), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        entry_b.on_mount(&params).await
    });

    assert!(matches!(a, CallbackOutcome::LoggedIn { .. }));
    assert_eq!(b, CallbackOutcome::Abandoned);
    assert_eq!(tab_a.api.primary_calls() + tab_b.api.primary_calls(), 1);
    assert!(tab_b.runtime.store().is_logged_in().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_expired_lock_can_be_reacquired() {
    let api = Arc::new(ScriptedAuthApi::new());
    api.primary_succeeds("u1", "t1");
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let navigator = Arc::new(RecordingNavigator::new());
    let runtime = AuthRuntime::with_clock(
        AuthSettings::default(),
        Arc::new(MemoryStorage::new()),
        api.clone(),
        navigator.clone(),
        clock.clone(),
    );
    let ttl = runtime.settings().code_lock_ttl;

    // A holder that vanished without releasing.
    assert!(runtime.code_lock().try_acquire("c", ttl).unwrap());

    let blocked = runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("c"))
        .await;
    assert_eq!(blocked, CallbackOutcome::Abandoned);
    assert_eq!(api.total_calls(), 0);

    clock.advance(ttl);
    let retried = runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("c"))
        .await;
    assert!(matches!(retried, CallbackOutcome::LoggedIn { .. }));
    assert_eq!(api.primary_calls(), 1);
    assert!(!runtime.code_lock().is_held("c").unwrap());
}

#[tokio::test]
async fn test_legacy_fallback_makes_two_calls() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_rejects(None);
    harness.api.legacy_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();

    let outcome = harness
        .runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("c"))
        .await;

    assert!(matches!(outcome, CallbackOutcome::LoggedIn { .. }));
    assert_eq!(harness.api.primary_calls(), 1);
    assert_eq!(harness.api.legacy_calls(), 1);
    assert_eq!(harness.api.total_calls(), 2);
}

#[tokio::test]
async fn test_failed_exchange_returns_to_login() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_rejects(None);
    harness.api.legacy_rejects(Some("code expired"));
    let mut events = harness.runtime.bus().subscribe();

    let outcome = harness
        .runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("c"))
        .await;

    assert_eq!(
        outcome,
        CallbackOutcome::Failed {
            message: "code expired".to_string()
        }
    );
    assert_eq!(harness.navigator.last().as_deref(), Some("/login"));
    assert!(!harness.runtime.code_lock().is_held("c").unwrap());
    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::LoginFailed {
        message: "code expired".to_string()
    }));
    assert_eq!(established_count(&events), 0);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_bounded_without_shell() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_succeeds("u1", "t1");
    let deadline = harness.runtime.settings().handshake_timeout;

    let started = tokio::time::Instant::now();
    let outcome = harness
        .runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("c"))
        .await;

    let CallbackOutcome::LoggedIn { target, handshake } = outcome else {
        panic!("expected login, got {:?}", outcome);
    };
    assert_eq!(target, "/");
    assert_eq!(handshake.state, HandshakeState::TimedOut);
    assert!(started.elapsed() <= deadline + Duration::from_millis(50));
    assert_eq!(harness.navigator.last().as_deref(), Some("/"));
}

#[tokio::test(start_paused = true)]
async fn test_navigation_bounded_with_shell() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();
    let deadline = harness.runtime.settings().handshake_timeout;

    let started = tokio::time::Instant::now();
    let outcome = harness
        .runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("c"))
        .await;

    assert!(matches!(
        outcome,
        CallbackOutcome::LoggedIn { ref handshake, .. } if handshake.confirmed()
    ));
    assert!(started.elapsed() <= deadline + Duration::from_millis(50));
}

#[tokio::test]
async fn test_provider_error_skips_exchange() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    let mut events = harness.runtime.bus().subscribe();

    let params = CallbackParams::parse("/auth/callback?error=access_denied").unwrap();
    let outcome = harness.runtime.callback_entry().on_mount(&params).await;

    assert_eq!(
        outcome,
        CallbackOutcome::ProviderError {
            error: "access_denied".to_string()
        }
    );
    assert_eq!(harness.api.total_calls(), 0);
    assert_eq!(harness.navigator.last().as_deref(), Some("/login"));
    assert!(drain(&mut events).contains(&SessionEvent::LoginFailed {
        message: Messages::new(Locale::En).provider_denied().to_string()
    }));
}

#[tokio::test]
async fn test_missing_code_goes_to_login() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    let outcome = harness
        .runtime
        .callback_entry()
        .on_mount(&CallbackParams::default())
        .await;

    assert_eq!(outcome, CallbackOutcome::MissingCode);
    assert_eq!(harness.navigator.last().as_deref(), Some("/login"));
}

#[tokio::test]
async fn test_unsaved_session_is_a_visible_failure() {
    let harness = Harness::new(Arc::new(QuotaExceededStorage::default()));
    harness.api.primary_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();
    let mut events = harness.runtime.bus().subscribe();

    let outcome = harness
        .runtime
        .callback_entry()
        .on_mount(&CallbackParams::with_code("c"))
        .await;

    assert_eq!(
        outcome,
        CallbackOutcome::Failed {
            message: Messages::new(Locale::En).session_not_saved().to_string()
        }
    );
    assert_eq!(harness.navigator.last().as_deref(), Some("/login"));
    assert!(!harness.runtime.store().is_logged_in().unwrap());
    assert_eq!(established_count(&drain(&mut events)), 0);
    assert!(!harness.runtime.shell().is_authenticated());
}

#[tokio::test]
async fn test_login_screen_forwards_code_to_callback() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.primary_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();

    let login = harness.runtime.login_entry();
    let params = CallbackParams::parse("/login?code=mock_auth_code_1&state=s1").unwrap();
    let mounted = login.on_mount(&params).unwrap();

    let LoginMountOutcome::RedirectedToCallback { target } = mounted else {
        panic!("expected redirect, got {:?}", mounted);
    };
    assert_eq!(target, "/auth/callback?code=mock_auth_code_1&state=s1");
    // The login screen itself never redeems.
    assert_eq!(harness.api.total_calls(), 0);

    let forwarded = CallbackParams::parse(&target).unwrap();
    let outcome = harness.runtime.callback_entry().on_mount(&forwarded).await;
    assert!(matches!(outcome, CallbackOutcome::LoggedIn { .. }));
    assert_eq!(harness.api.primary_calls(), 1);
    assert_eq!(
        harness.navigator.visits(),
        vec![target.clone(), "/".to_string()]
    );
}

#[tokio::test]
async fn test_login_screen_with_session_goes_home() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness
        .runtime
        .store()
        .write(&AuthSession::new(UserRecord::with_uid("u1"), "t1"))
        .unwrap();

    let mounted = harness
        .runtime
        .login_entry()
        .on_mount(&CallbackParams::default())
        .unwrap();
    assert_eq!(
        mounted,
        LoginMountOutcome::AlreadyLoggedIn {
            target: "/".to_string()
        }
    );
}

#[tokio::test]
async fn test_login_screen_shows_form() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    let mounted = harness
        .runtime
        .login_entry()
        .on_mount(&CallbackParams::default())
        .unwrap();
    assert_eq!(mounted, LoginMountOutcome::ShowForm);
    assert_eq!(harness.navigator.count(), 0);
}

#[tokio::test]
async fn test_credential_login() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.system_succeeds("u1", "t1");
    let _shell = harness.runtime.shell().start();

    let outcome = harness
        .runtime
        .login_entry()
        .submit_credentials("ada", "secret")
        .await;

    assert!(matches!(outcome, SubmitOutcome::LoggedIn { ref target, .. } if target == "/"));
    assert!(harness.runtime.shell().is_authenticated());
    assert_eq!(harness.api.system_calls(), 1);
}

#[tokio::test]
async fn test_failed_credential_login_stays_on_form() {
    let harness = Harness::new(Arc::new(MemoryStorage::new()));
    harness.api.system_rejects(Some("invalid password"));

    let outcome = harness
        .runtime
        .login_entry()
        .submit_credentials("ada", "wrong")
        .await;

    assert_eq!(
        outcome,
        SubmitOutcome::Failed {
            message: "invalid password".to_string()
        }
    );
    assert_eq!(harness.navigator.count(), 0);
}

#[tokio::test]
async fn test_half_written_session_reads_as_logged_out() {
    let storage = Arc::new(MemoryStorage::new());
    let harness = Harness::new(storage.clone());
    storage.set(StorageKeys::TOKEN, "t1").unwrap();

    assert!(!harness.runtime.status().unwrap().authenticated);
    assert!(storage.get(StorageKeys::TOKEN).unwrap().is_none());

    storage.set(StorageKeys::TOKEN, "t1").unwrap();
    storage.set(StorageKeys::USER, "{\"uid\":").unwrap();
    assert!(harness.runtime.store().read().unwrap().is_none());
    assert!(storage.is_empty());
}
