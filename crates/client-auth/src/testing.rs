//! In-memory doubles for exercising the login flows without a server.

use crate::api::{AuthApi, LoginResponse};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use client_storage::UserRecord;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Respond(LoginResponse),
    Unreachable,
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Respond(LoginResponse::rejected(None))
    }
}

#[derive(Debug, Clone)]
enum UserReply {
    User(UserRecord),
    Rejected,
    Unreachable,
}

fn success(uid: &str, token: &str) -> LoginResponse {
    LoginResponse {
        success: true,
        user: Some(UserRecord::with_uid(uid)),
        access_token: Some(token.to_string()),
        message: None,
    }
}

/// [`AuthApi`] that replies from a script and counts calls.
///
/// Unscripted login endpoints reject without a message. An unscripted
/// `/users/me` is unreachable.
pub struct ScriptedAuthApi {
    primary: Mutex<Reply>,
    legacy: Mutex<Reply>,
    system: Mutex<Reply>,
    current_user: Mutex<UserReply>,
    latency: Mutex<Option<Duration>>,
    primary_calls: AtomicUsize,
    legacy_calls: AtomicUsize,
    system_calls: AtomicUsize,
    current_user_calls: AtomicUsize,
}

impl Default for ScriptedAuthApi {
    fn default() -> Self {
        Self {
            primary: Mutex::new(Reply::default()),
            legacy: Mutex::new(Reply::default()),
            system: Mutex::new(Reply::default()),
            current_user: Mutex::new(UserReply::Unreachable),
            latency: Mutex::new(None),
            primary_calls: AtomicUsize::new(0),
            legacy_calls: AtomicUsize::new(0),
            system_calls: AtomicUsize::new(0),
            current_user_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedAuthApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, so concurrent callers overlap.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    pub fn primary_succeeds(&self, uid: &str, token: &str) {
        *self.primary.lock() = Reply::Respond(success(uid, token));
    }

    pub fn primary_rejects(&self, message: Option<&str>) {
        *self.primary.lock() = Reply::Respond(LoginResponse::rejected(message.map(str::to_string)));
    }

    pub fn primary_unreachable(&self) {
        *self.primary.lock() = Reply::Unreachable;
    }

    pub fn primary_responds(&self, response: LoginResponse) {
        *self.primary.lock() = Reply::Respond(response);
    }

    pub fn legacy_succeeds(&self, uid: &str, token: &str) {
        *self.legacy.lock() = Reply::Respond(success(uid, token));
    }

    pub fn legacy_rejects(&self, message: Option<&str>) {
        *self.legacy.lock() = Reply::Respond(LoginResponse::rejected(message.map(str::to_string)));
    }

    pub fn legacy_unreachable(&self) {
        *self.legacy.lock() = Reply::Unreachable;
    }

    pub fn system_succeeds(&self, uid: &str, token: &str) {
        *self.system.lock() = Reply::Respond(success(uid, token));
    }

    pub fn system_rejects(&self, message: Option<&str>) {
        *self.system.lock() = Reply::Respond(LoginResponse::rejected(message.map(str::to_string)));
    }

    pub fn current_user_is(&self, user: UserRecord) {
        *self.current_user.lock() = UserReply::User(user);
    }

    pub fn current_user_rejects(&self) {
        *self.current_user.lock() = UserReply::Rejected;
    }

    pub fn current_user_unreachable(&self) {
        *self.current_user.lock() = UserReply::Unreachable;
    }

    pub fn primary_calls(&self) -> usize {
        self.primary_calls.load(Ordering::SeqCst)
    }

    pub fn legacy_calls(&self) -> usize {
        self.legacy_calls.load(Ordering::SeqCst)
    }

    pub fn system_calls(&self) -> usize {
        self.system_calls.load(Ordering::SeqCst)
    }

    pub fn current_user_calls(&self) -> usize {
        self.current_user_calls.load(Ordering::SeqCst)
    }

    /// Calls across every endpoint.
    pub fn total_calls(&self) -> usize {
        self.primary_calls() + self.legacy_calls() + self.system_calls() + self.current_user_calls()
    }

    async fn reply(&self, counter: &AtomicUsize, script: &Mutex<Reply>) -> AuthResult<LoginResponse> {
        counter.fetch_add(1, Ordering::SeqCst);
        let reply = script.lock().clone();
        self.wait().await;
        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::Unreachable => Err(AuthError::Network("connection refused".to_string())),
        }
    }

    async fn wait(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl AuthApi for ScriptedAuthApi {
    async fn third_party_login(&self, _code: &str) -> AuthResult<LoginResponse> {
        self.reply(&self.primary_calls, &self.primary).await
    }

    async fn legacy_third_party_login(&self, _code: &str) -> AuthResult<LoginResponse> {
        self.reply(&self.legacy_calls, &self.legacy).await
    }

    async fn system_login(&self, _username: &str, _password: &str) -> AuthResult<LoginResponse> {
        self.reply(&self.system_calls, &self.system).await
    }

    async fn current_user(&self, _token: &str) -> AuthResult<UserRecord> {
        self.current_user_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.current_user.lock().clone();
        self.wait().await;
        match reply {
            UserReply::User(user) => Ok(user),
            UserReply::Rejected => Err(AuthError::AuthRejected("token revoked".to_string())),
            UserReply::Unreachable => Err(AuthError::Network("connection refused".to_string())),
        }
    }
}
