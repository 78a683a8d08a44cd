//! CLI command implementations.

mod auth;

pub use auth::{authorize, callback, login, logout, status, whoami};

use anyhow::Result;
use client_auth::{AuthRuntime, RecordingNavigator};
use client_config_and_utils::{Config, Paths};
use client_storage::create_storage;
use std::sync::Arc;

/// Everything a command needs: configuration, the runtime and the navigator
/// that records where the flow would take the user.
pub struct Context {
    pub config: Config,
    pub runtime: AuthRuntime,
    pub navigator: Arc<RecordingNavigator>,
}

/// Load configuration and open the persisted store.
pub fn context(paths: &Paths, api_url: Option<&str>) -> Result<Context> {
    let mut config = Config::load(paths)?;
    if let Some(api_url) = api_url {
        config.api_url = api_url.to_string();
        config.validate()?;
    }

    let storage = create_storage(&paths.storage_file())?;
    let navigator = Arc::new(RecordingNavigator::new());
    let runtime = AuthRuntime::from_config(&config, storage, navigator.clone())?;

    Ok(Context {
        config,
        runtime,
        navigator,
    })
}
