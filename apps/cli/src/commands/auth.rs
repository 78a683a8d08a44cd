//! Authentication commands.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use client_auth::{
    CallbackOutcome, CallbackParams, HandshakeState, LoginMountOutcome, SubmitOutcome,
};
use client_storage::UserRecord;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use tracing::debug;

/// Result of a flow that ends in navigation.
#[derive(Debug, Serialize)]
struct LoginReport {
    logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handshake: Option<HandshakeState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    navigated_to: Vec<String>,
}

impl fmt::Display for LoginReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, &self.message) {
            (Some(user), _) if self.logged_in => write!(f, "Logged in as {}", user)?,
            (_, Some(message)) => write!(f, "Login failed: {}", message)?,
            _ => write!(f, "Not logged in")?,
        }
        if let Some(target) = self.navigated_to.last() {
            write!(f, "\nNext route: {}", target)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserRecord>,
    api_url: String,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "API:      {}", self.api_url)?;
        match &self.user {
            Some(user) if self.logged_in => {
                writeln!(f, "Auth:     logged in")?;
                write!(f, "User:     {} ({})", user.display_name(), user.uid)
            }
            _ => write!(f, "Auth:     not logged in"),
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthorizeReport {
    url: String,
    state: String,
}

impl fmt::Display for AuthorizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Open this URL to sign in:")?;
        write!(f, "{}", self.url)
    }
}

/// Login with username and password.
pub async fn login(ctx: &Context, username: Option<String>, format: &OutputFormat) -> Result<()> {
    let login = ctx.runtime.login_entry();
    if let LoginMountOutcome::AlreadyLoggedIn { .. } = login.on_mount(&CallbackParams::default())? {
        let name = ctx
            .runtime
            .status()?
            .user
            .map(|user| user.display_name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        output::print_success(&format!("Already logged in as {}", name), format);
        return Ok(());
    }

    let username = match username {
        Some(username) => username,
        None => {
            print!("Username: ");
            io::stdout().flush()?;
            let mut username = String::new();
            io::stdin().read_line(&mut username)?;
            username.trim().to_string()
        }
    };
    if username.is_empty() {
        output::print_error("Username is required", format);
        return Ok(());
    }

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        output::print_error("Password is required", format);
        return Ok(());
    }

    let _shell = ctx.runtime.shell().start();
    let report = match login.submit_credentials(&username, &password).await {
        SubmitOutcome::LoggedIn { handshake, .. } => LoginReport {
            logged_in: true,
            user: ctx.runtime.shell().current().map(|s| s.user.display_name().to_string()),
            handshake: Some(handshake.state),
            message: None,
            navigated_to: ctx.navigator.visits(),
        },
        SubmitOutcome::Failed { message } => LoginReport {
            logged_in: false,
            user: None,
            handshake: None,
            message: Some(message),
            navigated_to: ctx.navigator.visits(),
        },
    };
    output::print(&report, format);
    Ok(())
}

/// Print (and optionally open) the identity provider's authorization URL.
pub async fn authorize(ctx: &Context, open_browser: bool, format: &OutputFormat) -> Result<()> {
    let request = ctx.runtime.login_entry().authorization_url()?;
    let report = AuthorizeReport {
        url: request.url.to_string(),
        state: request.state,
    };
    output::print(&report, format);

    if open_browser {
        if let Err(e) = open::that(&report.url) {
            debug!(error = %e, "Failed to open browser");
            output::print_error("Could not open a browser, open the URL manually", format);
        }
    }
    Ok(())
}

/// Redeem a provider redirect, given as a URL, a route, or a query string.
///
/// A redirect that landed on the login route is forwarded to the callback
/// route first, exactly as the login screen does.
pub async fn callback(ctx: &Context, redirect: &str, format: &OutputFormat) -> Result<()> {
    let mut params = CallbackParams::parse(redirect)?;
    let _shell = ctx.runtime.shell().start();

    if lands_on(redirect, &ctx.config.login_path) {
        let mounted = ctx.runtime.login_entry().on_mount(&params)?;
        match mounted {
            LoginMountOutcome::RedirectedToCallback { target } => {
                params = CallbackParams::parse(&target)?;
            }
            LoginMountOutcome::AlreadyLoggedIn { .. } | LoginMountOutcome::ShowForm => {
                output::print(&status_report(ctx)?, format);
                return Ok(());
            }
        }
    }

    let outcome = ctx.runtime.callback_entry().on_mount(&params).await;
    debug!(?outcome, "Callback finished");

    let report = match outcome {
        CallbackOutcome::LoggedIn { handshake, .. } => LoginReport {
            logged_in: true,
            user: ctx.runtime.shell().current().map(|s| s.user.display_name().to_string()),
            handshake: Some(handshake.state),
            message: None,
            navigated_to: ctx.navigator.visits(),
        },
        CallbackOutcome::Failed { message } => failed_report(ctx, message),
        CallbackOutcome::ProviderError { error } => {
            failed_report(ctx, format!("identity provider returned '{}'", error))
        }
        CallbackOutcome::MissingCode => failed_report(ctx, "no authorization code in redirect".to_string()),
        CallbackOutcome::AlreadyProcessing | CallbackOutcome::Abandoned => {
            output::print_success("This code is already being redeemed", format);
            return Ok(());
        }
    };
    output::print(&report, format);
    Ok(())
}

fn failed_report(ctx: &Context, message: String) -> LoginReport {
    LoginReport {
        logged_in: false,
        user: None,
        handshake: None,
        message: Some(message),
        navigated_to: ctx.navigator.visits(),
    }
}

fn lands_on(redirect: &str, route: &str) -> bool {
    let without_origin = match redirect.find("://") {
        Some(scheme_end) => {
            let rest = &redirect[scheme_end + 3..];
            rest.find('/').map_or("", |slash| &rest[slash..])
        }
        None => redirect,
    };
    without_origin.split(['?', '#']).next() == Some(route)
}

/// Logout and clear session.
pub async fn logout(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.runtime.logout()?;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Check authentication status.
pub async fn status(ctx: &Context, format: &OutputFormat) -> Result<()> {
    output::print(&status_report(ctx)?, format);
    Ok(())
}

fn status_report(ctx: &Context) -> Result<StatusReport> {
    let snapshot = ctx.runtime.status()?;
    Ok(StatusReport {
        logged_in: snapshot.authenticated,
        user: snapshot.user,
        api_url: ctx.config.api_url.clone(),
    })
}

/// Verify the stored session with the server and show who it belongs to.
pub async fn whoami(ctx: &Context, format: &OutputFormat) -> Result<()> {
    if !ctx.runtime.status()?.authenticated {
        output::print_error("Not logged in", format);
        return Ok(());
    }

    match ctx.runtime.shell().hydrate().await? {
        Some(session) => match format {
            OutputFormat::Text => {
                output::print_row("User", session.user.display_name());
                output::print_row("ID", &session.user.uid);
                if let Some(email) = &session.user.email {
                    output::print_row("Email", email);
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&session.user)?),
        },
        None => output::print_error("Session was rejected by the server, please log in again", format),
    }
    Ok(())
}
