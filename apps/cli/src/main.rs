//! Docsight CLI - sign in to Docsight from the terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use client_config_and_utils::Paths;
use tracing::debug;

/// Docsight CLI - Manage your Docsight session.
#[derive(Parser)]
#[command(name = "docsight")]
#[command(about = "Docsight CLI for authentication")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Override the backend API URL
    #[arg(long, env = "DOCSIGHT_API_URL", global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with username and password
    Login {
        /// Username (prompted when omitted)
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Show the identity provider sign-in URL
    Authorize {
        /// Open the URL in the default browser
        #[arg(long)]
        open: bool,
    },

    /// Complete sign-in from the URL the identity provider redirected to
    Callback {
        /// Redirect URL, route (e.g. /auth/callback?code=...) or query string
        redirect: String,
    },

    /// Check authentication status
    Status,

    /// Verify the session with the server
    Whoami,

    /// Logout and clear session
    Logout,
}

async fn run(cli: Cli, paths: Paths) -> anyhow::Result<()> {
    let ctx = commands::context(&paths, cli.api_url.as_deref())?;
    debug!(api_url = %ctx.config.api_url, "CLI context ready");

    match cli.command {
        Commands::Login { username } => commands::login(&ctx, username, &cli.format).await,
        Commands::Authorize { open } => commands::authorize(&ctx, open, &cli.format).await,
        Commands::Callback { redirect } => commands::callback(&ctx, &redirect, &cli.format).await,
        Commands::Status => commands::status(&ctx, &cli.format).await,
        Commands::Whoami => commands::whoami(&ctx, &cli.format).await,
        Commands::Logout => commands::logout(&ctx, &cli.format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let paths = match Paths::new() {
        Ok(paths) => paths,
        Err(e) => {
            output::print_error(&e.to_string(), &cli.format);
            std::process::exit(1);
        }
    };

    // Initialize logging via observability crate
    observability::init_with_config(observability::LogConfig {
        service_name: "docsight-cli".into(),
        default_level: cli.log_level.clone(),
        log_path: Some(paths.log_file()),
        also_stderr: false, // CLI doesn't need stderr output by default
    });

    let format = cli.format;
    if let Err(e) = run(cli, paths).await {
        output::print_error(&format!("{:#}", e), &format);
        std::process::exit(1);
    }
}
