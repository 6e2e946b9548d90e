use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetctl_auth::auth::{
    Authenticator, BrowserLauncher, CredentialStore, KeyringStore, SystemBrowser, TokenProvider,
};
use fleetctl_auth::config::Config;

#[derive(Parser)]
#[command(name = "fleetctl-auth")]
#[command(about = "Log in to fleet services and manage cached tokens", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Skip cached tokens and log in through the browser again
    #[arg(long, global = true)]
    reauth: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in through the browser and store the tokens in the keyring
    Auth {
        #[arg(short, long, default_value = "fleetdb")]
        service: String,
    },
    /// Print a valid access token
    Token {
        #[arg(short, long, default_value = "fleetdb")]
        service: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("authentication error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// The first Ctrl-C aborts a pending browser login so the callback listener
/// is shut down cleanly. A second one exits straight away.
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })
    .context("installing Ctrl-C handler")?;
    Ok(cancel)
}

fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref()).context("loading configuration")?;
    let registry = config.registry()?;
    let store = KeyringStore::new(&config.auth.keyring_service);
    let cancel = install_interrupt_handler()?;
    let authenticator = Authenticator::new(registry, store, SystemBrowser, config.auth.options())
        .with_cancel_flag(cancel);

    match args.command {
        Commands::Auth { service } => {
            println!("{}", auth_command(&authenticator, &service)?);
        }
        Commands::Token { service } => {
            let provider = TokenProvider::new(authenticator);
            let token = provider.access_token(&service, args.reauth)?;
            println!("{token}");
        }
    }

    Ok(())
}

fn auth_command<S, B>(authenticator: &Authenticator<S, B>, service: &str) -> Result<String>
where
    S: CredentialStore,
    B: BrowserLauncher,
{
    if authenticator.services().get(service)?.disabled {
        return Ok(format!("authentication is disabled for {service}, nothing stored."));
    }
    authenticator.authenticate(service)?;
    Ok("authentication successful, auth token stored in keyring.".to_string())
}
