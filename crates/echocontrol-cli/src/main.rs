//! Command-line interface for EchoControl.

mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use echocontrol_commands::EchoCommands;
use echocontrol_core::config::env_vars;
use echocontrol_core::{AuthSession, EchoConfig, TokioScheduler};

use store::{PendingLogin, SessionStore};

/// EchoControl - Keep an Amazon Echo account session alive.
#[derive(Parser, Debug)]
#[command(name = "echocontrol")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file (TOML). Defaults to ./echocontrol.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session file, overriding the config value.
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start a login and write the vendor sign-in page.
    LoginPage {
        /// File that receives the sign-in HTML.
        #[arg(long)]
        out: PathBuf,
    },
    /// Finish a login with the URL the browser landed on after sign-in.
    Register {
        /// The `maplanding` URL carrying the access token.
        #[arg(long)]
        redirect_url: String,
    },
    /// Restore the persisted session and report its state.
    Restore {
        /// Site to use instead of the persisted one.
        #[arg(long)]
        domain: Option<String>,
    },
    /// List the account's devices.
    Devices,
    /// Forget the session and delete the session file.
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = store::load_config(args.config.as_deref())?;
    if let Some(path) = &args.session_file {
        config.session_file = path.display().to_string();
    }
    let store = SessionStore::new(&config.session_file);

    match args.command {
        Command::LoginPage { out } => login_page(&config, &store, out).await,
        Command::Register { redirect_url } => register(&config, &store, &redirect_url).await,
        Command::Restore { domain } => restore(&config, &store, domain.as_deref()).await,
        Command::Devices => devices(&config, &store).await,
        Command::Logout => logout(&store),
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose {
        "echocontrol=debug"
    } else {
        "echocontrol=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn new_session(config: &EchoConfig, previous: Option<&PendingLogin>) -> Result<AuthSession> {
    let scheduler = Arc::new(TokioScheduler::new());
    let mut config = config.clone();
    if let Some(pending) = previous {
        config.amazon_site = pending.site.clone();
    }
    let session = AuthSession::from_config(&config, scheduler, previous.map(|p| &p.identity))
        .context("Failed to create session")?;
    Ok(session)
}

async fn login_page(config: &EchoConfig, store: &SessionStore, out: PathBuf) -> Result<()> {
    let mut session = new_session(config, None)?;
    let html = session.start_login().await?;

    store.save_pending(&PendingLogin {
        identity: session.identity().clone(),
        site: session.amazon_site().to_string(),
    })?;
    std::fs::write(&out, html).with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Sign-in page written to {}", out.display());
    println!("Sign in there, then run `echocontrol register --redirect-url <url>`.");
    Ok(())
}

async fn register(config: &EchoConfig, store: &SessionStore, redirect_url: &str) -> Result<()> {
    let pending = store
        .load_pending()?
        .context("No login in progress; run `echocontrol login-page` first")?;
    let mut session = new_session(config, Some(&pending))?;

    // The redirect token is bound to the device id; a fresh sign-in page
    // visit restores the cookies of that identity.
    session.start_login().await?;
    let device_name = session.complete_registration(redirect_url).await?;

    store.save(&session.serialize())?;
    store.clear_pending()?;
    println!("Registered as {}", device_name);
    println!("Session site: {}", session.amazon_site());
    Ok(())
}

/// Restore the persisted session. `None` when there is nothing usable.
async fn restored_session(
    config: &EchoConfig,
    store: &SessionStore,
    domain: Option<&str>,
) -> Result<Option<AuthSession>> {
    let Some(text) = store.load()? else {
        return Ok(None);
    };
    let mut session = new_session(config, None)?;
    if !session.restore(&text, domain).await? {
        return Ok(None);
    }
    store.save(&session.serialize())?;
    Ok(Some(session))
}

async fn restore(config: &EchoConfig, store: &SessionStore, domain: Option<&str>) -> Result<()> {
    let Some(session) = restored_session(config, store, domain).await? else {
        println!("Not logged in");
        return Ok(());
    };

    println!("Status:      {}", session.status());
    println!("Site:        {}", session.amazon_site());
    println!("Device name: {}", session.device_name());
    println!(
        "Customer:    {} ({})",
        session.customer_name().unwrap_or("unknown"),
        session.customer_id().unwrap_or("unknown")
    );
    if let Some(login_time) = session.login_time() {
        println!("Logged in:   {}", login_time.to_rfc3339());
    }
    Ok(())
}

async fn devices(config: &EchoConfig, store: &SessionStore) -> Result<()> {
    let Some(mut session) = restored_session(config, store, None).await? else {
        anyhow::bail!("Not logged in; run `echocontrol login-page` first");
    };
    if let Err(e) = session.ensure_fresh().await {
        tracing::warn!(error = %e, "Session renewal failed, using current cookies");
    }

    let devices = EchoCommands::for_session(&session).device_list().await?;
    store.save(&session.serialize())?;

    println!("{:<20} {:<16} {:<8} NAME", "SERIAL", "TYPE", "ONLINE");
    for device in &devices {
        println!(
            "{:<20} {:<16} {:<8} {}",
            device.serial(),
            device.type_id(),
            if device.online { "yes" } else { "no" },
            device.account_name.as_deref().unwrap_or("")
        );
    }
    println!("\n{} device(s)", devices.len());
    Ok(())
}

fn logout(store: &SessionStore) -> Result<()> {
    store.remove_session()?;
    println!("Logged out; removed {}", store.session_file().display());
    Ok(())
}
