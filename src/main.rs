//! # whist
//!
//! Command-line launcher: wires settings, logging, the persisted store, the
//! service clients and the launch pipeline onto one trigger bus.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use whist_core::{ImportedData, LogFormat, TriggerName, eligible_regions, init_subscriber};
use whist_flow::{AttemptTracker, TriggerBus};
use whist_launcher::flows::{Ranking, rank, region::ping_regions};
use whist_launcher::{ErrorWindow, LaunchRequest, Pipeline, Services, persist_auth, stored_credentials};
use whist_services::{HttpProber, KeyValueStore, SqliteStore, StoreKey, TokenClient};
use whist_settings::{WhistSettings, load_settings, load_settings_from_path};

/// Whist session launcher.
#[derive(Parser, Debug)]
#[command(name = "whist", about = "Launch a Whist cloud browser session", version)]
struct Cli {
    /// Settings file (defaults to `~/.whist/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate, request a mandelbox and start the streaming client.
    Launch {
        /// JSON file of imported browser data (cookies, bookmarks, extensions, preferences).
        #[arg(long)]
        import: Option<PathBuf>,
    },
    /// Probe every candidate region and print the ranking.
    Regions,
    /// Exchange an authorization code for tokens and store them.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
        /// PKCE code verifier, when the code was issued with a challenge.
        #[arg(long)]
        verifier: Option<String>,
    },
}

fn resolve_settings(path: Option<&Path>) -> Result<WhistSettings> {
    match path {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => load_settings().context("failed to load settings"),
    }
}

fn open_store(settings: &WhistSettings) -> Result<Arc<SqliteStore>> {
    let path = PathBuf::from(&settings.storage.path);
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn imported_data(path: Option<&Path>) -> Result<ImportedData> {
    let Some(path) = path else {
        return Ok(ImportedData::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid imported data in {}", path.display()))
}

async fn launch(settings: &WhistSettings, import: Option<&Path>) -> Result<()> {
    let store = open_store(settings)?;
    let Some(auth) = stored_credentials(store.as_ref())? else {
        bail!("not signed in, run `whist login` first");
    };
    let imported = imported_data(import)?;

    let bus = TriggerBus::new();
    let services = Services::from_settings(settings, store.clone())?;
    let _persist = persist_auth(&bus, store.clone());
    let pipeline = Pipeline::wire(&bus, services, settings, AttemptTracker::default());

    let mut launched = bus.from_trigger(TriggerName::ProtocolLaunched);
    let mut closed = bus.from_trigger(TriggerName::ProtocolClosed);
    let mut windows = bus.from_trigger_as::<ErrorWindow>(TriggerName::ErrorWindow);

    bus.signal(TriggerName::AppReady);
    bus.emit(TriggerName::LaunchRequested, &LaunchRequest { auth, imported })?;

    loop {
        tokio::select! {
            Some(_) = launched.next() => {
                store.set(StoreKey::Onboarded, "true")?;
                tracing::info!("streaming client running");
            }
            Some(_) = closed.next() => {
                tracing::info!("streaming client closed");
                return Ok(());
            }
            Some(window) = windows.next() => {
                pipeline.shutdown().await;
                eprintln!("{}\n{}", window.title, window.message);
                bail!("launch failed at {} ({}): {}", window.stage, window.category, window.detail);
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                tracing::info!("interrupted, shutting down");
                pipeline.shutdown().await;
                return Ok(());
            }
        }
    }
}

async fn regions(settings: &WhistSettings) -> Result<()> {
    let candidates = eligible_regions(
        &settings.regions.candidates,
        &settings.regions.home_country,
        settings.regions.allow_cross_border,
    );
    if candidates.is_empty() {
        bail!("no candidate regions for {}", settings.regions.home_country);
    }
    let prober = HttpProber::new(&settings.regions)?;
    let measured = ping_regions(&prober, &candidates, settings.regions.samples).await;
    let (ranked, complete) = match rank(&measured) {
        Ranking::Complete(ranked) => (ranked, true),
        Ranking::Partial(ranked) => (ranked, false),
    };
    for latency in &ranked {
        match latency.ping_ms {
            Some(ms) => println!("{:<16}{ms:>6} ms", latency.region.as_str()),
            None => println!("{:<16}{:>9}", latency.region.as_str(), "no reply"),
        }
    }
    if complete {
        let regions: Vec<_> = ranked.iter().map(|l| l.region).collect();
        let store: Arc<dyn KeyValueStore> = open_store(settings)?;
        store.set_json(StoreKey::RegionOrdering, &regions)?;
    }
    Ok(())
}

async fn login(settings: &WhistSettings, email: &str, code: &str, verifier: Option<&str>) -> Result<()> {
    let client = TokenClient::new(&settings.auth)?;
    let tokens = client
        .exchange_code(code, verifier)
        .await
        .context("authorization code exchange failed")?;

    let store = open_store(settings)?;
    // A config token belongs to the user it was generated for.
    if store.get(StoreKey::UserEmail)?.as_deref() != Some(email) {
        store.remove(StoreKey::ConfigToken)?;
    }
    store.set(StoreKey::UserEmail, email)?;
    store.set(StoreKey::AccessToken, &tokens.access_token)?;
    match tokens.refresh_token.as_deref() {
        Some(refresh) => store.set(StoreKey::RefreshToken, refresh)?,
        None => store.remove(StoreKey::RefreshToken)?,
    }
    println!("Signed in as {email}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(cli.settings.as_deref())?;
    init_subscriber(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    match cli.command {
        Command::Launch { import } => launch(&settings, import.as_deref()).await,
        Command::Regions => regions(&settings).await,
        Command::Login {
            email,
            code,
            verifier,
        } => login(&settings, &email, &code, verifier.as_deref()).await,
    }
}
