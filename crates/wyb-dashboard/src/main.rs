//! # wyb-dashboard
//!
//! Terminal front end for the WatchYourBack display systems. Each invocation
//! connects to one system, runs a single operation and prints the result as
//! JSON. `watch` stays connected and streams events until interrupted.

#![deny(unsafe_code)]

mod render;
mod target;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{info, warn};
use wyb_client::connection::validate_url;
use wyb_client::{ConnectOptions, EventKind, Probe, SystemRegistry, TcpProbe, WsService};
use wyb_core::protocol::DisplayState;
use wyb_settings::{StateStore, WybSettings};

use crate::target::Target;

/// WatchYourBack dashboard.
#[derive(Parser, Debug)]
#[command(name = "wyb-dashboard", version, about = "Drive WatchYourBack display systems")]
struct Cli {
    /// System to talk to (defaults to the last one used).
    #[arg(long, global = true)]
    system: Option<String>,

    /// Server URL, overriding the configured one. Remembered per system.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Reply deadline for this invocation, in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Skip the reachability probe before connecting.
    #[arg(long, global = true)]
    no_probe: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List display clients and their state.
    Clients,
    /// List saved presets.
    Presets,
    /// Push a display state to one or more clients.
    Display {
        /// Target client ids, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        clients: Vec<String>,
        /// Background color as #RRGGBB.
        #[arg(long)]
        color: Option<String>,
        /// Image URL or server path; switches to image mode.
        #[arg(long)]
        image: Option<String>,
        /// Number drawn over the background.
        #[arg(long)]
        number: Option<String>,
    },
    /// Save the current state of all clients as a preset.
    SavePreset {
        /// Preset name.
        name: String,
    },
    /// Apply a saved preset.
    LoadPreset {
        /// Preset name.
        name: String,
    },
    /// Ask the server to verify its preset file.
    CheckPresets,
    /// Connect to every configured system once and report its status.
    Systems,
    /// Stream connection events and messages until interrupted.
    Watch,
}

impl Command {
    fn display_state(
        color: Option<String>,
        image: Option<String>,
        number: Option<String>,
    ) -> DisplayState {
        let mut state = match image {
            Some(image) => DisplayState::image(image),
            None => DisplayState::default(),
        };
        state.background = color;
        state.number = number;
        state
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = wyb_settings::load_settings();
    let settings = loaded.as_ref().cloned().unwrap_or_default();
    wyb_core::logging::init_subscriber(&settings.logging.level);
    if let Err(err) = &loaded {
        warn!(error = %err, "failed to load settings, using defaults");
    }

    if matches!(cli.command, Command::Systems) {
        return systems(&settings).await;
    }

    let mut state = StateStore::open_default().context("failed to open dashboard state")?;
    let target = target::resolve(
        cli.system.as_deref(),
        cli.url.as_deref(),
        &settings,
        &state,
    )?;

    let probe = TcpProbe::new(settings.connection.probe_timeout());
    preflight(&target, (!cli.no_probe).then_some(&probe as &dyn Probe)).await?;

    let service = WsService::from_settings(target.system.clone(), &settings.connection);
    let watching = matches!(cli.command, Command::Watch);
    if watching {
        attach_printers(&service);
    }
    let options = if watching {
        ConnectOptions::default()
    } else {
        ConnectOptions::no_reconnect()
    };

    service
        .connect(&target.url, options)
        .await
        .with_context(|| format!("failed to connect to '{}' at {}", target.system, target.url))?;
    if let Err(err) = target::remember(&mut state, &target) {
        warn!(error = %err, "failed to save dashboard state");
    }

    let timeout = cli.timeout_ms.map(Duration::from_millis);
    let outcome = run(&service, cli.command, timeout).await;
    service.disconnect();
    outcome
}

/// Reject a malformed URL, then check the server answers at all.
async fn preflight(target: &Target, probe: Option<&dyn Probe>) -> Result<()> {
    let _ = validate_url(&target.url)
        .with_context(|| format!("bad URL for system '{}'", target.system))?;
    if let Some(probe) = probe {
        if !probe.reachable(&target.url).await {
            bail!(
                "system '{}' is not reachable at {}",
                target.system,
                target.url
            );
        }
    }
    Ok(())
}

async fn run(service: &WsService, command: Command, timeout: Option<Duration>) -> Result<()> {
    match command {
        Command::Clients => {
            let clients = service.get_clients(timeout).await?;
            render::print_json(&clients)
        }
        Command::Presets => {
            let presets = service.get_presets(timeout).await?;
            render::print_json(&presets)
        }
        Command::Display {
            clients,
            color,
            image,
            number,
        } => {
            let display = Command::display_state(color, image, number);
            let updated = service.update_display(clients, &display, timeout).await?;
            render::print_json(&updated)
        }
        Command::SavePreset { name } => {
            let saved = service.save_preset(&name, timeout).await?;
            render::print_json(&saved)
        }
        Command::LoadPreset { name } => {
            let loaded = service.load_preset(&name, timeout).await?;
            render::print_json(&loaded)
        }
        Command::CheckPresets => {
            let report = service.check_presets_integrity(timeout).await?;
            render::print_json(&report)
        }
        Command::Watch => {
            info!(system = service.system(), "watching, press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            Ok(())
        }
        Command::Systems => bail!("'systems' does not run against a single connection"),
    }
}

fn attach_printers(service: &WsService) {
    for kind in EventKind::ALL {
        let system = service.system().to_string();
        let _ = service.on(kind, move |event| {
            println!("{}", render::event_json(&system, event));
            Ok(())
        });
    }
}

async fn systems(settings: &WybSettings) -> Result<()> {
    let registry = SystemRegistry::from_settings(settings);
    let options =
        ConnectOptions::no_reconnect().with_connect_timeout(settings.connection.probe_timeout());
    render::print_json(&system_report(&registry, options).await)
}

/// Connect every system once and report how each attempt went.
async fn system_report(registry: &SystemRegistry, options: ConnectOptions) -> BTreeMap<String, Value> {
    let outcomes = registry.connect_all(options).await;
    let statuses = registry.statuses();
    registry.disconnect_all();

    registry
        .systems()
        .map(|system| {
            let error = outcomes
                .get(system)
                .and_then(|outcome| outcome.as_ref().err())
                .map(ToString::to_string);
            let report = json!({
                "url": registry.url(system),
                "status": statuses.get(system),
                "error": error,
            });
            (system.to_string(), report)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
