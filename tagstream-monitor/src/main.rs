//! Tag positioning monitor entry point.
//!
//! ```text
//! tagstream-monitor                        Run with tagstream-monitor.toml
//! tagstream-monitor --config <path>        Load a custom config TOML
//! tagstream-monitor --gen-config           Write default config to stdout
//! tagstream-monitor --provider simulated   Override the backend
//! tagstream-monitor --tags 101,102         Override the startup tag set
//! tagstream-monitor --json                 Print events as JSON lines
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tagstream_core::{Event, EventKind, ProviderKind, create_provider};
use tagstream_monitor::config::MonitorConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tagstream-monitor",
    about = "Console monitor for LocalSense tag positioning"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tagstream-monitor.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the provider backend ("localsense" or "simulated").
    #[arg(long)]
    provider: Option<String>,

    /// Override the server address (host:port).
    #[arg(long)]
    server: Option<String>,

    /// Override the startup tag subscriptions (comma separated).
    #[arg(long)]
    tags: Option<String>,

    /// Print events as JSON lines instead of log records.
    #[arg(long)]
    json: bool,
}

// ── Event printing ───────────────────────────────────────────────

fn log_event(event: &Event) {
    match event {
        Event::Connected => info!("connected"),
        Event::Disconnected(disconnection) => warn!(
            code = disconnection.code,
            reason = %disconnection.reason,
            "disconnected"
        ),
        Event::ConnectionError { message } => warn!(%message, "connection error"),
        Event::PositionUpdate(batch) => {
            info!(count = batch.len(), "position update");
            for position in batch {
                debug!(
                    tag = %position.tag_id,
                    x = position.x,
                    y = position.y,
                    map = %position.map_id,
                    battery = position.battery_level,
                    "tag position"
                );
            }
        }
        Event::BatteryUpdate(batch) => info!(count = batch.len(), "battery update"),
        Event::TagStatusChange(batch) => info!(count = batch.len(), "status change"),
        Event::Alarm(alarm) => warn!(
            tag = %alarm.tag_id,
            kind = %alarm.kind,
            message = %alarm.message,
            "alarm"
        ),
    }
}

fn print_json(event: &Event) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!(error = %err, "failed to serialize event"),
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&MonitorConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = MonitorConfig::load(&cli.config);
    if let Some(provider) = cli.provider {
        config.provider.kind = provider;
    }
    if let Some(server) = cli.server {
        config.provider.server_url = server;
    }
    if let Some(tags) = cli.tags {
        config.tags = tags
            .split(',')
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tagstream-monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("provider: {}", config.provider.kind);
    if !config.provider.server_url.is_empty() {
        info!("server: {}", config.provider.server_url);
    }
    info!("startup tags: {}", config.tags.len());

    let kind = ProviderKind::from_str(&config.provider.kind)?;
    let mut provider = create_provider(kind, config.to_provider_config())?;

    let json = cli.json;
    for event_kind in EventKind::ALL {
        provider.on(
            event_kind,
            Box::new(move |event| {
                if json {
                    print_json(event);
                } else {
                    log_event(event);
                }
            }),
        );
    }

    // A failed first attempt is not fatal; the session keeps retrying.
    if let Err(err) = provider.initialize().await {
        warn!(error = %err, "initial connection failed; retrying in the background");
    }
    if !config.tags.is_empty() {
        match provider.subscribe_to_tags(&config.tags).await {
            Ok(()) => info!(count = config.tags.len(), "subscribed"),
            Err(err) => warn!(error = %err, "subscription failed"),
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Ctrl-C received, shutting down");
    provider.disconnect();

    Ok(())
}
