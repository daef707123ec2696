//! LocalSense emulator entry point.
//!
//! ```text
//! tagstream-emulator                     Run with tagstream-emulator.toml
//! tagstream-emulator --config <path>     Load a custom config TOML
//! tagstream-emulator --gen-config        Write default config to stdout
//! tagstream-emulator --bind 0.0.0.0:9100 Override the listen address
//! tagstream-emulator --seed 7            Override the walk seed
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tagstream_core::Emulator;
use tagstream_emulator::config::EmulatorFileConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tagstream-emulator",
    about = "Standalone LocalSense protocol emulator"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tagstream-emulator.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the listen address (host:port).
    #[arg(long)]
    bind: Option<String>,

    /// Override the walk seed.
    #[arg(long)]
    seed: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&EmulatorFileConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = EmulatorFileConfig::load(&cli.config);
    if let Some(bind) = cli.bind {
        config.emulator.bind_addr = bind;
    }
    if let Some(seed) = cli.seed {
        config.emulator.seed = seed;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tagstream-emulator v{}", env!("CARGO_PKG_VERSION"));
    info!("update interval: {} ms", config.emulator.update_interval_ms);
    info!("walk seed: {}", config.emulator.seed);

    let emulator = Emulator::bind(config.emulator).await?;
    info!("listening on {}", emulator.local_addr()?);

    // Ctrl-C handler.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        cancel_clone.cancel();
    });

    emulator.run(cancel).await;

    Ok(())
}
