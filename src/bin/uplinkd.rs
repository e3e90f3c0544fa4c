//! Uplink daemon - mediates tool access to the shared transport link.
//!
//! The uplinkd binary is a long-running background process that:
//! - Accepts tool connections over a Unix domain control socket
//! - Tracks logical connections and their lifecycle state per session
//! - Forwards send/recv traffic to the single backend link
//! - Handles graceful shutdown on SIGTERM/SIGINT
//!
//! ## Usage
//!
//! `uplinkd [-c /etc/uplink/uplinkd.toml] [-v | -q]`
//!
//! Verbosity stacks: `-v` for debug, `-vv` for trace; `-q` for warnings
//! only, `-qq` for errors only. `RUST_LOG` overrides both when set.
//!
//! ## Files
//!
//! - `/etc/uplink/uplinkd.toml` - default configuration file
//! - the control socket named by `daemon.control_socket` in that file

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use uplink::backend;
use uplink::config::Config;
use uplink::daemon::{self, ControlListener, Registry};

const DEFAULT_CONFIG: &str = "/etc/uplink/uplinkd.toml";

#[derive(Parser, Debug)]
#[command(name = "uplinkd", version, about = "Transport link access daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Decrease log verbosity (-q warnings, -qq errors)
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,
}

fn init_logging(args: &Args) {
    let default_level = match (args.quiet, args.verbose) {
        (0, 0) => "info",
        (0, 1) => "debug",
        (0, _) => "trace",
        (1, _) => "warn",
        (_, _) => "error",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("uplink={default_level},uplinkd={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    tracing::info!("uplinkd starting, version {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)?;

    let listener = ControlListener::bind(&config.daemon.control_socket)?;
    if let Some(mode) = config.socket_mode_bits()? {
        listener.set_permissions(mode)?;
    }
    if let Some(group) = &config.daemon.socket_group {
        listener.set_group(group)?;
    }

    // The backend comes up before the first tool can connect, so sessions
    // never observe a half-initialized link.
    let mut link = backend::from_config(&config)?;
    link.establish().await?;
    tracing::info!("backend link established");

    let registry = Arc::new(Registry::new(link));
    let cancel = CancellationToken::new();

    let server = tokio::spawn(daemon::serve(
        listener,
        Arc::clone(&registry),
        cancel.clone(),
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }

    cancel.cancel();
    server.await??;

    tracing::info!("uplinkd shutdown complete");
    Ok(())
}
