//! Flow Capture Daemon
//!
//! Main entry point for fcd. Polls CONFIG_DB for BDC/HDC telemetry
//! sessions and keeps the switch SDK programmed to match.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use sonic_fcd::config::{DaemonConfig, DEFAULT_CONFIG_PATH};
use sonic_fcd::engine::EngineContext;
use sonic_fcd::executor::{InnoShellRunner, TelemetryShell};
use sonic_fcd::loader::SessionConfigLoader;
use sonic_fcd::route::KernelRouteLookup;
use sonic_fcd::store::RedisStore;
use sonic_fcd::topology::TopologyResolver;
use sonic_fcd::FlowCaptureDaemon;

/// Flow capture daemon (BDC/HDC telemetry sessions)
#[derive(Parser, Debug)]
#[command(name = "fcd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Polling interval in milliseconds
    #[arg(short = 'p', long)]
    poll_interval: Option<u64>,

    /// Sleep before processing begins, in milliseconds
    #[arg(short = 'S', long)]
    slow_start_delay: Option<u64>,

    /// No device programming; just parse config and log actions
    #[arg(short = 'D', long)]
    dry_run: bool,

    /// Log at trace level
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Write every trace event to this file as well
    #[arg(long)]
    trace_file: Option<PathBuf>,

    /// Do not apply HDC on all ports with a single command
    #[arg(long)]
    disable_all_ports: bool,

    /// Redis server host
    #[arg(long)]
    redis_host: Option<String>,

    /// Redis server port
    #[arg(long)]
    redis_port: Option<u16>,
}

impl Args {
    /// Command line flags win over the config file.
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(poll_interval) = self.poll_interval {
            config.daemon.poll_interval_ms = poll_interval;
        }
        if let Some(slow_start) = self.slow_start_delay {
            config.daemon.slow_start_ms = slow_start;
        }
        if self.dry_run {
            config.daemon.dry_run = true;
        }
        if self.disable_all_ports {
            config.daemon.all_ports = false;
        }
        if let Some(host) = &self.redis_host {
            config.database.redis_host = host.clone();
        }
        if let Some(port) = self.redis_port {
            config.database.redis_port = port;
        }
    }
}

fn init_logging(verbose: bool, trace_file: Option<&Path>) -> anyhow::Result<()> {
    let default_level = if verbose { LevelFilter::TRACE } else { LevelFilter::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let console = fmt::layer().with_target(true).compact().with_filter(env_filter);

    let file_layer = match trace_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to open trace file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::TRACE),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to set logger")?;
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("fcd: Received SIGTERM"),
            _ = sigint.recv() => info!("fcd: Received SIGINT"),
        }
        cancel.cancel();
    });
    Ok(())
}

async fn build_daemon(config: &DaemonConfig) -> anyhow::Result<FlowCaptureDaemon> {
    let db = &config.database;
    let config_db = RedisStore::connect(&db.redis_host, db.redis_port, db.config_db)
        .await
        .context("Failed to connect to CONFIG_DB")?;
    let asic_db = RedisStore::connect(&db.redis_host, db.redis_port, db.asic_db)
        .await
        .context("Failed to connect to ASIC_DB")?;

    let runner = InnoShellRunner::new(
        config.shell.remote_shell.clone(),
        config.shell.workdir.clone(),
        config.shell.port,
    );

    let ctx = EngineContext {
        loader: Arc::new(SessionConfigLoader::new(Arc::new(config_db), config.daemon.all_ports)),
        resolver: Arc::new(TopologyResolver::new(Arc::new(asic_db), Arc::new(KernelRouteLookup))),
        shell: Arc::new(TelemetryShell::new(Arc::new(runner), config.daemon.dry_run)),
    };

    Ok(FlowCaptureDaemon::new(ctx, config.poll_interval(), config.slow_start()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.trace_file.as_deref())?;
    info!("fcd: started {:?}", std::env::args().collect::<Vec<_>>());

    let mut config = DaemonConfig::load_or_default(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    let daemon = build_daemon(&config).await?;
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    if let Err(e) = daemon.run(cancel).await {
        error!(error = %e, "fcd: Daemon exiting with error");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "fcd",
            "--poll-interval",
            "1000",
            "--dry-run",
            "--disable-all-ports",
            "--redis-port",
            "6380",
        ]);
        let mut config = DaemonConfig::default();
        args.apply(&mut config);

        assert_eq!(config.daemon.poll_interval_ms, 1000);
        assert!(config.daemon.dry_run);
        assert!(!config.daemon.all_ports);
        assert_eq!(config.database.redis_port, 6380);
        assert_eq!(config.database.redis_host, "127.0.0.1");
    }

    #[test]
    fn test_defaults_leave_config_alone() {
        let args = Args::parse_from(["fcd"]);
        let mut config = DaemonConfig::default();
        args.apply(&mut config);
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
