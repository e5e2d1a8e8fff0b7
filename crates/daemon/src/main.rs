// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fcgipoold: FastCGI worker-pool scheduler daemon.

use anyhow::Context;
use clap::Parser;
use fcp_config::SchedulerConfig;
use fcp_core::SystemClock;
use fcp_daemon::engine::{
    spawn_signal_listeners, ConfigWatcher, Engine, EngineOptions, UnixProcessAdapter,
};
use fcp_daemon::lifecycle;
use std::path::PathBuf;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "/etc/fcgipool/fcgipool.conf";

#[derive(Parser)]
#[command(
    name = "fcgipoold",
    version,
    about = "FastCGI worker-pool scheduler",
    long_about = "Accepts FastCGI requests from a web server, matches each one to a \
                  configured project, and splices it onto an idle worker process."
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Do not detach into the background
    #[arg(short = 'd', long = "foreground")]
    foreground: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Resolve before the daemon chdirs to '/', so reloads find the file
    let config_path = cli
        .config
        .canonicalize()
        .with_context(|| format!("cannot resolve config path '{}'", cli.config.display()))?;

    let config = SchedulerConfig::load(&config_path)
        .with_context(|| format!("cannot load '{}'", config_path.display()))?;

    let inherited = lifecycle::inherited_listener().context("cannot recover listener")?;

    let _log_guard = lifecycle::init_logging(&config.global)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        config = %config_path.display(),
        "starting fcgipoold"
    );

    let listener = match inherited {
        // Re-executed background child: the foreground parent already
        // checked limits, bound the socket, and dropped privileges; the
        // listener arrives on fd 0.
        Some(listener) => listener,
        None => {
            lifecycle::check_resource_limits(&config.projects)?;

            // Bind while still privileged, drop afterwards
            let listener = lifecycle::bind_listener(&config.global)?;
            lifecycle::drop_privileges(&config.global)?;

            if !cli.foreground {
                // Setup is done and every fatal error had a chance to
                // fail this invocation; hand off to the background child
                lifecycle::detach(listener).context("cannot detach")?;
                return Ok(());
            }
            listener
        }
    };

    let pidfile = config
        .global
        .pidfile
        .as_deref()
        .map(lifecycle::write_pidfile)
        .transpose()?;

    let runtime = tokio::runtime::Runtime::new().context("cannot start runtime")?;
    let result = runtime.block_on(run(config, config_path, listener));

    drop(pidfile);
    info!("shut down");
    result
}

async fn run(
    config: SchedulerConfig,
    config_path: PathBuf,
    listener: std::net::TcpListener,
) -> anyhow::Result<()> {
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

    spawn_signal_listeners(events_tx.clone()).context("cannot install signal handlers")?;
    let watcher = ConfigWatcher::new(events_tx.clone()).context("cannot start config watcher")?;
    let adapter = UnixProcessAdapter::new(events_tx.clone());

    let options = EngineOptions {
        term_timeout: config.global.term_timeout,
        config_path: Some(config_path),
        ..EngineOptions::default()
    };
    let engine = Engine::new(adapter, SystemClock, events_tx, Some(watcher), options);

    listener.set_nonblocking(true).context("listener setup")?;
    let listener = tokio::net::TcpListener::from_std(listener).context("listener setup")?;

    engine.run(listener, events_rx, &config).await?;
    Ok(())
}
