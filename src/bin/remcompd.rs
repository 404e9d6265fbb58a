use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;

use remcomp::cli::ServerOpts;
use remcomp::config::ServerConfig;
use remcomp::logger::{NoopLogger, SessionLogger, TextLogger};
use remcomp::pool::ShutdownOutcome;
use remcomp::server;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts = ServerOpts::parse();
    let config = ServerConfig::from_opts(&opts)?;

    let logger: Arc<dyn SessionLogger> = match &config.log_file {
        Some(p) => Arc::new(
            TextLogger::new(p).with_context(|| format!("open session log {}", p.display()))?,
        ),
        None => Arc::new(NoopLogger),
    };

    info!("remcompd v{}", env!("CARGO_PKG_VERSION"));
    info!("  Bind: {}", config.listen_addr());
    info!("  Workers: {}", config.workers);
    info!("  Root: {}", config.root.display());
    info!("  Archiver: {:?}", config.archiver);
    if config.bind.is_unspecified() {
        warn!("binding to all interfaces; the protocol is unencrypted and unauthenticated");
    }

    let handle = server::start(&config, config.archiver.build(), logger)?;

    let trigger = handle.shutdown_trigger();
    ctrlc::set_handler(move || {
        if let ShutdownOutcome::Accepted = trigger.request() {
            info!("interrupt received: shutting down");
        }
    })
    .context("install interrupt handler")?;

    handle.join()?;
    info!("remcompd stopped");
    Ok(())
}
