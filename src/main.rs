use std::fs::File;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use dimmerd::{application::Application, cli::Cli, config::ConfigManager};
use log::{LevelFilter, info};
use syslog::{BasicLogger, Facility, Formatter3164};

const DAEMON_OUTPUT: &str = "/var/tmp/dimmerd.log";

fn init_syslog(level: LevelFilter) -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "dimmerd".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn init_stderr_log(level: LevelFilter) {
    let default = if level >= LevelFilter::Debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn into_daemon() -> Result<()> {
    File::create(DAEMON_OUTPUT)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .with_context(|| format!("Failed to open {DAEMON_OUTPUT}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::load(cli.config)
        .await
        .context("Failed to load configuration")?;

    if cli.dump_config {
        print!("{}", config_manager.to_yaml()?);
        return Ok(());
    }

    info!("dimmerd {} starting", env!("CARGO_PKG_VERSION"));
    Application::builder()
        .with_config_manager(config_manager)
        .build()
        .await?
        .run()
        .await
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // fork before the runtime spawns its worker threads
    if cli.daemonize && !cli.dump_config {
        init_syslog(level)?;
        into_daemon()?;
    } else {
        init_stderr_log(level);
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(run(cli))
}
