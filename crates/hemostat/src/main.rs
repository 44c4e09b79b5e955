//! HemoStat daemon executable

use std::sync::Arc;

use clap::{Arg, ArgAction, Command};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hemostat::HemoStat;
use hemostat_broker::RedisBroker;
use hemostat_common::Config;
use hemostat_runtime::DockerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("hemostat")
        .version(env!("CARGO_PKG_VERSION"))
        .about("HemoStat - autonomous container-health control plane")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (TOML)")
                .required(false),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Accept remediation requests without touching the runtime")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    init_tracing(matches.get_flag("verbose"));

    let mut config = load_config(matches.get_one::<String>("config"))?;
    if matches.get_flag("dry-run") {
        config.responder.dry_run = true;
    }

    info!("starting HemoStat v{}", env!("CARGO_PKG_VERSION"));
    if config.responder.dry_run {
        info!("dry-run enabled: no runtime side effects will be issued");
    }

    let broker = Arc::new(RedisBroker::connect(config.broker.clone()).await?);
    let runtime = Arc::new(DockerRuntime::new(&config.runtime)?);
    let daemon = HemoStat::new(config, broker, runtime);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    daemon.run(shutdown_rx).await?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "hemostat=debug,hemostat_broker=debug,hemostat_monitor=debug,\
         hemostat_analyzer=debug,hemostat_responder=debug,hemostat_alert=debug"
    } else {
        "hemostat=info,hemostat_broker=info,hemostat_monitor=info,\
         hemostat_analyzer=info,hemostat_responder=info,hemostat_alert=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&String>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            info!("loading configuration from {}", path);
            let raw = std::fs::read_to_string(path)?;
            Ok(Config::from_toml(&raw)?)
        }
        None => {
            info!("using default configuration");
            Ok(Config::default())
        }
    }
}
