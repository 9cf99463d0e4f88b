pub mod app;
pub mod cli;
pub mod config;
pub mod control;
pub mod monitor;
pub mod mqtt;
pub mod sensor;
pub mod serial;

use clap::Parser;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.verbose)?;

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    info!("Starting {:?}", cli.role);

    let cancel = CancellationToken::new();
    spawn_interrupt_listener(cancel.clone());

    let result = app::run(cli.role, config, cancel.clone()).await;
    cancel.cancel();

    match &result {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => error!("Stopped with error: {}", e),
    }
    result
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(if verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn spawn_interrupt_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                cancel.cancel();
            }
            Err(e) => error!("Unable to listen for interrupt: {}", e),
        }
    });
}
