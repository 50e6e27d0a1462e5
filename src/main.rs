use std::{future::pending, sync::Arc};

use anyhow::Context;
use clap::Parser;
use seat_booking::{
    config::Config,
    server::{Server, ShutdownHandle},
    store::SharedState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let state = Arc::new(SharedState::default());
    let server = Server::bind(&config, state).context("failed to start the server")?;
    tracing::info!("Server listening on: {}", server.local_addr());

    spawn_control(server.shutdown_handle()).context("failed to start the control thread")?;

    server.run()?;
    Ok(())
}

/// Runs the shutdown triggers on a thread of their own; the acceptor and the
/// workers never touch the runtime.
fn spawn_control(shutdown: ShutdownHandle) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("control".to_owned())
        .spawn(move || {
            runtime.block_on(shutdown_requested());
            shutdown.trigger();
            // the stdin reader may still be parked on a blocking read
            runtime.shutdown_background();
        })?;

    Ok(())
}

async fn shutdown_requested() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", err);
            pending::<()>().await;
        }
    };

    let quit = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim() == "quit" => return,
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("failed to read standard input: {}", err);
                    break;
                }
            }
        }

        // without standard input only a signal can stop the server
        pending::<()>().await
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = quit => tracing::info!("received quit, shutting down"),
    }
}
