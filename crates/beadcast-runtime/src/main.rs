//! beadcast: live mutation relay for beads viewers.
//! Polls the beads daemon's change log and pushes every mutation to
//! connected WebSocket clients; `watch` is a terminal viewer for the relay.

use clap::Parser;
use tokio_util::sync::CancellationToken;

mod cli;
mod daemon;
mod poller;
mod watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("BEADCAST_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let location = daemon::locate(args.socket.as_deref(), args.db.as_deref())?;
    let client_config = args.client_config();

    match args.command {
        cli::Command::Serve(opts) => {
            tracing::info!("beadcast relay starting");
            daemon::run_serve(opts, location, client_config).await?;
        }
        cli::Command::Watch(opts) => {
            let client = daemon::build_client(&location, client_config);
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    tokio::signal::ctrl_c().await.ok();
                    cancel.cancel();
                }
            });

            let viewer = watch::run_watch(
                client,
                &opts.url,
                opts.reconnect_config(),
                cancel,
                |board, link| {
                    let now = chrono::Local::now().time();
                    println!("{}", watch::render_line(board, link, now));
                },
            )
            .await;
            tracing::debug!(refreshes = viewer.refreshes(), "watch stopped");
        }
    }

    Ok(())
}
