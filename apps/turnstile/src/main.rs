use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use turnstile_client_core::config::Config;
use turnstile_client_core::queue::{
    AdmissionController, AdmissionState, AdmissionTuning, HttpQueueTransport, PollOutcome,
    QueueTransport,
};

#[derive(Parser, Debug)]
#[command(name = "turnstile", about = "Storefront waiting-room client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register and hold a place in the waiting room until admitted.
    Watch,
    /// One-shot status check against the queue service.
    Status,
    /// Release the reservation and entry token best-effort.
    Release,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let transport =
        Arc::new(HttpQueueTransport::new(&config).context("building queue transport")?);

    match cli.command {
        Command::Watch => watch(transport, &config).await,
        Command::Status => {
            match transport.poll_status().await.context("status poll")? {
                PollOutcome::Ready => println!("ready: you may enter"),
                PollOutcome::Waiting(snapshot) => println!(
                    "waiting: position {} of {} ({} behind you)",
                    snapshot.position, snapshot.total_size, snapshot.behind
                ),
            }
            Ok(())
        }
        Command::Release => {
            // Awaited forms here: the process is about to exit, so the
            // fire-and-forget variants would be lost with it.
            if let Err(err) = transport.abandon_reservation_now().await {
                eprintln!("reservation release failed: {err}");
            }
            if let Err(err) = transport.release_entry_now().await {
                eprintln!("entry release failed: {err}");
            }
            Ok(())
        }
    }
}

async fn watch(transport: Arc<HttpQueueTransport>, config: &Config) -> anyhow::Result<()> {
    let mut controller =
        AdmissionController::new(transport, AdmissionTuning::from_config(config));
    let mut states = controller.subscribe();
    controller.activate();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    bail!("admission controller went away");
                }
                let state = states.borrow_and_update().clone();
                match state {
                    AdmissionState::Unregistered => {}
                    AdmissionState::Registering => println!("registering..."),
                    AdmissionState::Waiting(snapshot) => println!(
                        "waiting: position {} of {} ({} behind you)",
                        snapshot.position, snapshot.total_size, snapshot.behind
                    ),
                    AdmissionState::Ready => {
                        println!("admitted: proceed to checkout");
                        return Ok(());
                    }
                    AdmissionState::Failed(reason) => bail!("{reason}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                // Dropping the controller releases the reservation.
                println!("leaving the waiting room");
                return Ok(());
            }
        }
    }
}
