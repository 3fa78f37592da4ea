//! Cascade node daemon.
//!
//! - `serve` — bind the swarm server, register seed files, optionally
//!   start downloading every missing generation, and run the ambient
//!   sweeps until ctrl-c.
//! - `make-seed` — build a `.nc` seed container for a payload file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cascade_seed::SeedFile;
use cascade_swarm::server::spawn_supervised;
use cascade_swarm::{client, Directory, Server};

/// Cascade peer-to-peer file distribution node.
#[derive(Parser, Debug)]
#[command(name = "cascade-node", about = "Cascade RLNC file distribution node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the swarm node.
    Serve {
        /// Address the server binds.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port the server binds.
        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Seed files (`.nc`) to register at startup.
        #[arg(long = "seed")]
        seeds: Vec<PathBuf>,

        /// Start downloading every missing generation immediately.
        #[arg(long, default_value_t = false)]
        download: bool,
    },

    /// Create a `.nc` seed file for a payload.
    MakeSeed {
        /// The payload file to describe.
        path: PathBuf,

        /// Free-text comment embedded in the seed.
        #[arg(long, default_value = "")]
        comment: String,

        /// Primary announce address (`host:port`).
        #[arg(long, default_value = "")]
        announce: String,

        /// Additional announce addresses.
        #[arg(long = "announce-peer")]
        announce_list: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            host,
            port,
            seeds,
            download,
        } => serve(host, port, seeds, download).await,
        Command::MakeSeed {
            path,
            comment,
            announce,
            announce_list,
        } => make_seed(path, comment, announce, announce_list),
    }
}

async fn serve(host: String, port: u16, seeds: Vec<PathBuf>, download: bool) -> anyhow::Result<()> {
    let directory = Directory::new(host, port);
    tracing::info!(addr = %directory.listen_addr(), "cascade-node starting");

    for seed in seeds {
        let file = directory.add_file(&seed).await?;
        tracing::info!(
            path = %file.path().display(),
            generations = file.seed().generation_count(),
            length = file.seed().info.length,
            "seed registered"
        );
    }

    let shutdown = CancellationToken::new();
    let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<anyhow::Error>(1);

    let server = Server::new(Arc::clone(&directory));
    let server_handle = spawn_supervised(server, shutdown.clone(), supervisor_tx);
    let sweep_handles = client::spawn_sweeps(&directory, &shutdown);

    if download {
        for file in directory.files().await {
            client::request_file(&directory, &file).await;
        }
    }

    let exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
        failure = supervisor_rx.recv() => match failure {
            Some(e) => {
                tracing::error!(error = %e, "server failed");
                Err(e)
            }
            None => Ok(()),
        }
    };

    shutdown.cancel();
    for file in directory.files().await {
        file.stop_receiving_all().await;
    }
    let _ = server_handle.await;
    for handle in sweep_handles {
        let _ = handle.await;
    }
    exit
}

fn make_seed(
    path: PathBuf,
    comment: String,
    announce: String,
    announce_list: Vec<String>,
) -> anyhow::Result<()> {
    let (seed, seed_path) = SeedFile::create(&path, &comment, &announce, &announce_list)?;
    tracing::info!(
        seed = %seed_path.display(),
        generations = seed.generation_count(),
        length = seed.info.length,
        "seed file created"
    );
    for (serial, hash) in seed.info.hash.iter().enumerate() {
        tracing::info!(serial, hash = %hex::encode(hash), "generation");
    }
    Ok(())
}
