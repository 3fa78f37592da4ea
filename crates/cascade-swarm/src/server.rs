//! TCP server: accept loop, per-connection dispatch, panic supervision.
//!
//! Every connection starts with the 45-byte handshake. A malformed
//! handshake closes the socket before a single byte is written back.
//! After a valid one the server registers the remote's advertised
//! listening endpoint as a peer, answers with the response handshake,
//! and then serves whichever exchange the reserved bits selected.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::wire::{self, Handshake, WireError};

/// The swarm-facing TCP server.
pub struct Server {
    directory: Arc<Directory>,
}

impl Server {
    pub fn new(directory: Arc<Directory>) -> Self {
        Server { directory }
    }

    /// Bind the directory's listen address.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let listener = TcpListener::bind(self.directory.listen_addr()).await?;
        info!(addr = %listener.local_addr()?, "server listening");
        Ok(listener)
    }

    /// Bind the directory's listen address and serve until `shutdown`
    /// fires.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve an already-bound listener until `shutdown` fires.
    /// Connection handlers are detached tasks; their transport errors
    /// are logged and close only the offending connection.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, remote) = accepted?;
                    debug!(%remote, "connection accepted");
                    let directory = Arc::clone(&self.directory);
                    let connection_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = connection_shutdown.cancelled() => {}
                            result = handle_connection(socket, remote, directory) => {
                                if let Err(e) = result {
                                    debug!(%remote, error = %e, "connection closed");
                                }
                            }
                        }
                    });
                }
            }
        }
    }
}

/// Run the server on its own task, reporting a panic or a fatal accept
/// error to the supervisory channel and firing `shutdown` so the rest of
/// the node stops cleanly.
pub fn spawn_supervised(
    server: Server,
    shutdown: CancellationToken,
    supervisor: mpsc::Sender<anyhow::Error>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let run_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move { server.run(run_shutdown).await });
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "server terminated with an error");
                let _ = supervisor.send(e).await;
                shutdown.cancel();
            }
            Err(join_error) if join_error.is_panic() => {
                let _ = supervisor
                    .send(anyhow!("server panicked: {join_error}"))
                    .await;
                shutdown.cancel();
            }
            Err(_) => {} // cancelled during shutdown
        }
    })
}

async fn handle_connection(
    mut socket: TcpStream,
    remote: std::net::SocketAddr,
    directory: Arc<Directory>,
) -> Result<(), WireError> {
    let handshake = Handshake::read(&mut socket).await?;

    // The remote tells us where *its* server listens.
    let peer_addr = format!("{}:{}", remote.ip(), handshake.port);
    directory.add_peer(&peer_addr).await;

    let known = directory.is_generation_known(&handshake.info_hash).await;
    handshake
        .response(known, directory.port())
        .write(&mut socket)
        .await?;

    if handshake.is_alive_ping() {
        return Ok(());
    }

    if handshake.wants_neighbours() {
        let addrs: Vec<String> = directory
            .neighbours(&handshake.info_hash)
            .await
            .into_iter()
            .map(|p| p.addr)
            .collect();
        wire::write_neighbours(&mut socket, &addrs).await?;
        return Ok(());
    }

    if handshake.wants_pieces() {
        while let Some(coded_piece) = directory.coded_piece_for(&handshake.info_hash).await {
            wire::write_coded_piece(&mut socket, &coded_piece).await?;
        }
    }

    Ok(())
}
