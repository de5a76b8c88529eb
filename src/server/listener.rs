use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use crate::ingest::Ingestor;
use crate::server::connection::{handle_connection, ConnectionSettings};

/// Back-off after a failed accept, e.g. when the process is out of file
/// descriptors.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Bound but not yet accepting TCP listener.
pub struct Listener {
    listener: TcpListener,
    address: SocketAddr,
    ingestor: Ingestor,
    settings: ConnectionSettings,
}

impl Listener {
    pub async fn bind(config: &ServerConfig, ingestor: Ingestor) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let address = listener.local_addr()?;
        Ok(Self {
            listener,
            address,
            ingestor,
            settings: ConnectionSettings::from(config),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Start accepting. Each connection gets its own task; there is no cap on
    /// the number of concurrent connections.
    pub fn spawn(self) -> ServerHandle {
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let Listener {
            listener,
            address,
            ingestor,
            settings,
        } = self;

        info!(address = %address, "tcp listener accepting connections");
        let accept_running = running.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    // Also fires when the handle is dropped.
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(handle_connection(
                                stream,
                                peer,
                                ingestor.clone(),
                                settings.clone(),
                                accept_running.clone(),
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                        }
                    },
                }
            }
            accept_running.store(false, Ordering::SeqCst);
            drop(listener);
            info!(address = %address, "tcp listener stopped");
        });

        ServerHandle {
            address,
            running,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Running listener. Dropping the handle stops accepting as well.
pub struct ServerHandle {
    address: SocketAddr,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting and close the listening socket. Open connections are
    /// left to finish on their own at their next idle timeout or disconnect.
    pub async fn stop(self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| AppError::Other(anyhow::anyhow!("listener task failed: {}", e)))
    }
}
