use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::ingest::Ingestor;
use crate::protocol::{self, FrameBuffer, ProtocolError};
use crate::server::ACK;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub idle_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            idle_timeout: cfg.idle_timeout(),
            max_frame_bytes: cfg.max_frame_bytes,
        }
    }
}

/// Serve one device until it disconnects, a socket error occurs, or the
/// listener has been stopped and the connection sits idle.
///
/// An idle timeout alone never closes the connection.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ingestor: Ingestor,
    settings: ConnectionSettings,
    running: Arc<AtomicBool>,
) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, peer = %peer, "device connected");

    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut frames = FrameBuffer::new(settings.max_frame_bytes);
    let mut line: Vec<u8> = Vec::with_capacity(256);

    loop {
        // Partial bytes stay in `line` across timeouts, so the read can resume.
        let limit = (settings.max_frame_bytes + 1).saturating_sub(line.len()) as u64;
        let read = timeout(
            settings.idle_timeout,
            (&mut reader).take(limit).read_until(b'\n', &mut line),
        )
        .await;

        match read {
            Err(_) => {
                if !running.load(Ordering::SeqCst) {
                    info!(connection_id = %connection_id, peer = %peer, "server stopped; closing idle connection");
                    break;
                }
                debug!(connection_id = %connection_id, peer = %peer, "no data within idle timeout");
            }
            Ok(Err(e)) => {
                warn!(connection_id = %connection_id, peer = %peer, error = %e, "read failed; closing connection");
                break;
            }
            Ok(Ok(0)) => {
                if let Some(frame) = frames.finish() {
                    if let Err(e) = handle_frame(frame, &ingestor, &mut writer, &connection_id).await
                    {
                        debug!(connection_id = %connection_id, error = %e, "could not acknowledge final record");
                    }
                }
                info!(connection_id = %connection_id, peer = %peer, "connection closed by peer");
                break;
            }
            Ok(Ok(_)) => {
                let frame = frames.push_line(&line);
                line.clear();
                let Some(frame) = frame else {
                    continue;
                };
                if let Err(e) = handle_frame(frame, &ingestor, &mut writer, &connection_id).await {
                    warn!(connection_id = %connection_id, peer = %peer, error = %e, "write failed; closing connection");
                    break;
                }
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(connection_id = %connection_id, error = %e, "socket shutdown failed");
    }
    info!(connection_id = %connection_id, peer = %peer, "connection closed");
}

/// Decode a record, run it through the pipeline and acknowledge it.
///
/// Only socket errors are returned; everything else is logged here and the
/// connection keeps going.
async fn handle_frame(
    frame: Result<String, ProtocolError>,
    ingestor: &Ingestor,
    writer: &mut OwnedWriteHalf,
    connection_id: &str,
) -> Result<(), AppError> {
    let record = match frame {
        Ok(record) => record,
        Err(e) => {
            warn!(connection_id = %connection_id, stage = e.stage(), error = %e, "dropping malformed record");
            return Ok(());
        }
    };

    let reading = match protocol::decode(&record) {
        Ok(reading) => reading,
        Err(e) => {
            warn!(
                connection_id = %connection_id,
                stage = e.stage(),
                error = %e,
                raw = %record.escape_debug(),
                "dropping undecodable record"
            );
            return Ok(());
        }
    };

    let device_id = reading.device_id.clone();
    debug!(
        connection_id = %connection_id,
        device_id = %device_id,
        voltage = reading.voltage_volts(),
        fix = %reading.fix_status,
        "record decoded"
    );

    match ingestor.submit(reading).await {
        Ok(outcome) => debug!(
            connection_id = %connection_id,
            device_id = %device_id,
            reading_id = outcome.reading_id,
            notification_id = ?outcome.notification_id,
            "record ingested"
        ),
        Err(e) => error!(
            connection_id = %connection_id,
            device_id = %device_id,
            error = %e,
            "record decoded but not stored"
        ),
    }

    writer.write_all(&[ACK]).await?;
    Ok(())
}
