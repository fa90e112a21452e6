//! Newline-delimited JSON channel for a local companion process.
//!
//! Each line is one request envelope and gets exactly one response line, in
//! order. Every connection has its own dispatcher session.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::dispatcher::{DispatcherConfig, Session};
use crate::error::{BridgeError, Result};

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, config: DispatcherConfig) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = config.clone();
        let span = info_span!("connection", id = %Uuid::new_v4(), transport = "tcp", %peer);

        tokio::spawn(
            async move {
                if let Err(e) = handle_connection(stream, config).await {
                    warn!(error = %e, "TCP connection ended with an error");
                }
            }
            .instrument(span),
        );
    }
}

async fn handle_connection(stream: TcpStream, config: DispatcherConfig) -> Result<()> {
    let mut session = Session::open(config).await;
    info!(pool = ?session.pool_id(), "TCP connection opened");

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let served = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let mut reply = session.handle_frame(&line).await.to_json();
            reply.push('\n');
            writer.write_all(reply.as_bytes()).await?;
        }
        Ok::<(), BridgeError>(())
    }
    .await;

    session.close().await;
    info!("TCP connection closed");
    served
}
