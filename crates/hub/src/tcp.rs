//! Newline-delimited JSON over TCP
//!
//! Each line the client sends is one control frame; each frame the hub
//! writes ends with a newline. Liveness probes are `{"type":"ping"}` lines.

use crate::client::serve_connection;
use crate::connection::{Connection, ConnectionSink, ConnectionStream, InboundFrame, OutboundFrame};
use crate::error::HubError;
use crate::hub::HubHandle;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PING_LINE: &[u8] = b"{\"type\":\"ping\"}\n";

pub struct TcpLineConnection {
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_size: usize,
}

impl TcpLineConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            peer,
            max_frame_size,
        }
    }
}

pub struct TcpLineSink(OwnedWriteHalf);

pub struct TcpLineStream {
    reader: BufReader<OwnedReadHalf>,
    max_frame_size: usize,
}

impl Connection for TcpLineConnection {
    type Sink = TcpLineSink;
    type Stream = TcpLineStream;

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn split(self) -> (TcpLineSink, TcpLineStream) {
        let (read, write) = self.stream.into_split();
        (
            TcpLineSink(write),
            TcpLineStream {
                reader: BufReader::new(read),
                max_frame_size: self.max_frame_size,
            },
        )
    }
}

#[async_trait]
impl ConnectionSink for TcpLineSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), HubError> {
        match frame {
            OutboundFrame::Text(mut text) => {
                text.push('\n');
                self.0.write_all(text.as_bytes()).await?;
            }
            OutboundFrame::Ping => self.0.write_all(PING_LINE).await?,
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), HubError> {
        self.0.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionStream for TcpLineStream {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, HubError> {
        let max = self.max_frame_size;
        let mut line = Vec::new();
        // One byte past the limit is enough to tell an oversize line apart
        let read = (&mut self.reader)
            .take(max as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(None);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        if line.len() > max {
            return Err(HubError::FrameTooLarge {
                len: line.len(),
                max,
            });
        }
        Ok(Some(InboundFrame::Text(line)))
    }
}

/// Accept TCP clients until cancelled, serving each on its own task
pub async fn serve_tcp(
    listener: TcpListener,
    hub: HubHandle,
    cancel: CancellationToken,
) -> Result<(), HubError> {
    let local = listener.local_addr()?;
    info!(addr = %local, "hub listening for tcp clients");

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            },
        };

        let connection = TcpLineConnection::new(stream, peer, hub.config().max_frame_size);
        let hub = hub.clone();
        let session = cancel.child_token();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(hub, connection, session).await {
                warn!(peer = %peer, error = %err, "tcp client rejected");
            }
        });
    }

    info!(addr = %local, "hub tcp listener stopped");
    Ok(())
}
