//! Bidirectional message connection port
//!
//! The hub only needs to send text frames and liveness probes, receive
//! frames, and notice when the peer went away. Browser protocols plug in
//! behind these traits.

use crate::error::HubError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Frame written to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// One or more newline-separated JSON messages
    Text(String),
    /// Liveness probe
    Ping,
}

/// Frame read from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(Vec<u8>),
    /// Answer to a liveness probe
    Pong,
}

#[async_trait]
pub trait ConnectionSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), HubError>;

    /// Tell the peer we are done
    async fn close(&mut self) -> Result<(), HubError>;
}

#[async_trait]
pub trait ConnectionStream: Send {
    /// Next frame, `Ok(None)` once the peer closed
    async fn recv(&mut self) -> Result<Option<InboundFrame>, HubError>;
}

/// A live client connection, split into independent halves for the two pumps
pub trait Connection: Send + 'static {
    type Sink: ConnectionSink + 'static;
    type Stream: ConnectionStream + 'static;

    /// Peer description for logging
    fn peer(&self) -> String;

    fn split(self) -> (Self::Sink, Self::Stream);
}

/// Channel-backed connection used in tests and in-process observers
pub struct InMemoryConnection {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    name: String,
}

/// The peer side of an [`InMemoryConnection`]
pub struct RemoteEnd {
    to_hub: Option<mpsc::UnboundedSender<InboundFrame>>,
    from_hub: mpsc::UnboundedReceiver<OutboundFrame>,
    /// Lines of a coalesced frame not yet handed out
    pending: VecDeque<String>,
}

impl InMemoryConnection {
    pub fn pair(name: impl Into<String>) -> (InMemoryConnection, RemoteEnd) {
        let (outbound, from_hub) = mpsc::unbounded_channel();
        let (to_hub, inbound) = mpsc::unbounded_channel();
        (
            InMemoryConnection {
                outbound,
                inbound,
                name: name.into(),
            },
            RemoteEnd {
                to_hub: Some(to_hub),
                from_hub,
                pending: VecDeque::new(),
            },
        )
    }
}

pub struct InMemorySink(mpsc::UnboundedSender<OutboundFrame>);

pub struct InMemoryStream(mpsc::UnboundedReceiver<InboundFrame>);

impl Connection for InMemoryConnection {
    type Sink = InMemorySink;
    type Stream = InMemoryStream;

    fn peer(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn split(self) -> (InMemorySink, InMemoryStream) {
        (InMemorySink(self.outbound), InMemoryStream(self.inbound))
    }
}

#[async_trait]
impl ConnectionSink for InMemorySink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), HubError> {
        self.0.send(frame).map_err(|_| HubError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), HubError> {
        Ok(())
    }
}

#[async_trait]
impl ConnectionStream for InMemoryStream {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, HubError> {
        Ok(self.0.recv().await)
    }
}

impl RemoteEnd {
    /// Send a text frame to the hub
    pub fn send_text(&self, text: &str) -> Result<(), HubError> {
        self.send(InboundFrame::Text(text.as_bytes().to_vec()))
    }

    pub fn send(&self, frame: InboundFrame) -> Result<(), HubError> {
        self.to_hub
            .as_ref()
            .ok_or(HubError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| HubError::ConnectionClosed)
    }

    /// Next frame written by the hub, `None` once the hub side is gone
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.from_hub.recv().await
    }

    /// Next JSON message, splitting coalesced frames and skipping pings
    pub async fn next_message(&mut self) -> Option<Value> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                match serde_json::from_str(&line) {
                    Ok(value) => return Some(value),
                    Err(_) => continue,
                }
            }
            match self.from_hub.recv().await? {
                OutboundFrame::Text(text) => {
                    self.pending.extend(text.lines().map(str::to_string))
                }
                OutboundFrame::Ping => continue,
            }
        }
    }

    /// Hang up; the hub sees the connection close
    pub fn close(&mut self) {
        self.to_hub = None;
    }
}
