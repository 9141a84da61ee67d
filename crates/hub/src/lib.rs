//! EDA-Lab Stream Hub - real-time fan-out of banking events
//!
//! A single actor task owns every client and subscription. Everything else
//! talks to it through a cloneable [`HubHandle`], which only sends messages
//! on the actor's channels:
//!
//! ```text
//!   register ─┐
//! unregister ─┤
//!  subscribe ─┼──► StreamHub actor ──► per-client mailbox ──► write pump ──► connection
//! unsubscribe ┤                                                  ▲
//!  broadcast ─┘                                read pump ────────┘ (pong)
//! ```
//!
//! A slow client never blocks a broadcast: a full mailbox drops the message
//! for that client, and repeated drops unregister it.

pub mod client;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod streamer;
pub mod tcp;

pub use client::serve_connection;
pub use connection::{
    Connection, ConnectionSink, ConnectionStream, InMemoryConnection, InboundFrame, OutboundFrame,
    RemoteEnd,
};
pub use error::HubError;
pub use hub::{
    ClientId, ClientRegistration, HubConfig, HubHandle, HubStats, StreamHub, WILDCARD_TOPIC,
};
pub use message::{ClientAction, HubMessage};
pub use streamer::HubStreamer;
pub use tcp::{serve_tcp, TcpLineConnection};
