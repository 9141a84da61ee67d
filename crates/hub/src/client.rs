//! Per-client read and write pumps

use crate::connection::{Connection, ConnectionSink, ConnectionStream, InboundFrame, OutboundFrame};
use crate::error::HubError;
use crate::hub::{ClientId, ClientRegistration, HubConfig, HubHandle};
use crate::message::{ClientAction, HubMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attach a connection to the hub and serve it until either side goes away.
///
/// Registers the client, runs the read and write pumps on their own tasks,
/// and unregisters the client once both have stopped.
pub async fn serve_connection<C: Connection>(
    hub: HubHandle,
    connection: C,
    cancel: CancellationToken,
) -> Result<ClientId, HubError> {
    let peer = connection.peer();
    let ClientRegistration {
        id,
        mailbox,
        replies,
    } = hub.register().await?;
    info!(client_id = %id, peer = %peer, "client connected");

    let (sink, stream) = connection.split();
    let session = cancel.child_token();
    let config = Arc::new(hub.config().clone());

    let writer = tokio::spawn(write_pump(
        sink,
        mailbox,
        Arc::clone(&config),
        session.clone(),
        id.clone(),
    ));
    let reader = tokio::spawn(read_pump(
        stream,
        hub.clone(),
        replies,
        config,
        session.clone(),
        id.clone(),
    ));

    for (pump, task) in [("read", reader), ("write", writer)] {
        if let Err(err) = task.await {
            warn!(client_id = %id, pump, error = %err, "client pump panicked");
            session.cancel();
        }
    }

    let _ = hub.unregister(&id).await;
    info!(client_id = %id, peer = %peer, "client disconnected");
    Ok(id)
}

/// Drain the mailbox to the connection, coalescing whatever is queued
/// into one frame, and probe the peer every ping period.
async fn write_pump<S: ConnectionSink>(
    mut sink: S,
    mut mailbox: mpsc::Receiver<Arc<str>>,
    config: Arc<HubConfig>,
    session: CancellationToken,
    id: ClientId,
) {
    let _stop_reader = session.clone().drop_guard();
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            _ = session.cancelled() => break,
            message = mailbox.recv() => match message {
                Some(first) => {
                    let mut text = String::from(&*first);
                    while let Ok(next) = mailbox.try_recv() {
                        text.push('\n');
                        text.push_str(&next);
                    }
                    OutboundFrame::Text(text)
                }
                // Unregistered by the hub
                None => break,
            },
            _ = ticker.tick() => OutboundFrame::Ping,
        };

        match timeout(config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(client_id = %id, error = %err, "write failed");
                break;
            }
            Err(_) => {
                warn!(client_id = %id, "write timed out");
                break;
            }
        }
    }

    if let Ok(Err(err)) = timeout(config.write_wait, sink.close()).await {
        debug!(client_id = %id, error = %err, "close failed");
    }
}

/// Read control frames until the peer closes, goes silent, or misbehaves
async fn read_pump<R: ConnectionStream>(
    mut stream: R,
    hub: HubHandle,
    replies: mpsc::WeakSender<Arc<str>>,
    config: Arc<HubConfig>,
    session: CancellationToken,
    id: ClientId,
) {
    let _stop_writer = session.clone().drop_guard();

    loop {
        let frame = tokio::select! {
            _ = session.cancelled() => break,
            frame = timeout(config.read_timeout, stream.recv()) => frame,
        };

        let bytes = match frame {
            Ok(Ok(Some(InboundFrame::Text(bytes)))) => bytes,
            Ok(Ok(Some(InboundFrame::Pong))) => continue,
            Ok(Ok(None)) => break,
            Ok(Err(HubError::FrameTooLarge { len, max })) => {
                warn!(client_id = %id, len, max, "frame too large, closing client");
                break;
            }
            Ok(Err(err)) => {
                debug!(client_id = %id, error = %err, "read failed");
                break;
            }
            Err(_) => {
                info!(client_id = %id, "client silent past read timeout");
                break;
            }
        };

        if bytes.len() > config.max_frame_size {
            warn!(client_id = %id, len = bytes.len(), "frame too large, closing client");
            break;
        }

        let action: ClientAction = match serde_json::from_slice(&bytes) {
            Ok(action) => action,
            Err(err) => {
                debug!(client_id = %id, error = %err, "ignoring malformed frame");
                continue;
            }
        };

        let sent = match action.action.as_str() {
            "subscribe" if !action.topic.is_empty() => hub.subscribe(&id, &action.topic).await,
            "unsubscribe" if !action.topic.is_empty() => {
                hub.unsubscribe(&id, &action.topic).await
            }
            "ping" => {
                reply(&replies, HubMessage::ack("pong", ""));
                Ok(())
            }
            other => {
                debug!(client_id = %id, action = other, "ignoring unknown action");
                Ok(())
            }
        };
        if sent.is_err() {
            break;
        }
    }

    // Closes the mailbox so the write pump drains and stops
    let _ = hub.unregister(&id).await;
}

fn reply(replies: &mpsc::WeakSender<Arc<str>>, message: HubMessage) {
    let Some(mailbox) = replies.upgrade() else {
        return;
    };
    match message.to_json() {
        Ok(json) => {
            let _ = mailbox.try_send(json.into());
        }
        Err(err) => warn!(error = %err, "failed to build reply"),
    }
}
