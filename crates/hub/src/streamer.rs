//! Bridges consumed transport events onto the hub

use crate::hub::HubHandle;
use crate::message::HubMessage;
use async_trait::async_trait;
use edalab_transport::{ConsumedEvent, Consumer, HandlerResult, MessageHandler, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Broadcasts every decoded event as an `event` message on its own topic
pub struct HubStreamer {
    hub: HubHandle,
}

impl HubStreamer {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    /// Subscribe `consumer` to `topics` and stream until cancelled
    pub async fn run<S: AsRef<str>>(
        &self,
        consumer: &mut Consumer,
        topics: &[S],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        consumer.subscribe(topics).await?;
        info!(topics = ?consumer.topics(), "hub streamer started");
        let result = consumer.run(cancel, self).await;
        info!("hub streamer stopped");
        result
    }
}

#[async_trait]
impl MessageHandler for HubStreamer {
    fn name(&self) -> &str {
        "hub-streamer"
    }

    async fn handle(&self, consumed: &ConsumedEvent) -> HandlerResult {
        debug!(
            topic = %consumed.topic,
            key = ?consumed.key,
            event_id = %consumed.event.event_id(),
            "streaming event"
        );
        let data = consumed.event.payload_json()?;
        self.hub
            .broadcast(HubMessage::event(consumed.topic.as_str(), data))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{HubConfig, StreamHub};
    use chrono::Utc;
    use edalab_core::Amount;
    use edalab_events::{Channel, Deposited, Event, EventKind};
    use edalab_transport::Headers;

    fn consumed(event: Event) -> ConsumedEvent {
        ConsumedEvent {
            topic: event.topic().to_string(),
            key: Some(event.partition_key().to_string()),
            event,
            schema_id: 1,
            partition: 0,
            offset: 0,
            headers: Headers::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_is_broadcast_on_its_topic() {
        let (hub, handle) = StreamHub::new(HubConfig::default());
        hub.spawn();
        let mut client = handle.register().await.unwrap();
        client.mailbox.recv().await.unwrap();
        let topic = EventKind::Deposited.topic();
        handle.subscribe(&client.id, topic).await.unwrap();
        client.mailbox.recv().await.unwrap();

        let event: Event =
            Deposited::new("ACC-1", Amount::from_units(25), Channel::Card, "REF-1").into();
        HubStreamer::new(handle.clone())
            .handle(&consumed(event.clone()))
            .await
            .unwrap();

        let payload = client.mailbox.recv().await.unwrap();
        let message: HubMessage = serde_json::from_str(&payload).unwrap();
        assert_eq!(message.kind, "event");
        assert_eq!(message.topic, topic);
        assert_eq!(message.data.unwrap()["event_id"], event.event_id());
    }

    #[tokio::test]
    async fn test_closed_hub_is_a_handler_error() {
        let (hub, handle) = StreamHub::new(HubConfig::default());
        let task = hub.spawn();
        handle.shutdown();
        task.await.unwrap();

        let event: Event =
            Deposited::new("ACC-1", Amount::from_units(1), Channel::Wire, "REF").into();
        assert!(HubStreamer::new(handle).handle(&consumed(event)).await.is_err());
    }
}
