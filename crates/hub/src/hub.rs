//! The stream hub actor and its handle

use crate::error::HubError;
use crate::message::HubMessage;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Topic matching every broadcast
pub const WILDCARD_TOPIC: &str = "*";

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Messages queued per client before broadcasts start dropping
    pub mailbox_capacity: usize,
    pub broadcast_buffer: usize,
    /// Capacity of the register/unregister/subscribe/unsubscribe channels
    pub control_buffer: usize,
    pub ping_period: Duration,
    pub write_wait: Duration,
    /// Silence allowed from a client before it is considered gone
    pub read_timeout: Duration,
    pub max_frame_size: usize,
    /// Consecutive full-mailbox drops before a client is shed
    pub drop_threshold: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            broadcast_buffer: 256,
            control_buffer: 64,
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            max_frame_size: 512,
            drop_threshold: 3,
        }
    }
}

/// Short client identifier, unique per hub
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a newly registered client gets back from the hub
pub struct ClientRegistration {
    pub id: ClientId,
    /// Serialised messages for this client; closes when the client is unregistered
    pub mailbox: mpsc::Receiver<Arc<str>>,
    /// Lets the client queue its own replies without keeping the mailbox open
    pub replies: mpsc::WeakSender<Arc<str>>,
}

/// Point-in-time counters of the hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub clients: usize,
    pub topics: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub shed: u64,
}

struct Register {
    /// Proposed id; replaced if already taken
    id: ClientId,
    mailbox: mpsc::Sender<Arc<str>>,
    done: oneshot::Sender<ClientId>,
}

enum Query {
    ClientCount(oneshot::Sender<usize>),
    TopicSubscribers(String, oneshot::Sender<Vec<ClientId>>),
    Stats(oneshot::Sender<HubStats>),
}

struct ClientSlot {
    mailbox: mpsc::Sender<Arc<str>>,
    consecutive_drops: u32,
}

enum Delivery {
    Sent,
    Dropped,
    /// The client must go: gone, or too slow for too long
    Shed,
    Unknown,
}

/// Single-writer actor owning every client and subscription
pub struct StreamHub {
    config: Arc<HubConfig>,
    clients: HashMap<ClientId, ClientSlot>,
    subscriptions: HashMap<String, HashSet<ClientId>>,
    stats: HubStats,
    register_rx: mpsc::Receiver<Register>,
    unregister_rx: mpsc::Receiver<ClientId>,
    subscribe_rx: mpsc::Receiver<(ClientId, String)>,
    unsubscribe_rx: mpsc::Receiver<(ClientId, String)>,
    broadcast_rx: mpsc::Receiver<HubMessage>,
    query_rx: mpsc::Receiver<Query>,
    shutdown: CancellationToken,
}

impl StreamHub {
    pub fn new(config: HubConfig) -> (StreamHub, HubHandle) {
        let config = Arc::new(config);
        let control = config.control_buffer.max(1);
        let (register_tx, register_rx) = mpsc::channel(control);
        let (unregister_tx, unregister_rx) = mpsc::channel(control);
        let (subscribe_tx, subscribe_rx) = mpsc::channel(control);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::channel(control);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_buffer.max(1));
        let (query_tx, query_rx) = mpsc::channel(control);
        let shutdown = CancellationToken::new();

        let hub = StreamHub {
            config: Arc::clone(&config),
            clients: HashMap::new(),
            subscriptions: HashMap::new(),
            stats: HubStats::default(),
            register_rx,
            unregister_rx,
            subscribe_rx,
            unsubscribe_rx,
            broadcast_rx,
            query_rx,
            shutdown: shutdown.clone(),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            subscribe_tx,
            unsubscribe_tx,
            broadcast_tx,
            query_tx,
            shutdown,
            config,
        };
        (hub, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Serve requests until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!("stream hub started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(register) = self.register_rx.recv() => self.register(register),
                Some(id) = self.unregister_rx.recv() => self.unregister(&id),
                Some((id, topic)) = self.subscribe_rx.recv() => self.subscribe(id, topic),
                Some((id, topic)) = self.unsubscribe_rx.recv() => self.unsubscribe(&id, &topic),
                Some(message) = self.broadcast_rx.recv() => self.broadcast(message),
                Some(query) = self.query_rx.recv() => self.answer(query),
                else => break,
            }
        }

        // Dropping the slots closes every mailbox, which ends the write pumps
        let clients = self.clients.len();
        self.clients.clear();
        self.subscriptions.clear();
        info!(clients, "stream hub stopped");
    }

    fn register(&mut self, register: Register) {
        let Register { mut id, mailbox, done } = register;
        while self.clients.contains_key(&id) {
            debug!(client_id = %id, "client id taken, drawing another");
            id = ClientId::generate();
        }
        self.clients.insert(
            id.clone(),
            ClientSlot {
                mailbox,
                consecutive_drops: 0,
            },
        );
        info!(client_id = %id, clients = self.clients.len(), "client registered");

        match HubMessage::connected(id.as_str()).to_json() {
            Ok(json) => self.send_to(&id, json.into()),
            Err(err) => warn!(client_id = %id, error = %err, "failed to build greeting"),
        }
        let _ = done.send(id);
    }

    fn unregister(&mut self, id: &ClientId) {
        if self.clients.remove(id).is_none() {
            return;
        }
        self.subscriptions.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
        info!(client_id = %id, clients = self.clients.len(), "client unregistered");
    }

    fn subscribe(&mut self, id: ClientId, topic: String) {
        if !self.clients.contains_key(&id) {
            debug!(client_id = %id, topic, "subscribe from unknown client ignored");
            return;
        }
        self.subscriptions
            .entry(topic.clone())
            .or_default()
            .insert(id.clone());
        debug!(client_id = %id, topic, "client subscribed");
        self.acknowledge(&id, "subscribed", &topic);
    }

    fn unsubscribe(&mut self, id: &ClientId, topic: &str) {
        if !self.clients.contains_key(id) {
            return;
        }
        if let Some(members) = self.subscriptions.get_mut(topic) {
            members.remove(id);
            if members.is_empty() {
                self.subscriptions.remove(topic);
            }
        }
        debug!(client_id = %id, topic, "client unsubscribed");
        self.acknowledge(id, "unsubscribed", topic);
    }

    fn acknowledge(&mut self, id: &ClientId, kind: &str, topic: &str) {
        match HubMessage::ack(kind, topic).to_json() {
            Ok(json) => self.send_to(id, json.into()),
            Err(err) => warn!(client_id = %id, error = %err, "failed to build ack"),
        }
    }

    fn broadcast(&mut self, message: HubMessage) {
        let payload: Arc<str> = match message.to_json() {
            Ok(json) => json.into(),
            Err(err) => {
                warn!(topic = %message.topic, error = %err, "dropping unserialisable broadcast");
                return;
            }
        };

        let targets: Vec<ClientId> = if message.topic.is_empty() {
            self.clients.keys().cloned().collect()
        } else {
            let mut targets = BTreeSet::new();
            for topic in [message.topic.as_str(), WILDCARD_TOPIC] {
                if let Some(members) = self.subscriptions.get(topic) {
                    targets.extend(members.iter().cloned());
                }
            }
            targets.into_iter().collect()
        };

        for id in &targets {
            self.send_to(id, Arc::clone(&payload));
        }
        debug!(topic = %message.topic, recipients = targets.len(), "broadcast fanned out");
    }

    /// Queue one payload for a client without ever waiting on it
    fn send_to(&mut self, id: &ClientId, payload: Arc<str>) {
        if let Delivery::Shed = self.try_deliver(id, payload) {
            self.stats.shed += 1;
            self.unregister(id);
        }
    }

    fn try_deliver(&mut self, id: &ClientId, payload: Arc<str>) -> Delivery {
        let Some(slot) = self.clients.get_mut(id) else {
            return Delivery::Unknown;
        };
        match slot.mailbox.try_send(payload) {
            Ok(()) => {
                slot.consecutive_drops = 0;
                self.stats.delivered += 1;
                Delivery::Sent
            }
            Err(TrySendError::Full(_)) => {
                slot.consecutive_drops += 1;
                self.stats.dropped += 1;
                warn!(
                    client_id = %id,
                    consecutive_drops = slot.consecutive_drops,
                    "client mailbox full, message dropped"
                );
                if slot.consecutive_drops >= self.config.drop_threshold {
                    warn!(client_id = %id, "shedding slow client");
                    Delivery::Shed
                } else {
                    Delivery::Dropped
                }
            }
            Err(TrySendError::Closed(_)) => Delivery::Shed,
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
            Query::TopicSubscribers(topic, reply) => {
                let mut members: Vec<ClientId> = self
                    .subscriptions
                    .get(&topic)
                    .map(|members| members.iter().cloned().collect())
                    .unwrap_or_default();
                members.sort();
                let _ = reply.send(members);
            }
            Query::Stats(reply) => {
                let _ = reply.send(HubStats {
                    clients: self.clients.len(),
                    topics: self.subscriptions.len(),
                    ..self.stats
                });
            }
        }
    }
}

/// Cloneable front door of a running [`StreamHub`]
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::Sender<ClientId>,
    subscribe_tx: mpsc::Sender<(ClientId, String)>,
    unsubscribe_tx: mpsc::Sender<(ClientId, String)>,
    broadcast_tx: mpsc::Sender<HubMessage>,
    query_tx: mpsc::Sender<Query>,
    shutdown: CancellationToken,
    config: Arc<HubConfig>,
}

impl HubHandle {
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new client. Returns once the hub knows about it, so
    /// subscriptions sent afterwards always find the client.
    pub async fn register(&self) -> Result<ClientRegistration, HubError> {
        self.register_as(ClientId::generate()).await
    }

    async fn register_as(&self, id: ClientId) -> Result<ClientRegistration, HubError> {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let replies = mailbox_tx.downgrade();
        let (done_tx, done_rx) = oneshot::channel();

        self.register_tx
            .send(Register {
                id,
                mailbox: mailbox_tx,
                done: done_tx,
            })
            .await
            .map_err(|_| HubError::HubClosed)?;
        let id = done_rx.await.map_err(|_| HubError::HubClosed)?;

        Ok(ClientRegistration {
            id,
            mailbox: mailbox_rx,
            replies,
        })
    }

    /// Remove a client and all its subscriptions. Unknown ids are ignored.
    pub async fn unregister(&self, id: &ClientId) -> Result<(), HubError> {
        self.unregister_tx
            .send(id.clone())
            .await
            .map_err(|_| HubError::HubClosed)
    }

    pub async fn subscribe(&self, id: &ClientId, topic: &str) -> Result<(), HubError> {
        self.subscribe_tx
            .send((id.clone(), topic.to_string()))
            .await
            .map_err(|_| HubError::HubClosed)
    }

    pub async fn unsubscribe(&self, id: &ClientId, topic: &str) -> Result<(), HubError> {
        self.unsubscribe_tx
            .send((id.clone(), topic.to_string()))
            .await
            .map_err(|_| HubError::HubClosed)
    }

    /// Fan a message out. An empty topic reaches every client.
    pub async fn broadcast(&self, message: HubMessage) -> Result<(), HubError> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| HubError::HubClosed)
    }

    pub async fn broadcast_to_topic(
        &self,
        topic: &str,
        data: serde_json::Value,
    ) -> Result<(), HubError> {
        self.broadcast(HubMessage::event(topic, data)).await
    }

    pub async fn client_count(&self) -> Result<usize, HubError> {
        self.ask(Query::ClientCount).await
    }

    pub async fn topic_subscribers(&self, topic: &str) -> Result<Vec<ClientId>, HubError> {
        let topic = topic.to_string();
        self.ask(|reply| Query::TopicSubscribers(topic, reply)).await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        self.ask(Query::Stats).await
    }

    async fn ask<T>(&self, query: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query_tx
            .send(query(reply_tx))
            .await
            .map_err(|_| HubError::HubClosed)?;
        reply_rx.await.map_err(|_| HubError::HubClosed)
    }

    /// Stop the actor; every client mailbox closes
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn start(config: HubConfig) -> HubHandle {
        let (hub, handle) = StreamHub::new(config);
        hub.spawn();
        handle
    }

    async fn next(registration: &mut ClientRegistration) -> Value {
        let payload = registration.mailbox.recv().await.unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    async fn connected(handle: &HubHandle) -> ClientRegistration {
        let mut registration = handle.register().await.unwrap();
        let greeting = next(&mut registration).await;
        assert_eq!(greeting["type"], "connected");
        assert_eq!(greeting["data"]["client_id"], registration.id.as_str());
        registration
    }

    #[test]
    fn test_client_id_is_eight_chars() {
        let id = ClientId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert_ne!(id, ClientId::generate());
    }

    #[tokio::test]
    async fn test_taken_client_id_is_replaced() {
        let handle = start(HubConfig::default());
        let taken = ClientId("deadbeef".to_string());
        let mut first = handle.register_as(taken.clone()).await.unwrap();
        let mut second = handle.register_as(taken.clone()).await.unwrap();

        assert_eq!(first.id, taken);
        assert_ne!(second.id, taken);
        assert_eq!(next(&mut first).await["data"]["client_id"], "deadbeef");
        assert_eq!(next(&mut second).await["data"]["client_id"], second.id.as_str());
        assert_eq!(handle.client_count().await.unwrap(), 2);

        // Unregistering one leaves the other registered
        handle.unregister(&second.id).await.unwrap();
        assert_eq!(handle.client_count().await.unwrap(), 1);
        assert!(second.mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fan_out_is_scoped_to_topic_and_wildcard() {
        let handle = start(HubConfig::default());
        let mut on_topic = connected(&handle).await;
        let mut wildcard = connected(&handle).await;
        let mut elsewhere = connected(&handle).await;

        handle.subscribe(&on_topic.id, "banking.deposit.completed").await.unwrap();
        handle.subscribe(&wildcard.id, WILDCARD_TOPIC).await.unwrap();
        handle.subscribe(&elsewhere.id, "banking.account.opened").await.unwrap();
        assert_eq!(next(&mut on_topic).await["type"], "subscribed");
        assert_eq!(next(&mut wildcard).await["topic"], "*");
        assert_eq!(next(&mut elsewhere).await["type"], "subscribed");

        handle
            .broadcast_to_topic("banking.deposit.completed", json!({"amount": "10"}))
            .await
            .unwrap();
        // Queries are served after the broadcast, so delivery has happened
        handle.client_count().await.unwrap();

        assert_eq!(next(&mut on_topic).await["data"]["amount"], "10");
        assert_eq!(next(&mut wildcard).await["topic"], "banking.deposit.completed");
        assert!(elsewhere.mailbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_client_on_topic_and_wildcard_gets_one_copy() {
        let handle = start(HubConfig::default());
        let mut client = connected(&handle).await;
        handle.subscribe(&client.id, "t").await.unwrap();
        handle.subscribe(&client.id, WILDCARD_TOPIC).await.unwrap();
        next(&mut client).await;
        next(&mut client).await;

        handle.broadcast_to_topic("t", json!(1)).await.unwrap();
        handle.client_count().await.unwrap();
        assert_eq!(next(&mut client).await["data"], 1);
        assert!(client.mailbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_topic_reaches_everyone() {
        let handle = start(HubConfig::default());
        let mut a = connected(&handle).await;
        let mut b = connected(&handle).await;

        handle
            .broadcast(HubMessage::new("notice", "", Some(json!("maintenance"))))
            .await
            .unwrap();
        assert_eq!(next(&mut a).await["type"], "notice");
        assert_eq!(next(&mut b).await["data"], "maintenance");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let handle = start(HubConfig::default());
        let mut client = connected(&handle).await;
        handle.subscribe(&client.id, "t").await.unwrap();
        handle.unsubscribe(&client.id, "t").await.unwrap();
        assert_eq!(next(&mut client).await["type"], "subscribed");
        assert_eq!(next(&mut client).await["type"], "unsubscribed");

        handle.broadcast_to_topic("t", json!(1)).await.unwrap();
        assert!(handle.topic_subscribers("t").await.unwrap().is_empty());
        assert!(client.mailbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let handle = start(HubConfig::default());
        let mut client = connected(&handle).await;
        handle.subscribe(&client.id, "t").await.unwrap();

        handle.unregister(&client.id).await.unwrap();
        handle.unregister(&client.id).await.unwrap();
        assert_eq!(handle.client_count().await.unwrap(), 0);
        assert!(handle.topic_subscribers("t").await.unwrap().is_empty());

        // Ack still queued, then the mailbox closes
        assert_eq!(next(&mut client).await["type"], "subscribed");
        assert!(client.mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped_without_blocking_others() {
        let handle = start(HubConfig {
            mailbox_capacity: 2,
            drop_threshold: 3,
            ..HubConfig::default()
        });
        // The greeting already takes one slot and is never read
        let slow = handle.register().await.unwrap();
        let mut fast = connected(&handle).await;
        handle.subscribe(&slow.id, "t").await.unwrap();
        handle.subscribe(&fast.id, "t").await.unwrap();
        next(&mut fast).await;

        for i in 0..5 {
            handle.broadcast_to_topic("t", json!(i)).await.unwrap();
            assert_eq!(next(&mut fast).await["data"], i);
        }

        assert_eq!(handle.client_count().await.unwrap(), 1);
        assert_eq!(handle.topic_subscribers("t").await.unwrap(), vec![fast.id.clone()]);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.shed, 1);
        drop(slow);
    }

    #[tokio::test]
    async fn test_subscribe_from_unknown_client_is_ignored() {
        let handle = start(HubConfig::default());
        handle.subscribe(&ClientId::generate(), "t").await.unwrap();
        assert!(handle.topic_subscribers("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_mailboxes() {
        let (hub, handle) = StreamHub::new(HubConfig::default());
        let task = hub.spawn();
        let mut client = connected(&handle).await;

        handle.shutdown();
        task.await.unwrap();
        assert!(client.mailbox.recv().await.is_none());
        assert_eq!(handle.client_count().await, Err(HubError::HubClosed));
        assert!(matches!(handle.register().await, Err(HubError::HubClosed)));
    }
}
