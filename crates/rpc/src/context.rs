//! Application context - wires the pipeline together

use crate::config::{AppConfig, LedgerStorage};
use anyhow::Context as _;
use edalab_codec::{
    register_builtin_schemas, HttpSchemaRegistry, InMemorySchemaRegistry, SchemaCodec,
    SchemaRegistry,
};
use edalab_events::banking_topics;
use edalab_hub::{HubHandle, HubStreamer, StreamHub};
use edalab_ledger::{
    InMemoryLedgerStore, LedgerEngine, LedgerEventHandler, LedgerStore, SqliteLedgerStore,
};
use edalab_simulator::{EventGenerator, FakeData, SimulationScheduler};
use edalab_transport::{Consumer, InMemoryBroker, Producer, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Every long-lived component of one process, built from an [`AppConfig`]
pub struct AppContext {
    pub config: AppConfig,
    pub codec: Arc<SchemaCodec>,
    pub broker: InMemoryBroker,
    pub producer: Producer,
    pub ledger: Arc<LedgerEngine>,
    pub hub: HubHandle,
    pub scheduler: SimulationScheduler,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AppContext {
    /// Build the pipeline.
    ///
    /// The bundled schemas are registered first; a registry that refuses
    /// them makes startup fail.
    pub async fn new(config: AppConfig) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let registry = build_registry(&config).await?;
        let codec = Arc::new(SchemaCodec::new(registry));

        let broker = InMemoryBroker::new(config.broker_config());
        let producer = Producer::new(
            Arc::new(broker.clone()),
            Arc::clone(&codec),
            config.producer_config(),
        );

        let store: Arc<dyn LedgerStore> = match config.ledger_storage()? {
            LedgerStorage::Memory => Arc::new(InMemoryLedgerStore::new()),
            LedgerStorage::Sqlite(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                let store = SqliteLedgerStore::connect(&path)
                    .await
                    .with_context(|| format!("opening ledger database {}", path.display()))?;
                info!(path = %path.display(), "sqlite ledger opened");
                Arc::new(store)
            }
        };
        let ledger = Arc::new(LedgerEngine::new(store));

        let (hub_actor, hub) = StreamHub::new(config.hub_config());
        let tasks = vec![hub_actor.spawn()];

        let fake = match config.simulation.seed {
            Some(seed) => FakeData::with_seed(seed),
            None => FakeData::from_entropy(),
        };
        let scheduler = SimulationScheduler::new(
            Producer::new(
                Arc::new(broker.clone()),
                Arc::clone(&codec),
                config.producer_config(),
            ),
            EventGenerator::new(fake),
        );

        Ok(Self {
            config,
            codec,
            broker,
            producer,
            ledger,
            hub,
            scheduler,
            cancel: CancellationToken::new(),
            tasks,
        })
    }

    /// Root token; every background task runs under a child of it
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A consumer on the in-process broker with dead-lettering enabled.
    ///
    /// `role` is appended to the configured group id so that each
    /// downstream component sees every event.
    pub fn consumer(&self, role: &str) -> Consumer {
        let mut config = self.config.consumer_config();
        config.group_id = format!("{}-{}", config.group_id, role);
        let client = self.broker.consumer(&config);
        Consumer::new(Box::new(client), Arc::clone(&self.codec), config)
            .with_dead_letter(Arc::new(self.broker.clone()))
    }

    /// Feed every banking topic into the ledger in the background
    pub async fn spawn_ledger_consumer(&mut self) -> Result<(), TransportError> {
        let mut consumer = self.consumer("ledger");
        consumer.subscribe(banking_topics().as_slice()).await?;
        let handler = LedgerEventHandler::new(Arc::clone(&self.ledger));
        let cancel = self.cancel.child_token();

        self.tasks.push(tokio::spawn(async move {
            match consumer.run(&cancel, &handler).await {
                Err(TransportError::Cancelled) | Ok(()) => {}
                Err(err) => error!(error = %err, "ledger consumer stopped"),
            }
            if let Err(err) = consumer.close().await {
                warn!(error = %err, "ledger consumer close failed");
            }
        }));
        Ok(())
    }

    /// Stream every banking topic to hub clients in the background
    pub fn spawn_hub_streamer(&mut self) {
        let mut consumer = self.consumer("hub");
        let streamer = HubStreamer::new(self.hub.clone());
        let cancel = self.cancel.child_token();

        self.tasks.push(tokio::spawn(async move {
            match streamer.run(&mut consumer, banking_topics().as_slice(), &cancel).await {
                Err(TransportError::Cancelled) | Ok(()) => {}
                Err(err) => error!(error = %err, "hub streamer stopped"),
            }
            if let Err(err) = consumer.close().await {
                warn!(error = %err, "hub consumer close failed");
            }
        }));
    }

    /// Wait until the ledger has recorded `expected` events, or `timeout`
    /// elapses. Returns the last observed count.
    pub async fn wait_for_ledger(&self, expected: u64, timeout: Duration) -> anyhow::Result<u64> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let processed = self.ledger.processed_events().await?;
            if processed >= expected || tokio::time::Instant::now() >= deadline {
                return Ok(processed);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop the simulation, flush the producer, then stop every task
    pub async fn shutdown(mut self) {
        if self.scheduler.is_running() {
            if let Err(err) = self.scheduler.stop().await {
                warn!(error = %err, "simulation stop failed");
            }
        }
        let pending = self.producer.close().await;
        self.cancel.cancel();
        self.hub.shutdown();

        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!(pending, "pipeline shut down");
    }
}

async fn build_registry(config: &AppConfig) -> anyhow::Result<Arc<dyn SchemaRegistry>> {
    match &config.registry.url {
        Some(url) => {
            let registry = HttpSchemaRegistry::new(
                url.clone(),
                Duration::from_secs(config.registry.timeout_secs),
            )?;
            let registered = register_builtin_schemas(&registry)
                .await
                .with_context(|| format!("registering schemas at {url}"))?;
            info!(url = %url, schemas = registered.len(), "schemas registered");
            Ok(Arc::new(registry))
        }
        None => {
            let registry = InMemorySchemaRegistry::new();
            let registered = register_builtin_schemas(&registry).await?;
            info!(schemas = registered.len(), "in-process schema registry ready");
            Ok(Arc::new(registry))
        }
    }
}
