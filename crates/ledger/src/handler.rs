//! Transport adapter: feeds consumed events into the ledger engine

use crate::engine::{ApplyOutcome, LedgerEngine};
use async_trait::async_trait;
use edalab_transport::{ConsumedEvent, HandlerResult, MessageHandler};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies each consumed event to the ledger.
///
/// Domain rejections are terminal for their event and reported as success
/// so the message is committed; store failures are returned so it is not.
pub struct LedgerEventHandler {
    engine: Arc<LedgerEngine>,
}

impl LedgerEventHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for LedgerEventHandler {
    fn name(&self) -> &str {
        "ledger"
    }

    async fn handle(&self, message: &ConsumedEvent) -> HandlerResult {
        let event_id = message.event.event_id();
        match self.engine.apply(&message.event).await {
            Ok(ApplyOutcome::AlreadyProcessed) => {
                debug!(event_id, topic = %message.topic, "duplicate delivery ignored");
                Ok(())
            }
            Ok(outcome) => {
                debug!(event_id, topic = %message.topic, ?outcome, "event applied");
                Ok(())
            }
            Err(err) if err.is_domain() => {
                warn!(event_id, topic = %message.topic, error = %err, "event rejected by ledger");
                Ok(())
            }
            Err(err) => Err(Box::new(err)),
        }
    }
}
