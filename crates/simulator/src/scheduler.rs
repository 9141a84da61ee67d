//! Rate-controlled simulation runs

use crate::error::SimulationError;
use crate::generator::EventGenerator;
use chrono::{DateTime, Utc};
use edalab_events::{Event, EventKind};
use edalab_transport::{Producer, TransportError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, IntoEnumIterator};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_RATE: u32 = 10;

/// Highest rate whose tick period is still at least one nanosecond
pub const MAX_RATE: u32 = 1_000_000_000;

/// Longest run, and the deadline of runs without a duration
const MAX_RUN: Duration = Duration::from_secs(86_400 * 365);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub scenario: String,
    /// Events per second
    pub rate: u32,
    /// Zero runs until stopped
    pub duration: Duration,
    /// Visited round-robin, one per tick
    pub event_types: Vec<EventKind>,
}

impl SimulationConfig {
    /// Zero means [`DEFAULT_RATE`]; anything above [`MAX_RATE`] has no tick period
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.rate > MAX_RATE {
            return Err(SimulationError::InvalidRate {
                rate: self.rate,
                max: MAX_RATE,
            });
        }
        Ok(())
    }

    fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.rate.clamp(1, MAX_RATE)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            scenario: "default".to_string(),
            rate: DEFAULT_RATE,
            duration: Duration::ZERO,
            event_types: vec![EventKind::AccountOpened],
        }
    }
}

/// Point-in-time view of the current or last run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationStatus {
    pub id: Option<String>,
    pub status: RunStatus,
    pub scenario: String,
    pub rate_requested: u32,
    pub rate_actual: f64,
    pub events_produced: u64,
    pub events_failed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
}

impl SimulationStatus {
    fn idle() -> Self {
        Self {
            id: None,
            status: RunStatus::Stopped,
            scenario: String::new(),
            rate_requested: 0,
            rate_actual: 0.0,
            events_produced: 0,
            events_failed: 0,
            started_at: None,
            stopped_at: None,
            last_event_at: None,
            duration_seconds: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// Outcome of an on-demand burst
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProduceReport {
    pub event_type: EventKind,
    pub requested: usize,
    pub produced: usize,
    pub failed: usize,
    pub event_ids: Vec<String>,
}

/// Accepts a record name (`Deposited`) or a topic (`banking.deposit.completed`)
pub fn parse_event_type(name: &str) -> Result<EventKind, SimulationError> {
    EventKind::from_str(name)
        .or_else(|_| EventKind::from_topic(name))
        .map_err(|_| SimulationError::UnsupportedEventType(name.to_string()))
}

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    failed: AtomicU64,
}

struct State {
    status: SimulationStatus,
    stop: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    producer: Producer,
    generator: Mutex<EventGenerator>,
    counters: Counters,
    state: Mutex<State>,
}

/// Drives at most one simulation run at a time.
///
/// `start` and `stop` are check-and-set under one mutex; `stop` waits for
/// the run loop to exit, so a status read right after never says running.
pub struct SimulationScheduler {
    shared: Arc<Shared>,
}

impl SimulationScheduler {
    pub fn new(producer: Producer, generator: EventGenerator) -> Self {
        Self {
            shared: Arc::new(Shared {
                producer,
                generator: Mutex::new(generator),
                counters: Counters::default(),
                state: Mutex::new(State {
                    status: SimulationStatus::idle(),
                    stop: None,
                    task: None,
                }),
            }),
        }
    }

    pub fn supported_event_types(&self) -> Vec<EventKind> {
        EventKind::iter().collect()
    }

    pub fn start(
        &self,
        cancel: &CancellationToken,
        mut config: SimulationConfig,
    ) -> Result<SimulationStatus, SimulationError> {
        let mut state = self.shared.state.lock();
        if state.status.is_running() {
            return Err(SimulationError::AlreadyRunning {
                id: state.status.id.clone().unwrap_or_default(),
            });
        }

        config.validate()?;
        if config.rate == 0 {
            config.rate = DEFAULT_RATE;
        }
        if config.event_types.is_empty() {
            config.event_types = vec![EventKind::AccountOpened];
        }

        let id = Uuid::new_v4().to_string();
        self.shared.counters.produced.store(0, Ordering::SeqCst);
        self.shared.counters.failed.store(0, Ordering::SeqCst);
        state.status = SimulationStatus {
            id: Some(id.clone()),
            status: RunStatus::Running,
            scenario: config.scenario.clone(),
            rate_requested: config.rate,
            started_at: Some(Utc::now()),
            ..SimulationStatus::idle()
        };

        info!(
            simulation_id = %id,
            scenario = %config.scenario,
            rate = config.rate,
            duration_ms = config.duration.as_millis() as u64,
            event_types = ?config.event_types,
            "simulation started"
        );

        let stop = cancel.child_token();
        state.stop = Some(stop.clone());
        // A finished previous run leaves a completed handle behind
        state.task = Some(tokio::spawn(run_loop(Arc::clone(&self.shared), config, stop)));
        Ok(state.status.clone())
    }

    /// Stop the active run and wait for its loop to exit
    pub async fn stop(&self) -> Result<SimulationStatus, SimulationError> {
        let (stop, task) = {
            let mut state = self.shared.state.lock();
            if !state.status.is_running() {
                return Err(SimulationError::NotRunning);
            }
            match (state.stop.take(), state.task.take()) {
                (Some(stop), Some(task)) => (stop, task),
                // Another caller is already stopping this run
                _ => return Err(SimulationError::NotRunning),
            }
        };

        stop.cancel();
        if let Err(err) = task.await {
            warn!(error = %err, "simulation loop ended abnormally");
            finish(&self.shared, "aborted");
        }

        let status = self.status();
        info!(
            simulation_id = ?status.id,
            events_produced = status.events_produced,
            duration_seconds = status.duration_seconds,
            "simulation stopped"
        );
        Ok(status)
    }

    pub fn status(&self) -> SimulationStatus {
        let mut status = self.shared.state.lock().status.clone();
        if status.is_running() {
            status.events_produced = self.shared.counters.produced.load(Ordering::SeqCst);
            status.events_failed = self.shared.counters.failed.load(Ordering::SeqCst);
            if let Some(started) = status.started_at {
                status.duration_seconds = elapsed_seconds(started, Utc::now());
                status.rate_actual = rate(status.events_produced, status.duration_seconds);
            }
        }
        status
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().status.is_running()
    }

    /// Generate and publish `count` events of one kind right now,
    /// independent of any run
    pub async fn produce_events(
        &self,
        cancel: &CancellationToken,
        kind: EventKind,
        count: usize,
    ) -> ProduceReport {
        let mut report = ProduceReport {
            event_type: kind,
            requested: count,
            produced: 0,
            failed: 0,
            event_ids: Vec::with_capacity(count),
        };

        for index in 0..count {
            if cancel.is_cancelled() {
                break;
            }
            let event = self.shared.generator.lock().generate(kind);
            match self.shared.producer.publish_event(cancel, &event).await {
                Ok(_) => {
                    report.produced += 1;
                    report.event_ids.push(event.event_id().to_string());
                }
                Err(TransportError::Cancelled) => break,
                Err(err) => {
                    report.failed += 1;
                    warn!(event_type = %kind, index, error = %err, "failed to produce event");
                }
            }
        }

        info!(
            event_type = %kind,
            requested = count,
            produced = report.produced,
            failed = report.failed,
            "events produced on demand"
        );
        report
    }
}

async fn run_loop(shared: Arc<Shared>, config: SimulationConfig, stop: CancellationToken) {
    // Whatever ends the loop, the run is left stopped
    let mut run = RunGuard {
        shared: &shared,
        reason: "aborted",
    };

    let period = config.tick_period();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let run_for = if config.duration.is_zero() {
        MAX_RUN
    } else {
        config.duration.min(MAX_RUN)
    };
    let deadline = sleep_until(Instant::now() + run_for);
    tokio::pin!(deadline);

    let mut next_type = 0;
    run.reason = loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break "stopped",
            _ = &mut deadline => break "duration elapsed",
            _ = ticker.tick() => {
                let kind = config.event_types[next_type];
                next_type = (next_type + 1) % config.event_types.len();

                let event = shared.generator.lock().generate(kind);
                match shared.producer.publish_event(&stop, &event).await {
                    Ok(_) => record_produced(&shared, &event),
                    Err(TransportError::Cancelled) => break "stopped",
                    Err(err) => {
                        shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                        warn!(event_type = %kind, error = %err, "failed to produce event");
                    }
                }
            }
        }
    };
}

/// Finishes the run when the loop exits, panics included
struct RunGuard<'a> {
    shared: &'a Shared,
    reason: &'static str,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        finish(self.shared, self.reason);
    }
}

fn record_produced(shared: &Shared, event: &Event) {
    let produced = shared.counters.produced.fetch_add(1, Ordering::SeqCst) + 1;
    shared.state.lock().status.last_event_at = Some(Utc::now());
    debug!(event_type = %event.kind(), event_id = %event.event_id(), produced, "event produced");
}

/// Flip to stopped and freeze the counters
fn finish(shared: &Shared, reason: &str) {
    let mut state = shared.state.lock();
    if !state.status.is_running() {
        return;
    }
    let now = Utc::now();
    let status = &mut state.status;
    status.status = RunStatus::Stopped;
    status.stopped_at = Some(now);
    status.events_produced = shared.counters.produced.load(Ordering::SeqCst);
    status.events_failed = shared.counters.failed.load(Ordering::SeqCst);
    if let Some(started) = status.started_at {
        status.duration_seconds = elapsed_seconds(started, now);
        status.rate_actual = rate(status.events_produced, status.duration_seconds);
    }
    info!(
        simulation_id = ?status.id,
        reason,
        events_produced = status.events_produced,
        events_failed = status.events_failed,
        "simulation run ended"
    );
}

fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

fn rate(produced: u64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        produced as f64 / seconds
    } else {
        0.0
    }
}
