//! CLI commands
//!
//! Each command drives the pipeline held by an [`AppContext`], prints a
//! human-readable summary and returns the same data for callers and tests.

use crate::context::AppContext;
use anyhow::Context as _;
use edalab_codec::SchemaEntry;
use edalab_core::Amount;
use edalab_events::{
    banking_topics, topics, AccountOpened, AccountType, Channel, Deposited, Event, EventKind,
    TransferInitiated, Withdrawn,
};
use edalab_hub::serve_tcp;
use edalab_ledger::{Account, ApplyOutcome, LedgerEntry};
use edalab_simulator::{ProduceReport, SimulationConfig, SimulationStatus};
use edalab_transport::Consumer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Longest wait for the ledger to catch up with the producer
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub status: SimulationStatus,
    pub ledger_processed: u64,
    pub dead_lettered: usize,
}

/// Run a simulation until its duration elapses or Ctrl-C, then let the
/// ledger drain.
///
/// The hub streamer runs too, so the hub statistics in the summary reflect
/// what live clients would have been sent.
pub async fn simulate(
    ctx: &mut AppContext,
    config: SimulationConfig,
) -> Result<SimulationSummary, anyhow::Error> {
    ctx.spawn_ledger_consumer().await?;
    ctx.spawn_hub_streamer();
    let cancel = ctx.cancel_token().clone();

    let started = ctx.scheduler.start(&cancel, config)?;
    println!(
        "▶ Simulation {} started ({} events/s)",
        started.id.as_deref().unwrap_or("-"),
        started.rate_requested
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut check = interval(Duration::from_millis(100));
    check.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            _ = check.tick() => {
                if !ctx.scheduler.is_running() {
                    break;
                }
            }
        }
    }

    let status = if ctx.scheduler.is_running() {
        ctx.scheduler.stop().await?
    } else {
        ctx.scheduler.status()
    };

    let ledger_processed = ctx
        .wait_for_ledger(status.events_produced, DRAIN_TIMEOUT)
        .await?;
    let dead_lettered = ctx.broker.topic_len(topics::DEAD_LETTER);

    println!("■ Simulation finished");
    println!("  Produced:    {}", status.events_produced);
    println!("  Failed:      {}", status.events_failed);
    println!("  Rate:        {:.1} events/s", status.rate_actual);
    println!("  Duration:    {:.1}s", status.duration_seconds);
    println!("  Ledger:      {} events recorded", ledger_processed);
    if dead_lettered > 0 {
        println!("  Dead-letter: {}", dead_lettered);
    }

    Ok(SimulationSummary {
        status,
        ledger_processed,
        dead_lettered,
    })
}

/// Produce `count` events of one kind right now and wait for the ledger
pub async fn produce(
    ctx: &mut AppContext,
    kind: EventKind,
    count: usize,
) -> Result<ProduceReport, anyhow::Error> {
    ctx.spawn_ledger_consumer().await?;
    let before = ctx.ledger.processed_events().await?;
    let cancel = ctx.cancel_token().clone();

    let report = ctx.scheduler.produce_events(&cancel, kind, count).await;
    let processed = ctx
        .wait_for_ledger(before + report.produced as u64, DRAIN_TIMEOUT)
        .await?;

    println!(
        "✅ Produced {}/{} {} events ({} failed), ledger at {}",
        report.produced, report.requested, kind, report.failed, processed
    );
    Ok(report)
}

/// Serve the stream hub over TCP until Ctrl-C.
///
/// With `rate`, a simulation runs alongside so that connected clients
/// receive a live feed.
pub async fn serve(
    ctx: &mut AppContext,
    addr: &str,
    simulation: Option<SimulationConfig>,
) -> Result<(), anyhow::Error> {
    ctx.spawn_ledger_consumer().await?;
    ctx.spawn_hub_streamer();

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let local = listener.local_addr()?;
    let cancel = ctx.cancel_token().clone();
    let server = tokio::spawn(serve_tcp(listener, ctx.hub.clone(), cancel.child_token()));
    println!("📡 Stream hub listening on {local}");

    if let Some(config) = simulation {
        ctx.scheduler.start(&cancel, config)?;
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");

    if ctx.scheduler.is_running() {
        let status = ctx.scheduler.stop().await?;
        println!("■ Simulation produced {} events", status.events_produced);
    }
    let stats = ctx.hub.stats().await?;
    cancel.cancel();
    server.await??;

    println!(
        "■ Hub stopped: {} delivered, {} dropped, {} clients shed",
        stats.delivered, stats.dropped, stats.shed
    );
    Ok(())
}

/// What the ledger did with one scenario event
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioStep {
    pub label: String,
    pub event_type: EventKind,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub steps: Vec<ScenarioStep>,
    pub source: Account,
    pub destination: Account,
    pub source_entries: Vec<LedgerEntry>,
}

/// Walk two accounts through every event type, including a rejected
/// withdrawal and a redelivered deposit.
///
/// Each step is published, consumed and applied before the next one is
/// sent, so the ledger sees the events in scenario order.
pub async fn scenario(ctx: &mut AppContext) -> Result<ScenarioReport, anyhow::Error> {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let source_id = format!("SCN-A-{}", &suffix[..8]);
    let dest_id = format!("SCN-B-{}", &suffix[..8]);

    let mut consumer = ctx.consumer(&format!("scenario-{}", &suffix[..8]));
    consumer.subscribe(banking_topics().as_slice()).await?;

    let deposit: Event =
        Deposited::new(&source_id, Amount::from_units(500), Channel::Counter, "SCN-DEP").into();
    let plan: Vec<(&str, Vec<Event>)> = vec![
        (
            "open accounts",
            vec![
                AccountOpened::new(
                    &source_id,
                    "CLI-SCENARIO",
                    AccountType::Checking,
                    Amount::from_units(1000),
                )
                .into(),
                AccountOpened::new(&dest_id, "CLI-SCENARIO", AccountType::Savings, Amount::ZERO)
                    .into(),
            ],
        ),
        ("deposit 500", vec![deposit.clone()]),
        (
            "withdraw 200",
            vec![
                Withdrawn::new(&source_id, Amount::from_units(200), Channel::Card, "SCN-WDR").into(),
            ],
        ),
        (
            "transfer 300",
            vec![TransferInitiated::new(
                &source_id,
                &dest_id,
                Amount::from_units(300),
                "scenario transfer",
                "SCN-TRF",
            )
            .into()],
        ),
        (
            "withdraw 5000",
            vec![
                Withdrawn::new(&source_id, Amount::from_units(5000), Channel::Wire, "SCN-BIG")
                    .into(),
            ],
        ),
        ("redeliver deposit", vec![deposit]),
    ];

    let mut steps = Vec::new();
    for (label, events) in plan {
        for event in &events {
            ctx.producer
                .publish_event(ctx.cancel_token(), event)
                .await
                .with_context(|| format!("publishing step '{label}'"))?;
        }
        for _ in 0..events.len() {
            let step = apply_next(ctx, &mut consumer, label).await?;
            println!("  {:<18} {:<18} {}", step.label, step.event_type, step.outcome);
            steps.push(step);
        }
    }
    consumer.close().await?;

    let source = ctx.ledger.account(&source_id).await?;
    let destination = ctx.ledger.account(&dest_id).await?;
    let source_entries = ctx.ledger.transactions(&source_id, None).await?;

    println!();
    for account in [&source, &destination] {
        println!(
            "💰 {} ({}): {} {} [{}]",
            account.id, account.account_type, account.balance, account.currency, account.status
        );
    }
    for entry in source_entries.iter().rev() {
        println!(
            "  {:<7} {:>10} → {:>10}  {}",
            entry.kind.to_string(),
            entry.amount,
            entry.balance_after,
            entry.description
        );
    }

    Ok(ScenarioReport {
        steps,
        source,
        destination,
        source_entries,
    })
}

async fn apply_next(
    ctx: &AppContext,
    consumer: &mut Consumer,
    label: &str,
) -> Result<ScenarioStep, anyhow::Error> {
    let message = consumer
        .consume_once(DRAIN_TIMEOUT)
        .await?
        .with_context(|| format!("no event arrived for step '{label}'"))?;

    let outcome = match ctx.ledger.apply(&message.event).await {
        Ok(ApplyOutcome::Applied) => "applied".to_string(),
        Ok(ApplyOutcome::AlreadyProcessed) => "duplicate ignored".to_string(),
        Ok(ApplyOutcome::Unchanged) => "unchanged".to_string(),
        Ok(ApplyOutcome::CreditLegSkipped { dest_account_id }) => {
            format!("credit leg skipped ({dest_account_id})")
        }
        Err(err) if err.is_domain() => format!("rejected: {err}"),
        Err(err) => return Err(err.into()),
    };

    Ok(ScenarioStep {
        label: label.to_string(),
        event_type: message.event.kind(),
        outcome,
    })
}

/// Resolve every bundled schema through the codec and print it
pub async fn schemas(
    ctx: &AppContext,
    show_definitions: bool,
) -> Result<Vec<Arc<SchemaEntry>>, anyhow::Error> {
    let mut entries = Vec::new();
    for kind in EventKind::iter() {
        let entry = ctx.codec.latest_schema(&kind.subject()).await?;
        println!(
            "{:<40} id={:<3} {} ({} fields)",
            entry.subject,
            entry.id,
            entry.schema.full_name(),
            entry.schema.fields.len()
        );
        if show_definitions {
            println!("{}", entry.raw);
        }
        entries.push(entry);
    }
    Ok(entries)
}
