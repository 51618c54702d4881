//! Scripted session against an in-memory backend

use crate::cli::SimulateArgs;
use crate::output;
use anyhow::{Context, Result};
use heirloom_sync::{Attributes, InMemoryStore, MutationQueue, SyncRuntime, SyncSettings};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const FAST_STEP_DELAY_MS: u64 = 20;

fn person(name: &str, born: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("name".to_string(), json!(name));
    attributes.insert("birth_date".to_string(), json!(born));
    attributes
}

async fn wait_for_empty(queue: &MutationQueue, limit: Duration) -> bool {
    tokio::time::timeout(limit, async {
        while !queue.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

pub async fn run(mut settings: SyncSettings, args: SimulateArgs) -> Result<()> {
    if let Some(rate) = args.failure_rate {
        anyhow::ensure!((0.0..=1.0).contains(&rate), "--failure-rate must be within [0, 1]");
        settings.transfer_failure_rate = rate;
    }
    if args.fast {
        settings.transfer_step_delay_ms = FAST_STEP_DELAY_MS;
    }
    let primary = settings.primary_region;
    let secondary = settings.sync_regions.first().copied();
    tracing::info!(
        family = %args.family,
        primary = %primary,
        failure_rate = settings.transfer_failure_rate,
        "Starting simulated session"
    );

    let store = Arc::new(InMemoryStore::new());
    let runtime = SyncRuntime::start(settings, store.clone())
        .await
        .context("failed to start sync runtime")?;

    let mut notifications = runtime.notifier().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => output::notification(&notification),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    output::banner("Replicas");
    output::region_table(&runtime.tracker().snapshot());

    output::banner("Family tree");
    let cache = runtime.graph_cache(args.family.as_str());
    cache.load().await;
    output::step("adding people");
    let ada = cache
        .add_person(person("Ada", "1815-12-10"))
        .await
        .context("backend rejected Ada")?;
    let george = cache
        .add_person(person("George", "1788-01-22"))
        .await
        .context("backend rejected George")?;
    cache
        .add_relationship(&george.id, &ada.id, "parent", Attributes::new())
        .await;

    output::banner("Region sweep");
    for (region, outcome) in runtime.sync().sync_all_regions().await? {
        output::outcome(region, &outcome);
    }

    output::banner("Offline edits");
    runtime.set_online(false);
    output::step("device offline");
    let ralph = cache.add_person(person("Ralph", "1839-07-02")).await;
    let mut renamed = Attributes::new();
    renamed.insert("name".to_string(), json!("Augusta Ada"));
    let applied = cache.update_person(&ada.id, renamed).await;
    output::step(&format!(
        "created {} offline, rename applied locally: {applied}, pending writes: {}",
        ralph.map(|node| node.id).unwrap_or_default(),
        runtime.queue().len().await
    ));
    output::flush(&runtime.flush().await);

    output::banner("Primary outage");
    if let Some(decision) = runtime.outage().force_offline(primary)? {
        output::decision(&decision);
    }
    output::region_table(&runtime.tracker().snapshot());

    output::banner("Reconnect");
    runtime.set_online(true);
    if wait_for_empty(runtime.queue(), Duration::from_secs(5)).await {
        output::step("queued writes replayed");
    } else {
        let pending = runtime.queue().len().await;
        tracing::warn!(pending, "Queued writes not replayed after reconnect");
        output::step(&format!("{pending} writes still pending"));
    }

    output::banner("Recovery");
    if let Some(region) = secondary {
        runtime.outage().force_offline(region)?;
        let outcome = runtime.outage().recover(region).await?;
        output::outcome(region, &outcome);
    }
    runtime.outage().recover(primary).await?;
    output::region_table(&runtime.tracker().snapshot());

    output::banner("Result");
    cache.load().await;
    let graph = cache.graph().await;
    output::step(&format!(
        "{} people, {} relationships in family {}",
        graph.nodes.len(),
        graph.edges.len(),
        cache.family_id()
    ));
    output::step(&format!(
        "backend handled {} requests",
        store.request_count()
    ));

    tracing::info!(
        people = graph.nodes.len(),
        relationships = graph.edges.len(),
        requests = store.request_count(),
        "Simulated session finished"
    );

    // Let the printer catch up before the channel goes away
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    runtime.shutdown().await;
    Ok(())
}
