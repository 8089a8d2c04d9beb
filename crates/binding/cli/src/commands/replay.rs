//! Topic replay from a mirror node

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use binding_ledger::MirrorClient;
use binding_registry::{BindingRegistry, HistorySync, RegistryStats, SyncReport};
use binding_service::BindingConfig;
use binding_types::{canonical_did, BindingRecord};
use serde::Serialize;
use tracing::info;

use crate::output::{print_field, print_json, print_warning};

/// Replay arguments
pub struct ReplayArgs {
    pub topic: Option<String>,
    pub lookback_hours: Option<u64>,
    pub subject: Option<String>,
}

#[derive(Serialize)]
struct ReplayOutput {
    topic: String,
    runs: usize,
    totals: SyncReport,
    registry: RegistryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<BindingRecord>,
}

/// Rebuild binding state from the topic and print a summary
pub async fn execute(config: &BindingConfig, args: ReplayArgs, json: bool) -> anyhow::Result<()> {
    let mut sync_config = config.sync_config();
    if let Some(topic) = args.topic {
        sync_config.topic = topic;
    }
    if let Some(hours) = args.lookback_hours {
        sync_config.lookback = Duration::from_secs(hours * 60 * 60);
    }
    if sync_config.topic.is_empty() {
        bail!("no topic given; pass --topic or set BINDING_TOPIC_ID");
    }

    let client = Arc::new(MirrorClient::new(&config.mirror_url, config.request_timeout())?);
    let registry = Arc::new(BindingRegistry::new());
    let per_run = sync_config.batch_size * sync_config.max_batches;
    let topic = sync_config.topic.clone();
    let sync = HistorySync::new(client, registry.clone(), sync_config);

    // One run is capped at max_batches; keep going until the topic is drained.
    let mut totals = SyncReport::default();
    let mut runs = 0;
    loop {
        let report = sync.sync().await?;
        runs += 1;
        totals.fetched += report.fetched;
        totals.applied += report.applied;
        totals.skipped += report.skipped;
        totals.malformed += report.malformed;
        totals.batches += report.batches;
        totals.watermark = report.watermark;
        info!(run = runs, fetched = report.fetched, "Replay run complete");
        if report.fetched < per_run {
            break;
        }
    }

    let subject = args
        .subject
        .map(|issuer| canonical_did(&issuer, config.did_salt.as_deref()))
        .transpose()?;
    let record = subject
        .as_ref()
        .and_then(|subject| registry.details(subject.as_str()));

    let output = ReplayOutput {
        topic,
        runs,
        totals,
        registry: registry.stats(),
        subject: subject.map(|s| s.to_string()),
        record,
    };
    if json {
        return print_json(&output);
    }

    print_field("Topic", &output.topic);
    print_field("Fetched", output.totals.fetched);
    print_field("Applied", output.totals.applied);
    print_field("Skipped", output.totals.skipped);
    print_field("Malformed", output.totals.malformed);
    print_field(
        "Watermark",
        output
            .totals
            .watermark
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    print_field(
        "Bindings",
        format!(
            "{} ({} active, {} inactive)",
            output.registry.total, output.registry.active, output.registry.inactive
        ),
    );
    print_field(
        "Dropped",
        format!(
            "{} stale, {} unsigned",
            output.registry.stale, output.registry.rejected
        ),
    );

    if let Some(subject) = &output.subject {
        println!();
        print_field("Subject", subject);
        match &output.record {
            Some(record) => {
                print_field("Account", &record.account_id);
                print_field("Active", record.active);
                print_field("Last event", record.last_event_kind);
                print_field("Issued at", record.last_issued_at.to_rfc3339());
                print_field("Alias", record.evm_address.as_deref().unwrap_or("-"));
            }
            None => print_warning("No binding for subject"),
        }
    }
    Ok(())
}
