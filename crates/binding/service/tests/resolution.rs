//! End-to-end resolution against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use binding_ledger::{InMemoryLedger, InMemoryLog};
use binding_types::{AccountId, EventKind, EventPayload, EvmAddress, IdentityEvent};
use binding_service::{
    BindingConfig, BindingService, Collaborators, ProvisionError, ServiceError, Source,
};
use futures::future::join_all;

const TOPIC: &str = "0.0.4800";
const WORKED_DID: &str = "did:ethr:0x1111111111111111111111111111111111111111";

struct Harness {
    log: Arc<InMemoryLog>,
    ledger: Arc<InMemoryLedger>,
    service: BindingService,
}

fn config() -> BindingConfig {
    BindingConfig {
        enabled: true,
        topic_id: TOPIC.to_string(),
        ..Default::default()
    }
}

async fn harness_with(log: Arc<InMemoryLog>, ledger: Arc<InMemoryLedger>, config: BindingConfig) -> Harness {
    let collaborators = Collaborators {
        log_reader: log.clone(),
        log_writer: log.clone(),
        replica: ledger.clone(),
        transfer: ledger.clone(),
    };
    let service = BindingService::new(config, collaborators).unwrap();
    service.start().await.unwrap();
    Harness {
        log,
        ledger,
        service,
    }
}

async fn harness(ledger: InMemoryLedger) -> Harness {
    harness_with(Arc::new(InMemoryLog::new()), Arc::new(ledger), config()).await
}

fn events_of(log: &InMemoryLog, kind: EventKind) -> Vec<IdentityEvent> {
    log.events(TOPIC)
        .into_iter()
        .filter(|e| e.kind() == kind)
        .collect()
}

fn alias(did: &str) -> EvmAddress {
    EvmAddress::from_did(did).unwrap()
}

#[tokio::test(start_paused = true)]
async fn replica_hit_asserts_once_then_serves_from_cache() {
    let h = harness(InMemoryLedger::new()).await;
    let did = "did:ethr:0x2222222222222222222222222222222222222222";
    h.ledger.insert_account(alias(did), AccountId::from("0.0.2222"));

    let first = h.service.orchestrator().resolve_or_provision(did).await.unwrap();
    assert_eq!(first.source, Source::Replica);
    assert_eq!(first.account_id, AccountId::from("0.0.2222"));

    let second = h.service.orchestrator().resolve_or_provision(did).await.unwrap();
    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.account_id, first.account_id);

    h.service.publisher().flush().await;
    let asserts = events_of(&h.log, EventKind::Assert);
    assert_eq!(asserts.len(), 1);
    assert_eq!(asserts[0].subject().as_str(), did);
    assert_eq!(h.ledger.transfer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn replayed_binding_answers_from_reducer() {
    let log = Arc::new(InMemoryLog::new());
    let ledger = Arc::new(InMemoryLedger::new().with_replication_lag(1));

    // First process provisions.
    let first = harness_with(log.clone(), ledger.clone(), config()).await;
    let created = first
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap();
    assert_eq!(created.source, Source::Provisioned);
    first.service.shutdown().await;

    // A restarted process learns the binding from the log alone.
    let lookups_before = ledger.lookup_count();
    let second = harness_with(log, ledger.clone(), config()).await;
    let resolved = second
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap();
    assert_eq!(resolved.source, Source::Reducer);
    assert_eq!(resolved.account_id, created.account_id);
    assert_eq!(ledger.lookup_count(), lookups_before);
    assert!(second.service.health().initialized);
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_requests_provision_exactly_once() {
    let h = harness(InMemoryLedger::new().with_replication_lag(3)).await;
    let orchestrator = h.service.orchestrator();

    let results = join_all((0..16).map(|_| orchestrator.resolve_or_provision(WORKED_DID))).await;

    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    let account = results[0].account_id.clone();
    assert!(results.iter().all(|r| r.account_id == account));
    assert_eq!(
        results
            .iter()
            .filter(|r| r.source == Source::Provisioned)
            .count(),
        1
    );

    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.ledger.account_count(), 1);

    h.service.publisher().flush().await;
    assert_eq!(events_of(&h.log, EventKind::Bind).len(), 1);
    assert_eq!(orchestrator.locks().held(), 0);
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_propagates_without_bind() {
    let ledger = InMemoryLedger::new();
    ledger.set_never_replicate(true);
    let h = harness(ledger).await;

    let err = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Provision(ProvisionError::ConfirmationTimeout { attempts: 10, .. })
    ));

    h.service.publisher().flush().await;
    assert!(events_of(&h.log, EventKind::Bind).is_empty());
    assert_eq!(h.service.registry().query(WORKED_DID), None);
    assert_eq!(h.service.orchestrator().locks().held(), 0);
    assert_eq!(h.service.health().orchestrator_cache.total, 0);
}

#[tokio::test(start_paused = true)]
async fn worked_example_visible_on_third_poll() {
    let h = harness(InMemoryLedger::new().with_replication_lag(2)).await;

    let started = tokio::time::Instant::now();
    let result = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.source, Source::Provisioned);
    assert_eq!(result.did.as_str(), WORKED_DID);
    // Three 500 ms poll delays.
    assert!(elapsed >= Duration::from_millis(1500));
    assert!(elapsed < Duration::from_millis(2000));

    h.service.publisher().flush().await;
    let binds = events_of(&h.log, EventKind::Bind);
    assert_eq!(binds.len(), 1);
    match binds[0].payload() {
        EventPayload::Bind(p) => {
            assert_eq!(p.evm_address, "0x1111111111111111111111111111111111111111");
            assert_eq!(p.account_id, result.account_id);
            assert!(p.create_tx_id.is_some());
        }
        other => panic!("unexpected payload {:?}", other),
    }

    // Next request is answered by the cache without touching the replica.
    let lookups = h.ledger.lookup_count();
    let again = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap();
    assert_eq!(again.source, Source::Cache);
    assert_eq!(h.ledger.lookup_count(), lookups);
}

#[tokio::test(start_paused = true)]
async fn replica_outage_is_reported() {
    let h = harness(InMemoryLedger::new()).await;
    h.ledger.set_fail_lookups(true);

    let err = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Replica(_)));
    assert_eq!(h.ledger.transfer_count(), 0);
}

#[tokio::test]
async fn disabled_service_does_nothing() {
    let log = Arc::new(InMemoryLog::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let h = harness_with(log, ledger, BindingConfig::default()).await;

    assert!(!h.service.health().initialized);
    assert_eq!(h.log.fetch_count(), 0);

    let err = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Disabled));
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let log = Arc::new(InMemoryLog::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let config = BindingConfig {
        enabled: true,
        ..Default::default()
    };
    let collaborators = Collaborators {
        log_reader: log.clone(),
        log_writer: log,
        replica: ledger.clone(),
        transfer: ledger,
    };
    assert!(matches!(
        BindingService::new(config, collaborators),
        Err(ServiceError::Config(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_bind_publish_does_not_fail_provisioning() {
    let h = harness(InMemoryLedger::new().with_replication_lag(1)).await;
    h.log.set_fail_submit(true);

    let created = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap();
    assert_eq!(created.source, Source::Provisioned);

    h.service.publisher().flush().await;
    let stats = h.service.publisher().stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.published, 0);
    assert!(events_of(&h.log, EventKind::Bind).is_empty());

    let cached = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap();
    assert!(matches!(cached.source, Source::Cache | Source::Reducer));
    assert_eq!(cached.account_id, created.account_id);

    // The local fold still answers once the caches are gone.
    h.service.orchestrator().invalidate(WORKED_DID).unwrap();
    let folded = h
        .service
        .orchestrator()
        .resolve_or_provision(WORKED_DID)
        .await
        .unwrap();
    assert_eq!(folded.source, Source::Reducer);
    assert_eq!(folded.account_id, created.account_id);
    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.service.publisher().stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_assert_publish_does_not_fail_replica_hit() {
    let h = harness(InMemoryLedger::new()).await;
    h.log.set_fail_submit(true);
    let did = "did:ethr:0x4444444444444444444444444444444444444444";
    h.ledger.insert_account(alias(did), AccountId::from("0.0.4444"));

    let result = h.service.orchestrator().resolve_or_provision(did).await.unwrap();
    assert_eq!(result.source, Source::Replica);
    assert_eq!(result.account_id, AccountId::from("0.0.4444"));

    h.service.publisher().flush().await;
    assert_eq!(h.service.publisher().stats().failed, 1);
    assert!(events_of(&h.log, EventKind::Assert).is_empty());
}
