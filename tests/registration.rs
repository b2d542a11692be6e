//! Registration behaviour against the in-memory store.
//!
//! Covers idempotent re-runs, concurrent callers racing on one verifier,
//! distinct verifiers, inactive rows and store failure mapping.
//!
//! Needs the store's failure injection: `cargo test --features test-hooks`.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use keyforge::models::stored::{
    KeyMetadata, StoredCredential, DEFAULT_RATE_LIMIT_PER_DAY, DEFAULT_RATE_LIMIT_PER_MINUTE,
};
use keyforge::store::memory::{InjectedFailure, MemoryStore, Race};
use keyforge::{generate, CredentialRecord, Outcome, RegisterError, Registrar};
use uuid::Uuid;

fn metadata() -> KeyMetadata {
    KeyMetadata {
        service: "svc".into(),
        purpose: "integration".into(),
        created_by: "deploy script".into(),
    }
}

fn issue() -> CredentialRecord {
    generate("svc_live", "http://localhost:5000", ["dns_query"]).unwrap()
}

fn row_for(rec: &CredentialRecord, is_active: bool) -> StoredCredential {
    StoredCredential {
        id: Uuid::new_v4(),
        key_hash: rec.verifier.as_hex().to_string(),
        key_prefix: rec.prefix.as_str().to_string(),
        name: "svc - integration".into(),
        tier: "enterprise".into(),
        is_active,
        rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        rate_limit_per_day: DEFAULT_RATE_LIMIT_PER_DAY,
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

// ═══════════════════════════════════════════════════════════════════
//  Idempotence
// ═══════════════════════════════════════════════════════════════════

/// The worked example: first call inserts, second returns the same id.
#[tokio::test]
async fn test_register_twice_returns_same_id() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();

    let first = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();
    assert_eq!(registrar.store().len(), 1);

    let second = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(registrar.store().len(), 1);
    assert_eq!(registrar.store().inserts(), 1);
}

#[tokio::test]
async fn test_inserted_row_has_defaults_and_metadata() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();

    let id = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();

    let row = registrar.store().get(&rec.verifier).unwrap();
    assert_eq!(row.id, id);
    assert_eq!(row.key_hash, rec.verifier.as_hex());
    assert_eq!(row.key_prefix, rec.prefix.as_str());
    assert_eq!(row.name, "svc - integration");
    assert_eq!(row.tier, "enterprise");
    assert!(row.is_active);
    assert_eq!(row.rate_limit_per_minute, DEFAULT_RATE_LIMIT_PER_MINUTE);
    assert_eq!(row.rate_limit_per_day, DEFAULT_RATE_LIMIT_PER_DAY);
    assert_eq!(row.metadata["service"], "svc");
    assert_eq!(row.metadata["purpose"], "integration");
    assert_eq!(row.metadata["created_by"], "deploy script");
}

/// The stored row never contains the plaintext token.
#[tokio::test]
async fn test_stored_row_holds_no_plaintext() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();

    let row = registrar.store().get(&rec.verifier).unwrap();
    let serialized = serde_json::to_string(&row).unwrap();
    assert!(!serialized.contains(rec.token.expose()));
}

#[tokio::test]
async fn test_detailed_outcome_distinguishes_created() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    let req = keyforge::registrar::Registration {
        verifier: &rec.verifier,
        prefix: &rec.prefix,
        name: "svc - integration",
        tier: "enterprise",
    };

    let first = registrar.register_detailed(&req).await.unwrap();
    let second = registrar.register_detailed(&req).await.unwrap();
    assert!(matches!(first, Outcome::Created(_)));
    assert_eq!(second, Outcome::AlreadyRegistered(first.store_id()));
}

// ═══════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════

/// A writer that commits between our lookup and our insert must not
/// surface as an error.
#[tokio::test]
async fn test_conflict_on_insert_returns_winner_id() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().race_next_insert();

    let outcome = registrar
        .register_detailed(&keyforge::registrar::Registration {
            verifier: &rec.verifier,
            prefix: &rec.prefix,
            name: "svc - integration",
            tier: "enterprise",
        })
        .await
        .unwrap();

    let winner = registrar.store().get(&rec.verifier).unwrap();
    assert_eq!(outcome, Outcome::AlreadyRegistered(winner.id));
    assert_eq!(registrar.store().len(), 1);
    assert_eq!(registrar.store().conflicts(), 1);
}

/// The winner's row is inactive by the time we re-read it: the call fails
/// as `Inactive` and no second row is written.
#[tokio::test]
async fn test_conflict_reread_finds_inactive_row() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().race_next_insert_with(Race::Inactive);

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();

    let winner = registrar.store().get(&rec.verifier).unwrap();
    match err {
        RegisterError::Inactive { store_id, .. } => assert_eq!(store_id, winner.id),
        ref other => panic!("expected Inactive, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(registrar.store().len(), 1);
    assert_eq!(registrar.store().conflicts(), 1);
}

/// A conflict with nothing to re-read means the store contradicted itself.
#[tokio::test]
async fn test_conflict_with_no_row_is_malformed() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().race_next_insert_with(Race::Phantom);

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();

    match err {
        RegisterError::MalformedResponse { ref reason, .. } => {
            assert!(reason.contains("no row found on re-read"), "{}", reason)
        }
        ref other => panic!("expected MalformedResponse, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert!(registrar.store().is_empty());
}

/// Losing the connection during the post-conflict re-read is retryable.
#[tokio::test]
async fn test_conflict_reread_unavailable_is_retryable() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().race_next_insert();
    // First lookup passes, the re-read after the conflict fails.
    registrar
        .store()
        .fail_find_after(1, InjectedFailure::Unavailable);

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::StoreUnavailable { .. }));
    assert!(err.is_retryable());

    let winner = registrar.store().get(&rec.verifier).unwrap();
    let id = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();
    assert_eq!(id, winner.id);
    assert_eq!(registrar.store().len(), 1);
}

/// N callers all see an absent row, all try to insert, exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_converge_on_one_row() {
    const CALLERS: usize = 8;
    let registrar = Arc::new(Registrar::new(
        MemoryStore::with_lookup_barrier(CALLERS),
        metadata(),
    ));
    let rec = Arc::new(issue());

    let tasks = (0..CALLERS).map(|_| {
        let registrar = registrar.clone();
        let rec = rec.clone();
        tokio::spawn(async move {
            registrar
                .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
                .await
        })
    });

    let ids: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(ids.len(), CALLERS);
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(registrar.store().len(), 1);
    assert_eq!(registrar.store().inserts(), 1);
    assert_eq!(registrar.store().conflicts(), CALLERS - 1);
}

/// Two registrars sharing one store behave like two processes.
#[tokio::test]
async fn test_shared_store_across_registrars() {
    let store = Arc::new(MemoryStore::new());
    let a = Registrar::new(store.clone(), metadata());
    let b = Registrar::new(store.clone(), metadata());
    let rec = issue();

    let (ra, rb) = tokio::join!(
        a.register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise"),
        b.register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise"),
    );
    assert_eq!(ra.unwrap(), rb.unwrap());
    assert_eq!(store.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════
//  Distinct verifiers
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_distinct_verifiers_get_distinct_rows() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let first = issue();
    let second = issue();
    assert_ne!(first.verifier, second.verifier);

    let id1 = registrar
        .register(&first.verifier, &first.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();
    let id2 = registrar
        .register(&second.verifier, &second.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();

    assert_ne!(id1, id2);
    assert_eq!(registrar.store().len(), 2);
}

// ═══════════════════════════════════════════════════════════════════
//  Inactive rows
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_inactive_row_is_not_reused_or_duplicated() {
    let store = MemoryStore::new();
    let rec = issue();
    let revoked = row_for(&rec, false);
    let revoked_id = revoked.id;
    store.seed(revoked);
    let registrar = Registrar::new(store, metadata());

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();

    match err {
        RegisterError::Inactive { store_id, ref verifier } => {
            assert_eq!(store_id, revoked_id);
            assert_eq!(verifier, rec.verifier.hint());
        }
        ref other => panic!("expected Inactive, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(registrar.store().len(), 1);
    assert_eq!(registrar.store().inserts(), 0);
}

// ═══════════════════════════════════════════════════════════════════
//  Failure mapping
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_lookup_unavailable_is_retryable_and_writes_nothing() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().fail_next_find(InjectedFailure::Unavailable);

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::StoreUnavailable { .. }));
    assert!(err.is_retryable());
    assert!(registrar.store().is_empty());

    // The caller retries; the registrar itself did not.
    let id = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();
    assert_eq!(registrar.store().get(&rec.verifier).unwrap().id, id);
}

#[tokio::test]
async fn test_insert_timeout_is_retryable() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().fail_next_insert(InjectedFailure::Timeout);

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::StoreTimeout { .. }));
    assert!(err.is_retryable());
    assert!(registrar.store().is_empty());
}

/// A committed insert whose reply lost the id is fatal for the call, and a
/// later run finds the committed row instead of inserting again.
#[tokio::test]
async fn test_missing_insert_id_is_malformed() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().fail_next_insert(InjectedFailure::MissingId);

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::MalformedResponse { .. }));
    assert!(!err.is_retryable());

    let id = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap();
    assert_eq!(registrar.store().get(&rec.verifier).unwrap().id, id);
    assert_eq!(registrar.store().len(), 1);
}

/// A lookup that answers with some other verifier's row is rejected rather
/// than treated as "already registered".
#[tokio::test]
async fn test_row_for_other_verifier_is_malformed() {
    let store = MemoryStore::new();
    let rec = issue();
    let stranger = issue();
    store.seed_under(&rec.verifier, row_for(&stranger, true));
    let registrar = Registrar::new(store, metadata());

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();
    match err {
        RegisterError::MalformedResponse { ref reason, .. } => {
            assert!(reason.contains("different verifier"), "{}", reason)
        }
        ref other => panic!("expected MalformedResponse, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(registrar.store().inserts(), 0);
}

/// Error text carries the verifier hint, never the token.
#[tokio::test]
async fn test_errors_do_not_leak_token() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();
    registrar.store().fail_next_find(InjectedFailure::Unavailable);

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "enterprise")
        .await
        .unwrap_err();
    let text = format!("{} {:?}", err, err);
    assert!(text.contains(rec.verifier.hint()));
    assert!(!text.contains(rec.token.expose()));
    assert!(!text.contains(rec.verifier.as_hex()));
}

#[tokio::test]
async fn test_rejects_blank_name_and_tier() {
    let registrar = Registrar::new(MemoryStore::new(), metadata());
    let rec = issue();

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "  ", "enterprise")
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::InvalidInput(_)));

    let err = registrar
        .register(&rec.verifier, &rec.prefix, "svc - integration", "")
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::InvalidInput(_)));
    assert!(registrar.store().is_empty());
}
