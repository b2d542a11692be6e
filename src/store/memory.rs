//! In-process credential store.
//!
//! Enforces the same `key_hash` uniqueness as the PostgreSQL table. With the
//! `test-hooks` feature it can also inject the failures a real store
//! produces: a competing writer winning the insert race, connectivity loss,
//! timeouts and malformed insert replies.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::CredentialStore;
use crate::errors::StoreError;
use crate::models::credential::Verifier;
use crate::models::stored::{NewCredential, StoreId, StoredCredential};

#[cfg(any(test, feature = "test-hooks"))]
pub use hooks::{InjectedFailure, Race};

#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<String, StoredCredential>,
    conflicts: AtomicUsize,
    inserts: AtomicUsize,
    #[cfg(any(test, feature = "test-hooks"))]
    hooks: hooks::Hooks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Inserts rejected with a uniqueness conflict.
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    /// Rows committed through `insert_credential`, including race winners.
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn get(&self, verifier: &Verifier) -> Option<StoredCredential> {
        self.rows.get(verifier.as_hex()).map(|r| r.value().clone())
    }

    fn row_from(cred: &NewCredential) -> StoredCredential {
        StoredCredential {
            id: Uuid::new_v4(),
            key_hash: cred.key_hash.clone(),
            key_prefix: cred.key_prefix.clone(),
            name: cred.name.clone(),
            tier: cred.tier.clone(),
            is_active: true,
            rate_limit_per_minute: cred.rate_limit_per_minute,
            rate_limit_per_day: cred.rate_limit_per_day,
            metadata: cred.metadata.clone(),
            created_at: Utc::now(),
        }
    }

    fn conflict(&self) -> StoreError {
        self.conflicts.fetch_add(1, Ordering::SeqCst);
        StoreError::UniquenessConflict
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_verifier(
        &self,
        verifier: &Verifier,
    ) -> Result<Option<StoredCredential>, StoreError> {
        #[cfg(any(test, feature = "test-hooks"))]
        if let Some(failure) = self.hooks.take_find_failure() {
            return Err(failure.into_error());
        }

        let row = self.get(verifier);

        #[cfg(any(test, feature = "test-hooks"))]
        self.hooks.hold_lookup().await;

        Ok(row)
    }

    async fn insert_credential(&self, cred: &NewCredential) -> Result<StoreId, StoreError> {
        #[cfg(any(test, feature = "test-hooks"))]
        let failure = self.hooks.take_insert_failure();
        #[cfg(any(test, feature = "test-hooks"))]
        if let Some(f @ (InjectedFailure::Unavailable | InjectedFailure::Timeout)) = failure {
            return Err(f.into_error());
        }

        #[cfg(any(test, feature = "test-hooks"))]
        match self.hooks.take_race() {
            Some(Race::Phantom) => return Err(self.conflict()),
            Some(race) => {
                // The competing writer commits first.
                if let Entry::Vacant(slot) = self.rows.entry(cred.key_hash.clone()) {
                    let mut row = Self::row_from(cred);
                    row.is_active = race == Race::Active;
                    slot.insert(row);
                    self.inserts.fetch_add(1, Ordering::SeqCst);
                }
            }
            None => {}
        }

        match self.rows.entry(cred.key_hash.clone()) {
            Entry::Occupied(_) => Err(self.conflict()),
            Entry::Vacant(slot) => {
                let row = Self::row_from(cred);
                let id = row.id;
                slot.insert(row);
                self.inserts.fetch_add(1, Ordering::SeqCst);

                #[cfg(any(test, feature = "test-hooks"))]
                if failure == Some(InjectedFailure::MissingId) {
                    return Err(InjectedFailure::MissingId.into_error());
                }
                Ok(id)
            }
        }
    }
}

/// Failure injection. NEVER enable `test-hooks` in production builds.
#[cfg(any(test, feature = "test-hooks"))]
mod hooks {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::sync::Barrier;

    use super::MemoryStore;
    use crate::errors::StoreError;
    use crate::models::credential::Verifier;
    use crate::models::stored::StoredCredential;

    /// A failure to return from a matching call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum InjectedFailure {
        Unavailable,
        Timeout,
        /// Insert succeeds on the store side but the reply carries no id.
        MissingId,
    }

    impl InjectedFailure {
        pub(super) fn into_error(self) -> StoreError {
            match self {
                InjectedFailure::Unavailable => {
                    StoreError::Unavailable("connection reset by peer".into())
                }
                InjectedFailure::Timeout => StoreError::Timeout,
                InjectedFailure::MissingId => {
                    StoreError::Malformed("INSERT ... RETURNING id returned no row".into())
                }
            }
        }
    }

    /// How a lost insert race looks from the losing writer's side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Race {
        /// The winner's row is active.
        Active,
        /// The winner's row was deactivated before we could re-read it.
        Inactive,
        /// The store reports a conflict but no competing row exists.
        Phantom,
    }

    #[derive(Default)]
    pub(super) struct Hooks {
        races: Mutex<VecDeque<Race>>,
        lookup_gate: Option<LookupGate>,
        /// Lookups to let through before failing, and the failure.
        fail_find: Mutex<Option<(usize, InjectedFailure)>>,
        fail_insert: Mutex<Option<InjectedFailure>>,
    }

    /// Holds the first `remaining` lookups until all of them have run, so that
    /// concurrent callers all observe an absent row before any of them inserts.
    struct LookupGate {
        barrier: Barrier,
        remaining: AtomicUsize,
    }

    impl Hooks {
        pub(super) fn take_race(&self) -> Option<Race> {
            self.races.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
        }

        pub(super) fn take_insert_failure(&self) -> Option<InjectedFailure> {
            self.fail_insert.lock().unwrap_or_else(|e| e.into_inner()).take()
        }

        pub(super) fn take_find_failure(&self) -> Option<InjectedFailure> {
            let mut slot = self.fail_find.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_mut() {
                Some((0, _)) => slot.take().map(|(_, failure)| failure),
                Some((skip, _)) => {
                    *skip -= 1;
                    None
                }
                None => None,
            }
        }

        pub(super) async fn hold_lookup(&self) {
            if let Some(gate) = &self.lookup_gate {
                let held = gate
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if held {
                    gate.barrier.wait().await;
                }
            }
        }
    }

    impl MemoryStore {
        /// Synchronise the first `callers` lookups on a barrier.
        pub fn with_lookup_barrier(callers: usize) -> Self {
            Self {
                hooks: Hooks {
                    lookup_gate: Some(LookupGate {
                        barrier: Barrier::new(callers),
                        remaining: AtomicUsize::new(callers),
                    }),
                    ..Hooks::default()
                },
                ..Self::default()
            }
        }

        /// Make the next insert lose to a concurrent writer: an active row for
        /// the same verifier appears and the insert reports a uniqueness
        /// conflict.
        pub fn race_next_insert(&self) {
            self.race_next_insert_with(Race::Active);
        }

        pub fn race_next_insert_with(&self, race: Race) {
            self.hooks
                .races
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(race);
        }

        pub fn fail_next_find(&self, failure: InjectedFailure) {
            self.fail_find_after(0, failure);
        }

        /// Let `skip` lookups succeed, then fail the one after.
        pub fn fail_find_after(&self, skip: usize, failure: InjectedFailure) {
            *self.hooks.fail_find.lock().unwrap_or_else(|e| e.into_inner()) =
                Some((skip, failure));
        }

        pub fn fail_next_insert(&self, failure: InjectedFailure) {
            *self.hooks.fail_insert.lock().unwrap_or_else(|e| e.into_inner()) = Some(failure);
        }

        /// Put a row in place directly, bypassing uniqueness checks.
        pub fn seed(&self, row: StoredCredential) {
            self.rows.insert(row.key_hash.clone(), row);
        }

        /// File `row` under `verifier` whatever its own `key_hash` says, the
        /// way a store with a broken index would answer.
        pub fn seed_under(&self, verifier: &Verifier, row: StoredCredential) {
            self.rows.insert(verifier.as_hex().to_string(), row);
        }
    }
}
