//! Deduplication resolver for scraped business records.
//!
//! Provides the `LeadStore` and `AuditSink` traits and the `Resolver` that
//! turns each incoming record into either a new lead or a merge into an
//! existing one. Uniqueness of identity keys is enforced by the store
//! (insert-on-conflict), and merges use an optimistic check on
//! `merge_count`, so concurrent workers never create two leads for one key.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use leadmatch_features::{generate_key, same_site, try_normalize, IdentityKey, KeyDefaults};
use leadmatch_model::{non_blank, Lead, MergeLogEntry, MergeReason, RawBusinessRecord, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors from resolving a record.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Lead store unavailable: {0}")]
    StoreUnavailable(String),

    /// Another writer changed the lead between read and write; re-resolve.
    #[error("Concurrent update on identity key {identity_key}")]
    ConcurrentConflict { identity_key: String },

    /// The lead write went through but its audit entry did not.
    #[error("Lead {} merged but audit append failed: {source}", .lead.id)]
    AuditWriteFailed {
        lead: Box<Lead>,
        #[source]
        source: StoreError,
    },
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentConflict { .. })
    }
}

/// Result of an insert against the unique identity-key index.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted,
    /// A lead with the same identity key already exists; nothing was written.
    AlreadyExists(Lead),
}

/// Persistent lead storage.
///
/// Implementations must enforce uniqueness of `identity_key` on insert.
pub trait LeadStore {
    fn get_by_identity_key(
        &self,
        identity_key: &str,
    ) -> impl Future<Output = Result<Option<Lead>, StoreError>> + Send;

    /// Insert a new lead unless its identity key is already taken.
    fn insert(&self, lead: Lead) -> impl Future<Output = Result<InsertOutcome, StoreError>> + Send;

    /// Replace the lead with `lead.id`, provided its stored `merge_count`
    /// still equals `expected_merge_count`; otherwise `StoreError::Conflict`.
    fn update(
        &self,
        lead: &Lead,
        expected_merge_count: u32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Append-only sink for merge audit entries.
pub trait AuditSink {
    fn append(&self, entry: &MergeLogEntry) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Whether a record produced a new lead or was folded into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Created,
    Merged,
}

/// What happened to one record.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub outcome: ResolutionOutcome,
    pub identity_key: IdentityKey,
    pub lead: Lead,
    /// Present on merges
    pub merge_entry: Option<MergeLogEntry>,
}

/// Counts from resolving a batch.
#[derive(Debug, Default)]
pub struct ResolveSummary {
    pub created: usize,
    pub merged: usize,
    /// Index of the failed record and its error
    pub failures: Vec<(usize, ResolveError)>,
}

/// Resolves raw records against a lead store.
pub struct Resolver<S, A> {
    store: S,
    audit: A,
    defaults: KeyDefaults,
}

impl<S: LeadStore + Sync, A: AuditSink + Sync> Resolver<S, A> {
    pub fn new(store: S, audit: A, defaults: KeyDefaults) -> Self {
        Self {
            store,
            audit,
            defaults,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn defaults(&self) -> &KeyDefaults {
        &self.defaults
    }

    /// Resolve `record` at the current time.
    pub async fn resolve(&self, record: &RawBusinessRecord) -> Result<Resolution, ResolveError> {
        self.resolve_at(record, Utc::now()).await
    }

    /// Resolve `record`, stamping creations and merges with `now`.
    pub async fn resolve_at(
        &self,
        record: &RawBusinessRecord,
        now: DateTime<Utc>,
    ) -> Result<Resolution, ResolveError> {
        let identity_key = generate_key(record, &self.defaults);
        let domain = non_blank(record.website.as_deref())
            .and_then(|w| try_normalize(w).ok())
            .map(|d| d.into_string());

        let existing = self
            .store
            .get_by_identity_key(identity_key.as_str())
            .await
            .map_err(|e| store_error(e, &identity_key))?;

        let existing = match existing {
            Some(lead) => lead,
            None => {
                let mut lead =
                    Lead::from_record(identity_key.as_str(), record, domain.clone(), now);
                if lead.category.is_none() {
                    lead.category = self.defaults.category.clone();
                }

                match self
                    .store
                    .insert(lead.clone())
                    .await
                    .map_err(|e| store_error(e, &identity_key))?
                {
                    InsertOutcome::Inserted => {
                        tracing::debug!(
                            identity_key = %identity_key,
                            lead_id = %lead.id,
                            "Created lead"
                        );
                        return Ok(Resolution {
                            outcome: ResolutionOutcome::Created,
                            identity_key,
                            lead,
                            merge_entry: None,
                        });
                    }
                    InsertOutcome::AlreadyExists(winner) => {
                        tracing::debug!(
                            identity_key = %identity_key,
                            "Lost insert race, merging instead"
                        );
                        winner
                    }
                }
            }
        };

        self.merge(existing, record, identity_key, domain, now).await
    }

    async fn merge(
        &self,
        mut lead: Lead,
        record: &RawBusinessRecord,
        identity_key: IdentityKey,
        domain: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Resolution, ResolveError> {
        let reason = merge_reason(&lead, record);
        let expected = lead.merge_count;

        let filled = lead.fill_missing_from(record, domain.as_deref());
        lead.merge_count += 1;
        lead.last_merged_at = Some(now);

        self.store
            .update(&lead, expected)
            .await
            .map_err(|e| store_error(e, &identity_key))?;

        let entry = MergeLogEntry {
            lead_id: lead.id,
            incoming_record: record.clone(),
            merged_at: now,
            reason,
            filled_fields: filled.iter().map(|f| f.to_string()).collect(),
        };

        if let Err(source) = self.audit.append(&entry).await {
            tracing::warn!(
                lead_id = %lead.id,
                error = %source,
                "Merge stored but audit append failed"
            );
            return Err(ResolveError::AuditWriteFailed {
                lead: Box::new(lead),
                source,
            });
        }

        tracing::debug!(
            identity_key = %identity_key,
            lead_id = %lead.id,
            merge_count = lead.merge_count,
            reason = reason.as_str(),
            filled = ?filled,
            "Merged record into lead"
        );

        Ok(Resolution {
            outcome: ResolutionOutcome::Merged,
            identity_key,
            lead,
            merge_entry: Some(entry),
        })
    }

    /// Resolve, re-trying up to `max_attempts` times on concurrent conflicts.
    pub async fn resolve_with_retry(
        &self,
        record: &RawBusinessRecord,
        max_attempts: usize,
    ) -> Result<Resolution, ResolveError> {
        let mut attempt = 1;
        loop {
            match self.resolve(record).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(attempt, error = %e, "Retrying resolution");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Resolve records one after another, collecting failures instead of stopping.
    pub async fn resolve_all(&self, records: &[RawBusinessRecord]) -> ResolveSummary {
        let mut summary = ResolveSummary::default();

        for (index, record) in records.iter().enumerate() {
            match self.resolve(record).await {
                Ok(resolution) => match resolution.outcome {
                    ResolutionOutcome::Created => summary.created += 1,
                    ResolutionOutcome::Merged => summary.merged += 1,
                },
                Err(e) => {
                    tracing::warn!(index, error = %e, "Failed to resolve record");
                    summary.failures.push((index, e));
                }
            }
        }

        tracing::info!(
            created = summary.created,
            merged = summary.merged,
            failed = summary.failures.len(),
            "Resolved batch"
        );

        summary
    }
}

fn store_error(error: StoreError, identity_key: &IdentityKey) -> ResolveError {
    match error {
        StoreError::Unavailable(msg) => ResolveError::StoreUnavailable(msg),
        StoreError::Conflict(_) => ResolveError::ConcurrentConflict {
            identity_key: identity_key.to_string(),
        },
    }
}

/// Classify a merge: same business site when both sides carry a website that
/// `same_site` accepts, otherwise the key matched through name and address.
fn merge_reason(lead: &Lead, record: &RawBusinessRecord) -> MergeReason {
    match (
        non_blank(lead.website.as_deref()),
        non_blank(record.website.as_deref()),
    ) {
        (Some(a), Some(b)) if same_site(a, b) => MergeReason::SameDomain,
        _ => MergeReason::SameNameAndAddressFuzzyMatch,
    }
}

#[derive(Debug, Default)]
struct MemoryLeads {
    leads: HashMap<Uuid, Lead>,
    keys: HashMap<String, Uuid>,
}

/// In-process lead store with a unique identity-key index.
#[derive(Debug, Default)]
pub struct MemoryLeadStore {
    inner: Mutex<MemoryLeads>,
    offline: std::sync::atomic::AtomicBool,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage; every call fails with `StoreError::Unavailable` while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    /// Snapshot of all leads, oldest first.
    pub async fn leads(&self) -> Vec<Lead> {
        let inner = self.inner.lock().await;
        let mut leads: Vec<Lead> = inner.leads.values().cloned().collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        leads
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.leads.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl LeadStore for MemoryLeadStore {
    async fn get_by_identity_key(&self, identity_key: &str) -> Result<Option<Lead>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .keys
            .get(identity_key)
            .and_then(|id| inner.leads.get(id))
            .cloned())
    }

    async fn insert(&self, lead: Lead) -> Result<InsertOutcome, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner
            .keys
            .get(&lead.identity_key)
            .and_then(|id| inner.leads.get(id))
        {
            return Ok(InsertOutcome::AlreadyExists(existing.clone()));
        }

        inner.keys.insert(lead.identity_key.clone(), lead.id);
        inner.leads.insert(lead.id, lead);
        Ok(InsertOutcome::Inserted)
    }

    async fn update(&self, lead: &Lead, expected_merge_count: u32) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().await;

        let stored = inner
            .leads
            .get_mut(&lead.id)
            .ok_or_else(|| StoreError::Conflict(format!("lead {} not found", lead.id)))?;

        if stored.merge_count != expected_merge_count {
            return Err(StoreError::Conflict(format!(
                "lead {} at merge_count {}, expected {}",
                lead.id, stored.merge_count, expected_merge_count
            )));
        }

        *stored = lead.clone();
        Ok(())
    }
}

/// In-process append-only audit log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<MergeLogEntry>>,
    offline: std::sync::atomic::AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<MergeLogEntry> {
        self.entries.lock().await.clone()
    }
}

impl AuditSink for MemoryAuditLog {
    async fn append(&self, entry: &MergeLogEntry) -> Result<(), StoreError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit log offline".to_string()));
        }
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn resolver() -> Resolver<MemoryLeadStore, MemoryAuditLog> {
        Resolver::new(
            MemoryLeadStore::new(),
            MemoryAuditLog::new(),
            KeyDefaults::default(),
        )
    }

    #[tokio::test]
    async fn test_created_then_merged() {
        let resolver = resolver();
        let record = RawBusinessRecord::named("Acme Plumbing").with_website("https://acme.com");

        let first = resolver.resolve_at(&record, t0()).await.unwrap();
        assert_eq!(first.outcome, ResolutionOutcome::Created);
        assert_eq!(first.lead.merge_count, 0);
        assert_eq!(first.lead.canonical_domain.as_deref(), Some("acme.com"));
        assert!(first.merge_entry.is_none());

        let later = t0() + Duration::hours(3);
        let second = resolver.resolve_at(&record, later).await.unwrap();
        assert_eq!(second.outcome, ResolutionOutcome::Merged);
        assert_eq!(second.lead.id, first.lead.id);
        assert_eq!(second.lead.merge_count, 1);
        assert_eq!(second.lead.last_merged_at, Some(later));
        assert_eq!(second.lead.created_at, t0());

        let third = resolver.resolve_at(&record, later).await.unwrap();
        assert_eq!(third.lead.merge_count, 2);

        assert_eq!(resolver.store().len().await, 1);
        let log = resolver.audit().entries().await;
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.lead_id == first.lead.id));
        assert!(log.iter().all(|e| e.reason == MergeReason::SameDomain));
    }

    #[tokio::test]
    async fn test_merge_fills_without_downgrading() {
        let resolver = resolver();
        let a = RawBusinessRecord {
            name: Some("Acme Plumbing".into()),
            address: Some("1 Main St, Minneapolis, MN".into()),
            phone: None,
            category: Some("Plumber".into()),
            ..Default::default()
        };
        let b = RawBusinessRecord {
            name: Some("Acme Plumbing".into()),
            address: Some("1 Main St, Minneapolis, MN".into()),
            phone: Some("612-555-0100".into()),
            category: None,
            description: Some("24/7 emergency plumbing".into()),
            ..Default::default()
        };
        let c = RawBusinessRecord {
            name: Some("Acme Plumbing".into()),
            address: Some("1 Main St, Minneapolis, MN".into()),
            phone: Some("".into()),
            category: Some("Heating".into()),
            ..Default::default()
        };

        resolver.resolve_at(&a, t0()).await.unwrap();
        let merged = resolver.resolve_at(&b, t0()).await.unwrap();
        assert_eq!(
            merged.merge_entry.as_ref().unwrap().filled_fields,
            vec!["phone".to_string(), "description".to_string()]
        );
        assert_eq!(
            merged.merge_entry.unwrap().reason,
            MergeReason::SameNameAndAddressFuzzyMatch
        );

        let merged = resolver.resolve_at(&c, t0()).await.unwrap();
        let lead = merged.lead;
        assert_eq!(lead.phone.as_deref(), Some("612-555-0100"));
        assert_eq!(lead.category.as_deref(), Some("Plumber"));
        assert_eq!(lead.description.as_deref(), Some("24/7 emergency plumbing"));
        assert_eq!(lead.merge_count, 2);
    }

    #[tokio::test]
    async fn test_multi_tenant_merge_not_audited_as_same_domain() {
        let resolver = resolver();
        let a = RawBusinessRecord::named("Acme").with_website("facebook.com/acme");
        let b = RawBusinessRecord::named("Acme").with_website("facebook.com/acme-bakery");

        resolver.resolve_at(&a, t0()).await.unwrap();
        let merged = resolver.resolve_at(&b, t0()).await.unwrap();

        // Same canonical domain and name produce the same key.
        assert_eq!(merged.outcome, ResolutionOutcome::Merged);
        assert_eq!(
            merged.merge_entry.unwrap().reason,
            MergeReason::SameNameAndAddressFuzzyMatch
        );

        let c = RawBusinessRecord::named("Acme").with_website("https://www.facebook.com/acme/");
        let merged = resolver.resolve_at(&c, t0()).await.unwrap();
        assert_eq!(merged.merge_entry.unwrap().reason, MergeReason::SameDomain);
    }

    #[tokio::test]
    async fn test_distinct_names_on_shared_platform_stay_apart() {
        let resolver = resolver();
        for (name, site) in [
            ("Company A", "facebook.com/company-a"),
            ("Company B", "facebook.com/company-b"),
        ] {
            let outcome = resolver
                .resolve_at(&RawBusinessRecord::named(name).with_website(site), t0())
                .await
                .unwrap()
                .outcome;
            assert_eq!(outcome, ResolutionOutcome::Created);
        }
        assert_eq!(resolver.store().len().await, 2);
    }

    #[tokio::test]
    async fn test_default_category_applied_on_create() {
        let defaults = KeyDefaults {
            category: Some("uncategorized".into()),
            ..Default::default()
        };
        let resolver = Resolver::new(MemoryLeadStore::new(), MemoryAuditLog::new(), defaults);
        let created = resolver
            .resolve_at(&RawBusinessRecord::named("Acme"), t0())
            .await
            .unwrap();
        assert_eq!(created.lead.category.as_deref(), Some("uncategorized"));
    }

    #[tokio::test]
    async fn test_store_unavailable_writes_nothing() {
        let resolver = resolver();
        resolver.store().set_offline(true);

        let err = resolver
            .resolve_at(&RawBusinessRecord::named("Acme"), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable(_)));
        assert!(!err.is_retryable());

        resolver.store().set_offline(false);
        assert!(resolver.store().is_empty().await);
        assert!(resolver.audit().entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_audit_failure_reports_partial_failure() {
        let resolver = resolver();
        let record = RawBusinessRecord::named("Acme").with_address("1 Main St");
        resolver.resolve_at(&record, t0()).await.unwrap();

        resolver.audit().set_offline(true);
        let err = resolver.resolve_at(&record, t0()).await.unwrap_err();
        match err {
            ResolveError::AuditWriteFailed { lead, .. } => assert_eq!(lead.merge_count, 1),
            other => panic!("unexpected error: {other:?}"),
        }

        let stored = resolver.store().leads().await;
        assert_eq!(stored[0].merge_count, 1);
    }

    /// Reads and inserts go to memory; every update fails with `update_error`.
    struct FailingUpdates {
        inner: MemoryLeadStore,
        update_error: StoreError,
        updates: std::sync::atomic::AtomicUsize,
    }

    impl FailingUpdates {
        fn new(update_error: StoreError) -> Self {
            Self {
                inner: MemoryLeadStore::new(),
                update_error,
                updates: Default::default(),
            }
        }

        fn update_calls(&self) -> usize {
            self.updates.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl LeadStore for FailingUpdates {
        async fn get_by_identity_key(
            &self,
            identity_key: &str,
        ) -> Result<Option<Lead>, StoreError> {
            self.inner.get_by_identity_key(identity_key).await
        }

        async fn insert(&self, lead: Lead) -> Result<InsertOutcome, StoreError> {
            self.inner.insert(lead).await
        }

        async fn update(&self, _lead: &Lead, _expected_merge_count: u32) -> Result<(), StoreError> {
            self.updates.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(self.update_error.clone())
        }
    }

    #[tokio::test]
    async fn test_store_unavailable_on_merge_writes_nothing() {
        let resolver = Resolver::new(
            FailingUpdates::new(StoreError::Unavailable("primary down".into())),
            MemoryAuditLog::new(),
            KeyDefaults::default(),
        );
        let record = RawBusinessRecord::named("Acme").with_website("acme.com");
        resolver.resolve_at(&record, t0()).await.unwrap();

        let err = resolver.resolve_at(&record, t0()).await.unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable(_)));

        let stored = resolver.store().inner.leads().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].merge_count, 0);
        assert_eq!(stored[0].last_merged_at, None);
        assert!(resolver.audit().entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let resolver = Resolver::new(
            FailingUpdates::new(StoreError::Conflict("always stale".into())),
            MemoryAuditLog::new(),
            KeyDefaults::default(),
        );
        let record = RawBusinessRecord::named("Acme").with_website("acme.com");
        resolver.resolve_at(&record, t0()).await.unwrap();

        let err = resolver.resolve_with_retry(&record, 3).await.unwrap_err();
        assert!(matches!(err, ResolveError::ConcurrentConflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(resolver.store().update_calls(), 3);
        assert!(resolver.audit().entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_update_is_a_conflict() {
        let store = MemoryLeadStore::new();
        let lead = Lead::from_record("k", &RawBusinessRecord::named("Acme"), None, t0());
        store.insert(lead.clone()).await.unwrap();

        let mut newer = lead.clone();
        newer.merge_count = 1;
        store.update(&newer, 0).await.unwrap();

        let mut stale = lead;
        stale.merge_count = 1;
        assert!(matches!(
            store.update(&stale, 0).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolution_creates_one_lead() {
        let resolver = Arc::new(resolver());
        let record = RawBusinessRecord::named("Acme").with_website("acme.com");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                let record = record.clone();
                tokio::spawn(async move { resolver.resolve_with_retry(&record, 16).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            let resolution = handle.await.unwrap().unwrap();
            if resolution.outcome == ResolutionOutcome::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        let leads = resolver.store().leads().await;
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].merge_count, 7);
        assert_eq!(resolver.audit().entries().await.len(), 7);
    }

    #[tokio::test]
    async fn test_resolve_all_summary() {
        let resolver = resolver();
        let records = vec![
            RawBusinessRecord::named("Acme").with_website("acme.com"),
            RawBusinessRecord::named("Acme").with_website("www.acme.com"),
            RawBusinessRecord::named("Globex").with_address("2 Side St"),
            RawBusinessRecord::default(),
            RawBusinessRecord::default(),
        ];

        let summary = resolver.resolve_all(&records).await;
        assert_eq!(summary.created, 3);
        assert_eq!(summary.merged, 2);
        assert!(summary.failures.is_empty());
    }
}
