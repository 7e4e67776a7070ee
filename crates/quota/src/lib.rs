//! Per-caller, per-tool daily quotas by plan tier.
//!
//! Counters live in a `QuotaStore` that must increment atomically per
//! (caller, tool, day) bucket; the gate never does read-modify-write itself.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use leadmatch_model::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, PartialEq)]
pub enum QuotaError {
    /// Daily ceiling reached; retry after the hint.
    #[error("Quota exceeded, retry after {} seconds", .retry_after.as_secs())]
    Exceeded { retry_after: Duration },

    #[error("Quota store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Subscription tier of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Unauthenticated or free accounts
    #[default]
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl From<&str> for PlanTier {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "basic" | "starter" => Self::Basic,
            "pro" | "professional" => Self::Pro,
            "enterprise" | "agency" | "unlimited" => Self::Enterprise,
            _ => Self::Free,
        }
    }
}

/// Daily ceilings per tier; `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    pub free: Option<u32>,
    pub basic: Option<u32>,
    pub pro: Option<u32>,
    pub enterprise: Option<u32>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            free: Some(2),
            basic: Some(10),
            pro: Some(25),
            enterprise: None,
        }
    }
}

impl QuotaPolicy {
    pub fn ceiling(&self, tier: PlanTier) -> Option<u32> {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Basic => self.basic,
            PlanTier::Pro => self.pro,
            PlanTier::Enterprise => self.enterprise,
        }
    }
}

/// One counter: a caller's use of a tool on a UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaBucket {
    pub caller_id: String,
    pub tool: String,
    pub day: NaiveDate,
}

/// Counter storage.
pub trait QuotaStore {
    /// Atomically increment the bucket if it is below `ceiling`.
    ///
    /// Returns the new count, or `None` (without incrementing) when the bucket is full.
    fn try_increment(
        &self,
        bucket: &QuotaBucket,
        ceiling: u32,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send;

    fn usage(&self, bucket: &QuotaBucket) -> impl Future<Output = Result<u32, StoreError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// `remaining` is `None` for unlimited tiers
    Allowed { remaining: Option<u32> },
    Denied { retry_after: Duration },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Turn a denial into `QuotaError::Exceeded` for `?` at call sites.
    pub fn into_result(self) -> Result<Option<u32>, QuotaError> {
        match self {
            Self::Allowed { remaining } => Ok(remaining),
            Self::Denied { retry_after } => Err(QuotaError::Exceeded { retry_after }),
        }
    }
}

/// Time left until the next UTC midnight, when all buckets reset.
pub fn until_next_day(now: DateTime<Utc>) -> Duration {
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    match next_midnight {
        Some(midnight) => (midnight - now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::ZERO,
    }
}

/// Guards tool entry points with per-tier daily ceilings.
pub struct QuotaGate<S> {
    store: S,
    policy: QuotaPolicy,
}

impl<S: QuotaStore + Sync> QuotaGate<S> {
    pub fn new(store: S, policy: QuotaPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn check_and_consume(
        &self,
        caller_id: &str,
        tool: &str,
        tier: PlanTier,
    ) -> Result<QuotaDecision, QuotaError> {
        self.check_and_consume_at(caller_id, tool, tier, Utc::now())
            .await
    }

    /// Consume one call from the caller's bucket for `now`'s UTC day.
    pub async fn check_and_consume_at(
        &self,
        caller_id: &str,
        tool: &str,
        tier: PlanTier,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, QuotaError> {
        let Some(ceiling) = self.policy.ceiling(tier) else {
            return Ok(QuotaDecision::Allowed { remaining: None });
        };

        let bucket = QuotaBucket {
            caller_id: caller_id.to_string(),
            tool: tool.to_string(),
            day: now.date_naive(),
        };

        let count = self
            .store
            .try_increment(&bucket, ceiling)
            .await
            .map_err(|e| QuotaError::StoreUnavailable(e.to_string()))?;

        match count {
            Some(used) => {
                tracing::debug!(caller_id, tool, used, ceiling, "Quota consumed");
                Ok(QuotaDecision::Allowed {
                    remaining: Some(ceiling.saturating_sub(used)),
                })
            }
            None => {
                let retry_after = until_next_day(now);
                tracing::info!(
                    caller_id,
                    tool,
                    ?tier,
                    retry_after_secs = retry_after.as_secs(),
                    "Quota exceeded"
                );
                Ok(QuotaDecision::Denied { retry_after })
            }
        }
    }
}

/// In-process quota store; the mutex makes each increment atomic.
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    counters: Mutex<HashMap<QuotaBucket, u32>>,
    offline: std::sync::atomic::AtomicBool,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("quota store offline".to_string()));
        }
        Ok(())
    }

    /// Drop counters for days before `day`.
    pub async fn prune_before(&self, day: NaiveDate) -> usize {
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|bucket, _| bucket.day >= day);
        before - counters.len()
    }
}

impl QuotaStore for MemoryQuotaStore {
    async fn try_increment(
        &self,
        bucket: &QuotaBucket,
        ceiling: u32,
    ) -> Result<Option<u32>, StoreError> {
        self.check_online()?;
        let mut counters = self.counters.lock().await;
        let count = counters.entry(bucket.clone()).or_insert(0);
        if *count >= ceiling {
            return Ok(None);
        }
        *count += 1;
        Ok(Some(*count))
    }

    async fn usage(&self, bucket: &QuotaBucket) -> Result<u32, StoreError> {
        self.check_online()?;
        Ok(self
            .counters
            .lock()
            .await
            .get(bucket)
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn gate() -> QuotaGate<MemoryQuotaStore> {
        QuotaGate::new(MemoryQuotaStore::new(), QuotaPolicy::default())
    }

    #[tokio::test]
    async fn test_ceiling_plus_one_is_denied() {
        let gate = gate();
        let now = at("2026-03-01T10:00:00Z");

        for (tier, ceiling) in [(PlanTier::Free, 2), (PlanTier::Basic, 10), (PlanTier::Pro, 25)] {
            let caller = format!("{:?}-user", tier);
            for i in 0..ceiling {
                let decision = gate.check_and_consume_at(&caller, "scan", tier, now).await.unwrap();
                assert_eq!(
                    decision,
                    QuotaDecision::Allowed {
                        remaining: Some(ceiling - i - 1)
                    }
                );
            }
            let decision = gate.check_and_consume_at(&caller, "scan", tier, now).await.unwrap();
            assert!(!decision.is_allowed(), "{:?} allowed past ceiling", tier);
        }
    }

    #[tokio::test]
    async fn test_new_day_resets() {
        let gate = gate();
        let day1 = at("2026-03-01T23:59:00Z");
        let day2 = at("2026-03-02T00:00:01Z");

        gate.check_and_consume_at("u", "scan", PlanTier::Free, day1).await.unwrap();
        gate.check_and_consume_at("u", "scan", PlanTier::Free, day1).await.unwrap();
        let denied = gate.check_and_consume_at("u", "scan", PlanTier::Free, day1).await.unwrap();
        assert_eq!(
            denied,
            QuotaDecision::Denied {
                retry_after: Duration::from_secs(60)
            }
        );

        let decision = gate.check_and_consume_at("u", "scan", PlanTier::Free, day2).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_denial_does_not_consume() {
        let gate = gate();
        let now = at("2026-03-01T10:00:00Z");
        for _ in 0..5 {
            gate.check_and_consume_at("u", "scan", PlanTier::Free, now).await.unwrap();
        }
        let bucket = QuotaBucket {
            caller_id: "u".into(),
            tool: "scan".into(),
            day: now.date_naive(),
        };
        assert_eq!(gate.store().usage(&bucket).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_buckets_are_per_caller_and_tool() {
        let gate = gate();
        let now = at("2026-03-01T10:00:00Z");
        for _ in 0..2 {
            gate.check_and_consume_at("a", "scan", PlanTier::Free, now).await.unwrap();
        }
        let cases = [("a", "export", true), ("b", "scan", true), ("a", "scan", false)];
        for (caller, tool, expected) in cases {
            let decision = gate
                .check_and_consume_at(caller, tool, PlanTier::Free, now)
                .await
                .unwrap();
            assert_eq!(decision.is_allowed(), expected, "{caller}/{tool}");
        }
    }

    #[tokio::test]
    async fn test_unlimited_tier() {
        let gate = gate();
        let now = at("2026-03-01T10:00:00Z");
        for _ in 0..100 {
            let decision = gate
                .check_and_consume_at("big", "scan", PlanTier::Enterprise, now)
                .await
                .unwrap();
            assert_eq!(decision, QuotaDecision::Allowed { remaining: None });
        }
    }

    #[tokio::test]
    async fn test_into_result() {
        let denied = QuotaDecision::Denied {
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(
            denied.into_result(),
            Err(QuotaError::Exceeded {
                retry_after: Duration::from_secs(30)
            })
        );
        assert_eq!(QuotaDecision::Allowed { remaining: Some(1) }.into_result(), Ok(Some(1)));
    }

    #[tokio::test]
    async fn test_store_unavailable() {
        let gate = gate();
        gate.store().set_offline(true);
        let err = gate
            .check_and_consume_at("u", "scan", PlanTier::Free, at("2026-03-01T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::StoreUnavailable(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_respect_ceiling() {
        let gate = Arc::new(gate());
        let now = at("2026-03-01T10:00:00Z");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.check_and_consume_at("u", "scan", PlanTier::Basic, now)
                        .await
                        .unwrap()
                        .is_allowed()
                })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn test_prune_before() {
        let gate = gate();
        for ts in ["2026-03-01T10:00:00Z", "2026-03-02T10:00:00Z"] {
            gate.check_and_consume_at("u", "scan", PlanTier::Free, at(ts))
                .await
                .unwrap();
        }
        let removed = gate
            .store()
            .prune_before(at("2026-03-02T00:00:00Z").date_naive())
            .await;
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_tier_and_policy_parsing() {
        assert_eq!(PlanTier::from("anonymous"), PlanTier::Free);
        assert_eq!(PlanTier::from("Pro"), PlanTier::Pro);
        assert_eq!(PlanTier::from("agency"), PlanTier::Enterprise);

        let policy: QuotaPolicy = serde_json::from_str(r#"{"free": 5}"#).unwrap();
        assert_eq!(policy.ceiling(PlanTier::Free), Some(5));
        assert_eq!(policy.ceiling(PlanTier::Pro), Some(25));
        assert_eq!(policy.ceiling(PlanTier::Enterprise), None);
    }
}
