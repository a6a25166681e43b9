//! Monthly document quota
//!
//! Each owner may create a plan-defined number of documents per calendar
//! month. The reservation is a single compare-and-increment on the
//! (`owner`, `month`) counter, so concurrent creations can never both take
//! the last slot.

use crate::error::StoreError;
use crate::types::{MonthStart, OwnerId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Plan-derived monthly document limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DocumentLimit {
    /// At most this many documents per month
    Limited(u32),
    /// No cap; encoded as `-1`
    Unlimited,
}

impl DocumentLimit {
    /// Decode the wire value; only `-1` means unlimited
    ///
    /// # Errors
    /// Any other negative value, or a count beyond `u32::MAX`
    pub fn from_raw(raw: i64) -> Result<Self, String> {
        match raw {
            -1 => Ok(Self::Unlimited),
            n if n < 0 => Err(format!("document limit must be -1 or non-negative, got {n}")),
            n => u32::try_from(n)
                .map(Self::Limited)
                .map_err(|_| format!("document limit too large: {n}")),
        }
    }

    /// Wire value; `-1` for unlimited
    #[must_use]
    pub fn as_raw(&self) -> i64 {
        match self {
            Self::Limited(n) => i64::from(*n),
            Self::Unlimited => -1,
        }
    }

    /// Check if one more document fits on top of `current`
    #[inline]
    #[must_use]
    pub fn admits(&self, current: u32) -> bool {
        match self {
            Self::Limited(n) => current < *n,
            Self::Unlimited => true,
        }
    }

    /// Slots left; `-1` for unlimited
    #[must_use]
    pub fn remaining(&self, current: u32) -> i64 {
        match self {
            Self::Limited(n) => i64::from(n.saturating_sub(current)),
            Self::Unlimited => -1,
        }
    }
}

impl TryFrom<i64> for DocumentLimit {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

impl From<DocumentLimit> for i64 {
    fn from(limit: DocumentLimit) -> Self {
        limit.as_raw()
    }
}

/// Subscription plan as far as quota is concerned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Plan {
    pub name: String,
    pub document_limit: DocumentLimit,
}

impl Plan {
    #[must_use]
    pub fn new(name: impl Into<String>, document_limit: DocumentLimit) -> Self {
        Self {
            name: name.into(),
            document_limit,
        }
    }
}

/// Outcome of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Count observed before the attempt
    pub current: u32,
    pub limit: DocumentLimit,
}

/// Answer to the document-limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStatus {
    pub can_create: bool,
    pub current: u32,
    pub limit: i64,
    pub plan_name: String,
    pub remaining: i64,
}

impl LimitStatus {
    #[must_use]
    pub fn new(plan: &Plan, current: u32) -> Self {
        Self {
            can_create: plan.document_limit.admits(current),
            current,
            limit: plan.document_limit.as_raw(),
            plan_name: plan.name.clone(),
            remaining: plan.document_limit.remaining(current),
        }
    }
}

/// Monthly usage counters
#[async_trait]
pub trait UsageStore: Send + Sync + std::fmt::Debug {
    /// Documents created by `owner` in `month`; zero if no row exists
    async fn current(&self, owner: &OwnerId, month: MonthStart) -> Result<u32, StoreError>;

    /// Increment only if `limit` admits the current count, atomically
    async fn try_increment(
        &self,
        owner: &OwnerId,
        month: MonthStart,
        limit: DocumentLimit,
    ) -> Result<QuotaDecision, StoreError>;
}

/// In-process usage counters
///
/// The compare-and-increment runs while holding the map entry, which is
/// the shard write lock for that key.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    counts: DashMap<(OwnerId, MonthStart), u32>,
}

impl InMemoryUsageStore {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a counter; used to import existing usage
    pub fn seed(&self, owner: OwnerId, month: MonthStart, count: u32) {
        self.counts.insert((owner, month), count);
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn current(&self, owner: &OwnerId, month: MonthStart) -> Result<u32, StoreError> {
        Ok(self
            .counts
            .get(&(owner.clone(), month))
            .map_or(0, |c| *c.value()))
    }

    async fn try_increment(
        &self,
        owner: &OwnerId,
        month: MonthStart,
        limit: DocumentLimit,
    ) -> Result<QuotaDecision, StoreError> {
        let decision = match self.counts.entry((owner.clone(), month)) {
            Entry::Occupied(mut row) => {
                let current = *row.get();
                let allowed = limit.admits(current);
                if allowed {
                    *row.get_mut() = current.saturating_add(1);
                }
                QuotaDecision {
                    allowed,
                    current,
                    limit,
                }
            }
            Entry::Vacant(slot) => {
                let allowed = limit.admits(0);
                if allowed {
                    slot.insert(1);
                }
                QuotaDecision {
                    allowed,
                    current: 0,
                    limit,
                }
            }
        };
        Ok(decision)
    }
}

/// Resolves an owner's plan
pub trait PlanDirectory: Send + Sync + std::fmt::Debug {
    fn plan_for(&self, owner: &OwnerId) -> Plan;
}

/// Quota configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Plan used for owners without an assignment
    pub default_plan: String,
    /// Plans by name
    pub plans: Vec<Plan>,
    /// Owner id to plan name
    pub assignments: HashMap<String, String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_plan: "free".to_string(),
            plans: vec![
                Plan::new("free", DocumentLimit::Limited(5)),
                Plan::new("pro", DocumentLimit::Limited(100)),
                Plan::new("enterprise", DocumentLimit::Unlimited),
            ],
            assignments: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// Check that the default plan and every assignment name a defined plan
    ///
    /// # Errors
    /// Returns a description of the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if self.plans.is_empty() {
            return Err("quota.plans is empty".into());
        }
        let known = |name: &str| self.plans.iter().any(|p| p.name == name);
        if !known(&self.default_plan) {
            return Err(format!("default plan '{}' is not defined", self.default_plan));
        }
        for (owner, plan) in &self.assignments {
            if !known(plan) {
                return Err(format!("owner '{owner}' assigned to undefined plan '{plan}'"));
            }
        }
        Ok(())
    }
}

/// Plan directory backed by configuration
#[derive(Debug, Clone)]
pub struct StaticPlanDirectory {
    plans: HashMap<String, Plan>,
    assignments: HashMap<OwnerId, String>,
    default_plan: Plan,
}

impl StaticPlanDirectory {
    /// Build from configuration
    ///
    /// An undefined default plan falls back to zero documents per month.
    #[must_use]
    pub fn from_config(config: &QuotaConfig) -> Self {
        let plans: HashMap<String, Plan> = config
            .plans
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        let default_plan = plans
            .get(&config.default_plan)
            .cloned()
            .unwrap_or_else(|| Plan::new(config.default_plan.clone(), DocumentLimit::Limited(0)));
        let assignments = config
            .assignments
            .iter()
            .map(|(owner, plan)| (OwnerId::new(owner.clone()), plan.clone()))
            .collect();

        Self {
            plans,
            assignments,
            default_plan,
        }
    }
}

impl PlanDirectory for StaticPlanDirectory {
    fn plan_for(&self, owner: &OwnerId) -> Plan {
        self.assignments
            .get(owner)
            .and_then(|name| self.plans.get(name))
            .cloned()
            .unwrap_or_else(|| self.default_plan.clone())
    }
}

/// Quota gate for document creation
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    usage: Arc<dyn UsageStore>,
    plans: Arc<dyn PlanDirectory>,
}

impl QuotaLedger {
    #[must_use]
    pub fn new(usage: Arc<dyn UsageStore>, plans: Arc<dyn PlanDirectory>) -> Self {
        Self { usage, plans }
    }

    /// Reserve one document slot for `owner` this month
    ///
    /// Returns `allowed = false` without mutating when the limit is reached.
    pub async fn check_and_reserve(
        &self,
        owner: &OwnerId,
        limit: DocumentLimit,
    ) -> Result<QuotaDecision, StoreError> {
        self.check_and_reserve_in(owner, limit, MonthStart::current())
            .await
    }

    /// [`check_and_reserve`](Self::check_and_reserve) for an explicit month
    pub async fn check_and_reserve_in(
        &self,
        owner: &OwnerId,
        limit: DocumentLimit,
        month: MonthStart,
    ) -> Result<QuotaDecision, StoreError> {
        let decision = self.usage.try_increment(owner, month, limit).await?;
        if decision.allowed {
            tracing::debug!(owner_id = %owner, %month, current = decision.current, "quota slot reserved");
        } else {
            tracing::info!(
                owner_id = %owner,
                %month,
                current = decision.current,
                limit = limit.as_raw(),
                "document quota reached"
            );
        }
        Ok(decision)
    }

    /// Reserve against the owner's plan
    pub async fn reserve(&self, owner: &OwnerId) -> Result<(QuotaDecision, Plan), StoreError> {
        let plan = self.plans.plan_for(owner);
        let decision = self.check_and_reserve(owner, plan.document_limit).await?;
        Ok((decision, plan))
    }

    /// Read-only limit check for the owner's plan
    pub async fn check(&self, owner: &OwnerId) -> Result<LimitStatus, StoreError> {
        let plan = self.plans.plan_for(owner);
        let current = self.usage.current(owner, MonthStart::current()).await?;
        Ok(LimitStatus::new(&plan, current))
    }

    /// Documents created by `owner` in `month`
    pub async fn usage(&self, owner: &OwnerId, month: MonthStart) -> Result<u32, StoreError> {
        self.usage.current(owner, month).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(store: Arc<InMemoryUsageStore>) -> QuotaLedger {
        let directory = StaticPlanDirectory::from_config(&QuotaConfig::default());
        QuotaLedger::new(store, Arc::new(directory))
    }

    #[test]
    fn limit_wire_encoding() {
        assert_eq!(DocumentLimit::from_raw(-1), Ok(DocumentLimit::Unlimited));
        assert_eq!(DocumentLimit::from_raw(5), Ok(DocumentLimit::Limited(5)));
        assert_eq!(DocumentLimit::Unlimited.as_raw(), -1);
        assert_eq!(DocumentLimit::Limited(5).remaining(7), 0);
        assert_eq!(
            serde_json::from_str::<DocumentLimit>("-1").unwrap(),
            DocumentLimit::Unlimited
        );
    }

    #[test]
    fn negative_limits_other_than_unlimited_are_rejected() {
        assert!(DocumentLimit::from_raw(-5).is_err());
        assert!(DocumentLimit::from_raw(i64::from(u32::MAX) + 1).is_err());
        assert!(serde_json::from_str::<DocumentLimit>("-5").is_err());
        assert!(serde_json::from_str::<Plan>(r#"{"name":"typo","document_limit":-5}"#).is_err());
    }

    #[tokio::test]
    async fn denies_at_limit_without_mutation() {
        let store = Arc::new(InMemoryUsageStore::new());
        let owner = OwnerId::new("acme");
        let month = MonthStart::current();
        store.seed(owner.clone(), month, 5);
        let ledger = ledger_with(Arc::clone(&store));

        let decision = ledger
            .check_and_reserve(&owner, DocumentLimit::Limited(5))
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.current, 5);
        assert_eq!(ledger.usage(&owner, month).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn unlimited_always_allows() {
        let store = Arc::new(InMemoryUsageStore::new());
        let owner = OwnerId::new("big-co");
        store.seed(owner.clone(), MonthStart::current(), 1_000_000);
        let ledger = ledger_with(store);

        let decision = ledger
            .check_and_reserve(&owner, DocumentLimit::Unlimited)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn zero_limit_creates_no_row() {
        let store = Arc::new(InMemoryUsageStore::new());
        let owner = OwnerId::new("frozen");
        let ledger = ledger_with(Arc::clone(&store));

        let decision = ledger
            .check_and_reserve(&owner, DocumentLimit::Limited(0))
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(store.counts.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_take_exactly_one_slot() {
        let store = Arc::new(InMemoryUsageStore::new());
        let ledger = Arc::new(ledger_with(store));
        let owner = OwnerId::new("acme");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = Arc::clone(&ledger);
            let owner = owner.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .check_and_reserve(&owner, DocumentLimit::Limited(1))
                    .await
                    .unwrap()
                    .allowed
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(
            ledger.usage(&owner, MonthStart::current()).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn check_reports_plan() {
        let store = Arc::new(InMemoryUsageStore::new());
        let owner = OwnerId::new("acme");
        store.seed(owner.clone(), MonthStart::current(), 2);

        let mut config = QuotaConfig::default();
        config.assignments.insert("acme".into(), "pro".into());
        let ledger = QuotaLedger::new(store, Arc::new(StaticPlanDirectory::from_config(&config)));

        let status = ledger.check(&owner).await.unwrap();
        assert_eq!(
            status,
            LimitStatus {
                can_create: true,
                current: 2,
                limit: 100,
                plan_name: "pro".into(),
                remaining: 98,
            }
        );
    }

    #[test]
    fn config_validation() {
        assert!(QuotaConfig::default().validate().is_ok());

        let mut bad = QuotaConfig::default();
        bad.default_plan = "gold".into();
        assert!(bad.validate().is_err());

        let mut bad = QuotaConfig::default();
        bad.assignments.insert("acme".into(), "platinum".into());
        assert!(bad.validate().is_err());
    }
}
