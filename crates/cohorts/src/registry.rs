//! Cohort registry — CRUD over cohort definitions plus the registry-level
//! refresh that applies membership diffs and records run history.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use convolens_core::config::RefreshConfig;
use convolens_core::{ConvoError, ConvoResult};

use crate::criteria::CriteriaNode;
use crate::evaluator::CriteriaEvaluator;
use crate::refresher::CohortRefresher;
use crate::stores::{MembershipStore, MetricFetcher};
use crate::types::{
    Cohort, CohortType, CreateCohort, MembershipDiff, PreviewResult, RefreshOutcome,
    RefreshRecord,
};

pub struct CohortRegistry {
    cohorts: DashMap<Uuid, Cohort>,
    history: DashMap<Uuid, Vec<RefreshRecord>>,
    /// Per-cohort lock serializing the read-evaluate-apply section of a
    /// refresh; two concurrent refreshes of one cohort must not apply
    /// stale diffs. Different cohorts refresh independently.
    refresh_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    fetcher: Arc<dyn MetricFetcher>,
    membership: Arc<dyn MembershipStore>,
    refresher: CohortRefresher,
}

impl CohortRegistry {
    pub fn new(
        fetcher: Arc<dyn MetricFetcher>,
        membership: Arc<dyn MembershipStore>,
        evaluator: CriteriaEvaluator,
        refresh_config: RefreshConfig,
    ) -> Self {
        let refresher = CohortRefresher::new(fetcher.clone(), evaluator, refresh_config);
        Self {
            cohorts: DashMap::new(),
            history: DashMap::new(),
            refresh_locks: DashMap::new(),
            fetcher,
            membership,
            refresher,
        }
    }

    /// Create a cohort, enforcing the type/criteria pairing: criteria-driven
    /// types require a (valid) tree, static cohorts must not carry one.
    pub fn create(&self, req: CreateCohort) -> ConvoResult<Cohort> {
        match (&req.criteria, req.cohort_type.is_criteria_driven()) {
            (None, true) => {
                return Err(ConvoError::InvalidCohortType(format!(
                    "{} cohort requires criteria",
                    req.cohort_type.as_str()
                )));
            }
            (Some(_), false) => {
                return Err(ConvoError::InvalidCohortType(
                    "static cohort must not carry criteria".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(criteria) = &req.criteria {
            criteria.validate()?;
        }

        let now = Utc::now();
        let cohort = Cohort {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            cohort_type: req.cohort_type,
            criteria: req.criteria,
            member_count: 0,
            created_at: now,
            updated_at: now,
            tags: req.tags,
        };

        info!(
            cohort_id = %cohort.id,
            name = %cohort.name,
            cohort_type = cohort.cohort_type.as_str(),
            "cohort created"
        );
        self.cohorts.insert(cohort.id, cohort.clone());
        Ok(cohort)
    }

    pub fn get(&self, id: Uuid) -> Option<Cohort> {
        self.cohorts.get(&id).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<Cohort> {
        self.cohorts.iter().map(|e| e.value().clone()).collect()
    }

    /// Replace a criteria-driven cohort's tree with a validated one.
    pub fn update_criteria(&self, id: Uuid, criteria: CriteriaNode) -> ConvoResult<Cohort> {
        criteria.validate()?;
        let mut entry = self
            .cohorts
            .get_mut(&id)
            .ok_or(ConvoError::CohortNotFound(id))?;
        if !entry.cohort_type.is_criteria_driven() {
            return Err(ConvoError::InvalidCohortType(
                "static cohort has no criteria to update".to_string(),
            ));
        }
        entry.criteria = Some(criteria);
        entry.updated_at = Utc::now();
        Ok(entry.value().clone())
    }

    /// Remove a cohort along with its membership rows, history, and lock.
    pub async fn remove(&self, id: Uuid) -> ConvoResult<()> {
        self.cohorts
            .remove(&id)
            .ok_or(ConvoError::CohortNotFound(id))?;

        let members = self.membership.members(id).await?;
        if !members.is_empty() {
            let diff = MembershipDiff {
                added: HashSet::new(),
                removed: members,
            };
            self.membership.apply_diff(id, &diff).await?;
        }
        self.history.remove(&id);
        self.refresh_locks.remove(&id);
        info!(cohort_id = %id, "cohort removed");
        Ok(())
    }

    pub async fn members(&self, id: Uuid) -> ConvoResult<HashSet<Uuid>> {
        if !self.cohorts.contains_key(&id) {
            return Err(ConvoError::CohortNotFound(id));
        }
        self.membership.members(id).await
    }

    /// Directly add a member to a static cohort. Returns the new count.
    pub async fn add_member(&self, cohort_id: Uuid, user_id: Uuid) -> ConvoResult<u64> {
        self.require_static(cohort_id)?;
        let diff = MembershipDiff {
            added: HashSet::from([user_id]),
            removed: HashSet::new(),
        };
        self.membership.apply_diff(cohort_id, &diff).await?;
        self.sync_member_count(cohort_id).await
    }

    /// Directly remove a member from a static cohort. Returns the new count.
    pub async fn remove_member(&self, cohort_id: Uuid, user_id: Uuid) -> ConvoResult<u64> {
        self.require_static(cohort_id)?;
        let diff = MembershipDiff {
            added: HashSet::new(),
            removed: HashSet::from([user_id]),
        };
        self.membership.apply_diff(cohort_id, &diff).await?;
        self.sync_member_count(cohort_id).await
    }

    /// Recompute a criteria-driven cohort's membership and apply the diff.
    ///
    /// When `candidate_ids` is `None` the fetcher's candidate universe is
    /// used. The whole read-evaluate-apply section runs under the cohort's
    /// refresh lock.
    pub async fn refresh_cohort(
        &self,
        cohort_id: Uuid,
        candidate_ids: Option<Vec<Uuid>>,
    ) -> ConvoResult<RefreshOutcome> {
        let cohort = self
            .get(cohort_id)
            .ok_or(ConvoError::CohortNotFound(cohort_id))?;
        if !cohort.cohort_type.is_criteria_driven() {
            return Err(ConvoError::InvalidCohortType(
                "static cohort cannot be refreshed from criteria".to_string(),
            ));
        }
        let criteria = cohort.criteria.clone().ok_or_else(|| {
            ConvoError::InvalidCohortType(format!(
                "{} cohort '{}' has no criteria",
                cohort.cohort_type.as_str(),
                cohort.name
            ))
        })?;

        let lock = {
            let entry = self.refresh_locks.entry(cohort_id).or_default();
            Arc::clone(entry.value())
        };
        let started_at = Utc::now();
        let _guard = lock.lock().await;

        let candidates = match candidate_ids {
            Some(ids) => ids,
            None => self.fetcher.candidate_ids().await?,
        };
        let current = self.membership.members(cohort_id).await?;
        let outcome = self.refresher.refresh(&criteria, &candidates, &current).await;

        let diff = MembershipDiff {
            added: outcome.added.clone(),
            removed: outcome.removed.clone(),
        };
        // Store failures are surfaced: silently losing a diff is worse than
        // failing the refresh call.
        self.membership.apply_diff(cohort_id, &diff).await?;

        let member_count =
            (current.len() + outcome.added.len() - outcome.removed.len()) as u64;
        if let Some(mut entry) = self.cohorts.get_mut(&cohort_id) {
            entry.member_count = member_count;
            entry.updated_at = Utc::now();
        }

        let record = RefreshRecord {
            id: Uuid::new_v4(),
            cohort_id,
            status: outcome.status,
            evaluated: outcome.evaluated,
            matched: outcome.matched,
            added: outcome.added.len() as u64,
            removed: outcome.removed.len() as u64,
            skipped: outcome.skipped.len() as u64,
            started_at,
            completed_at: Utc::now(),
            error: if outcome.skipped.is_empty() {
                None
            } else {
                Some(
                    outcome
                        .skipped
                        .iter()
                        .map(|s| s.error.as_str())
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            },
        };
        self.history.entry(cohort_id).or_default().push(record);

        metrics::counter!("cohorts.refresh_runs").increment(1);
        info!(
            cohort_id = %cohort_id,
            status = ?outcome.status,
            evaluated = outcome.evaluated,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            skipped = outcome.skipped.len(),
            member_count,
            "cohort refresh applied"
        );
        Ok(outcome)
    }

    /// Evaluate a criteria tree against the candidate universe without
    /// touching any cohort state.
    pub async fn preview(
        &self,
        criteria: &CriteriaNode,
        sample_size: usize,
    ) -> ConvoResult<PreviewResult> {
        criteria.validate()?;
        let candidates = self.fetcher.candidate_ids().await?;
        let outcome = self
            .refresher
            .refresh(criteria, &candidates, &HashSet::new())
            .await;
        // With no current members, `added` is exactly the match set.
        let sample: Vec<Uuid> = outcome.added.iter().take(sample_size).copied().collect();
        Ok(PreviewResult {
            evaluated: outcome.evaluated,
            matched: outcome.matched,
            skipped: outcome.skipped.len() as u64,
            sample,
        })
    }

    pub fn refresh_history(&self, cohort_id: Uuid) -> Vec<RefreshRecord> {
        self.history
            .get(&cohort_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn require_static(&self, cohort_id: Uuid) -> ConvoResult<()> {
        let cohort = self
            .get(cohort_id)
            .ok_or(ConvoError::CohortNotFound(cohort_id))?;
        if cohort.cohort_type != CohortType::Static {
            return Err(ConvoError::InvalidCohortType(format!(
                "{} cohort membership is criteria-derived; direct edits are only valid for static cohorts",
                cohort.cohort_type.as_str()
            )));
        }
        Ok(())
    }

    async fn sync_member_count(&self, cohort_id: Uuid) -> ConvoResult<u64> {
        let count = self.membership.members(cohort_id).await?.len() as u64;
        if let Some(mut entry) = self.cohorts.get_mut(&cohort_id) {
            entry.member_count = count;
            entry.updated_at = Utc::now();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryMembershipStore, InMemoryMetricStore};
    use crate::types::{RefreshStatus, UserMetricSnapshot};

    fn registry_with_users(totals: &[u64]) -> (CohortRegistry, Vec<Uuid>) {
        let metrics_store = Arc::new(InMemoryMetricStore::new());
        let mut ids = Vec::new();
        for &total in totals {
            let mut snapshot = UserMetricSnapshot::new(Uuid::new_v4());
            snapshot.total_conversations = Some(total);
            ids.push(snapshot.user_id);
            metrics_store.upsert(snapshot);
        }
        let registry = CohortRegistry::new(
            metrics_store,
            Arc::new(InMemoryMembershipStore::new()),
            CriteriaEvaluator::default(),
            RefreshConfig::default(),
        );
        (registry, ids)
    }

    fn conversations_gt(n: u64) -> CriteriaNode {
        CriteriaNode::TotalConversations {
            gt: Some(n),
            lt: None,
            eq: None,
        }
    }

    fn dynamic_cohort(criteria: CriteriaNode) -> CreateCohort {
        CreateCohort {
            name: "power users".to_string(),
            description: None,
            cohort_type: CohortType::Dynamic,
            criteria: Some(criteria),
            tags: vec![],
        }
    }

    #[test]
    fn test_type_criteria_pairing_enforced() {
        let (registry, _) = registry_with_users(&[]);

        let missing = CreateCohort {
            name: "broken".to_string(),
            description: None,
            cohort_type: CohortType::Dynamic,
            criteria: None,
            tags: vec![],
        };
        assert!(matches!(
            registry.create(missing),
            Err(ConvoError::InvalidCohortType(_))
        ));

        let static_with_criteria = CreateCohort {
            name: "broken".to_string(),
            description: None,
            cohort_type: CohortType::Static,
            criteria: Some(conversations_gt(1)),
            tags: vec![],
        };
        assert!(matches!(
            registry.create(static_with_criteria),
            Err(ConvoError::InvalidCohortType(_))
        ));
    }

    #[test]
    fn test_create_rejects_invalid_tree() {
        let (registry, _) = registry_with_users(&[]);
        let invalid = CriteriaNode::AverageRating { gt: None, lt: None };
        assert!(matches!(
            registry.create(dynamic_cohort(invalid)),
            Err(ConvoError::InvalidCriteria(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_updates_membership_and_history() {
        let (registry, ids) = registry_with_users(&[120, 30, 80]);
        let cohort = registry.create(dynamic_cohort(conversations_gt(50))).unwrap();

        let outcome = registry.refresh_cohort(cohort.id, None).await.unwrap();
        assert_eq!(outcome.status, RefreshStatus::Completed);
        assert_eq!(outcome.added, HashSet::from([ids[0], ids[2]]));

        let refreshed = registry.get(cohort.id).unwrap();
        assert_eq!(refreshed.member_count, 2);

        let history = registry.refresh_history(cohort.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].added, 2);
        assert!(history[0].error.is_none());
    }

    #[tokio::test]
    async fn test_refresh_drops_users_no_longer_matching() {
        let (registry, ids) = registry_with_users(&[120]);
        let cohort = registry.create(dynamic_cohort(conversations_gt(50))).unwrap();
        registry.refresh_cohort(cohort.id, None).await.unwrap();

        registry
            .update_criteria(cohort.id, conversations_gt(500))
            .unwrap();
        let outcome = registry.refresh_cohort(cohort.id, None).await.unwrap();
        assert_eq!(outcome.removed, HashSet::from([ids[0]]));
        assert_eq!(registry.get(cohort.id).unwrap().member_count, 0);
    }

    #[tokio::test]
    async fn test_static_cohort_direct_membership() {
        let (registry, _) = registry_with_users(&[]);
        let cohort = registry
            .create(CreateCohort {
                name: "hand picked".to_string(),
                description: None,
                cohort_type: CohortType::Static,
                criteria: None,
                tags: vec![],
            })
            .unwrap();

        let user = Uuid::new_v4();
        assert_eq!(registry.add_member(cohort.id, user).await.unwrap(), 1);
        assert!(registry.members(cohort.id).await.unwrap().contains(&user));
        assert_eq!(registry.remove_member(cohort.id, user).await.unwrap(), 0);

        // Criteria-driven refresh is meaningless for a static cohort.
        assert!(matches!(
            registry.refresh_cohort(cohort.id, None).await,
            Err(ConvoError::InvalidCohortType(_))
        ));
    }

    #[tokio::test]
    async fn test_dynamic_cohort_rejects_direct_membership() {
        let (registry, _) = registry_with_users(&[]);
        let cohort = registry.create(dynamic_cohort(conversations_gt(1))).unwrap();
        assert!(matches!(
            registry.add_member(cohort.id, Uuid::new_v4()).await,
            Err(ConvoError::InvalidCohortType(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_clears_membership() {
        let (registry, _) = registry_with_users(&[120]);
        let cohort = registry.create(dynamic_cohort(conversations_gt(50))).unwrap();
        registry.refresh_cohort(cohort.id, None).await.unwrap();

        registry.remove(cohort.id).await.unwrap();
        assert!(registry.get(cohort.id).is_none());
        assert!(matches!(
            registry.members(cohort.id).await,
            Err(ConvoError::CohortNotFound(_))
        ));
        assert!(registry.refresh_history(cohort.id).is_empty());
    }

    #[tokio::test]
    async fn test_preview_does_not_persist() {
        let (registry, ids) = registry_with_users(&[120, 30]);
        let cohort = registry.create(dynamic_cohort(conversations_gt(50))).unwrap();

        let preview = registry.preview(&conversations_gt(50), 10).await.unwrap();
        assert_eq!(preview.matched, 1);
        assert_eq!(preview.evaluated, 2);
        assert_eq!(preview.sample, vec![ids[0]]);

        // Nothing was applied to the cohort itself.
        assert!(registry.members(cohort.id).await.unwrap().is_empty());
        assert_eq!(registry.get(cohort.id).unwrap().member_count, 0);
    }

    #[tokio::test]
    async fn test_explicit_candidate_list_limits_scope() {
        let (registry, ids) = registry_with_users(&[120, 80]);
        let cohort = registry.create(dynamic_cohort(conversations_gt(50))).unwrap();

        let outcome = registry
            .refresh_cohort(cohort.id, Some(vec![ids[0]]))
            .await
            .unwrap();
        assert_eq!(outcome.added, HashSet::from([ids[0]]));
        assert_eq!(outcome.evaluated, 1);
    }
}
