//! In-memory store implementations backing the bundled service binary and
//! the test suite.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use convolens_core::ConvoResult;

use crate::stores::{MembershipStore, MetricFetcher};
use crate::types::{MembershipDiff, UserMetricSnapshot};

/// DashMap-backed snapshot store keyed by user id.
#[derive(Default)]
pub struct InMemoryMetricStore {
    snapshots: DashMap<Uuid, UserMetricSnapshot>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, snapshot: UserMetricSnapshot) {
        self.snapshots.insert(snapshot.user_id, snapshot);
    }

    pub fn remove(&self, user_id: Uuid) {
        self.snapshots.remove(&user_id);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Seed a handful of demo users with varied metrics, returning their ids.
    pub fn seed_demo_users(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let demos: Vec<(&str, u64, f64, f64, i64)> = vec![
            // (plan, conversations, rating, success rate, signup days ago)
            ("free", 4, 3.1, 0.62, 20),
            ("free", 85, 4.0, 0.88, 240),
            ("pro", 140, 4.6, 0.93, 90),
            ("pro", 12, 3.8, 0.71, 35),
            ("enterprise", 420, 4.8, 0.97, 400),
        ];

        let mut ids = Vec::with_capacity(demos.len());
        for (plan, conversations, rating, success, signup_days_ago) in demos {
            let user_id = Uuid::new_v4();
            let mut snapshot = UserMetricSnapshot::new(user_id);
            snapshot.signup_date = Some(now - Duration::days(signup_days_ago));
            snapshot.subscription_plan = Some(plan.to_string());
            snapshot.total_conversations = Some(conversations);
            snapshot.last_active_at = Some(now - Duration::days(2));
            snapshot.average_rating = Some(rating);
            snapshot.success_rate = Some(success);
            snapshot.total_cost = Some(conversations as f64 * 0.04);
            snapshot
                .feature_usage
                .insert("export".to_string(), conversations / 10);
            self.upsert(snapshot);
            ids.push(user_id);
        }

        info!(count = ids.len(), "seeded demo user snapshots");
        ids
    }
}

#[async_trait]
impl MetricFetcher for InMemoryMetricStore {
    async fn fetch_snapshot(&self, user_id: Uuid) -> ConvoResult<Option<UserMetricSnapshot>> {
        Ok(self.snapshots.get(&user_id).map(|e| e.value().clone()))
    }

    async fn candidate_ids(&self) -> ConvoResult<Vec<Uuid>> {
        Ok(self.snapshots.iter().map(|e| *e.key()).collect())
    }
}

/// DashMap-backed membership store keyed by cohort id.
#[derive(Default)]
pub struct InMemoryMembershipStore {
    members: DashMap<Uuid, HashSet<Uuid>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn members(&self, cohort_id: Uuid) -> ConvoResult<HashSet<Uuid>> {
        Ok(self
            .members
            .get(&cohort_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn apply_diff(&self, cohort_id: Uuid, diff: &MembershipDiff) -> ConvoResult<()> {
        let mut entry = self.members.entry(cohort_id).or_default();
        for id in &diff.added {
            entry.insert(*id);
        }
        for id in &diff.removed {
            entry.remove(id);
        }
        Ok(())
    }
}
