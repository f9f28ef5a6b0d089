//! Collaborator contracts for the cohort engine. Any backing
//! implementation (direct query, cache, materialized view) is
//! substitutable; in-memory versions live in [`crate::memory`].

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use convolens_core::ConvoResult;

use crate::types::{MembershipDiff, UserMetricSnapshot};

/// Produces point-in-time metric snapshots for evaluation.
#[async_trait]
pub trait MetricFetcher: Send + Sync {
    /// Fetch a snapshot for one user. `Ok(None)` means the user is unknown —
    /// a "not found" signal, not an error.
    async fn fetch_snapshot(&self, user_id: Uuid) -> ConvoResult<Option<UserMetricSnapshot>>;

    /// Enumerate the candidate universe for whole-cohort refreshes when the
    /// caller does not supply an explicit candidate list.
    async fn candidate_ids(&self) -> ConvoResult<Vec<Uuid>>;
}

/// Persists cohort membership sets. The refresher computes diffs; how they
/// are stored is this trait's business.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn members(&self, cohort_id: Uuid) -> ConvoResult<HashSet<Uuid>>;

    async fn apply_diff(&self, cohort_id: Uuid, diff: &MembershipDiff) -> ConvoResult<()>;
}
