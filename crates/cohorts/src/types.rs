//! Shared cohort data types: cohort records, metric snapshots, and the
//! diff/outcome shapes produced by a batch refresh.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::criteria::CriteriaNode;

/// A named, persisted user segment. The membership *set* lives in the
/// [`MembershipStore`](crate::stores::MembershipStore); the record only
/// caches its size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub cohort_type: CohortType,
    /// Present for criteria-driven cohort types, absent for static ones.
    pub criteria: Option<CriteriaNode>,
    pub member_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortType {
    Static,
    Dynamic,
    Behavioral,
    /// Declared by the dashboard but refreshed like `Dynamic`; model-driven
    /// scoring is out of scope.
    Predictive,
}

impl CohortType {
    /// Whether membership for this type is derived from a criteria tree.
    pub fn is_criteria_driven(&self) -> bool {
        !matches!(self, CohortType::Static)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CohortType::Static => "static",
            CohortType::Dynamic => "dynamic",
            CohortType::Behavioral => "behavioral",
            CohortType::Predictive => "predictive",
        }
    }
}

/// Request shape for creating a cohort, shared by the registry and the
/// REST boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCohort {
    pub name: String,
    pub description: Option<String>,
    pub cohort_type: CohortType,
    pub criteria: Option<CriteriaNode>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Flat, point-in-time projection of one user's observable metrics.
///
/// Constructed fresh for each evaluation and discarded after use; the
/// evaluator never persists it. Every metric field is optional — a missing
/// field fails any predicate that reads it rather than erroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMetricSnapshot {
    pub user_id: Uuid,
    /// The snapshot's "now". `LastActive` recency is measured against this
    /// rather than the wall clock, so evaluation stays pure.
    pub captured_at: DateTime<Utc>,
    pub signup_date: Option<DateTime<Utc>>,
    pub subscription_plan: Option<String>,
    pub total_conversations: Option<u64>,
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub feature_usage: HashMap<String, u64>,
    pub average_rating: Option<f64>,
    pub success_rate: Option<f64>,
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub custom_fields: HashMap<String, serde_json::Value>,
}

impl UserMetricSnapshot {
    /// An empty snapshot for the given user, captured now.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            captured_at: Utc::now(),
            signup_date: None,
            subscription_plan: None,
            total_conversations: None,
            last_active_at: None,
            feature_usage: HashMap::new(),
            average_rating: None,
            success_rate: None,
            total_cost: None,
            custom_fields: HashMap::new(),
        }
    }
}

/// Pure set difference between a freshly computed match set and the
/// cohort's current membership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MembershipDiff {
    pub added: HashSet<Uuid>,
    pub removed: HashSet<Uuid>,
}

impl MembershipDiff {
    /// added = matched ∖ current, removed = current ∖ matched.
    pub fn between(matched: &HashSet<Uuid>, current: &HashSet<Uuid>) -> Self {
        Self {
            added: matched.difference(current).copied().collect(),
            removed: current.difference(matched).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    /// Every candidate was evaluated.
    Completed,
    /// Some candidates were skipped, some evaluated.
    PartialSuccess,
    /// Every candidate was skipped.
    Failed,
}

/// A candidate whose snapshot could not be fetched after bounded retries.
/// Reported alongside the diff so the caller can retry these independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub user_id: Uuid,
    pub error: String,
}

/// Result of one batch refresh sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub added: HashSet<Uuid>,
    pub removed: HashSet<Uuid>,
    /// Candidates whose snapshots were fetched and evaluated (including
    /// unknown users, which evaluate to non-matching).
    pub evaluated: u64,
    pub matched: u64,
    pub skipped: Vec<SkippedCandidate>,
    pub status: RefreshStatus,
}

/// History entry recorded for each registry-level refresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRecord {
    pub id: Uuid,
    pub cohort_id: Uuid,
    pub status: RefreshStatus,
    pub evaluated: u64,
    pub matched: u64,
    pub added: u64,
    pub removed: u64,
    pub skipped: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Result of a dry-run criteria preview: how many candidates matched,
/// plus a bounded sample of matching ids.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub evaluated: u64,
    pub matched: u64,
    pub skipped: u64,
    pub sample: Vec<Uuid>,
}
