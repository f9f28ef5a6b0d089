//! Criteria evaluator — a pure, total interpreter over criteria trees.
//!
//! `evaluate` never does I/O and never fails: malformed trees are rejected
//! up front by [`CriteriaNode::validate`], and missing snapshot fields make
//! the predicate reading them return `false` rather than erroring, so a
//! partially populated snapshot degrades gracefully.

use convolens_core::config::ActivityThresholds;

use crate::criteria::{ActivityLevel, CriteriaNode};
use crate::types::UserMetricSnapshot;

#[derive(Debug, Clone)]
pub struct CriteriaEvaluator {
    thresholds: ActivityThresholds,
}

impl CriteriaEvaluator {
    pub fn new(thresholds: ActivityThresholds) -> Self {
        Self { thresholds }
    }

    /// Decide whether the snapshot matches the criteria tree.
    ///
    /// Semantics worth calling out explicitly:
    /// - multiple comparators on one leaf are ANDed: every bound that is
    ///   set must hold;
    /// - an empty `and` is vacuously true, an empty `or` vacuously false;
    /// - `and`/`or` short-circuit on the first deciding child.
    pub fn evaluate(&self, node: &CriteriaNode, snapshot: &UserMetricSnapshot) -> bool {
        match node {
            CriteriaNode::SignupDate {
                before,
                after,
                between,
            } => {
                let Some(signup) = snapshot.signup_date else {
                    return false;
                };
                if let Some(b) = before {
                    if signup >= *b {
                        return false;
                    }
                }
                if let Some(a) = after {
                    if signup <= *a {
                        return false;
                    }
                }
                if let Some((start, end)) = between {
                    if signup < *start || signup > *end {
                        return false;
                    }
                }
                true
            }
            CriteriaNode::SubscriptionPlan { in_plans, not_in } => {
                let Some(plan) = snapshot.subscription_plan.as_deref() else {
                    return false;
                };
                if let Some(allowed) = in_plans {
                    if !allowed.iter().any(|p| p == plan) {
                        return false;
                    }
                }
                if let Some(denied) = not_in {
                    if denied.iter().any(|p| p == plan) {
                        return false;
                    }
                }
                true
            }
            CriteriaNode::TotalConversations { gt, lt, eq } => {
                let Some(total) = snapshot.total_conversations else {
                    return false;
                };
                gt.map_or(true, |g| total > g)
                    && lt.map_or(true, |l| total < l)
                    && eq.map_or(true, |e| total == e)
            }
            CriteriaNode::ActivityLevel { level } => snapshot
                .total_conversations
                .map_or(false, |total| self.bucket(total) == *level),
            CriteriaNode::LastActive { days_ago } => {
                let Some(last) = snapshot.last_active_at else {
                    return false;
                };
                (snapshot.captured_at - last).num_days() <= i64::from(*days_ago)
            }
            CriteriaNode::FeatureUsage { feature, min_uses } => {
                let uses = snapshot.feature_usage.get(feature).copied().unwrap_or(0);
                uses >= min_uses.unwrap_or(1)
            }
            CriteriaNode::AverageRating { gt, lt } => {
                Self::bounded(snapshot.average_rating, *gt, *lt)
            }
            CriteriaNode::SuccessRate { gt, lt } => Self::bounded(snapshot.success_rate, *gt, *lt),
            CriteriaNode::TotalCost { gt, lt } => Self::bounded(snapshot.total_cost, *gt, *lt),
            CriteriaNode::CustomField { key, value } => snapshot
                .custom_fields
                .get(key)
                .map_or(false, |actual| actual == value),
            CriteriaNode::And { children } => {
                children.iter().all(|c| self.evaluate(c, snapshot))
            }
            CriteriaNode::Or { children } => {
                children.iter().any(|c| self.evaluate(c, snapshot))
            }
            CriteriaNode::Not { child } => !self.evaluate(child, snapshot),
        }
    }

    /// Derived activity bucket for a conversation count. Each tier is
    /// half-open: `High` covers `[high_min, very_high_min)`.
    pub fn bucket(&self, total_conversations: u64) -> ActivityLevel {
        if total_conversations >= self.thresholds.very_high_min {
            ActivityLevel::VeryHigh
        } else if total_conversations >= self.thresholds.high_min {
            ActivityLevel::High
        } else if total_conversations >= self.thresholds.medium_min {
            ActivityLevel::Medium
        } else {
            ActivityLevel::Low
        }
    }

    fn bounded(actual: Option<f64>, gt: Option<f64>, lt: Option<f64>) -> bool {
        let Some(v) = actual else {
            return false;
        };
        gt.map_or(true, |g| v > g) && lt.map_or(true, |l| v < l)
    }
}

impl Default for CriteriaEvaluator {
    fn default() -> Self {
        Self::new(ActivityThresholds::default())
    }
}
