//! Criteria trees — the boolean expression language behind dynamic cohorts.
//!
//! A tree is a tagged union: leaf variants carry exactly one predicate over
//! a snapshot field, and `And`/`Or`/`Not` compose them. The JSON encoding
//! mirrors the shape directly via a `type` discriminant, e.g.
//! `{"type":"and","children":[{"type":"total_conversations","gt":50}]}`.
//! Ambiguous shapes (a node mixing predicate kinds) are unrepresentable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convolens_core::{ConvoError, ConvoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CriteriaNode {
    /// Constrains account creation time. `before`/`after` are strict,
    /// `between` is inclusive on both ends.
    SignupDate {
        #[serde(skip_serializing_if = "Option::is_none")]
        before: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        between: Option<(DateTime<Utc>, DateTime<Utc>)>,
    },
    SubscriptionPlan {
        #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
        in_plans: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        not_in: Option<Vec<String>>,
    },
    TotalConversations {
        #[serde(skip_serializing_if = "Option::is_none")]
        gt: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lt: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        eq: Option<u64>,
    },
    /// Matches the derived conversation-count bucket for equality. Bucket
    /// boundaries come from `ActivityThresholds` configuration.
    ActivityLevel { level: ActivityLevel },
    /// Passes when the user was last active within the given number of days
    /// of the snapshot's `captured_at`.
    LastActive { days_ago: u32 },
    /// Per-feature usage counter; absent `min_uses` means "used at least once".
    FeatureUsage {
        feature: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        min_uses: Option<u64>,
    },
    AverageRating {
        #[serde(skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
    },
    SuccessRate {
        #[serde(skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
    },
    TotalCost {
        #[serde(skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
    },
    /// Opaque equality match against the snapshot's custom-fields map.
    CustomField {
        key: String,
        value: serde_json::Value,
    },
    And { children: Vec<CriteriaNode> },
    Or { children: Vec<CriteriaNode> },
    Not { child: Box<CriteriaNode> },
}

impl CriteriaNode {
    /// The serde discriminant for this variant, used in validation paths.
    pub fn kind(&self) -> &'static str {
        match self {
            CriteriaNode::SignupDate { .. } => "signup_date",
            CriteriaNode::SubscriptionPlan { .. } => "subscription_plan",
            CriteriaNode::TotalConversations { .. } => "total_conversations",
            CriteriaNode::ActivityLevel { .. } => "activity_level",
            CriteriaNode::LastActive { .. } => "last_active",
            CriteriaNode::FeatureUsage { .. } => "feature_usage",
            CriteriaNode::AverageRating { .. } => "average_rating",
            CriteriaNode::SuccessRate { .. } => "success_rate",
            CriteriaNode::TotalCost { .. } => "total_cost",
            CriteriaNode::CustomField { .. } => "custom_field",
            CriteriaNode::And { .. } => "and",
            CriteriaNode::Or { .. } => "or",
            CriteriaNode::Not { .. } => "not",
        }
    }

    /// Reject malformed trees at ingest time so evaluation stays total:
    /// leaves with no comparator set, inverted `between` ranges, and empty
    /// feature/key names. Empty `and`/`or` children lists are valid (they
    /// evaluate vacuously).
    pub fn validate(&self) -> ConvoResult<()> {
        self.validate_node("")
    }

    fn validate_node(&self, path: &str) -> ConvoResult<()> {
        // Each node's display path lists the kind of every logical ancestor
        // plus its child index, e.g. `and.children[1].or.children[0]`.
        let label = if path.is_empty() {
            self.kind().to_string()
        } else {
            path.to_string()
        };

        match self {
            CriteriaNode::SignupDate {
                before,
                after,
                between,
            } => {
                if before.is_none() && after.is_none() && between.is_none() {
                    return Err(self.no_comparator(&label));
                }
                if let Some((start, end)) = between {
                    if start > end {
                        return Err(ConvoError::InvalidCriteria(format!(
                            "signup_date node at '{label}' has a 'between' range with start > end"
                        )));
                    }
                }
                Ok(())
            }
            CriteriaNode::SubscriptionPlan { in_plans, not_in } => {
                if in_plans.is_none() && not_in.is_none() {
                    return Err(self.no_comparator(&label));
                }
                Ok(())
            }
            CriteriaNode::TotalConversations { gt, lt, eq } => {
                if gt.is_none() && lt.is_none() && eq.is_none() {
                    return Err(self.no_comparator(&label));
                }
                Ok(())
            }
            CriteriaNode::ActivityLevel { .. } | CriteriaNode::LastActive { .. } => Ok(()),
            CriteriaNode::FeatureUsage { feature, .. } => {
                if feature.is_empty() {
                    return Err(ConvoError::InvalidCriteria(format!(
                        "feature_usage node at '{label}' has an empty feature name"
                    )));
                }
                Ok(())
            }
            CriteriaNode::AverageRating { gt, lt }
            | CriteriaNode::SuccessRate { gt, lt }
            | CriteriaNode::TotalCost { gt, lt } => {
                if gt.is_none() && lt.is_none() {
                    return Err(self.no_comparator(&label));
                }
                Ok(())
            }
            CriteriaNode::CustomField { key, .. } => {
                if key.is_empty() {
                    return Err(ConvoError::InvalidCriteria(format!(
                        "custom_field node at '{label}' has an empty key"
                    )));
                }
                Ok(())
            }
            CriteriaNode::And { children } | CriteriaNode::Or { children } => {
                let base = if path.is_empty() {
                    self.kind().to_string()
                } else {
                    format!("{path}.{}", self.kind())
                };
                for (i, child) in children.iter().enumerate() {
                    child.validate_node(&format!("{base}.children[{i}]"))?;
                }
                Ok(())
            }
            CriteriaNode::Not { child } => {
                let base = if path.is_empty() {
                    self.kind().to_string()
                } else {
                    format!("{path}.{}", self.kind())
                };
                child.validate_node(&format!("{base}.child"))
            }
        }
    }

    fn no_comparator(&self, label: &str) -> ConvoError {
        ConvoError::InvalidCriteria(format!(
            "{} node at '{label}' sets no comparator",
            self.kind()
        ))
    }
}
