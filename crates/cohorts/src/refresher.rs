//! Batch refresher — evaluates a criteria tree across candidate users and
//! diffs the match set against current membership.
//!
//! Predicate logic and membership bookkeeping stay separate on purpose: the
//! refresher only *computes* the diff, applying it is the caller's job.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use convolens_core::config::RefreshConfig;
use convolens_core::{ConvoError, ConvoResult};

use crate::criteria::CriteriaNode;
use crate::evaluator::CriteriaEvaluator;
use crate::stores::MetricFetcher;
use crate::types::{
    MembershipDiff, RefreshOutcome, RefreshStatus, SkippedCandidate, UserMetricSnapshot,
};

pub struct CohortRefresher {
    fetcher: Arc<dyn MetricFetcher>,
    evaluator: CriteriaEvaluator,
    config: RefreshConfig,
}

impl CohortRefresher {
    pub fn new(
        fetcher: Arc<dyn MetricFetcher>,
        evaluator: CriteriaEvaluator,
        config: RefreshConfig,
    ) -> Self {
        Self {
            fetcher,
            evaluator,
            config,
        }
    }

    /// Evaluate `criteria` against every candidate and report the membership
    /// diff relative to `current`.
    ///
    /// A fetch failure for one candidate never aborts the batch: the
    /// candidate is retried up to `fetch_retries` extra times (each attempt
    /// under `fetch_timeout_ms`), then skipped and reported so the caller
    /// can retry those ids independently. An unknown user (`Ok(None)`)
    /// genuinely doesn't match and is *evaluated*, not skipped — skip is
    /// reserved for failures where the truth is unknown.
    pub async fn refresh(
        &self,
        criteria: &CriteriaNode,
        candidate_ids: &[Uuid],
        current: &HashSet<Uuid>,
    ) -> RefreshOutcome {
        let results: Vec<(Uuid, ConvoResult<Option<UserMetricSnapshot>>)> =
            stream::iter(candidate_ids.iter().copied())
                .map(|user_id| async move { (user_id, self.fetch_with_retry(user_id).await) })
                .buffer_unordered(self.config.max_concurrent_fetches.max(1))
                .collect()
                .await;

        let mut matched: HashSet<Uuid> = HashSet::new();
        let mut evaluated: u64 = 0;
        let mut skipped: Vec<SkippedCandidate> = Vec::new();

        for (user_id, result) in results {
            match result {
                Ok(Some(snapshot)) => {
                    evaluated += 1;
                    if self.evaluator.evaluate(criteria, &snapshot) {
                        matched.insert(user_id);
                    }
                }
                Ok(None) => {
                    // Unknown user: evaluates to non-matching.
                    evaluated += 1;
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "candidate skipped after retries");
                    metrics::counter!("cohorts.candidates_skipped").increment(1);
                    skipped.push(SkippedCandidate {
                        user_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let status = if skipped.is_empty() {
            RefreshStatus::Completed
        } else if evaluated > 0 {
            RefreshStatus::PartialSuccess
        } else {
            RefreshStatus::Failed
        };

        let diff = MembershipDiff::between(&matched, current);
        debug!(
            evaluated,
            matched = matched.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            skipped = skipped.len(),
            "refresh sweep finished"
        );

        RefreshOutcome {
            added: diff.added,
            removed: diff.removed,
            evaluated,
            matched: matched.len() as u64,
            skipped,
            status,
        }
    }

    async fn fetch_with_retry(&self, user_id: Uuid) -> ConvoResult<Option<UserMetricSnapshot>> {
        let per_attempt = Duration::from_millis(self.config.fetch_timeout_ms);
        let mut last_err = ConvoError::MetricFetch("no fetch attempt made".to_string());

        for attempt in 0..=self.config.fetch_retries {
            match tokio::time::timeout(per_attempt, self.fetcher.fetch_snapshot(user_id)).await {
                Ok(Ok(snapshot)) => return Ok(snapshot),
                Ok(Err(e)) => {
                    warn!(user_id = %user_id, attempt, error = %e, "snapshot fetch failed");
                    last_err = e;
                }
                Err(_) => {
                    warn!(
                        user_id = %user_id,
                        attempt,
                        timeout_ms = self.config.fetch_timeout_ms,
                        "snapshot fetch timed out"
                    );
                    last_err = ConvoError::MetricFetch(format!(
                        "fetch timed out after {}ms",
                        self.config.fetch_timeout_ms
                    ));
                }
            }
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::DashMap;

    /// Fetcher with injectable failures: ids in `fail_always` always error,
    /// ids in `fail_first` error that many times before succeeding.
    #[derive(Default)]
    struct ScriptedFetcher {
        snapshots: DashMap<Uuid, UserMetricSnapshot>,
        fail_always: HashSet<Uuid>,
        fail_first: DashMap<Uuid, u32>,
        delay: Option<Duration>,
    }

    impl ScriptedFetcher {
        fn with_user(self, total_conversations: u64) -> (Self, Uuid) {
            let mut snapshot = UserMetricSnapshot::new(Uuid::new_v4());
            snapshot.total_conversations = Some(total_conversations);
            let id = snapshot.user_id;
            self.snapshots.insert(id, snapshot);
            (self, id)
        }
    }

    #[async_trait]
    impl MetricFetcher for ScriptedFetcher {
        async fn fetch_snapshot(
            &self,
            user_id: Uuid,
        ) -> ConvoResult<Option<UserMetricSnapshot>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_always.contains(&user_id) {
                return Err(ConvoError::MetricFetch("injected failure".to_string()));
            }
            if let Some(mut remaining) = self.fail_first.get_mut(&user_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ConvoError::MetricFetch("transient failure".to_string()));
                }
            }
            Ok(self.snapshots.get(&user_id).map(|e| e.value().clone()))
        }

        async fn candidate_ids(&self) -> ConvoResult<Vec<Uuid>> {
            Ok(self.snapshots.iter().map(|e| *e.key()).collect())
        }
    }

    fn test_config() -> RefreshConfig {
        RefreshConfig {
            max_concurrent_fetches: 4,
            fetch_timeout_ms: 1000,
            fetch_retries: 1,
        }
    }

    fn refresher(fetcher: ScriptedFetcher) -> CohortRefresher {
        CohortRefresher::new(
            Arc::new(fetcher),
            CriteriaEvaluator::default(),
            test_config(),
        )
    }

    fn conversations_gt(n: u64) -> CriteriaNode {
        CriteriaNode::TotalConversations {
            gt: Some(n),
            lt: None,
            eq: None,
        }
    }

    #[tokio::test]
    async fn test_partial_failure_skips_not_aborts() {
        let (fetcher, a) = ScriptedFetcher::default().with_user(120);
        let (mut fetcher, c) = fetcher.with_user(80);
        let b = Uuid::new_v4();
        fetcher.fail_always.insert(b);

        // c is already a member; a should be added; b fails and is skipped.
        let current = HashSet::from([c]);
        let outcome = refresher(fetcher)
            .refresh(&conversations_gt(50), &[a, b, c], &current)
            .await;

        assert_eq!(outcome.evaluated, 2);
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.added, HashSet::from([a]));
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].user_id, b);
        assert_eq!(outcome.status, RefreshStatus::PartialSuccess);
    }

    #[tokio::test]
    async fn test_retry_then_success_is_not_skipped() {
        let (fetcher, a) = ScriptedFetcher::default().with_user(120);
        fetcher.fail_first.insert(a, 1);

        let outcome = refresher(fetcher)
            .refresh(&conversations_gt(50), &[a], &HashSet::new())
            .await;

        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.added, HashSet::from([a]));
        assert_eq!(outcome.status, RefreshStatus::Completed);
    }

    #[tokio::test]
    async fn test_retries_exhausted_then_skipped() {
        let (fetcher, a) = ScriptedFetcher::default().with_user(120);
        // One more failure than the configured retry budget (1 retry = 2 attempts).
        fetcher.fail_first.insert(a, 2);

        let outcome = refresher(fetcher)
            .refresh(&conversations_gt(50), &[a], &HashSet::new())
            .await;

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.status, RefreshStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_user_is_non_match_not_skip() {
        let fetcher = ScriptedFetcher::default();
        let ghost = Uuid::new_v4();

        // The ghost is a current member; a refresh should drop it.
        let current = HashSet::from([ghost]);
        let outcome = refresher(fetcher)
            .refresh(&conversations_gt(0), &[ghost], &current)
            .await;

        assert_eq!(outcome.evaluated, 1);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.removed, HashSet::from([ghost]));
        assert_eq!(outcome.status, RefreshStatus::Completed);
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out_and_skips() {
        let (mut fetcher, a) = ScriptedFetcher::default().with_user(120);
        fetcher.delay = Some(Duration::from_millis(100));

        let refresher = CohortRefresher::new(
            Arc::new(fetcher),
            CriteriaEvaluator::default(),
            RefreshConfig {
                max_concurrent_fetches: 4,
                fetch_timeout_ms: 10,
                fetch_retries: 0,
            },
        );

        let outcome = refresher
            .refresh(&conversations_gt(50), &[a], &HashSet::new())
            .await;

        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].error.contains("timed out"));
        assert_eq!(outcome.status, RefreshStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_candidate_list_completes() {
        let fetcher = ScriptedFetcher::default();
        let outcome = refresher(fetcher)
            .refresh(&conversations_gt(50), &[], &HashSet::new())
            .await;

        assert_eq!(outcome.evaluated, 0);
        assert_eq!(outcome.status, RefreshStatus::Completed);
    }
}
