//! Cohort engine — criteria trees, the match evaluator, and the batch
//! membership refresher behind ConvoLens user segmentation.

pub mod criteria;
pub mod evaluator;
pub mod memory;
pub mod refresher;
pub mod registry;
pub mod stores;
pub mod types;

pub use criteria::{ActivityLevel, CriteriaNode};
pub use evaluator::CriteriaEvaluator;
pub use memory::{InMemoryMembershipStore, InMemoryMetricStore};
pub use refresher::CohortRefresher;
pub use registry::CohortRegistry;
pub use stores::{MembershipStore, MetricFetcher};
pub use types::{
    Cohort, CohortType, CreateCohort, MembershipDiff, PreviewResult, RefreshOutcome,
    RefreshRecord, RefreshStatus, SkippedCandidate, UserMetricSnapshot,
};
