//! Classification, scoring and aggregation of research outputs per commission.
//!
//! Stores own the write rules (manual records win over automatic ones, deletes are
//! guarded while references remain). The resolver and point calculator turn metadata
//! into drafts; the batch module feeds them to the stores a page at a time.

pub mod aggregation;
pub mod batch;
pub mod domain;
pub mod imaginary;
pub mod indicators;
pub mod points;
pub mod researchers;
pub mod resolver;
pub mod router;
pub mod rules;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use aggregation::{
    AggregatedResult, AggregationError, CommissionRelationAggregator, TargetResult,
};
pub use batch::{
    BatchDispatcher, BatchFilter, BatchJobSpec, BatchKind, BatchOrchestrator, BatchReport,
    BatchSettings, CancellationFlag, Dispatch, DispatchOutcome, DocumentIndex,
    InMemoryDocumentIndex, TaskScheduler, TokioTaskScheduler,
};
pub use imaginary::{ImaginaryJournalPublication, ImaginaryProceedingsPublication};
pub use indicators::{IndicatorDraft, IndicatorStore};
pub use points::{floor_to_cents, PointCalculator, PointsOutcome, ScoringContext};
pub use researchers::{
    order_categories, AuthorshipLookup, CategoryPriorityTable, ResearcherAssessment,
    ResearcherQuery,
};
pub use resolver::{ClassificationResolver, RankingTable, RankingTableProvider};
pub use router::assessment_router;
pub use rules::{RuleConfigError, RuleRegistry};
pub use service::{
    AssessmentCollaborators, AssessmentService, AssessmentServiceError, CommissionResultQuery,
    ResultMeasure,
};
pub use store::{
    CatalogStore, ClassificationDraft, CommissionStore, EntityClassificationStore, StoreError,
    UpsertOutcome,
};
