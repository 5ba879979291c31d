use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::aggregation::{
    AggregatedResult, AggregationError, CommissionRelationAggregator, TargetResult,
};
use super::batch::{
    BatchDispatcher, BatchError, BatchJobSpec, BatchOrchestrator, BatchReport, BatchSettings,
    Dispatch, DispatchError, DispatchOutcome, DocumentIndex, EntityAssessor, IndexError,
    ItemError, SchedulerError, TaskScheduler,
};
use super::domain::{
    AccessLevel, ClassificationKey, ClassificationRecordId, CommissionId, CommissionRelation,
    DocumentId, EntityAssessmentClassification, EntityIndicator, EntityRef,
    ImaginaryAssessmentResult, RelationId,
};
use super::imaginary::{
    ImaginaryAssessor, ImaginaryError, ImaginaryJournalPublication,
    ImaginaryProceedingsPublication,
};
use super::indicators::{IndicatorDraft, IndicatorError, IndicatorRepository, IndicatorStore};
use super::points::{PointCalculator, PointsError};
use super::researchers::{
    AuthorshipLookup, CategoryPriorityTable, ResearcherAssessment, ResearcherAssessor,
    ResearcherQuery,
};
use super::resolver::{
    ClassificationResolver, RankingError, RankingTableProvider, ResolutionError,
};
use super::rules::{RuleConfigError, RuleRegistry};
use super::store::{
    CatalogRepository, CatalogStore, ClassificationDraft, ClassificationRepository,
    CommissionRepository, CommissionStore, EntityClassificationStore, RepositoryError,
    StoreError, UpsertOutcome,
};

/// Everything the service needs from the surrounding system.
pub struct AssessmentCollaborators {
    pub rules: Arc<RuleRegistry>,
    pub classifications: Arc<dyn ClassificationRepository>,
    pub commissions: Arc<dyn CommissionRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub indicators: Arc<dyn IndicatorRepository>,
    pub rankings: Arc<dyn RankingTableProvider>,
    pub index: Arc<dyn DocumentIndex>,
    pub authorship: Arc<dyn AuthorshipLookup>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub settings: BatchSettings,
    pub priorities: CategoryPriorityTable,
}

/// Which part of a stored classification feeds relation aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMeasure {
    #[default]
    Classification,
    Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionResultQuery {
    pub entity: EntityRef,
    pub commission_id: CommissionId,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub measure: ResultMeasure,
}

/// Facade composing the stores, resolver, aggregator, batch dispatcher and reports.
pub struct AssessmentService {
    rules: Arc<RuleRegistry>,
    catalog: CatalogStore,
    commissions: CommissionStore,
    classifications: EntityClassificationStore,
    indicators: IndicatorStore,
    index: Arc<dyn DocumentIndex>,
    assessor: Arc<EntityAssessor>,
    aggregator: CommissionRelationAggregator,
    dispatcher: BatchDispatcher,
    researchers: ResearcherAssessor,
    imaginary: ImaginaryAssessor,
}

impl AssessmentService {
    /// Wires the collaborators; overlapping journal tiers are rejected here.
    pub fn new(collaborators: AssessmentCollaborators) -> Result<Self, RuleConfigError> {
        let AssessmentCollaborators {
            rules,
            classifications,
            commissions,
            catalog,
            indicators,
            rankings,
            index,
            authorship,
            scheduler,
            settings,
            priorities,
        } = collaborators;

        let catalog_store = CatalogStore::new(Arc::clone(&catalog), Arc::clone(&classifications));
        let commission_store =
            CommissionStore::new(Arc::clone(&commissions), Arc::clone(&classifications));
        let classification_store =
            EntityClassificationStore::new(Arc::clone(&classifications), Arc::clone(&catalog));

        let resolver = Arc::new(ClassificationResolver::new(
            Arc::clone(&rules),
            rankings,
            classification_store.clone(),
            catalog_store.clone(),
        ));
        resolver.validate_exclusive()?;

        let calculator = PointCalculator::new(Arc::clone(&rules));
        let assessor = Arc::new(EntityAssessor::new(
            Arc::clone(&resolver),
            calculator.clone(),
            catalog_store.clone(),
        ));
        let orchestrator = Arc::new(BatchOrchestrator::new(
            Arc::clone(&index),
            EntityAssessor::new(
                Arc::clone(&resolver),
                calculator.clone(),
                catalog_store.clone(),
            ),
            classification_store.clone(),
            commission_store.clone(),
            settings,
        ));

        Ok(Self {
            dispatcher: BatchDispatcher::new(orchestrator, scheduler),
            researchers: ResearcherAssessor::new(
                authorship,
                classification_store.clone(),
                catalog_store.clone(),
                priorities,
            ),
            imaginary: ImaginaryAssessor::new(
                resolver,
                calculator,
                catalog_store.clone(),
                commission_store.clone(),
            ),
            rules,
            catalog: catalog_store,
            commissions: commission_store,
            classifications: classification_store,
            indicators: IndicatorStore::new(indicators),
            index,
            assessor,
            aggregator: CommissionRelationAggregator::new(),
        })
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn commissions(&self) -> &CommissionStore {
        &self.commissions
    }

    pub fn classifications(&self) -> &EntityClassificationStore {
        &self.classifications
    }

    pub fn indicators(&self) -> &IndicatorStore {
        &self.indicators
    }

    pub fn dispatcher(&self) -> &BatchDispatcher {
        &self.dispatcher
    }

    pub fn classification(
        &self,
        id: ClassificationRecordId,
    ) -> Result<EntityAssessmentClassification, AssessmentServiceError> {
        self.classifications
            .fetch(id)?
            .ok_or_else(|| AssessmentServiceError::NotFound(format!("classification record {id}")))
    }

    pub fn classifications_for_entity(
        &self,
        entity: EntityRef,
        commission: Option<CommissionId>,
    ) -> Result<Vec<EntityAssessmentClassification>, AssessmentServiceError> {
        Ok(self.classifications.find_for_entity(entity, commission)?)
    }

    pub fn save_manual_classification(
        &self,
        draft: ClassificationDraft,
    ) -> Result<EntityAssessmentClassification, AssessmentServiceError> {
        self.commissions.commission(draft.commission_id)?;
        let record = self.classifications.save_manual(draft)?;
        info!(id = %record.id, entity = %record.subject.entity(), "manual classification saved");
        Ok(record)
    }

    pub fn upsert_automatic_classification(
        &self,
        draft: ClassificationDraft,
    ) -> Result<UpsertOutcome, AssessmentServiceError> {
        Ok(self.classifications.upsert_automatic(draft)?)
    }

    pub fn delete_classification(
        &self,
        id: ClassificationRecordId,
    ) -> Result<(), AssessmentServiceError> {
        Ok(self
            .classifications
            .delete_entity_assessment_classification(id)?)
    }

    /// Resolves and stores one document for one commission, outside of any batch.
    pub fn classify_document(
        &self,
        document: DocumentId,
        commission: CommissionId,
    ) -> Result<Option<UpsertOutcome>, AssessmentServiceError> {
        let metadata = self
            .index
            .document(document)?
            .ok_or_else(|| AssessmentServiceError::NotFound(format!("document {document}")))?;
        let commission = self.commissions.commission(commission)?;
        let Some(draft) = self.assessor.assess_document(&metadata, &commission)? else {
            return Ok(None);
        };
        Ok(Some(self.classifications.upsert_automatic(draft)?))
    }

    pub async fn trigger_batch(
        &self,
        spec: BatchJobSpec,
        when: Dispatch,
    ) -> Result<DispatchOutcome, AssessmentServiceError> {
        Ok(self.dispatcher.dispatch(spec, when).await?)
    }

    pub fn cancel_batch(&self, task_id: &str) -> bool {
        self.dispatcher.cancel(task_id)
    }

    pub fn scheduled_batches(&self) -> Vec<String> {
        self.dispatcher.scheduled()
    }

    pub fn last_batch_report(&self, task_id: &str) -> Option<BatchReport> {
        self.dispatcher.last_report(task_id)
    }

    pub fn assess_imaginary_journal_publication(
        &self,
        request: &ImaginaryJournalPublication,
    ) -> Result<ImaginaryAssessmentResult, AssessmentServiceError> {
        Ok(self.imaginary.assess_journal_publication(request)?)
    }

    pub fn assess_imaginary_proceedings_publication(
        &self,
        request: &ImaginaryProceedingsPublication,
    ) -> Result<ImaginaryAssessmentResult, AssessmentServiceError> {
        Ok(self.imaginary.assess_proceedings_publication(request)?)
    }

    pub fn assess_researchers(
        &self,
        query: &ResearcherQuery,
    ) -> Result<Vec<ResearcherAssessment>, AssessmentServiceError> {
        self.commissions.commission(query.commission_id)?;
        Ok(self.researchers.assess_researchers(query)?)
    }

    pub fn set_default_commission(&self, id: CommissionId) -> Result<(), AssessmentServiceError> {
        Ok(self.commissions.set_default(id)?)
    }

    pub fn relations(
        &self,
        source: CommissionId,
    ) -> Result<Vec<CommissionRelation>, AssessmentServiceError> {
        Ok(self.commissions.relations(source)?)
    }

    pub fn swap_relation_priority(
        &self,
        first: RelationId,
        second: RelationId,
    ) -> Result<(), AssessmentServiceError> {
        Ok(self.commissions.swap_priority(first, second)?)
    }

    /// Result of the commission for the entity, folded over its relations' targets.
    pub fn commission_result(
        &self,
        query: &CommissionResultQuery,
    ) -> Result<AggregatedResult, AssessmentServiceError> {
        let relations = self.commissions.relations(query.commission_id)?;
        let mut per_target = BTreeMap::new();
        for target in relations.iter().flat_map(|relation| relation.targets.iter()) {
            if per_target.contains_key(target) {
                continue;
            }
            if let Some(result) = self.target_result(query, *target)? {
                per_target.insert(*target, result);
            }
        }
        Ok(self
            .aggregator
            .aggregate(query.commission_id, &relations, &per_target)?)
    }

    fn target_result(
        &self,
        query: &CommissionResultQuery,
        target: CommissionId,
    ) -> Result<Option<TargetResult>, AssessmentServiceError> {
        let years = match query.year {
            Some(year) => vec![Some(year), None],
            None => vec![None],
        };
        for year in years {
            let key = ClassificationKey {
                entity: query.entity,
                commission_id: target,
                year,
            };
            let Some(record) = self.classifications.find(&key)? else {
                continue;
            };
            return Ok(match query.measure {
                ResultMeasure::Classification => Some(TargetResult::Classification(
                    self.catalog.classification(record.classification_id)?.code,
                )),
                ResultMeasure::Points => record
                    .subject
                    .points()
                    .map(|points| TargetResult::Points(points.scaled)),
            });
        }
        Ok(None)
    }

    pub fn upsert_indicator(
        &self,
        draft: IndicatorDraft,
    ) -> Result<EntityIndicator, AssessmentServiceError> {
        Ok(self.indicators.upsert(draft)?)
    }

    pub fn indicators_for(
        &self,
        entity: EntityRef,
        clearance: AccessLevel,
    ) -> Result<Vec<EntityIndicator>, AssessmentServiceError> {
        Ok(self
            .indicators
            .find_indicators_for_subject_and_access_level(entity, clearance)?)
    }
}

/// Error raised by the assessment service.
#[derive(Debug, thiserror::Error)]
pub enum AssessmentServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Indicator(#[from] IndicatorError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Item(#[from] ItemError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Imaginary(#[from] ImaginaryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

fn repository_status(error: &RepositoryError) -> StatusCode {
    match error {
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Conflict => StatusCode::CONFLICT,
        RepositoryError::Unavailable(_) | RepositoryError::Contention(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn store_status(error: &StoreError) -> StatusCode {
    match error {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::InUse { .. } | StoreError::DuplicateCode { .. } => StatusCode::CONFLICT,
        StoreError::NotApplicable { .. }
        | StoreError::InvalidRelation(_)
        | StoreError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::Repository(inner) => repository_status(inner),
    }
}

fn resolution_status(error: &ResolutionError) -> StatusCode {
    match error {
        ResolutionError::Ambiguous { .. } | ResolutionError::UnknownClassification(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ResolutionError::Store(inner) => store_status(inner),
        ResolutionError::Ranking(RankingError::InvalidPosition { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ResolutionError::Ranking(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn points_status(error: &PointsError) -> StatusCode {
    match error {
        PointsError::RuleNotFound { .. } | PointsError::InvalidAuthorCount => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PointsError::UnknownPointRule(_) | PointsError::UnknownScalingRule(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl AssessmentServiceError {
    /// HTTP status the router answers with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AssessmentServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            AssessmentServiceError::Store(error) => store_status(error),
            AssessmentServiceError::Indicator(error) => match error {
                IndicatorError::UnknownIndicator(_) | IndicatorError::NotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                IndicatorError::DuplicateCode(_) | IndicatorError::InUse { .. } => {
                    StatusCode::CONFLICT
                }
                IndicatorError::NotApplicable { .. } | IndicatorError::InvalidWindow => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                IndicatorError::Repository(inner) => repository_status(inner),
            },
            AssessmentServiceError::Resolution(error) => resolution_status(error),
            AssessmentServiceError::Item(error) => match error {
                ItemError::Resolution(inner) => resolution_status(inner),
                ItemError::Points(inner) => points_status(inner),
                ItemError::Store(inner) => store_status(inner),
            },
            AssessmentServiceError::Aggregation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AssessmentServiceError::Imaginary(error) => match error {
                ImaginaryError::Unclassified
                | ImaginaryError::WrongPublicationType(..)
                | ImaginaryError::MissingMeasure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ImaginaryError::Resolution(inner) => resolution_status(inner),
                ImaginaryError::Points(inner) => points_status(inner),
                ImaginaryError::Store(inner) => store_status(inner),
            },
            AssessmentServiceError::Dispatch(error) => match error {
                DispatchError::Batch(BatchError::NoCommissions) => StatusCode::UNPROCESSABLE_ENTITY,
                DispatchError::Batch(BatchError::Index(_)) => StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::Batch(BatchError::Store(inner)) => store_status(inner),
                DispatchError::Scheduler(SchedulerError::InvalidInterval) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                DispatchError::Scheduler(SchedulerError::NoRuntime) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            AssessmentServiceError::Index(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
