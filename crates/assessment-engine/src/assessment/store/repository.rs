use crate::assessment::domain::{
    AssessmentClassification, AssessmentClassificationId, AssessmentMeasure, AssessmentRulebook,
    ClassificationKey, ClassificationRecordId, Commission, CommissionId, CommissionRelation,
    EntityAssessmentClassification, EntityRef, RelationId, RulebookId,
};

/// Error enumeration for persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("lock contention: {0}")]
    Contention(String),
}

impl RepositoryError {
    /// Transient failures worth retrying at a commit boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unavailable(_) | RepositoryError::Contention(_)
        )
    }
}

/// Writes visible inside one classification unit of work.
pub trait ClassificationTx {
    fn find_active(&self, key: &ClassificationKey) -> Option<EntityAssessmentClassification>;
    fn fetch(&self, id: ClassificationRecordId) -> Option<EntityAssessmentClassification>;
    /// Stores a new record; the id on the argument is replaced by a fresh one.
    fn insert(
        &mut self,
        record: EntityAssessmentClassification,
    ) -> Result<EntityAssessmentClassification, RepositoryError>;
    fn replace(&mut self, record: EntityAssessmentClassification) -> Result<(), RepositoryError>;
}

pub type ClassificationWork<'a> =
    dyn FnMut(&mut dyn ClassificationTx) -> Result<(), RepositoryError> + 'a;

/// Storage abstraction for entity classifications.
pub trait ClassificationRepository: Send + Sync {
    /// Runs `work` as one unit of work: either all of its writes persist or none do.
    fn transaction(&self, work: &mut ClassificationWork<'_>) -> Result<(), RepositoryError>;
    fn fetch(
        &self,
        id: ClassificationRecordId,
    ) -> Result<Option<EntityAssessmentClassification>, RepositoryError>;
    fn find_active(
        &self,
        key: &ClassificationKey,
    ) -> Result<Option<EntityAssessmentClassification>, RepositoryError>;
    /// Active records for an entity, optionally limited to one commission.
    fn find_for_entity(
        &self,
        entity: EntityRef,
        commission: Option<CommissionId>,
    ) -> Result<Vec<EntityAssessmentClassification>, RepositoryError>;
    fn count_by_classification(
        &self,
        classification: AssessmentClassificationId,
    ) -> Result<usize, RepositoryError>;
    fn count_by_commission(&self, commission: CommissionId) -> Result<usize, RepositoryError>;
}

/// Writes visible inside one commission unit of work.
pub trait CommissionTx {
    fn commissions(&self) -> Vec<Commission>;
    fn update_commission(&mut self, commission: Commission) -> Result<(), RepositoryError>;
    fn relation(&self, id: RelationId) -> Option<CommissionRelation>;
    fn update_relation(&mut self, relation: CommissionRelation) -> Result<(), RepositoryError>;
}

pub type CommissionWork<'a> =
    dyn FnMut(&mut dyn CommissionTx) -> Result<(), RepositoryError> + 'a;

/// Storage abstraction for commissions and their relations.
pub trait CommissionRepository: Send + Sync {
    fn transaction(&self, work: &mut CommissionWork<'_>) -> Result<(), RepositoryError>;
    fn insert(&self, commission: Commission) -> Result<Commission, RepositoryError>;
    fn update(&self, commission: Commission) -> Result<(), RepositoryError>;
    fn fetch(&self, id: CommissionId) -> Result<Option<Commission>, RepositoryError>;
    fn list(&self) -> Result<Vec<Commission>, RepositoryError>;
    fn delete(&self, id: CommissionId) -> Result<(), RepositoryError>;
    fn insert_relation(
        &self,
        relation: CommissionRelation,
    ) -> Result<CommissionRelation, RepositoryError>;
    /// Relations leaving `source`, ordered by ascending priority.
    fn relations_for_source(
        &self,
        source: CommissionId,
    ) -> Result<Vec<CommissionRelation>, RepositoryError>;
    fn delete_relation(&self, id: RelationId) -> Result<(), RepositoryError>;
    /// Relations naming the commission as source or target.
    fn count_relations_referencing(&self, id: CommissionId) -> Result<usize, RepositoryError>;
}

/// Storage abstraction for classification definitions, rulebooks and measures.
pub trait CatalogRepository: Send + Sync {
    fn insert_classification(
        &self,
        classification: AssessmentClassification,
    ) -> Result<AssessmentClassification, RepositoryError>;
    fn classification(
        &self,
        id: AssessmentClassificationId,
    ) -> Result<Option<AssessmentClassification>, RepositoryError>;
    fn classification_by_code(
        &self,
        code: &str,
    ) -> Result<Option<AssessmentClassification>, RepositoryError>;
    fn classifications(&self) -> Result<Vec<AssessmentClassification>, RepositoryError>;
    fn delete_classification(&self, id: AssessmentClassificationId) -> Result<(), RepositoryError>;
    fn insert_rulebook(
        &self,
        rulebook: AssessmentRulebook,
    ) -> Result<AssessmentRulebook, RepositoryError>;
    fn rulebooks(&self) -> Result<Vec<AssessmentRulebook>, RepositoryError>;
    fn insert_measure(
        &self,
        measure: AssessmentMeasure,
    ) -> Result<AssessmentMeasure, RepositoryError>;
    fn measures_for_rulebook(
        &self,
        rulebook: RulebookId,
    ) -> Result<Vec<AssessmentMeasure>, RepositoryError>;
}
