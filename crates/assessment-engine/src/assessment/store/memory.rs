//! In-memory repositories used by the API binary and the test suites.
//!
//! Each repository keeps its state behind one mutex. Units of work run against a
//! cloned snapshot that replaces the live state only when the work succeeds, which
//! gives the same all-or-nothing behavior a database transaction provides.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::assessment::domain::{
    AssessmentClassification, AssessmentClassificationId, AssessmentMeasure, AssessmentRulebook,
    ClassificationKey, ClassificationRecordId, Commission, CommissionId, CommissionRelation,
    EntityAssessmentClassification, EntityIndicator, EntityRef, Indicator, IndicatorRecordId,
    IndicatorSource, IndicatorSubject, MeasureId, RelationId, RulebookId,
};
use crate::assessment::indicators::{IndicatorRepository, IndicatorTx, IndicatorWork};

use super::repository::{
    CatalogRepository, ClassificationRepository, ClassificationTx, ClassificationWork,
    CommissionRepository, CommissionTx, CommissionWork, RepositoryError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default, Clone)]
struct ClassificationState {
    records: BTreeMap<ClassificationRecordId, EntityAssessmentClassification>,
    next_id: u64,
}

impl ClassificationState {
    fn active_for(&self, key: &ClassificationKey) -> Option<&EntityAssessmentClassification> {
        self.records
            .values()
            .find(|record| record.is_active() && record.key() == *key)
    }
}

impl ClassificationTx for ClassificationState {
    fn find_active(&self, key: &ClassificationKey) -> Option<EntityAssessmentClassification> {
        self.active_for(key).cloned()
    }

    fn fetch(&self, id: ClassificationRecordId) -> Option<EntityAssessmentClassification> {
        self.records.get(&id).cloned()
    }

    fn insert(
        &mut self,
        mut record: EntityAssessmentClassification,
    ) -> Result<EntityAssessmentClassification, RepositoryError> {
        if record.is_active() && self.active_for(&record.key()).is_some() {
            return Err(RepositoryError::Conflict);
        }
        self.next_id += 1;
        record.id = ClassificationRecordId(self.next_id);
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn replace(&mut self, record: EntityAssessmentClassification) -> Result<(), RepositoryError> {
        match self.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }
}

/// Classification repository with optional injected commit failures.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClassificationRepository {
    state: Arc<Mutex<ClassificationState>>,
    failures: Arc<Mutex<VecDeque<RepositoryError>>>,
}

impl InMemoryClassificationRepository {
    /// Queues errors returned by the next units of work, one per call.
    pub fn fail_next_transactions(&self, errors: impl IntoIterator<Item = RepositoryError>) {
        lock(&self.failures).extend(errors);
    }

    /// Every stored row, including logically deleted ones.
    pub fn all_records(&self) -> Vec<EntityAssessmentClassification> {
        lock(&self.state).records.values().cloned().collect()
    }

    pub fn active_records(&self) -> Vec<EntityAssessmentClassification> {
        lock(&self.state)
            .records
            .values()
            .filter(|record| record.is_active())
            .cloned()
            .collect()
    }
}

impl ClassificationRepository for InMemoryClassificationRepository {
    fn transaction(&self, work: &mut ClassificationWork<'_>) -> Result<(), RepositoryError> {
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }

        let mut guard = lock(&self.state);
        let mut snapshot = guard.clone();
        let tx: &mut dyn ClassificationTx = &mut snapshot;
        work(tx)?;
        *guard = snapshot;
        Ok(())
    }

    fn fetch(
        &self,
        id: ClassificationRecordId,
    ) -> Result<Option<EntityAssessmentClassification>, RepositoryError> {
        Ok(lock(&self.state).records.get(&id).cloned())
    }

    fn find_active(
        &self,
        key: &ClassificationKey,
    ) -> Result<Option<EntityAssessmentClassification>, RepositoryError> {
        Ok(lock(&self.state).active_for(key).cloned())
    }

    fn find_for_entity(
        &self,
        entity: EntityRef,
        commission: Option<CommissionId>,
    ) -> Result<Vec<EntityAssessmentClassification>, RepositoryError> {
        Ok(lock(&self.state)
            .records
            .values()
            .filter(|record| record.is_active() && record.subject.entity() == entity)
            .filter(|record| commission.map_or(true, |id| record.commission_id == id))
            .cloned()
            .collect())
    }

    fn count_by_classification(
        &self,
        classification: AssessmentClassificationId,
    ) -> Result<usize, RepositoryError> {
        Ok(lock(&self.state)
            .records
            .values()
            .filter(|record| record.is_active() && record.classification_id == classification)
            .count())
    }

    fn count_by_commission(&self, commission: CommissionId) -> Result<usize, RepositoryError> {
        Ok(lock(&self.state)
            .records
            .values()
            .filter(|record| record.is_active() && record.commission_id == commission)
            .count())
    }
}

#[derive(Debug, Default, Clone)]
struct CommissionState {
    commissions: BTreeMap<CommissionId, Commission>,
    relations: BTreeMap<RelationId, CommissionRelation>,
    next_commission: u64,
    next_relation: u64,
}

impl CommissionTx for CommissionState {
    fn commissions(&self) -> Vec<Commission> {
        self.commissions.values().cloned().collect()
    }

    fn update_commission(&mut self, commission: Commission) -> Result<(), RepositoryError> {
        match self.commissions.get_mut(&commission.id) {
            Some(existing) => {
                *existing = commission;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn relation(&self, id: RelationId) -> Option<CommissionRelation> {
        self.relations.get(&id).cloned()
    }

    fn update_relation(&mut self, relation: CommissionRelation) -> Result<(), RepositoryError> {
        match self.relations.get_mut(&relation.id) {
            Some(existing) => {
                *existing = relation;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCommissionRepository {
    state: Arc<Mutex<CommissionState>>,
}

impl CommissionRepository for InMemoryCommissionRepository {
    fn transaction(&self, work: &mut CommissionWork<'_>) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.state);
        let mut snapshot = guard.clone();
        let tx: &mut dyn CommissionTx = &mut snapshot;
        work(tx)?;
        *guard = snapshot;
        Ok(())
    }

    fn insert(&self, mut commission: Commission) -> Result<Commission, RepositoryError> {
        let mut guard = lock(&self.state);
        guard.next_commission += 1;
        commission.id = CommissionId(guard.next_commission);
        guard.commissions.insert(commission.id, commission.clone());
        Ok(commission)
    }

    fn update(&self, commission: Commission) -> Result<(), RepositoryError> {
        lock(&self.state).update_commission(commission)
    }

    fn fetch(&self, id: CommissionId) -> Result<Option<Commission>, RepositoryError> {
        Ok(lock(&self.state).commissions.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Commission>, RepositoryError> {
        Ok(lock(&self.state).commissions())
    }

    fn delete(&self, id: CommissionId) -> Result<(), RepositoryError> {
        lock(&self.state)
            .commissions
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn insert_relation(
        &self,
        mut relation: CommissionRelation,
    ) -> Result<CommissionRelation, RepositoryError> {
        let mut guard = lock(&self.state);
        let duplicate_priority = guard.relations.values().any(|existing| {
            existing.source == relation.source && existing.priority == relation.priority
        });
        if duplicate_priority {
            return Err(RepositoryError::Conflict);
        }
        guard.next_relation += 1;
        relation.id = RelationId(guard.next_relation);
        guard.relations.insert(relation.id, relation.clone());
        Ok(relation)
    }

    fn relations_for_source(
        &self,
        source: CommissionId,
    ) -> Result<Vec<CommissionRelation>, RepositoryError> {
        let mut relations: Vec<CommissionRelation> = lock(&self.state)
            .relations
            .values()
            .filter(|relation| relation.source == source)
            .cloned()
            .collect();
        relations.sort_by_key(|relation| (relation.priority, relation.id));
        Ok(relations)
    }

    fn delete_relation(&self, id: RelationId) -> Result<(), RepositoryError> {
        lock(&self.state)
            .relations
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn count_relations_referencing(&self, id: CommissionId) -> Result<usize, RepositoryError> {
        Ok(lock(&self.state)
            .relations
            .values()
            .filter(|relation| relation.source == id || relation.targets.contains(&id))
            .count())
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    classifications: BTreeMap<AssessmentClassificationId, AssessmentClassification>,
    rulebooks: BTreeMap<RulebookId, AssessmentRulebook>,
    measures: BTreeMap<MeasureId, AssessmentMeasure>,
    next_id: u64,
}

impl CatalogState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalogRepository {
    state: Arc<Mutex<CatalogState>>,
}

impl CatalogRepository for InMemoryCatalogRepository {
    fn insert_classification(
        &self,
        mut classification: AssessmentClassification,
    ) -> Result<AssessmentClassification, RepositoryError> {
        let mut guard = lock(&self.state);
        if guard
            .classifications
            .values()
            .any(|existing| existing.code == classification.code)
        {
            return Err(RepositoryError::Conflict);
        }
        classification.id = AssessmentClassificationId(guard.next());
        guard
            .classifications
            .insert(classification.id, classification.clone());
        Ok(classification)
    }

    fn classification(
        &self,
        id: AssessmentClassificationId,
    ) -> Result<Option<AssessmentClassification>, RepositoryError> {
        Ok(lock(&self.state).classifications.get(&id).cloned())
    }

    fn classification_by_code(
        &self,
        code: &str,
    ) -> Result<Option<AssessmentClassification>, RepositoryError> {
        Ok(lock(&self.state)
            .classifications
            .values()
            .find(|classification| classification.code == code)
            .cloned())
    }

    fn classifications(&self) -> Result<Vec<AssessmentClassification>, RepositoryError> {
        Ok(lock(&self.state).classifications.values().cloned().collect())
    }

    fn delete_classification(&self, id: AssessmentClassificationId) -> Result<(), RepositoryError> {
        lock(&self.state)
            .classifications
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn insert_rulebook(
        &self,
        mut rulebook: AssessmentRulebook,
    ) -> Result<AssessmentRulebook, RepositoryError> {
        let mut guard = lock(&self.state);
        rulebook.id = RulebookId(guard.next());
        guard.rulebooks.insert(rulebook.id, rulebook.clone());
        Ok(rulebook)
    }

    fn rulebooks(&self) -> Result<Vec<AssessmentRulebook>, RepositoryError> {
        Ok(lock(&self.state).rulebooks.values().cloned().collect())
    }

    fn insert_measure(
        &self,
        mut measure: AssessmentMeasure,
    ) -> Result<AssessmentMeasure, RepositoryError> {
        let mut guard = lock(&self.state);
        if !guard.rulebooks.contains_key(&measure.rulebook_id) {
            return Err(RepositoryError::NotFound);
        }
        measure.id = MeasureId(guard.next());
        guard.measures.insert(measure.id, measure.clone());
        Ok(measure)
    }

    fn measures_for_rulebook(
        &self,
        rulebook: RulebookId,
    ) -> Result<Vec<AssessmentMeasure>, RepositoryError> {
        Ok(lock(&self.state)
            .measures
            .values()
            .filter(|measure| measure.rulebook_id == rulebook)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default, Clone)]
struct IndicatorState {
    definitions: BTreeMap<String, Indicator>,
    values: BTreeMap<IndicatorRecordId, EntityIndicator>,
    next_id: u64,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryIndicatorRepository {
    state: Arc<Mutex<IndicatorState>>,
}

impl IndicatorTx for IndicatorState {
    fn find_value(
        &self,
        subject: &IndicatorSubject,
        code: &str,
        source: &IndicatorSource,
    ) -> Option<EntityIndicator> {
        self.values
            .values()
            .find(|value| {
                !value.deleted
                    && value.subject == *subject
                    && value.indicator_code == code
                    && value.source == *source
            })
            .cloned()
    }

    fn insert_value(&mut self, mut value: EntityIndicator) -> EntityIndicator {
        self.next_id += 1;
        value.id = IndicatorRecordId(self.next_id);
        self.values.insert(value.id, value.clone());
        value
    }

    fn replace_value(&mut self, value: EntityIndicator) -> Result<(), RepositoryError> {
        match self.values.get_mut(&value.id) {
            Some(existing) => {
                *existing = value;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }
}

impl IndicatorRepository for InMemoryIndicatorRepository {
    fn transaction(&self, work: &mut IndicatorWork<'_>) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.state);
        let mut snapshot = guard.clone();
        let tx: &mut dyn IndicatorTx = &mut snapshot;
        work(tx)?;
        *guard = snapshot;
        Ok(())
    }

    fn insert_definition(&self, indicator: Indicator) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.state);
        if guard.definitions.contains_key(&indicator.code) {
            return Err(RepositoryError::Conflict);
        }
        guard.definitions.insert(indicator.code.clone(), indicator);
        Ok(())
    }

    fn definition(&self, code: &str) -> Result<Option<Indicator>, RepositoryError> {
        Ok(lock(&self.state).definitions.get(code).cloned())
    }

    fn definitions(&self) -> Result<Vec<Indicator>, RepositoryError> {
        Ok(lock(&self.state).definitions.values().cloned().collect())
    }

    fn delete_definition(&self, code: &str) -> Result<(), RepositoryError> {
        lock(&self.state)
            .definitions
            .remove(code)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn value(&self, id: IndicatorRecordId) -> Result<Option<EntityIndicator>, RepositoryError> {
        Ok(lock(&self.state).values.get(&id).cloned())
    }

    fn replace_value(&self, value: EntityIndicator) -> Result<(), RepositoryError> {
        lock(&self.state).replace_value(value)
    }

    fn values_for_entity(
        &self,
        entity: EntityRef,
    ) -> Result<Vec<EntityIndicator>, RepositoryError> {
        Ok(lock(&self.state)
            .values
            .values()
            .filter(|value| !value.deleted && value.subject.entity() == entity)
            .cloned()
            .collect())
    }

    fn count_values(&self, code: &str) -> Result<usize, RepositoryError> {
        Ok(lock(&self.state)
            .values
            .values()
            .filter(|value| !value.deleted && value.indicator_code == code)
            .count())
    }
}
