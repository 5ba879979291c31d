use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assessment::domain::{
    AssessmentClassificationId, ClassificationKey, ClassificationRecordId, ClassificationSubject,
    CommissionId, EntityAssessmentClassification, EntityRef,
};

use super::repository::{
    CatalogRepository, ClassificationRepository, ClassificationTx, RepositoryError,
};
use super::StoreError;

/// Classification about to be written for one (entity, commission, year) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationDraft {
    pub subject: ClassificationSubject,
    pub commission_id: CommissionId,
    pub classification_id: AssessmentClassificationId,
    pub year: Option<i32>,
}

impl ClassificationDraft {
    pub fn key(&self) -> ClassificationKey {
        ClassificationKey {
            entity: self.subject.entity(),
            commission_id: self.commission_id,
            year: self.year,
        }
    }

    fn into_record(self, manual: bool, timestamp: DateTime<Utc>) -> EntityAssessmentClassification {
        EntityAssessmentClassification {
            id: ClassificationRecordId(0),
            subject: self.subject,
            commission_id: self.commission_id,
            classification_id: self.classification_id,
            classification_year: self.year,
            timestamp,
            manual,
            deleted: false,
        }
    }
}

/// Result of an automatic write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted(EntityAssessmentClassification),
    Replaced(EntityAssessmentClassification),
    /// Identical automatic record already stored; nothing was written.
    Unchanged(EntityAssessmentClassification),
    /// A manual record holds the key; the automatic result was discarded.
    SkippedManualOverride(EntityAssessmentClassification),
}

impl UpsertOutcome {
    pub fn record(&self) -> &EntityAssessmentClassification {
        match self {
            UpsertOutcome::Inserted(record)
            | UpsertOutcome::Replaced(record)
            | UpsertOutcome::Unchanged(record)
            | UpsertOutcome::SkippedManualOverride(record) => record,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted(_) => "inserted",
            UpsertOutcome::Replaced(_) => "replaced",
            UpsertOutcome::Unchanged(_) => "unchanged",
            UpsertOutcome::SkippedManualOverride(_) => "skipped: manual override present",
        }
    }
}

fn apply_automatic(
    tx: &mut dyn ClassificationTx,
    draft: &ClassificationDraft,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, RepositoryError> {
    match tx.find_active(&draft.key()) {
        Some(existing) if existing.manual => Ok(UpsertOutcome::SkippedManualOverride(existing)),
        Some(existing)
            if existing.classification_id == draft.classification_id
                && existing.subject == draft.subject =>
        {
            Ok(UpsertOutcome::Unchanged(existing))
        }
        Some(mut existing) => {
            existing.classification_id = draft.classification_id;
            existing.subject = draft.subject.clone();
            existing.timestamp = now;
            tx.replace(existing.clone())?;
            Ok(UpsertOutcome::Replaced(existing))
        }
        None => {
            let record = tx.insert(draft.clone().into_record(false, now))?;
            Ok(UpsertOutcome::Inserted(record))
        }
    }
}

/// Write path enforcing the manual-over-automatic precedence per key.
#[derive(Clone)]
pub struct EntityClassificationStore {
    repository: Arc<dyn ClassificationRepository>,
    catalog: Arc<dyn CatalogRepository>,
}

impl EntityClassificationStore {
    pub fn new(
        repository: Arc<dyn ClassificationRepository>,
        catalog: Arc<dyn CatalogRepository>,
    ) -> Self {
        Self {
            repository,
            catalog,
        }
    }

    fn ensure_applicable(&self, draft: &ClassificationDraft) -> Result<(), StoreError> {
        let classification = self
            .catalog
            .classification(draft.classification_id)?
            .ok_or_else(|| StoreError::not_found("classification", draft.classification_id))?;
        let kind = draft.subject.entity().kind();
        if classification.applies_to(kind) {
            Ok(())
        } else {
            Err(StoreError::NotApplicable {
                code: classification.code,
                kind: kind.label(),
            })
        }
    }

    /// Writes an automatic result unless a manual record holds the key.
    pub fn upsert_automatic(
        &self,
        draft: ClassificationDraft,
    ) -> Result<UpsertOutcome, StoreError> {
        self.ensure_applicable(&draft)?;

        let now = Utc::now();
        let mut outcome = None;
        self.repository.transaction(&mut |tx| {
            outcome = Some(apply_automatic(tx, &draft, now)?);
            Ok(())
        })?;

        let outcome = outcome.ok_or(RepositoryError::Unavailable(
            "unit of work finished without running".to_string(),
        ))?;
        debug!(key = ?draft.key(), outcome = outcome.label(), "automatic classification upsert");
        Ok(outcome)
    }

    /// Writes every draft of a chunk in a single unit of work.
    pub fn commit_automatic_chunk(
        &self,
        drafts: &[ClassificationDraft],
    ) -> Result<Vec<UpsertOutcome>, RepositoryError> {
        let now = Utc::now();
        let mut outcomes = Vec::with_capacity(drafts.len());
        self.repository.transaction(&mut |tx| {
            outcomes.clear();
            for draft in drafts {
                outcomes.push(apply_automatic(tx, draft, now)?);
            }
            Ok(())
        })?;
        Ok(outcomes)
    }

    /// Stores an editor's classification; it replaces whatever holds the key.
    pub fn save_manual(
        &self,
        draft: ClassificationDraft,
    ) -> Result<EntityAssessmentClassification, StoreError> {
        self.ensure_applicable(&draft)?;

        let now = Utc::now();
        let mut saved = None;
        self.repository.transaction(&mut |tx| {
            let record = match tx.find_active(&draft.key()) {
                Some(mut existing) => {
                    existing.classification_id = draft.classification_id;
                    existing.subject = draft.subject.clone();
                    existing.manual = true;
                    existing.timestamp = now;
                    tx.replace(existing.clone())?;
                    existing
                }
                None => tx.insert(draft.clone().into_record(true, now))?,
            };
            saved = Some(record);
            Ok(())
        })?;

        saved.ok_or_else(|| {
            StoreError::Repository(RepositoryError::Unavailable(
                "unit of work finished without running".to_string(),
            ))
        })
    }

    /// Logical delete; the key becomes free for new records.
    pub fn delete_entity_assessment_classification(
        &self,
        id: ClassificationRecordId,
    ) -> Result<(), StoreError> {
        let mut found = false;
        self.repository.transaction(&mut |tx| {
            match tx.fetch(id) {
                Some(mut record) if record.is_active() => {
                    record.deleted = true;
                    tx.replace(record)?;
                    found = true;
                }
                _ => found = false,
            }
            Ok(())
        })?;

        if found {
            debug!(%id, "classification logically deleted");
            Ok(())
        } else {
            Err(StoreError::not_found("entity classification", id))
        }
    }

    pub fn fetch(
        &self,
        id: ClassificationRecordId,
    ) -> Result<Option<EntityAssessmentClassification>, StoreError> {
        Ok(self
            .repository
            .fetch(id)?
            .filter(EntityAssessmentClassification::is_active))
    }

    pub fn find(
        &self,
        key: &ClassificationKey,
    ) -> Result<Option<EntityAssessmentClassification>, StoreError> {
        Ok(self.repository.find_active(key)?)
    }

    pub fn find_for_entity(
        &self,
        entity: EntityRef,
        commission: Option<CommissionId>,
    ) -> Result<Vec<EntityAssessmentClassification>, StoreError> {
        Ok(self.repository.find_for_entity(entity, commission)?)
    }
}
