//! Raw indicator values (impact factors, ranks, citation counts) held per entity.
//!
//! Reads are filtered by the caller's clearance: values whose definition sits above
//! the given [`AccessLevel`] are left out of the result instead of failing the call.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{
    AccessLevel, EntityIndicator, EntityRef, Indicator, IndicatorRecordId, IndicatorSource,
    IndicatorSubject, IndicatorValue,
};
use super::store::RepositoryError;

/// Value reads and writes visible inside one indicator unit of work.
pub trait IndicatorTx {
    /// Active value for the (subject, code, source) key.
    fn find_value(
        &self,
        subject: &IndicatorSubject,
        code: &str,
        source: &IndicatorSource,
    ) -> Option<EntityIndicator>;
    /// Stores a new value; the id on the argument is replaced by a fresh one.
    fn insert_value(&mut self, value: EntityIndicator) -> EntityIndicator;
    fn replace_value(&mut self, value: EntityIndicator) -> Result<(), RepositoryError>;
}

pub type IndicatorWork<'a> = dyn FnMut(&mut dyn IndicatorTx) -> Result<(), RepositoryError> + 'a;

/// Persistence collaborator for indicator definitions and values.
pub trait IndicatorRepository: Send + Sync {
    /// Runs `work` as one unit of work: either all of its writes persist or none do.
    fn transaction(&self, work: &mut IndicatorWork<'_>) -> Result<(), RepositoryError>;
    fn insert_definition(&self, indicator: Indicator) -> Result<(), RepositoryError>;
    fn definition(&self, code: &str) -> Result<Option<Indicator>, RepositoryError>;
    fn definitions(&self) -> Result<Vec<Indicator>, RepositoryError>;
    fn delete_definition(&self, code: &str) -> Result<(), RepositoryError>;
    fn value(&self, id: IndicatorRecordId) -> Result<Option<EntityIndicator>, RepositoryError>;
    fn replace_value(&self, value: EntityIndicator) -> Result<(), RepositoryError>;
    /// Active values attached to the entity, whatever their subject scoping.
    fn values_for_entity(&self, entity: EntityRef) -> Result<Vec<EntityIndicator>, RepositoryError>;
    fn count_values(&self, code: &str) -> Result<usize, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum IndicatorError {
    #[error("unknown indicator {0}")]
    UnknownIndicator(String),
    #[error("indicator {0} already defined")]
    DuplicateCode(String),
    #[error("indicator {code} is not applicable to {kind}")]
    NotApplicable { code: String, kind: &'static str },
    #[error("indicator value {0} not found")]
    NotFound(IndicatorRecordId),
    #[error("indicator {code} is still referenced by {references} value(s)")]
    InUse { code: String, references: usize },
    #[error("indicator validity window ends before it starts")]
    InvalidWindow,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Value to store for one (subject, indicator, source) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDraft {
    pub indicator_code: String,
    pub subject: IndicatorSubject,
    pub value: IndicatorValue,
    #[serde(default)]
    pub from_date: Option<NaiveDate>,
    #[serde(default)]
    pub to_date: Option<NaiveDate>,
    pub source: IndicatorSource,
    #[serde(default)]
    pub proofs: Vec<String>,
}

#[derive(Clone)]
pub struct IndicatorStore {
    repository: Arc<dyn IndicatorRepository>,
}

impl IndicatorStore {
    pub fn new(repository: Arc<dyn IndicatorRepository>) -> Self {
        Self { repository }
    }

    pub fn define_indicator(&self, indicator: Indicator) -> Result<Indicator, IndicatorError> {
        match self.repository.insert_definition(indicator.clone()) {
            Ok(()) => Ok(indicator),
            Err(RepositoryError::Conflict) => Err(IndicatorError::DuplicateCode(indicator.code)),
            Err(error) => Err(error.into()),
        }
    }

    pub fn indicator(&self, code: &str) -> Result<Indicator, IndicatorError> {
        self.repository
            .definition(code)?
            .ok_or_else(|| IndicatorError::UnknownIndicator(code.to_string()))
    }

    pub fn indicators(&self) -> Result<Vec<Indicator>, IndicatorError> {
        Ok(self.repository.definitions()?)
    }

    /// Replaces the value held for the draft's key, or stores a new one.
    pub fn upsert(&self, draft: IndicatorDraft) -> Result<EntityIndicator, IndicatorError> {
        let definition = self.indicator(&draft.indicator_code)?;
        let kind = draft.subject.entity().kind();
        if !definition.applicable_types.contains(&kind) {
            return Err(IndicatorError::NotApplicable {
                code: definition.code,
                kind: kind.label(),
            });
        }
        if let (Some(from), Some(to)) = (draft.from_date, draft.to_date) {
            if to < from {
                return Err(IndicatorError::InvalidWindow);
            }
        }

        let now = Utc::now();
        let mut stored = None;
        self.repository.transaction(&mut |tx| {
            let existing = tx.find_value(&draft.subject, &draft.indicator_code, &draft.source);
            let value = match existing {
                Some(mut current) => {
                    current.value = draft.value.clone();
                    current.from_date = draft.from_date;
                    current.to_date = draft.to_date;
                    current.proofs = draft.proofs.clone();
                    current.timestamp = now;
                    tx.replace_value(current.clone())?;
                    current
                }
                None => tx.insert_value(EntityIndicator {
                    id: IndicatorRecordId(0),
                    indicator_code: draft.indicator_code.clone(),
                    subject: draft.subject.clone(),
                    value: draft.value.clone(),
                    from_date: draft.from_date,
                    to_date: draft.to_date,
                    source: draft.source.clone(),
                    proofs: draft.proofs.clone(),
                    timestamp: now,
                    deleted: false,
                }),
            };
            stored = Some(value);
            Ok(())
        })?;
        let stored = stored.ok_or(RepositoryError::NotFound)?;
        debug!(id = %stored.id, code = %stored.indicator_code, "indicator value stored");
        Ok(stored)
    }

    /// Values of the entity the caller may read; anything above `clearance` is omitted.
    pub fn find_indicators_for_subject_and_access_level(
        &self,
        entity: EntityRef,
        clearance: AccessLevel,
    ) -> Result<Vec<EntityIndicator>, IndicatorError> {
        let definitions = self.repository.definitions()?;
        let readable = |code: &str| {
            definitions
                .iter()
                .any(|definition| definition.code == code && definition.access_level <= clearance)
        };

        Ok(self
            .repository
            .values_for_entity(entity)?
            .into_iter()
            .filter(|value| readable(&value.indicator_code))
            .collect())
    }

    pub fn delete_indicator_value(&self, id: IndicatorRecordId) -> Result<(), IndicatorError> {
        let mut value = self
            .repository
            .value(id)?
            .filter(|value| !value.deleted)
            .ok_or(IndicatorError::NotFound(id))?;
        value.deleted = true;
        self.repository.replace_value(value)?;
        Ok(())
    }

    /// Rejected while any active value still uses the definition.
    pub fn delete_indicator(&self, code: &str) -> Result<(), IndicatorError> {
        self.indicator(code)?;
        let references = self.repository.count_values(code)?;
        if references > 0 {
            return Err(IndicatorError::InUse {
                code: code.to_string(),
                references,
            });
        }
        self.repository.delete_definition(code)?;
        Ok(())
    }
}
