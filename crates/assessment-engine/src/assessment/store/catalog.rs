use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;

use crate::assessment::domain::{
    AssessmentClassification, AssessmentClassificationId, AssessmentMeasure, AssessmentRulebook,
    EntityKind, MeasureId, MultiLingualText, RulebookId,
};
use crate::assessment::rules::RuleRegistry;

use super::repository::{CatalogRepository, ClassificationRepository, RepositoryError};
use super::StoreError;

/// Classification definitions, rulebooks and their measures.
#[derive(Clone)]
pub struct CatalogStore {
    catalog: Arc<dyn CatalogRepository>,
    classifications: Arc<dyn ClassificationRepository>,
}

impl CatalogStore {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        classifications: Arc<dyn ClassificationRepository>,
    ) -> Self {
        Self {
            catalog,
            classifications,
        }
    }

    pub fn create_classification(
        &self,
        classification: AssessmentClassification,
    ) -> Result<AssessmentClassification, StoreError> {
        let code = classification.code.trim().to_string();
        if code.is_empty() {
            return Err(StoreError::Invalid(
                "classification code must not be empty".to_string(),
            ));
        }
        match self.catalog.insert_classification(AssessmentClassification {
            code: code.clone(),
            ..classification
        }) {
            Ok(stored) => Ok(stored),
            Err(RepositoryError::Conflict) => Err(StoreError::DuplicateCode {
                what: "classification",
                code,
            }),
            Err(error) => Err(error.into()),
        }
    }

    pub fn classification(
        &self,
        id: AssessmentClassificationId,
    ) -> Result<AssessmentClassification, StoreError> {
        self.catalog
            .classification(id)?
            .ok_or_else(|| StoreError::not_found("classification", id))
    }

    pub fn classification_by_code(
        &self,
        code: &str,
    ) -> Result<Option<AssessmentClassification>, StoreError> {
        Ok(self.catalog.classification_by_code(code)?)
    }

    pub fn classifications(&self) -> Result<Vec<AssessmentClassification>, StoreError> {
        Ok(self.catalog.classifications()?)
    }

    /// Only active classification records count as references.
    pub fn delete_classification(&self, id: AssessmentClassificationId) -> Result<(), StoreError> {
        let classification = self.classification(id)?;
        let references = self.classifications.count_by_classification(id)?;
        if references > 0 {
            return Err(StoreError::InUse {
                what: "classification",
                id: id.0,
                references,
            });
        }
        self.catalog.delete_classification(id)?;
        info!(code = %classification.code, "classification deleted");
        Ok(())
    }

    pub fn create_rulebook(
        &self,
        rulebook: AssessmentRulebook,
    ) -> Result<AssessmentRulebook, StoreError> {
        Ok(self.catalog.insert_rulebook(rulebook)?)
    }

    pub fn rulebooks(&self) -> Result<Vec<AssessmentRulebook>, StoreError> {
        Ok(self.catalog.rulebooks()?)
    }

    /// Most recently registered default rulebook.
    pub fn default_rulebook(&self) -> Result<Option<AssessmentRulebook>, StoreError> {
        Ok(self
            .catalog
            .rulebooks()?
            .into_iter()
            .filter(|rulebook| rulebook.is_default)
            .max_by_key(|rulebook| rulebook.id))
    }

    pub fn create_measure(
        &self,
        measure: AssessmentMeasure,
    ) -> Result<AssessmentMeasure, StoreError> {
        let rulebook = measure.rulebook_id;
        match self.catalog.insert_measure(measure) {
            Ok(stored) => Ok(stored),
            Err(RepositoryError::NotFound) => Err(StoreError::not_found("rulebook", rulebook)),
            Err(error) => Err(error.into()),
        }
    }

    pub fn measures(&self, rulebook: RulebookId) -> Result<Vec<AssessmentMeasure>, StoreError> {
        Ok(self.catalog.measures_for_rulebook(rulebook)?)
    }

    /// Measure for a classification code, looked up in `rulebook` first and then in
    /// the default rulebook.
    pub fn measure_for(
        &self,
        rulebook: Option<RulebookId>,
        code: &str,
    ) -> Result<Option<AssessmentMeasure>, StoreError> {
        if let Some(rulebook) = rulebook {
            if let Some(measure) = self.find_measure(rulebook, code)? {
                return Ok(Some(measure));
            }
        }
        match self.default_rulebook()? {
            Some(default) if Some(default.id) != rulebook => self.find_measure(default.id, code),
            _ => Ok(None),
        }
    }

    /// Registers `rulebook` with one measure per code of `point_rule`, creating the
    /// classifications the registry mentions that are not in the catalog yet.
    pub fn install_rulebook(
        &self,
        rules: &RuleRegistry,
        rulebook: AssessmentRulebook,
        point_rule: &str,
        scaling_rule: &str,
    ) -> Result<AssessmentRulebook, StoreError> {
        let table = rules
            .point_rules
            .get(point_rule)
            .ok_or_else(|| StoreError::Invalid(format!("unknown point rule {point_rule}")))?;
        if !rules.scaling_rules.contains_key(scaling_rule) {
            return Err(StoreError::Invalid(format!(
                "unknown scaling rule {scaling_rule}"
            )));
        }

        let mut applicable: BTreeMap<String, BTreeSet<EntityKind>> = BTreeMap::new();
        for tier in &rules.journal_tiers {
            applicable
                .entry(tier.code.clone())
                .or_default()
                .extend([EntityKind::Document, EntityKind::PublicationSeries]);
        }
        for rule in &rules.document_rules {
            applicable
                .entry(rule.code.clone())
                .or_default()
                .insert(EntityKind::Document);
            if let Some(event_code) = &rule.event_code {
                applicable
                    .entry(event_code.clone())
                    .or_default()
                    .insert(EntityKind::Event);
            }
        }
        for entry in &table.entries {
            applicable
                .entry(entry.classification_code.clone())
                .or_default()
                .insert(EntityKind::Document);
        }

        for (code, kinds) in applicable {
            if self.classification_by_code(&code)?.is_some() {
                continue;
            }
            self.create_classification(AssessmentClassification {
                id: AssessmentClassificationId(0),
                title: category_title(&code),
                formal_description_of_rule: MultiLingualText::new(),
                applicable_types: kinds,
                code,
            })?;
        }

        let rulebook = self.create_rulebook(rulebook)?;
        let codes: BTreeSet<&str> = table
            .entries
            .iter()
            .map(|entry| entry.classification_code.as_str())
            .collect();
        for code in codes {
            self.create_measure(AssessmentMeasure {
                id: MeasureId(0),
                rulebook_id: rulebook.id,
                code: code.to_string(),
                title: category_title(code),
                point_rule: point_rule.to_string(),
                scaling_rule: scaling_rule.to_string(),
            })?;
        }
        info!(rulebook = %rulebook.id, point_rule, "rulebook installed");
        Ok(rulebook)
    }

    fn find_measure(
        &self,
        rulebook: RulebookId,
        code: &str,
    ) -> Result<Option<AssessmentMeasure>, StoreError> {
        Ok(self
            .catalog
            .measures_for_rulebook(rulebook)?
            .into_iter()
            .find(|measure| measure.code.eq_ignore_ascii_case(code)))
    }
}

fn category_title(code: &str) -> MultiLingualText {
    MultiLingualText::bilingual(format!("Category {code}"), format!("Kategorija {code}"))
}
