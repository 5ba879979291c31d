//! Per-researcher breakdown of classified publications.
//!
//! Category order comes from an injected priority table: known codes in table
//! order, then unknown codes alphabetically. Output is identical for identical
//! inputs, whatever order the underlying records come back in.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{
    CommissionId, DocumentId, DocumentMetadata, EntityRef, MultiLingualText, OrganisationUnitId,
    PersonId,
};
use super::points::floor_to_cents;
use super::rules::RuleRegistry;
use super::store::{CatalogStore, EntityClassificationStore, StoreError};

/// Source of the documents a person authored.
pub trait AuthorshipLookup: Send + Sync {
    fn documents_authored_by(&self, person: PersonId) -> Vec<DocumentMetadata>;
}

/// Presentation order for category codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPriorityTable {
    ranks: BTreeMap<String, usize>,
}

impl CategoryPriorityTable {
    /// Earlier codes rank higher; repeated codes keep their first position.
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ranks = BTreeMap::new();
        for code in codes {
            let next = ranks.len();
            ranks.entry(code.into()).or_insert(next);
        }
        Self { ranks }
    }

    pub fn standard() -> Self {
        Self::from_registry(&RuleRegistry::standard())
    }

    pub fn from_registry(rules: &RuleRegistry) -> Self {
        Self::new(rules.category_priority.iter().cloned())
    }

    pub fn rank(&self, code: &str) -> Option<usize> {
        self.ranks.get(code).copied()
    }

    pub fn compare(&self, left: &str, right: &str) -> Ordering {
        match (self.rank(left), self.rank(right)) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => left.cmp(right),
        }
    }
}

/// Distinct codes sorted by `table`.
pub fn order_categories<I, S>(codes: I, table: &CategoryPriorityTable) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ordered: Vec<String> = codes
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    ordered.sort_by(|left, right| table.compare(left, right));
    ordered
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationEntry {
    pub document_id: DocumentId,
    pub title: MultiLingualText,
    pub points: Option<f64>,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPublications {
    pub code: String,
    pub publications: Vec<PublicationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearcherAssessment {
    pub person_id: PersonId,
    pub publications_per_category: Vec<CategoryPublications>,
    pub total_points: f64,
    /// Documents in the window without a usable classification yet.
    pub pending_reclassification: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearcherQuery {
    pub commission_id: CommissionId,
    pub researcher_ids: Vec<PersonId>,
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default)]
    pub institution_filter: BTreeSet<OrganisationUnitId>,
}

pub struct ResearcherAssessor {
    authorship: Arc<dyn AuthorshipLookup>,
    classifications: EntityClassificationStore,
    catalog: CatalogStore,
    priorities: CategoryPriorityTable,
}

impl ResearcherAssessor {
    pub fn new(
        authorship: Arc<dyn AuthorshipLookup>,
        classifications: EntityClassificationStore,
        catalog: CatalogStore,
        priorities: CategoryPriorityTable,
    ) -> Self {
        Self {
            authorship,
            classifications,
            catalog,
            priorities,
        }
    }

    pub fn priorities(&self) -> &CategoryPriorityTable {
        &self.priorities
    }

    pub fn assess_researchers(
        &self,
        query: &ResearcherQuery,
    ) -> Result<Vec<ResearcherAssessment>, StoreError> {
        let mut seen = BTreeSet::new();
        query
            .researcher_ids
            .iter()
            .filter(|person| seen.insert(**person))
            .map(|person| self.assess_researcher(*person, query))
            .collect()
    }

    fn assess_researcher(
        &self,
        person: PersonId,
        query: &ResearcherQuery,
    ) -> Result<ResearcherAssessment, StoreError> {
        let documents = self
            .authorship
            .documents_authored_by(person)
            .into_iter()
            .filter(|document| document.year >= query.start_year && document.year <= query.end_year)
            .filter(|document| {
                query.institution_filter.is_empty()
                    || document
                        .organisation_units
                        .iter()
                        .any(|unit| query.institution_filter.contains(unit))
            });

        let mut codes: BTreeMap<_, String> = BTreeMap::new();
        let mut grouped: BTreeMap<String, Vec<PublicationEntry>> = BTreeMap::new();
        let mut pending = 0;
        let mut total = 0.0;

        for document in documents {
            let records = self.classifications.find_for_entity(
                EntityRef::Document(document.document_id),
                Some(query.commission_id),
            )?;
            let Some(record) = records
                .into_iter()
                .filter(|record| {
                    record
                        .classification_year
                        .map_or(true, |year| year == document.year)
                })
                .max_by_key(|record| (record.manual, record.timestamp))
            else {
                pending += 1;
                continue;
            };

            let code = match codes.get(&record.classification_id) {
                Some(code) => code.clone(),
                None => match self.catalog.classification(record.classification_id) {
                    Ok(classification) => {
                        codes.insert(record.classification_id, classification.code.clone());
                        classification.code
                    }
                    Err(StoreError::NotFound { .. }) => {
                        pending += 1;
                        continue;
                    }
                    Err(error) => return Err(error),
                },
            };

            let points = record.subject.points().map(|points| points.scaled);
            total += points.unwrap_or(0.0);
            grouped.entry(code).or_default().push(PublicationEntry {
                document_id: document.document_id,
                title: document.title,
                points,
                year: document.year,
            });
        }

        let publications_per_category = order_categories(grouped.keys().cloned(), &self.priorities)
            .into_iter()
            .map(|code| {
                let mut publications = grouped.remove(&code).unwrap_or_default();
                publications.sort_by_key(|entry| (entry.year, entry.document_id));
                CategoryPublications { code, publications }
            })
            .collect();

        debug!(%person, pending, "researcher assessed");
        Ok(ResearcherAssessment {
            person_id: person,
            publications_per_category,
            total_points: floor_to_cents(total),
            pending_reclassification: pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_precede_unknown_ones() {
        let table = CategoryPriorityTable::new(["M14", "M23"]);
        let ordered = order_categories(["UNKNOWN_X", "M23", "M14"], &table);
        assert_eq!(ordered, vec!["M14", "M23", "UNKNOWN_X"]);

        let reversed = order_categories(["M14", "UNKNOWN_X", "M23"], &table);
        assert_eq!(reversed, ordered);
    }

    #[test]
    fn unknown_codes_fall_back_to_alphabetical_order() {
        let table = CategoryPriorityTable::new(["M21"]);
        let ordered = order_categories(["ZZ", "AB", "M21", "AA"], &table);
        assert_eq!(ordered, vec!["M21", "AA", "AB", "ZZ"]);
    }

    #[test]
    fn standard_table_follows_rulebook_hierarchy() {
        let table = CategoryPriorityTable::standard();
        let ordered = order_categories(["M33", "M21", "M21a", "M14", "M70"], &table);
        assert_eq!(ordered, vec!["M14", "M21a", "M21", "M33", "M70"]);
    }

    #[test]
    fn duplicate_codes_keep_first_rank() {
        let table = CategoryPriorityTable::new(["M22", "M21", "M22"]);
        assert_eq!(table.rank("M22"), Some(0));
        assert_eq!(table.rank("M21"), Some(1));
    }
}
