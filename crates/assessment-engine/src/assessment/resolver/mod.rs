//! Classification resolution for publication series and documents.
//!
//! Journals are placed in the best category any of their rankings reaches across
//! the ranking editions and the lookback window. Proceedings, monographs and theses are
//! mapped by document rules, using the event classification already on file where a
//! rule requires one. The rule set is expected to be exclusive; when it is not the
//! resolver reports the ambiguity instead of picking a winner.

mod ranking;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

pub use ranking::{
    IndicatorRankings, JournalRanking, RankingError, RankingTable, RankingTableProvider,
    JIF_RANK_INDICATOR,
};

use super::domain::{
    AssessmentClassification, ClassificationKey, Commission, DocumentFamily, DocumentMetadata,
    EntityRef, MultiLingualText, PublicationSeriesId, PublicationType,
};
use super::researchers::CategoryPriorityTable;
use super::rules::{RuleConfigError, RuleRegistry};
use super::store::{CatalogStore, EntityClassificationStore, StoreError};

/// Tolerance when comparing percentiles computed from different categories.
const PERCENTILE_EPSILON: f64 = 1e-12;

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("ambiguous classification for {subject}: candidates {candidates:?}")]
    Ambiguous {
        subject: String,
        candidates: Vec<String>,
    },
    #[error("classification {0} is not defined in the catalog")]
    UnknownClassification(String),
    #[error(transparent)]
    Ranking(#[from] RankingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A resolved category and why it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub classification: AssessmentClassification,
    pub reason: MultiLingualText,
}

/// Code picked from a ranking table, before the catalog lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct TierMatch {
    pub code: String,
    pub ranking: JournalRanking,
}

pub struct ClassificationResolver {
    rules: Arc<RuleRegistry>,
    rankings: Arc<dyn RankingTableProvider>,
    classifications: EntityClassificationStore,
    catalog: CatalogStore,
    priorities: CategoryPriorityTable,
}

impl ClassificationResolver {
    pub fn new(
        rules: Arc<RuleRegistry>,
        rankings: Arc<dyn RankingTableProvider>,
        classifications: EntityClassificationStore,
        catalog: CatalogStore,
    ) -> Self {
        let priorities = CategoryPriorityTable::from_registry(&rules);
        Self {
            rules,
            rankings,
            priorities,
            classifications,
            catalog,
        }
    }

    pub fn validate_exclusive(&self) -> Result<(), RuleConfigError> {
        self.rules.validate()
    }

    /// Category of a journal for `year` from the ranking tables.
    pub fn resolve_publication_series(
        &self,
        series: PublicationSeriesId,
        commission: &Commission,
        year: i32,
    ) -> Result<Option<Resolution>, ResolutionError> {
        if !commission.covers_year(year) {
            debug!(%series, commission = %commission.id, year, "year outside commission window");
            return Ok(None);
        }

        let lookback = i32::from(self.rules.ranking_lookback_years);
        let mut rankings = Vec::new();
        for candidate_year in (year - lookback)..=year {
            rankings.extend(self.rankings.rankings(series, candidate_year)?);
        }

        let Some(tier) = self.match_tier(&EntityRef::PublicationSeries(series), &rankings)? else {
            return Ok(None);
        };
        let classification = self.classification(&tier.code)?;
        let reason = tier_reason(&tier);
        Ok(Some(Resolution {
            classification,
            reason,
        }))
    }

    /// Tier of every ranking, then the highest-priority category among them.
    ///
    /// Percentile only breaks ties between rankings landing in the same category.
    /// A ranking matching two tiers, or a choice between categories missing from
    /// the priority table, is ambiguous.
    pub fn match_tier(
        &self,
        subject: &EntityRef,
        rankings: &[JournalRanking],
    ) -> Result<Option<TierMatch>, ResolutionError> {
        let mut best_per_code: BTreeMap<String, JournalRanking> = BTreeMap::new();

        for ranking in rankings {
            ranking.check_position()?;
            let percentile = ranking.percentile();
            let codes: BTreeSet<&str> = self
                .rules
                .journal_tiers
                .iter()
                .filter(|tier| tier.covers_edition(&ranking.edition) && tier.contains(percentile))
                .map(|tier| tier.code.as_str())
                .collect();
            if codes.len() > 1 {
                return Err(ResolutionError::Ambiguous {
                    subject: subject.to_string(),
                    candidates: codes.into_iter().map(str::to_string).collect(),
                });
            }
            let Some(code) = codes.into_iter().next() else {
                continue;
            };
            let kept = best_per_code
                .entry(code.to_string())
                .or_insert_with(|| ranking.clone());
            if percentile < kept.percentile() - PERCENTILE_EPSILON {
                *kept = ranking.clone();
            }
        }

        let mut codes: Vec<String> = best_per_code.keys().cloned().collect();
        codes.sort_by(|left, right| self.priorities.compare(left, right));
        let Some(code) = codes.first().cloned() else {
            return Ok(None);
        };
        if codes.len() > 1 && self.priorities.rank(&code).is_none() {
            return Err(ResolutionError::Ambiguous {
                subject: subject.to_string(),
                candidates: codes,
            });
        }

        Ok(best_per_code
            .remove(&code)
            .map(|ranking| TierMatch { code, ranking }))
    }

    /// Category of a document for the commission and the document's year.
    pub fn resolve_document(
        &self,
        metadata: &DocumentMetadata,
        commission: &Commission,
    ) -> Result<Option<Resolution>, ResolutionError> {
        if !commission.covers_year(metadata.year) {
            return Ok(None);
        }
        if let Some(area) = metadata.research_area.as_deref() {
            if !commission.recognises_area(area) {
                debug!(document = %metadata.document_id, area, "research area not recognised");
                return Ok(None);
            }
        }

        match metadata.publication_type.family() {
            DocumentFamily::Journal => self.resolve_journal_publication(metadata, commission),
            DocumentFamily::Proceedings => {
                let event_code = match metadata.event_id {
                    Some(event) => self.code_on_file(
                        EntityRef::Event(event),
                        commission,
                        metadata.year,
                    )?,
                    None => None,
                };
                self.resolve_by_rules(metadata, event_code.as_deref())
            }
            DocumentFamily::Monograph | DocumentFamily::Thesis => {
                self.resolve_by_rules(metadata, None)
            }
        }
    }

    fn resolve_journal_publication(
        &self,
        metadata: &DocumentMetadata,
        commission: &Commission,
    ) -> Result<Option<Resolution>, ResolutionError> {
        let Some(series) = metadata.series_id else {
            return Ok(None);
        };

        let on_file =
            self.code_on_file(EntityRef::PublicationSeries(series), commission, metadata.year)?;
        if let Some(code) = on_file {
            let classification = self.classification(&code)?;
            let reason = MultiLingualText::bilingual(
                format!("Journal is classified as {code} for {}.", metadata.year),
                format!("Časopis je kategorisan kao {code} za {}. godinu.", metadata.year),
            );
            return Ok(Some(Resolution {
                classification,
                reason,
            }));
        }

        self.resolve_publication_series(series, commission, metadata.year)
    }

    fn resolve_by_rules(
        &self,
        metadata: &DocumentMetadata,
        event_code: Option<&str>,
    ) -> Result<Option<Resolution>, ResolutionError> {
        let Some(code) = self.document_code(
            EntityRef::Document(metadata.document_id),
            metadata.publication_type,
            event_code,
            metadata.international,
        )?
        else {
            return Ok(None);
        };

        let classification = self.classification(&code)?;
        let reason = match event_code {
            Some(event_code) => MultiLingualText::bilingual(
                format!("Published at an event classified as {event_code}."),
                format!("Objavljeno na skupu kategorisanom kao {event_code}."),
            ),
            None if metadata.international => MultiLingualText::bilingual(
                "International publication of this type.",
                "Međunarodna publikacija ovog tipa.",
            ),
            None => MultiLingualText::bilingual(
                "National publication of this type.",
                "Nacionalna publikacija ovog tipa.",
            ),
        };
        Ok(Some(Resolution {
            classification,
            reason,
        }))
    }

    /// Code of the single document rule matching the attributes.
    pub fn document_code(
        &self,
        subject: EntityRef,
        publication_type: PublicationType,
        event_code: Option<&str>,
        international: bool,
    ) -> Result<Option<String>, ResolutionError> {
        let codes: BTreeSet<&str> = self
            .rules
            .document_rules
            .iter()
            .filter(|rule| rule.matches(publication_type, event_code, international))
            .map(|rule| rule.code.as_str())
            .collect();

        match codes.len() {
            0 => Ok(None),
            1 => Ok(codes.into_iter().next().map(str::to_string)),
            _ => Err(ResolutionError::Ambiguous {
                subject: subject.to_string(),
                candidates: codes.into_iter().map(str::to_string).collect(),
            }),
        }
    }

    /// Classification code stored for the entity, for the year or without a year.
    pub fn code_on_file(
        &self,
        entity: EntityRef,
        commission: &Commission,
        year: i32,
    ) -> Result<Option<String>, ResolutionError> {
        for candidate_year in [Some(year), None] {
            let key = ClassificationKey {
                entity,
                commission_id: commission.id,
                year: candidate_year,
            };
            if let Some(record) = self.classifications.find(&key)? {
                let classification = self.catalog.classification(record.classification_id)?;
                return Ok(Some(classification.code));
            }
        }
        Ok(None)
    }

    fn classification(&self, code: &str) -> Result<AssessmentClassification, ResolutionError> {
        self.catalog
            .classification_by_code(code)?
            .ok_or_else(|| ResolutionError::UnknownClassification(code.to_string()))
    }
}

pub(crate) fn tier_reason(tier: &TierMatch) -> MultiLingualText {
    let ranking = &tier.ranking;
    MultiLingualText::bilingual(
        format!(
            "Ranked {}/{} in {} ({} {}); percentile {:.3} falls in the {} band.",
            ranking.rank,
            ranking.total,
            ranking.category,
            ranking.edition,
            ranking.year,
            ranking.percentile(),
            tier.code
        ),
        format!(
            "Rang {}/{} u kategoriji {} ({} {}); percentil {:.3} pripada opsegu {}.",
            ranking.rank,
            ranking.total,
            ranking.category,
            ranking.edition,
            ranking.year,
            ranking.percentile(),
            tier.code
        ),
    )
}
