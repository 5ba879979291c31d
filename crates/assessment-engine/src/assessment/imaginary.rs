//! What-if scoring for hypothetical publications. Nothing here writes to a store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{
    CommissionId, ContributionFlags, DocumentFamily, DocumentId, EntityRef, EventId,
    ImaginaryAssessmentResult, MultiLingualText, PublicationSeriesId, PublicationType, RulebookId,
};
use super::points::{PointCalculator, PointsError, ScoringContext};
use super::resolver::{tier_reason, ClassificationResolver, JournalRanking, ResolutionError};
use super::store::{CatalogStore, CommissionStore, StoreError};

/// Subject used in ambiguity reports for publications that do not exist.
const IMAGINARY_SUBJECT: EntityRef = EntityRef::Document(DocumentId(0));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImaginaryJournalPublication {
    pub commission_id: CommissionId,
    /// Journal on file; its stored classification or ranking tables are used.
    #[serde(default)]
    pub journal_id: Option<PublicationSeriesId>,
    /// Rankings of a journal that is not on file.
    #[serde(default)]
    pub rankings: Vec<JournalRanking>,
    pub year: i32,
    #[serde(default)]
    pub research_area: Option<String>,
    pub author_count: u32,
    #[serde(default)]
    pub contribution: ContributionFlags,
    #[serde(default = "default_journal_type")]
    pub publication_type: PublicationType,
}

fn default_journal_type() -> PublicationType {
    PublicationType::JournalArticle
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImaginaryProceedingsPublication {
    pub commission_id: CommissionId,
    #[serde(default)]
    pub event_id: Option<EventId>,
    /// Event category to assume when the event has none on file.
    #[serde(default)]
    pub event_classification: Option<String>,
    pub year: i32,
    pub publication_type: PublicationType,
    #[serde(default)]
    pub international: bool,
    #[serde(default)]
    pub research_area: Option<String>,
    pub author_count: u32,
    #[serde(default)]
    pub contribution: ContributionFlags,
}

#[derive(Debug, thiserror::Error)]
pub enum ImaginaryError {
    #[error("no classification applies to the described publication")]
    Unclassified,
    #[error("{0:?} is not a {1} publication type")]
    WrongPublicationType(PublicationType, &'static str),
    #[error("commission rulebook has no measure for {code}")]
    MissingMeasure { code: String },
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Points(#[from] PointsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ImaginaryAssessor {
    resolver: Arc<ClassificationResolver>,
    calculator: PointCalculator,
    catalog: CatalogStore,
    commissions: CommissionStore,
}

impl ImaginaryAssessor {
    pub fn new(
        resolver: Arc<ClassificationResolver>,
        calculator: PointCalculator,
        catalog: CatalogStore,
        commissions: CommissionStore,
    ) -> Self {
        Self {
            resolver,
            calculator,
            catalog,
            commissions,
        }
    }

    pub fn assess_journal_publication(
        &self,
        request: &ImaginaryJournalPublication,
    ) -> Result<ImaginaryAssessmentResult, ImaginaryError> {
        if request.publication_type.family() != DocumentFamily::Journal {
            return Err(ImaginaryError::WrongPublicationType(
                request.publication_type,
                "journal",
            ));
        }
        let commission = self.commissions.commission(request.commission_id)?;

        let (code, reason) = match request.journal_id {
            Some(series) => {
                let on_file = self.resolver.code_on_file(
                    EntityRef::PublicationSeries(series),
                    &commission,
                    request.year,
                )?;
                match on_file {
                    Some(code) => {
                        let reason = MultiLingualText::bilingual(
                            format!("Journal is classified as {code} for {}.", request.year),
                            format!(
                                "Časopis je kategorisan kao {code} za {}. godinu.",
                                request.year
                            ),
                        );
                        (code, reason)
                    }
                    None => {
                        let resolution = self
                            .resolver
                            .resolve_publication_series(series, &commission, request.year)?
                            .ok_or(ImaginaryError::Unclassified)?;
                        (resolution.classification.code, resolution.reason)
                    }
                }
            }
            None => {
                let tier = self
                    .resolver
                    .match_tier(&IMAGINARY_SUBJECT, &request.rankings)?
                    .ok_or(ImaginaryError::Unclassified)?;
                let reason = tier_reason(&tier);
                (tier.code, reason)
            }
        };

        self.score(
            commission.rulebook_id,
            code,
            reason,
            ScoringContext {
                classification_code: String::new(),
                research_area: request.research_area.clone(),
                author_count: request.author_count,
                contribution: request.contribution,
                publication_type: Some(request.publication_type),
            },
        )
    }

    pub fn assess_proceedings_publication(
        &self,
        request: &ImaginaryProceedingsPublication,
    ) -> Result<ImaginaryAssessmentResult, ImaginaryError> {
        if request.publication_type.family() != DocumentFamily::Proceedings {
            return Err(ImaginaryError::WrongPublicationType(
                request.publication_type,
                "proceedings",
            ));
        }
        let commission = self.commissions.commission(request.commission_id)?;

        let on_file = match request.event_id {
            Some(event) => {
                self.resolver
                    .code_on_file(EntityRef::Event(event), &commission, request.year)?
            }
            None => None,
        };
        let event_code = on_file.or_else(|| request.event_classification.clone());

        let code = self
            .resolver
            .document_code(
                IMAGINARY_SUBJECT,
                request.publication_type,
                event_code.as_deref(),
                request.international,
            )?
            .ok_or(ImaginaryError::Unclassified)?;
        let reason = match event_code.as_deref() {
            Some(event_code) => MultiLingualText::bilingual(
                format!("Presented at an event classified as {event_code}."),
                format!("Saopšteno na skupu kategorisanom kao {event_code}."),
            ),
            None => MultiLingualText::bilingual(
                "Event has no classification; publication type alone decides.",
                "Skup nije kategorisan; odlučuje samo tip publikacije.",
            ),
        };

        self.score(
            commission.rulebook_id,
            code,
            reason,
            ScoringContext {
                classification_code: String::new(),
                research_area: request.research_area.clone(),
                author_count: request.author_count,
                contribution: request.contribution,
                publication_type: Some(request.publication_type),
            },
        )
    }

    fn score(
        &self,
        rulebook: Option<RulebookId>,
        code: String,
        reason: MultiLingualText,
        mut context: ScoringContext,
    ) -> Result<ImaginaryAssessmentResult, ImaginaryError> {
        let measure = self
            .catalog
            .measure_for(rulebook, &code)?
            .ok_or_else(|| ImaginaryError::MissingMeasure { code: code.clone() })?;
        context.classification_code = code.clone();
        let outcome = self.calculator.compute_points(&measure, &context)?;

        Ok(ImaginaryAssessmentResult {
            assessment_code: code,
            assessment_reason: reason,
            raw_points: outcome.raw_points,
            raw_points_reason: outcome.raw_points_reason,
            scaled_points: outcome.scaled_points,
            scaled_points_reason: outcome.scaled_points_reason,
        })
    }
}
