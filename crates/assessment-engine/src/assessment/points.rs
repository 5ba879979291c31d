//! Point calculation for assessment measures.
//!
//! A measure names a point table and a scaling rule in the [`RuleRegistry`]. The
//! calculator looks up the base value, applies the scaling rule for the author
//! count and floors both values to whole cents. Each decision is explained in a
//! bilingual reason so reports can show how a score was reached.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{AssessmentMeasure, ContributionFlags, MultiLingualText, PublicationType};
use super::rules::{PointRuleEntry, RuleRegistry, ScalingRule};

/// Guards against binary representation error, e.g. `0.29 * 100.0 == 28.999999999999996`.
const CENT_EPSILON: f64 = 1e-9;

/// Floors a point value to two decimal places. Point displays never overstate a score.
pub fn floor_to_cents(value: f64) -> f64 {
    ((value * 100.0) + CENT_EPSILON).floor() / 100.0
}

/// Inputs the calculator needs about the (real or imaginary) publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringContext {
    pub classification_code: String,
    pub research_area: Option<String>,
    pub author_count: u32,
    #[serde(default)]
    pub contribution: ContributionFlags,
    pub publication_type: Option<PublicationType>,
}

/// Raw and scaled points plus the reasoning behind each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsOutcome {
    pub raw_points: f64,
    pub raw_points_reason: MultiLingualText,
    pub scaled_points: f64,
    pub scaled_points_reason: MultiLingualText,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointsError {
    #[error("no point rule in {rule} matches {code} for research area {research_area:?}")]
    RuleNotFound {
        rule: String,
        code: String,
        research_area: Option<String>,
        publication_type: Option<PublicationType>,
    },
    #[error("unknown point rule {0}")]
    UnknownPointRule(String),
    #[error("unknown scaling rule {0}")]
    UnknownScalingRule(String),
    #[error("author count must be at least one")]
    InvalidAuthorCount,
}

/// Stateless evaluator over the shared rule registry.
#[derive(Debug, Clone)]
pub struct PointCalculator {
    rules: Arc<RuleRegistry>,
}

impl PointCalculator {
    pub fn new(rules: Arc<RuleRegistry>) -> Self {
        Self { rules }
    }

    pub fn compute_points(
        &self,
        measure: &AssessmentMeasure,
        context: &ScoringContext,
    ) -> Result<PointsOutcome, PointsError> {
        if context.author_count == 0 {
            return Err(PointsError::InvalidAuthorCount);
        }

        let table = self
            .rules
            .point_rules
            .get(&measure.point_rule)
            .ok_or_else(|| PointsError::UnknownPointRule(measure.point_rule.clone()))?;
        let scaling = self
            .rules
            .scaling_rules
            .get(&measure.scaling_rule)
            .ok_or_else(|| PointsError::UnknownScalingRule(measure.scaling_rule.clone()))?;

        let entry = select_entry(&table.entries, context).ok_or_else(|| {
            PointsError::RuleNotFound {
                rule: measure.point_rule.clone(),
                code: context.classification_code.clone(),
                research_area: context.research_area.clone(),
                publication_type: context.publication_type,
            }
        })?;

        let raw_points = floor_to_cents(entry.points);
        let raw_points_reason = raw_reason(entry, context);

        let (scaled, scaled_points_reason) = apply_scaling(scaling, entry.points, context);
        let scaled_points = if scaling.divides_by_authors() {
            // Sharing among authors never raises a score above its base value.
            floor_to_cents(scaled).min(raw_points)
        } else {
            floor_to_cents(scaled)
        };

        Ok(PointsOutcome {
            raw_points,
            raw_points_reason,
            scaled_points,
            scaled_points_reason,
        })
    }
}

/// Area-specific rows win over area-agnostic ones; the first matching row is used.
fn select_entry<'a>(
    entries: &'a [PointRuleEntry],
    context: &ScoringContext,
) -> Option<&'a PointRuleEntry> {
    let candidates = || {
        entries.iter().filter(|entry| {
            entry.classification_code == context.classification_code
                && entry.accepts_type(context.publication_type)
        })
    };

    let area_specific = context.research_area.as_deref().and_then(|area| {
        candidates().find(|entry| entry.research_areas.iter().any(|candidate| candidate == area))
    });

    area_specific.or_else(|| candidates().find(|entry| entry.research_areas.is_empty()))
}

fn raw_reason(entry: &PointRuleEntry, context: &ScoringContext) -> MultiLingualText {
    match (&context.research_area, entry.research_areas.is_empty()) {
        (Some(area), false) => MultiLingualText::bilingual(
            format!(
                "Category {} is worth {} points in research area {}.",
                entry.classification_code, entry.points, area
            ),
            format!(
                "Kategorija {} vredi {} bodova u istraživačkoj oblasti {}.",
                entry.classification_code, entry.points, area
            ),
        ),
        _ => MultiLingualText::bilingual(
            format!(
                "Category {} is worth {} points.",
                entry.classification_code, entry.points
            ),
            format!(
                "Kategorija {} vredi {} bodova.",
                entry.classification_code, entry.points
            ),
        ),
    }
}

fn apply_scaling(
    rule: &ScalingRule,
    raw: f64,
    context: &ScoringContext,
) -> (f64, MultiLingualText) {
    let authors = context.author_count;
    match rule {
        ScalingRule::None => (
            raw,
            MultiLingualText::bilingual(
                "Points are not scaled by author count.",
                "Bodovi se ne skaliraju prema broju autora.",
            ),
        ),
        ScalingRule::FixedMultiplier { factor } => (
            raw * factor,
            MultiLingualText::bilingual(
                format!("Points are multiplied by a fixed factor of {factor}."),
                format!("Bodovi se množe fiksnim faktorom {factor}."),
            ),
        ),
        ScalingRule::PerAuthor => (
            raw / f64::from(authors),
            MultiLingualText::bilingual(
                format!("Points are divided equally among {authors} author(s)."),
                format!("Bodovi se dele jednako na {authors} autora."),
            ),
        ),
        ScalingRule::CollaborationThreshold {
            experimental,
            simulation,
            theoretical,
            default,
            area_defaults,
            decay,
        } => {
            let (threshold, basis_en, basis_sr) = if context.contribution.experimental {
                (*experimental, "experimental work", "eksperimentalni rad")
            } else if context.contribution.simulation {
                (*simulation, "numerical or simulation work", "numerički rad ili simulacija")
            } else if context.contribution.theoretical {
                (*theoretical, "theoretical work", "teorijski rad")
            } else {
                let threshold = context
                    .research_area
                    .as_ref()
                    .and_then(|area| area_defaults.get(area))
                    .copied()
                    .unwrap_or(*default);
                (threshold, "this research area", "ovu istraživačku oblast")
            };

            if authors <= threshold {
                (
                    raw,
                    MultiLingualText::bilingual(
                        format!(
                            "Full points: {authors} author(s) is within the limit of {threshold} for {basis_en}."
                        ),
                        format!(
                            "Puni bodovi: {authors} autora je u okviru granice od {threshold} za {basis_sr}."
                        ),
                    ),
                )
            } else {
                let divisor = 1.0 + decay * f64::from(authors - threshold);
                (
                    raw / divisor,
                    MultiLingualText::bilingual(
                        format!(
                            "Points divided by {divisor:.2}: {authors} authors exceed the limit of {threshold} for {basis_en}."
                        ),
                        format!(
                            "Bodovi podeljeni sa {divisor:.2}: {authors} autora prelazi granicu od {threshold} za {basis_sr}."
                        ),
                    ),
                )
            }
        }
    }
}
