//! Configurable rule registry shared by the point calculator, the classification
//! resolver and the researcher ranking.
//!
//! The registry is plain data: it deserializes from JSON so deployments can swap
//! rulebooks without a rebuild, and [`RuleRegistry::standard`] carries the default
//! M-category rulebook.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::domain::{DocumentFamily, PublicationType};

pub const STANDARD_POINT_RULE: &str = "serbianPointsRulebook2025";
pub const STANDARD_SCALING_RULE: &str = "serbianScalingRulebook2025";
pub const NO_SCALING_RULE: &str = "noScaling";
pub const PER_AUTHOR_SCALING_RULE: &str = "perAuthorScaling";

/// One row of a point table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRuleEntry {
    pub classification_code: String,
    /// Research areas this row is specific to; empty means any area.
    #[serde(default)]
    pub research_areas: Vec<String>,
    /// Publication types this row is limited to; empty means any type.
    #[serde(default)]
    pub publication_types: Vec<PublicationType>,
    pub points: f64,
}

impl PointRuleEntry {
    fn generic(code: &str, points: f64) -> Self {
        Self {
            classification_code: code.to_string(),
            research_areas: Vec::new(),
            publication_types: Vec::new(),
            points,
        }
    }

    fn for_areas(code: &str, areas: &[&str], points: f64) -> Self {
        Self {
            classification_code: code.to_string(),
            research_areas: areas.iter().map(|area| area.to_string()).collect(),
            publication_types: Vec::new(),
            points,
        }
    }

    pub(crate) fn accepts_type(&self, publication_type: Option<PublicationType>) -> bool {
        match publication_type {
            Some(kind) => {
                self.publication_types.is_empty() || self.publication_types.contains(&kind)
            }
            None => self.publication_types.is_empty(),
        }
    }
}

/// Base point table keyed by classification code, research area and publication type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRule {
    pub entries: Vec<PointRuleEntry>,
}

/// How base points are reduced for multi-author publications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalingRule {
    None,
    FixedMultiplier {
        factor: f64,
    },
    PerAuthor,
    /// Full points up to a threshold author count, then `raw / (1 + decay * (n - t))`.
    CollaborationThreshold {
        experimental: u32,
        simulation: u32,
        theoretical: u32,
        default: u32,
        #[serde(default)]
        area_defaults: BTreeMap<String, u32>,
        decay: f64,
    },
}

impl ScalingRule {
    /// Rules that share points among authors; they never raise a score.
    pub fn divides_by_authors(&self) -> bool {
        matches!(
            self,
            ScalingRule::PerAuthor | ScalingRule::CollaborationThreshold { .. }
        )
    }

    fn check(&self) -> Result<(), String> {
        match self {
            ScalingRule::FixedMultiplier { factor } if !factor.is_finite() || *factor < 0.0 => {
                Err(format!("factor {factor} must be a non-negative number"))
            }
            ScalingRule::CollaborationThreshold { decay, .. }
                if !decay.is_finite() || *decay < 0.0 =>
            {
                Err(format!("decay {decay} must be a non-negative number"))
            }
            _ => Ok(()),
        }
    }
}

/// Percentile band `(above_percentile, up_to_percentile]` mapped to a journal category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalTierRule {
    pub code: String,
    pub editions: Vec<String>,
    pub above_percentile: f64,
    pub up_to_percentile: f64,
}

impl JournalTierRule {
    pub fn covers_edition(&self, edition: &str) -> bool {
        self.editions
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(edition))
    }

    pub fn contains(&self, percentile: f64) -> bool {
        percentile > self.above_percentile && percentile <= self.up_to_percentile
    }

    fn overlaps(&self, other: &JournalTierRule) -> bool {
        let shares_edition = self
            .editions
            .iter()
            .any(|edition| other.covers_edition(edition));
        shares_edition
            && self.above_percentile < other.up_to_percentile
            && other.above_percentile < self.up_to_percentile
    }
}

/// Mapping from document attributes (and the venue classification on file) to a code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRule {
    pub family: DocumentFamily,
    /// Classification code the event must carry; `None` matches any event or none.
    #[serde(default)]
    pub event_code: Option<String>,
    #[serde(default)]
    pub publication_types: Vec<PublicationType>,
    #[serde(default)]
    pub international: Option<bool>,
    pub code: String,
}

impl DocumentRule {
    fn new(
        family: DocumentFamily,
        event_code: Option<&str>,
        publication_types: &[PublicationType],
        international: Option<bool>,
        code: &str,
    ) -> Self {
        Self {
            family,
            event_code: event_code.map(str::to_string),
            publication_types: publication_types.to_vec(),
            international,
            code: code.to_string(),
        }
    }

    pub fn matches(
        &self,
        publication_type: PublicationType,
        event_code: Option<&str>,
        international: bool,
    ) -> bool {
        self.family == publication_type.family()
            && (self.publication_types.is_empty()
                || self.publication_types.contains(&publication_type))
            && self
                .event_code
                .as_deref()
                .map(|required| Some(required) == event_code)
                .unwrap_or(true)
            && self
                .international
                .map(|required| required == international)
                .unwrap_or(true)
    }

    fn overlaps(&self, other: &DocumentRule) -> bool {
        let types_intersect = self.publication_types.is_empty()
            || other.publication_types.is_empty()
            || self
                .publication_types
                .iter()
                .any(|kind| other.publication_types.contains(kind));
        let events_compatible = match (&self.event_code, &other.event_code) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        };
        let international_compatible = match (self.international, other.international) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        };
        self.family == other.family
            && self.code != other.code
            && types_intersect
            && events_compatible
            && international_compatible
    }
}

/// Complete rule set consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRegistry {
    pub point_rules: BTreeMap<String, PointRule>,
    pub scaling_rules: BTreeMap<String, ScalingRule>,
    pub journal_tiers: Vec<JournalTierRule>,
    /// Years before the target year whose rankings are also considered.
    #[serde(default)]
    pub ranking_lookback_years: u8,
    pub document_rules: Vec<DocumentRule>,
    /// Category codes in presentation order for researcher reports.
    pub category_priority: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleConfigError {
    #[error("journal tiers {first} and {second} overlap for a shared edition")]
    OverlappingTiers { first: String, second: String },
    #[error("journal tier {code} has an empty or inverted percentile band")]
    InvalidBand { code: String },
    #[error("scaling rule {name}: {reason}")]
    InvalidScaling { name: String, reason: String },
    #[error("document rules {first} and {second} can match the same publication")]
    OverlappingDocumentRules { first: String, second: String },
    #[error("failed to read rule registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid rule registry JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuleRegistry {
    /// Default M-category rulebook.
    pub fn standard() -> Self {
        let mut point_rules = BTreeMap::new();
        point_rules.insert(
            STANDARD_POINT_RULE.to_string(),
            PointRule {
                entries: standard_point_entries(),
            },
        );

        let mut scaling_rules = BTreeMap::new();
        let mut area_defaults = BTreeMap::new();
        area_defaults.insert("SOCIAL".to_string(), 3);
        area_defaults.insert("HUMANITIES".to_string(), 3);
        scaling_rules.insert(
            STANDARD_SCALING_RULE.to_string(),
            ScalingRule::CollaborationThreshold {
                experimental: 7,
                simulation: 5,
                theoretical: 3,
                default: 7,
                area_defaults,
                decay: 0.2,
            },
        );
        scaling_rules.insert(NO_SCALING_RULE.to_string(), ScalingRule::None);
        scaling_rules.insert(PER_AUTHOR_SCALING_RULE.to_string(), ScalingRule::PerAuthor);

        let editions = vec!["SCIE".to_string(), "SSCI".to_string()];
        let journal_tiers = [
            ("M21a", 0.0, 0.10),
            ("M21", 0.10, 0.30),
            ("M22", 0.30, 0.50),
            ("M23", 0.50, 1.0),
        ]
        .into_iter()
        .map(|(code, above, up_to)| JournalTierRule {
            code: code.to_string(),
            editions: editions.clone(),
            above_percentile: above,
            up_to_percentile: up_to,
        })
        .collect();

        Self {
            point_rules,
            scaling_rules,
            journal_tiers,
            ranking_lookback_years: 2,
            document_rules: standard_document_rules(),
            category_priority: standard_category_priority(),
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RuleConfigError> {
        let registry: RuleRegistry = serde_json::from_reader(reader)?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RuleConfigError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Checks that tier bands and document rules are mutually exclusive by construction.
    pub fn validate(&self) -> Result<(), RuleConfigError> {
        for (name, rule) in &self.scaling_rules {
            rule.check().map_err(|reason| RuleConfigError::InvalidScaling {
                name: name.clone(),
                reason,
            })?;
        }

        for tier in &self.journal_tiers {
            let finite = tier.above_percentile.is_finite() && tier.up_to_percentile.is_finite();
            if !finite
                || tier.above_percentile >= tier.up_to_percentile
                || tier.above_percentile < 0.0
            {
                return Err(RuleConfigError::InvalidBand {
                    code: tier.code.clone(),
                });
            }
        }

        for (index, first) in self.journal_tiers.iter().enumerate() {
            for second in &self.journal_tiers[index + 1..] {
                if first.overlaps(second) {
                    return Err(RuleConfigError::OverlappingTiers {
                        first: first.code.clone(),
                        second: second.code.clone(),
                    });
                }
            }
        }

        for (index, first) in self.document_rules.iter().enumerate() {
            for second in &self.document_rules[index + 1..] {
                if first.overlaps(second) {
                    return Err(RuleConfigError::OverlappingDocumentRules {
                        first: first.code.clone(),
                        second: second.code.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn standard_point_entries() -> Vec<PointRuleEntry> {
    let generic = [
        ("M11", 15.0),
        ("M12", 10.0),
        ("M13", 7.0),
        ("M14", 5.0),
        ("M21a", 20.0),
        ("M21", 8.0),
        ("M22", 5.0),
        ("M23", 3.0),
        ("M24", 2.0),
        ("M26", 1.0),
        ("M27", 0.5),
        ("M31", 3.5),
        ("M32", 1.5),
        ("M33", 1.0),
        ("M34", 0.5),
        ("M41", 7.0),
        ("M42", 5.0),
        ("M44", 2.0),
        ("M45", 1.5),
        ("M51", 2.0),
        ("M52", 1.5),
        ("M53", 1.0),
        ("M61", 1.5),
        ("M62", 1.0),
        ("M63", 0.5),
        ("M64", 0.2),
        ("M70", 6.0),
    ];
    let social = ["SOCIAL", "HUMANITIES"];
    let social_overrides = [
        ("M11", 18.0),
        ("M12", 15.0),
        ("M24", 4.0),
        ("M41", 12.0),
        ("M42", 10.0),
        ("M51", 3.0),
        ("M52", 2.0),
    ];

    social_overrides
        .into_iter()
        .map(|(code, points)| PointRuleEntry::for_areas(code, &social, points))
        .chain(
            generic
                .into_iter()
                .map(|(code, points)| PointRuleEntry::generic(code, points)),
        )
        .collect()
}

fn standard_document_rules() -> Vec<DocumentRule> {
    use PublicationType::*;

    let international = Some("M30");
    let national = Some("M60");
    let proceedings = |event: Option<&str>, kind: PublicationType, code: &str| {
        DocumentRule::new(DocumentFamily::Proceedings, event, &[kind], None, code)
    };
    vec![
        proceedings(international, ProceedingsInvitedFullArticle, "M31"),
        proceedings(international, ProceedingsInvitedAbstract, "M32"),
        proceedings(international, ProceedingsFullArticle, "M33"),
        proceedings(international, ProceedingsAbstract, "M34"),
        proceedings(national, ProceedingsInvitedFullArticle, "M61"),
        proceedings(national, ProceedingsInvitedAbstract, "M62"),
        proceedings(national, ProceedingsFullArticle, "M63"),
        proceedings(national, ProceedingsAbstract, "M64"),
        DocumentRule::new(DocumentFamily::Monograph, None, &[Monograph], Some(true), "M12"),
        DocumentRule::new(DocumentFamily::Monograph, None, &[Monograph], Some(false), "M42"),
        DocumentRule::new(DocumentFamily::Monograph, None, &[MonographChapter], Some(true), "M14"),
        DocumentRule::new(DocumentFamily::Monograph, None, &[MonographChapter], Some(false), "M45"),
        DocumentRule::new(DocumentFamily::Thesis, None, &[PhdThesis, PhdArtProject], None, "M70"),
    ]
}

fn standard_category_priority() -> Vec<String> {
    [
        "M11", "M12", "M13", "M14", "M15", "M16", "M17", "M18", "M21a", "M21", "M22", "M23",
        "M24", "M25", "M26", "M27", "M28a", "M28b", "M29a", "M29b", "M29c", "M29d", "M29e",
        "M31", "M32", "M33", "M34", "M35", "M36", "M41", "M42", "M43", "M44", "M45", "M46",
        "M47", "M48", "M49", "M51", "M52", "M53", "M54", "M55", "M56", "M57", "M61", "M62",
        "M63", "M64", "M65", "M66", "M67", "M68", "M69", "M70", "M71", "M72", "M73", "M74",
        "M75", "M76", "M77", "M78", "M79", "M80", "M81", "M82", "M83", "M84", "M85", "M86",
        "M87", "M90", "M91", "M92", "M93", "M94", "M95", "M96", "M97", "M98", "M99",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
