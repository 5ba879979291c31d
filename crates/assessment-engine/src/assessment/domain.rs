use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Evaluation body identifier.
    CommissionId
);
numeric_id!(RelationId);
numeric_id!(AssessmentClassificationId);
numeric_id!(RulebookId);
numeric_id!(MeasureId);
numeric_id!(
    /// Identifier of a stored entity classification row.
    ClassificationRecordId
);
numeric_id!(IndicatorRecordId);
numeric_id!(DocumentId);
numeric_id!(EventId);
numeric_id!(PublicationSeriesId);
numeric_id!(OrganisationUnitId);
numeric_id!(PersonId);
numeric_id!(PrizeId);

/// Free text keyed by language tag (`en`, `sr`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiLingualText(pub BTreeMap<String, String>);

impl MultiLingualText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bilingual(en: impl Into<String>, sr: impl Into<String>) -> Self {
        Self::new().with("en", en).with("sr", sr)
    }

    pub fn with(mut self, language: &str, content: impl Into<String>) -> Self {
        self.0.insert(language.to_string(), content.into());
        self
    }

    pub fn get(&self, language: &str) -> Option<&str> {
        self.0.get(language).map(String::as_str)
    }

    /// Content in the requested language, falling back to English and then any entry.
    pub fn preferred(&self, language: &str) -> &str {
        self.get(language)
            .or_else(|| self.get("en"))
            .or_else(|| self.0.values().next().map(String::as_str))
            .unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Kinds of entities a classification or indicator may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Document,
    Event,
    PublicationSeries,
    OrganisationUnit,
    Person,
    Prize,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::Document => "document",
            EntityKind::Event => "event",
            EntityKind::PublicationSeries => "publication_series",
            EntityKind::OrganisationUnit => "organisation_unit",
            EntityKind::Person => "person",
            EntityKind::Prize => "prize",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "document" => Some(Self::Document),
            "event" => Some(Self::Event),
            "publication_series" | "journal" => Some(Self::PublicationSeries),
            "organisation_unit" | "organization_unit" => Some(Self::OrganisationUnit),
            "person" => Some(Self::Person),
            "prize" => Some(Self::Prize),
            _ => None,
        }
    }
}

/// Reference to one entity owned by the surrounding system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Document(DocumentId),
    Event(EventId),
    PublicationSeries(PublicationSeriesId),
    OrganisationUnit(OrganisationUnitId),
    Person(PersonId),
    Prize(PrizeId),
}

impl EntityRef {
    pub const fn kind(self) -> EntityKind {
        match self {
            EntityRef::Document(_) => EntityKind::Document,
            EntityRef::Event(_) => EntityKind::Event,
            EntityRef::PublicationSeries(_) => EntityKind::PublicationSeries,
            EntityRef::OrganisationUnit(_) => EntityKind::OrganisationUnit,
            EntityRef::Person(_) => EntityKind::Person,
            EntityRef::Prize(_) => EntityKind::Prize,
        }
    }

    pub const fn raw_id(self) -> u64 {
        match self {
            EntityRef::Document(id) => id.0,
            EntityRef::Event(id) => id.0,
            EntityRef::PublicationSeries(id) => id.0,
            EntityRef::OrganisationUnit(id) => id.0,
            EntityRef::Person(id) => id.0,
            EntityRef::Prize(id) => id.0,
        }
    }

    pub fn from_parts(kind: EntityKind, id: u64) -> Self {
        match kind {
            EntityKind::Document => EntityRef::Document(DocumentId(id)),
            EntityKind::Event => EntityRef::Event(EventId(id)),
            EntityKind::PublicationSeries => EntityRef::PublicationSeries(PublicationSeriesId(id)),
            EntityKind::OrganisationUnit => EntityRef::OrganisationUnit(OrganisationUnitId(id)),
            EntityKind::Person => EntityRef::Person(PersonId(id)),
            EntityKind::Prize => EntityRef::Prize(PrizeId(id)),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().label(), self.raw_id())
    }
}

/// Evaluation body classifying research outputs under its own rulebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    pub id: CommissionId,
    pub description: MultiLingualText,
    pub formal_description_of_rule: String,
    pub assessment_date_from: Option<NaiveDate>,
    pub assessment_date_to: Option<NaiveDate>,
    pub recognised_research_areas: BTreeSet<String>,
    pub is_default: bool,
    pub rulebook_id: Option<RulebookId>,
}

impl Commission {
    /// Whether the commission's assessment window includes any day of `year`.
    pub fn covers_year(&self, year: i32) -> bool {
        let after_start = self
            .assessment_date_from
            .map(|from| from.year() <= year)
            .unwrap_or(true);
        let before_end = self
            .assessment_date_to
            .map(|to| to.year() >= year)
            .unwrap_or(true);
        after_start && before_end
    }

    pub fn recognises_area(&self, research_area: &str) -> bool {
        self.recognised_research_areas.is_empty()
            || self.recognised_research_areas.contains(research_area)
    }
}

/// Strategy used to fold the results of a relation's target commissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCalculationMethod {
    TakeHighestPriority,
    AggregateSum,
    AggregateMax,
    AggregateMin,
    AggregateAverage,
}

impl ResultCalculationMethod {
    pub const fn is_aggregate(self) -> bool {
        !matches!(self, ResultCalculationMethod::TakeHighestPriority)
    }

    pub const fn label(self) -> &'static str {
        match self {
            ResultCalculationMethod::TakeHighestPriority => "take_highest_priority",
            ResultCalculationMethod::AggregateSum => "aggregate_sum",
            ResultCalculationMethod::AggregateMax => "aggregate_max",
            ResultCalculationMethod::AggregateMin => "aggregate_min",
            ResultCalculationMethod::AggregateAverage => "aggregate_average",
        }
    }
}

/// Directed edge set from a source commission to the commissions it defers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRelation {
    pub id: RelationId,
    pub source: CommissionId,
    pub targets: Vec<CommissionId>,
    /// Lower values are evaluated first; unique per source.
    pub priority: i32,
    pub method: ResultCalculationMethod,
}

/// Category definition such as `M21` or `M33`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentClassification {
    pub id: AssessmentClassificationId,
    pub code: String,
    pub title: MultiLingualText,
    pub formal_description_of_rule: MultiLingualText,
    pub applicable_types: BTreeSet<EntityKind>,
}

impl AssessmentClassification {
    pub fn applies_to(&self, kind: EntityKind) -> bool {
        self.applicable_types.contains(&kind)
    }
}

/// Versioned rule document owning a set of measures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentRulebook {
    pub id: RulebookId,
    pub name: MultiLingualText,
    pub issue_date: Option<NaiveDate>,
    /// Storage key of the attached PDF, if any.
    pub pdf_file: Option<String>,
    pub is_default: bool,
}

/// Named point/scaling rule pair; `code` matches the classification code it scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentMeasure {
    pub id: MeasureId,
    pub rulebook_id: RulebookId,
    pub code: String,
    pub title: MultiLingualText,
    pub point_rule: String,
    pub scaling_rule: String,
}

/// Publication types the engine distinguishes when resolving and scoring documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationType {
    JournalArticle,
    ReviewArticle,
    ProceedingsFullArticle,
    ProceedingsInvitedFullArticle,
    ProceedingsAbstract,
    ProceedingsInvitedAbstract,
    Monograph,
    MonographChapter,
    PhdThesis,
    PhdArtProject,
    MasterThesis,
}

/// Coarse grouping used by the batch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFamily {
    Journal,
    Proceedings,
    Monograph,
    Thesis,
}

impl PublicationType {
    pub const fn family(self) -> DocumentFamily {
        match self {
            PublicationType::JournalArticle | PublicationType::ReviewArticle => {
                DocumentFamily::Journal
            }
            PublicationType::ProceedingsFullArticle
            | PublicationType::ProceedingsInvitedFullArticle
            | PublicationType::ProceedingsAbstract
            | PublicationType::ProceedingsInvitedAbstract => DocumentFamily::Proceedings,
            PublicationType::Monograph | PublicationType::MonographChapter => {
                DocumentFamily::Monograph
            }
            PublicationType::PhdThesis
            | PublicationType::PhdArtProject
            | PublicationType::MasterThesis => DocumentFamily::Thesis,
        }
    }
}

/// Nature of the research reported, used to pick the author-count threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionFlags {
    #[serde(default)]
    pub experimental: bool,
    #[serde(default)]
    pub theoretical: bool,
    #[serde(default)]
    pub simulation: bool,
}

/// Document attributes supplied by the metadata collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: DocumentId,
    pub title: MultiLingualText,
    pub publication_type: PublicationType,
    pub year: i32,
    /// Exact publication date when the metadata source knows it.
    #[serde(default)]
    pub publication_date: Option<NaiveDate>,
    pub research_area: Option<String>,
    pub author_count: u32,
    #[serde(default)]
    pub contribution: ContributionFlags,
    pub series_id: Option<PublicationSeriesId>,
    pub event_id: Option<EventId>,
    /// Whether the publisher or venue is international (monographs).
    #[serde(default)]
    pub international: bool,
    #[serde(default)]
    pub authors: Vec<PersonId>,
    #[serde(default)]
    pub organisation_units: Vec<OrganisationUnitId>,
}

/// Points attached to a document classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AwardedPoints {
    pub raw: f64,
    pub scaled: f64,
}

/// Entity-specific part of a stored classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationSubject {
    Document {
        document_id: DocumentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        points: Option<AwardedPoints>,
    },
    Event {
        event_id: EventId,
    },
    PublicationSeries {
        series_id: PublicationSeriesId,
    },
    OrganisationUnit {
        unit_id: OrganisationUnitId,
    },
    Person {
        person_id: PersonId,
    },
    Prize {
        prize_id: PrizeId,
    },
}

impl ClassificationSubject {
    /// Subject without any payload beyond the entity identity.
    pub fn for_entity(entity: EntityRef) -> Self {
        match entity {
            EntityRef::Document(document_id) => ClassificationSubject::Document {
                document_id,
                points: None,
            },
            EntityRef::Event(event_id) => ClassificationSubject::Event { event_id },
            EntityRef::PublicationSeries(series_id) => {
                ClassificationSubject::PublicationSeries { series_id }
            }
            EntityRef::OrganisationUnit(unit_id) => {
                ClassificationSubject::OrganisationUnit { unit_id }
            }
            EntityRef::Person(person_id) => ClassificationSubject::Person { person_id },
            EntityRef::Prize(prize_id) => ClassificationSubject::Prize { prize_id },
        }
    }

    pub fn entity(&self) -> EntityRef {
        match self {
            ClassificationSubject::Document { document_id, .. } => {
                EntityRef::Document(*document_id)
            }
            ClassificationSubject::Event { event_id } => EntityRef::Event(*event_id),
            ClassificationSubject::PublicationSeries { series_id } => {
                EntityRef::PublicationSeries(*series_id)
            }
            ClassificationSubject::OrganisationUnit { unit_id } => {
                EntityRef::OrganisationUnit(*unit_id)
            }
            ClassificationSubject::Person { person_id } => EntityRef::Person(*person_id),
            ClassificationSubject::Prize { prize_id } => EntityRef::Prize(*prize_id),
        }
    }

    pub fn points(&self) -> Option<AwardedPoints> {
        match self {
            ClassificationSubject::Document { points, .. } => *points,
            _ => None,
        }
    }
}

/// Uniqueness key of an active classification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassificationKey {
    pub entity: EntityRef,
    pub commission_id: CommissionId,
    pub year: Option<i32>,
}

/// Classification of one entity by one commission, optionally for one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAssessmentClassification {
    pub id: ClassificationRecordId,
    pub subject: ClassificationSubject,
    pub commission_id: CommissionId,
    pub classification_id: AssessmentClassificationId,
    pub classification_year: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub manual: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl EntityAssessmentClassification {
    pub fn key(&self) -> ClassificationKey {
        ClassificationKey {
            entity: self.subject.entity(),
            commission_id: self.commission_id,
            year: self.classification_year,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Who may read an indicator value; ordered from least to most restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Open,
    Closed,
    AdminOnly,
}

/// Indicator definition (e.g. `jifRank`, `fiveYearJIF`, `citations`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicator {
    pub code: String,
    pub title: MultiLingualText,
    pub applicable_types: BTreeSet<EntityKind>,
    pub access_level: AccessLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum IndicatorValue {
    Numeric(f64),
    Boolean(bool),
    Textual(String),
}

impl IndicatorValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            IndicatorValue::Numeric(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            IndicatorValue::Textual(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Provenance of an indicator value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorSource {
    WebOfScience,
    Scimago,
    Erih,
    MinistryList,
    Manual,
    Other(String),
}

/// Entity an indicator value is attached to. Publication series values may be
/// scoped to one ranking edition and subject category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSubject {
    Document {
        document_id: DocumentId,
    },
    Event {
        event_id: EventId,
    },
    OrganisationUnit {
        unit_id: OrganisationUnitId,
    },
    Person {
        person_id: PersonId,
    },
    PublicationSeries {
        series_id: PublicationSeriesId,
        #[serde(default)]
        edition: Option<String>,
        #[serde(default)]
        category_identifier: Option<String>,
    },
}

impl IndicatorSubject {
    pub fn entity(&self) -> EntityRef {
        match self {
            IndicatorSubject::Document { document_id } => EntityRef::Document(*document_id),
            IndicatorSubject::Event { event_id } => EntityRef::Event(*event_id),
            IndicatorSubject::OrganisationUnit { unit_id } => EntityRef::OrganisationUnit(*unit_id),
            IndicatorSubject::Person { person_id } => EntityRef::Person(*person_id),
            IndicatorSubject::PublicationSeries { series_id, .. } => {
                EntityRef::PublicationSeries(*series_id)
            }
        }
    }
}

/// Raw indicator value held for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityIndicator {
    pub id: IndicatorRecordId,
    pub indicator_code: String,
    pub subject: IndicatorSubject,
    pub value: IndicatorValue,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub source: IndicatorSource,
    /// Storage keys of uploaded proofs.
    #[serde(default)]
    pub proofs: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl EntityIndicator {
    /// Whether the validity window touches `year`; open bounds always match.
    pub fn valid_in_year(&self, year: i32) -> bool {
        self.from_date.map(|from| from.year() <= year).unwrap_or(true)
            && self.to_date.map(|to| to.year() >= year).unwrap_or(true)
    }
}

/// Transient scoring preview for a hypothetical publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImaginaryAssessmentResult {
    pub assessment_code: String,
    pub assessment_reason: MultiLingualText,
    pub raw_points: f64,
    pub raw_points_reason: MultiLingualText,
    pub scaled_points: f64,
    pub scaled_points_reason: MultiLingualText,
}
