use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::assessment::domain::{
    CommissionId, DocumentFamily, DocumentId, DocumentMetadata, EntityRef, EventId,
    OrganisationUnitId, PersonId, PublicationSeriesId,
};
use crate::assessment::researchers::AuthorshipLookup;

/// Group of entities a batch run walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    JournalPublications,
    ProceedingsPublications,
    Theses,
    MonographPublications,
    PublicationSeries,
}

impl BatchKind {
    pub const fn label(self) -> &'static str {
        match self {
            BatchKind::JournalPublications => "journal_publications",
            BatchKind::ProceedingsPublications => "proceedings_publications",
            BatchKind::Theses => "theses",
            BatchKind::MonographPublications => "monograph_publications",
            BatchKind::PublicationSeries => "publication_series",
        }
    }

    /// Document family walked by the run; `None` for the publication series run.
    pub const fn family(self) -> Option<DocumentFamily> {
        match self {
            BatchKind::JournalPublications => Some(DocumentFamily::Journal),
            BatchKind::ProceedingsPublications => Some(DocumentFamily::Proceedings),
            BatchKind::Theses => Some(DocumentFamily::Thesis),
            BatchKind::MonographPublications => Some(DocumentFamily::Monograph),
            BatchKind::PublicationSeries => None,
        }
    }
}

/// Narrowing applied to the index before paging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFilter {
    /// Earliest publication date to include. Documents known only by year are
    /// compared by year.
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    /// Last year classified by publication series runs; defaults to the current year.
    #[serde(default)]
    pub until_year: Option<i32>,
    #[serde(default)]
    pub commission_id: Option<CommissionId>,
    #[serde(default)]
    pub author_ids: BTreeSet<PersonId>,
    #[serde(default)]
    pub organisation_unit_ids: BTreeSet<OrganisationUnitId>,
    #[serde(default)]
    pub series_ids: BTreeSet<PublicationSeriesId>,
    #[serde(default)]
    pub event_ids: BTreeSet<EventId>,
}

impl BatchFilter {
    pub fn from_year(&self) -> Option<i32> {
        self.date_from.map(|date| date.year())
    }

    pub fn admits(&self, document: &DocumentMetadata) -> bool {
        let after_start = self.date_from.map_or(true, |from| {
            match document.publication_date {
                Some(published) => published >= from,
                None => document.year >= from.year(),
            }
        });
        let by_author = self.author_ids.is_empty()
            || document
                .authors
                .iter()
                .any(|author| self.author_ids.contains(author));
        let by_unit = self.organisation_unit_ids.is_empty()
            || document
                .organisation_units
                .iter()
                .any(|unit| self.organisation_unit_ids.contains(unit));
        let by_venue = (self.series_ids.is_empty() && self.event_ids.is_empty())
            || document
                .series_id
                .map_or(false, |series| self.series_ids.contains(&series))
            || document
                .event_id
                .map_or(false, |event| self.event_ids.contains(&event));
        after_start && by_author && by_unit && by_venue
    }

    /// Deterministic rendering used in task ids.
    pub(crate) fn fingerprint(&self) -> String {
        fn join<T: std::fmt::Display>(values: impl Iterator<Item = T>) -> String {
            values.map(|value| value.to_string()).collect::<Vec<_>>().join(",")
        }

        let mut out = String::new();
        let _ = write!(
            out,
            "commission={};from={};until={}",
            self.commission_id
                .map_or_else(|| "all".to_string(), |id| id.to_string()),
            self.date_from
                .map_or_else(|| "any".to_string(), |date| date.to_string()),
            self.until_year
                .map_or_else(|| "current".to_string(), |year| year.to_string()),
        );
        for (label, values) in [
            ("authors", join(self.author_ids.iter())),
            ("units", join(self.organisation_unit_ids.iter())),
            ("series", join(self.series_ids.iter())),
            ("events", join(self.event_ids.iter())),
        ] {
            if !values.is_empty() {
                let _ = write!(out, ";{label}={values}");
            }
        }
        out
    }
}

/// One item handed out by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexEntry {
    Document(DocumentMetadata),
    PublicationSeries { series_id: PublicationSeriesId },
}

impl IndexEntry {
    pub fn entity(&self) -> EntityRef {
        match self {
            IndexEntry::Document(document) => EntityRef::Document(document.document_id),
            IndexEntry::PublicationSeries { series_id } => EntityRef::PublicationSeries(*series_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("document index unavailable: {0}")]
    Unavailable(String),
}

/// Paged, filtered view over the documents and venues owned by the surrounding system.
pub trait DocumentIndex: Send + Sync {
    /// Zero-based page of `page_size` entries in a stable order.
    fn page(
        &self,
        kind: BatchKind,
        filter: &BatchFilter,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<IndexEntry>, IndexError>;

    fn document(&self, id: DocumentId) -> Result<Option<DocumentMetadata>, IndexError>;
}

/// Document index held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentIndex {
    documents: Arc<RwLock<BTreeMap<DocumentId, DocumentMetadata>>>,
    series: Arc<RwLock<BTreeSet<PublicationSeriesId>>>,
}

impl InMemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_document(&self, document: DocumentMetadata) {
        if let Some(series) = document.series_id {
            self.insert_series(series);
        }
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(document.document_id, document);
    }

    pub fn insert_series(&self, series: PublicationSeriesId) {
        self.series
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(series);
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentIndex for InMemoryDocumentIndex {
    fn page(
        &self,
        kind: BatchKind,
        filter: &BatchFilter,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<IndexEntry>, IndexError> {
        let skip = page.saturating_mul(page_size);
        let entries = match kind.family() {
            Some(family) => self
                .documents
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .values()
                .filter(|document| document.publication_type.family() == family)
                .filter(|document| filter.admits(document))
                .skip(skip)
                .take(page_size)
                .cloned()
                .map(IndexEntry::Document)
                .collect(),
            None => self
                .series
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .iter()
                .filter(|series| filter.series_ids.is_empty() || filter.series_ids.contains(series))
                .skip(skip)
                .take(page_size)
                .map(|series_id| IndexEntry::PublicationSeries {
                    series_id: *series_id,
                })
                .collect(),
        };
        Ok(entries)
    }

    fn document(&self, id: DocumentId) -> Result<Option<DocumentMetadata>, IndexError> {
        Ok(self
            .documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned())
    }
}

impl AuthorshipLookup for InMemoryDocumentIndex {
    fn documents_authored_by(&self, person: PersonId) -> Vec<DocumentMetadata> {
        self.documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|document| document.authors.contains(&person))
            .cloned()
            .collect()
    }
}
