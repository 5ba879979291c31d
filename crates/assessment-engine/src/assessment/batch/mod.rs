//! Bulk (re)classification over the document index.
//!
//! A run pulls one page at a time, assesses every item against the commissions in
//! scope, and commits the page's drafts in one unit of work before asking for the
//! next page. Writes go through the automatic upsert, so re-running a run that was
//! interrupted converges on the same stored state.

mod dispatch;
mod index;
mod scheduler;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn, Instrument};

pub use dispatch::{BatchDispatcher, Dispatch, DispatchError, DispatchOutcome};
pub use index::{
    BatchFilter, BatchKind, DocumentIndex, InMemoryDocumentIndex, IndexEntry, IndexError,
};
pub use scheduler::{Schedule, ScheduledJob, SchedulerError, TaskScheduler, TokioTaskScheduler};

use super::domain::{
    AwardedPoints, ClassificationSubject, Commission, CommissionId, DocumentMetadata, EntityRef,
};
use super::points::{PointCalculator, PointsError, ScoringContext};
use super::resolver::{ClassificationResolver, Resolution, ResolutionError};
use super::store::{
    CatalogStore, ClassificationDraft, CommissionStore, EntityClassificationStore,
    RepositoryError, StoreError, UpsertOutcome,
};
use crate::config::AssessmentConfig;
use crate::telemetry;

/// Shared stop signal for a run; checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Filters plus the run kind; the same spec runs now or through the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobSpec {
    pub kind: BatchKind,
    #[serde(default)]
    pub filter: BatchFilter,
}

impl BatchJobSpec {
    pub fn new(kind: BatchKind, filter: BatchFilter) -> Self {
        Self { kind, filter }
    }

    /// Stable identifier: equal specs always map to the same task id.
    pub fn task_id(&self) -> String {
        format!(
            "assessment-batch:{}:{}",
            self.kind.label(),
            self.filter.fingerprint()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub page_size: usize,
    pub commit_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&AssessmentConfig::default())
    }
}

impl From<&AssessmentConfig> for BatchSettings {
    fn from(config: &AssessmentConfig) -> Self {
        Self {
            page_size: config.page_size,
            commit_attempts: config.commit_attempts,
            retry_base_delay: config.retry_base_delay,
        }
    }
}

/// Failure of a single item; the rest of the chunk is unaffected.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Points(#[from] PointsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RuleNotFound,
    Ambiguous,
    Other,
}

impl From<&ItemError> for FailureKind {
    fn from(error: &ItemError) -> Self {
        match error {
            ItemError::Points(PointsError::RuleNotFound { .. }) => FailureKind::RuleNotFound,
            ItemError::Resolution(ResolutionError::Ambiguous { .. }) => FailureKind::Ambiguous,
            _ => FailureKind::Other,
        }
    }
}

/// Item left for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub entity: EntityRef,
    pub commission_id: CommissionId,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub page: usize,
    pub items: usize,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub task_id: String,
    pub kind: BatchKind,
    pub pages: usize,
    pub processed: usize,
    pub committed_chunks: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub skipped_manual: usize,
    pub failures: Vec<ItemFailure>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub cancelled: bool,
}

impl BatchReport {
    fn new(spec: &BatchJobSpec) -> Self {
        Self {
            task_id: spec.task_id(),
            kind: spec.kind,
            pages: 0,
            processed: 0,
            committed_chunks: 0,
            inserted: 0,
            replaced: 0,
            unchanged: 0,
            skipped_manual: 0,
            failures: Vec::new(),
            failed_chunks: Vec::new(),
            cancelled: false,
        }
    }

    fn record(&mut self, outcomes: &[UpsertOutcome]) {
        for outcome in outcomes {
            match outcome {
                UpsertOutcome::Inserted(_) => self.inserted += 1,
                UpsertOutcome::Replaced(_) => self.replaced += 1,
                UpsertOutcome::Unchanged(_) => self.unchanged += 1,
                UpsertOutcome::SkippedManualOverride(_) => self.skipped_manual += 1,
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.failed_chunks.is_empty() && !self.cancelled
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("no commission is configured")]
    NoCommissions,
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs `assess` for every (item, commission) pair and appends the drafts to
/// `accumulator`. Failed items are returned, never written.
pub fn classify_chunk<F>(
    items: &[IndexEntry],
    commissions: &[Commission],
    mut assess: F,
    accumulator: &mut Vec<ClassificationDraft>,
) -> Vec<ItemFailure>
where
    F: FnMut(&IndexEntry, &Commission) -> Result<Vec<ClassificationDraft>, ItemError>,
{
    let mut failures = Vec::new();
    for item in items {
        for commission in commissions {
            match assess(item, commission) {
                Ok(drafts) => accumulator.extend(drafts),
                Err(error) => {
                    warn!(
                        entity = %item.entity(),
                        commission = %commission.id,
                        %error,
                        "item assessment failed"
                    );
                    failures.push(ItemFailure {
                        entity: item.entity(),
                        commission_id: commission.id,
                        kind: FailureKind::from(&error),
                        message: error.to_string(),
                    });
                }
            }
        }
    }
    failures
}

/// Per-item assessment: resolution, then points for documents.
pub struct EntityAssessor {
    resolver: Arc<ClassificationResolver>,
    calculator: PointCalculator,
    catalog: CatalogStore,
}

impl EntityAssessor {
    pub fn new(
        resolver: Arc<ClassificationResolver>,
        calculator: PointCalculator,
        catalog: CatalogStore,
    ) -> Self {
        Self {
            resolver,
            calculator,
            catalog,
        }
    }

    pub fn assess(
        &self,
        entry: &IndexEntry,
        commission: &Commission,
        filter: &BatchFilter,
    ) -> Result<Vec<ClassificationDraft>, ItemError> {
        match entry {
            IndexEntry::Document(document) => Ok(self
                .assess_document(document, commission)?
                .into_iter()
                .collect()),
            IndexEntry::PublicationSeries { series_id } => {
                let until = filter.until_year.unwrap_or_else(|| Utc::now().year());
                let from = filter.from_year().unwrap_or(until);
                let mut drafts = Vec::new();
                for year in from..=until {
                    let resolution =
                        self.resolver
                            .resolve_publication_series(*series_id, commission, year)?;
                    if let Some(resolution) = resolution {
                        drafts.push(ClassificationDraft {
                            subject: ClassificationSubject::PublicationSeries {
                                series_id: *series_id,
                            },
                            commission_id: commission.id,
                            classification_id: resolution.classification.id,
                            year: Some(year),
                        });
                    }
                }
                Ok(drafts)
            }
        }
    }

    pub fn assess_document(
        &self,
        document: &DocumentMetadata,
        commission: &Commission,
    ) -> Result<Option<ClassificationDraft>, ItemError> {
        let Some(resolution) = self.resolver.resolve_document(document, commission)? else {
            return Ok(None);
        };
        let points = self.score(document, commission, &resolution)?;
        Ok(Some(ClassificationDraft {
            subject: ClassificationSubject::Document {
                document_id: document.document_id,
                points,
            },
            commission_id: commission.id,
            classification_id: resolution.classification.id,
            year: Some(document.year),
        }))
    }

    /// Points are only awarded when the commission's rulebook has a measure for the code.
    fn score(
        &self,
        document: &DocumentMetadata,
        commission: &Commission,
        resolution: &Resolution,
    ) -> Result<Option<AwardedPoints>, ItemError> {
        let code = &resolution.classification.code;
        let Some(measure) = self.catalog.measure_for(commission.rulebook_id, code)? else {
            return Ok(None);
        };
        let context = ScoringContext {
            classification_code: code.clone(),
            research_area: document.research_area.clone(),
            author_count: document.author_count,
            contribution: document.contribution,
            publication_type: Some(document.publication_type),
        };
        let outcome = self.calculator.compute_points(&measure, &context)?;
        Ok(Some(AwardedPoints {
            raw: outcome.raw_points,
            scaled: outcome.scaled_points,
        }))
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}

pub struct BatchOrchestrator {
    index: Arc<dyn DocumentIndex>,
    assessor: EntityAssessor,
    classifications: EntityClassificationStore,
    commissions: CommissionStore,
    settings: BatchSettings,
    locks: Mutex<BTreeMap<CommissionId, Arc<AsyncMutex<()>>>>,
}

impl BatchOrchestrator {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        assessor: EntityAssessor,
        classifications: EntityClassificationStore,
        commissions: CommissionStore,
        settings: BatchSettings,
    ) -> Self {
        Self {
            index,
            assessor,
            classifications,
            commissions,
            settings,
            locks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> BatchSettings {
        self.settings
    }

    pub async fn classify_journal_publications(
        &self,
        filter: BatchFilter,
    ) -> Result<BatchReport, BatchError> {
        self.run_now(BatchKind::JournalPublications, filter).await
    }

    pub async fn classify_proceedings_publications(
        &self,
        filter: BatchFilter,
    ) -> Result<BatchReport, BatchError> {
        self.run_now(BatchKind::ProceedingsPublications, filter).await
    }

    pub async fn classify_theses(&self, filter: BatchFilter) -> Result<BatchReport, BatchError> {
        self.run_now(BatchKind::Theses, filter).await
    }

    pub async fn classify_monograph_publications(
        &self,
        filter: BatchFilter,
    ) -> Result<BatchReport, BatchError> {
        self.run_now(BatchKind::MonographPublications, filter).await
    }

    pub async fn classify_publication_series(
        &self,
        filter: BatchFilter,
    ) -> Result<BatchReport, BatchError> {
        self.run_now(BatchKind::PublicationSeries, filter).await
    }

    async fn run_now(
        &self,
        kind: BatchKind,
        filter: BatchFilter,
    ) -> Result<BatchReport, BatchError> {
        self.run(&BatchJobSpec::new(kind, filter), &CancellationFlag::new())
            .await
    }

    /// Pages through the index until a short page, committing one chunk per page.
    pub async fn run(
        &self,
        spec: &BatchJobSpec,
        cancel: &CancellationFlag,
    ) -> Result<BatchReport, BatchError> {
        let commissions = self.commissions_in_scope(spec)?;
        let span = telemetry::batch_span(&spec.task_id(), spec.kind.label());

        async {
            let _guards = self.lock_commissions(&commissions).await;
            let page_size = self.settings.page_size.max(1);
            let mut report = BatchReport::new(spec);
            info!(commissions = commissions.len(), page_size, "batch run started");

            let mut page = 0;
            loop {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    warn!(page, "batch run cancelled");
                    break;
                }

                let entries = self.index.page(spec.kind, &spec.filter, page, page_size)?;
                let fetched = entries.len();
                report.pages += 1;
                report.processed += fetched;

                let mut drafts = Vec::new();
                let failures = classify_chunk(
                    &entries,
                    &commissions,
                    |entry, commission| self.assessor.assess(entry, commission, &spec.filter),
                    &mut drafts,
                );
                report.failures.extend(failures);

                if !drafts.is_empty() {
                    match self.commit_with_retry(&drafts).await {
                        Ok(outcomes) => {
                            report.record(&outcomes);
                            report.committed_chunks += 1;
                            info!(page, items = fetched, drafts = drafts.len(), "chunk committed");
                        }
                        Err((failure, attempts)) => {
                            error!(page, attempts, error = %failure, "chunk failed");
                            report.failed_chunks.push(ChunkFailure {
                                page,
                                items: fetched,
                                attempts,
                                message: failure.to_string(),
                            });
                        }
                    }
                }

                if fetched < page_size {
                    break;
                }
                page += 1;
            }

            info!(
                processed = report.processed,
                inserted = report.inserted,
                replaced = report.replaced,
                unchanged = report.unchanged,
                skipped_manual = report.skipped_manual,
                failures = report.failures.len(),
                failed_chunks = report.failed_chunks.len(),
                "batch run finished"
            );
            Ok::<_, BatchError>(report)
        }
        .instrument(span)
        .await
    }

    fn commissions_in_scope(&self, spec: &BatchJobSpec) -> Result<Vec<Commission>, BatchError> {
        let commissions = match spec.filter.commission_id {
            Some(id) => vec![self.commissions.commission(id)?],
            None => self.commissions.commissions()?,
        };
        if commissions.is_empty() {
            return Err(BatchError::NoCommissions);
        }
        Ok(commissions)
    }

    /// Serializes runs per commission; locks are taken in id order.
    async fn lock_commissions(&self, commissions: &[Commission]) -> Vec<OwnedMutexGuard<()>> {
        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut ids: Vec<CommissionId> =
                commissions.iter().map(|commission| commission.id).collect();
            ids.sort();
            ids.dedup();
            ids.into_iter()
                .map(|id| Arc::clone(locks.entry(id).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        guards
    }

    async fn commit_with_retry(
        &self,
        drafts: &[ClassificationDraft],
    ) -> Result<Vec<UpsertOutcome>, (RepositoryError, u32)> {
        let attempts = self.settings.commit_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.classifications.commit_automatic_chunk(drafts) {
                Ok(outcomes) => return Ok(outcomes),
                Err(failure) if failure.is_retryable() && attempt < attempts => {
                    let delay = backoff_delay(self.settings.retry_base_delay, attempt - 1);
                    warn!(attempt, ?delay, error = %failure, "chunk commit failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err((failure, attempt)),
            }
        }
    }
}
