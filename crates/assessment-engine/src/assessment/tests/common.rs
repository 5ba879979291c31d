use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;

use crate::assessment::batch::{
    BatchSettings, CancellationFlag, DocumentIndex, InMemoryDocumentIndex, Schedule, ScheduledJob,
    SchedulerError, TaskScheduler,
};
use crate::assessment::domain::{
    AssessmentClassificationId, AssessmentRulebook, ClassificationSubject, Commission,
    CommissionId, ContributionFlags, DocumentId, DocumentMetadata, EventId, MultiLingualText,
    PersonId, PublicationSeriesId, PublicationType, RulebookId,
};
use crate::assessment::researchers::CategoryPriorityTable;
use crate::assessment::resolver::{JournalRanking, RankingTable};
use crate::assessment::rules::{RuleRegistry, STANDARD_POINT_RULE, STANDARD_SCALING_RULE};
use crate::assessment::service::{AssessmentCollaborators, AssessmentService};
use crate::assessment::store::memory::{
    InMemoryCatalogRepository, InMemoryClassificationRepository, InMemoryCommissionRepository,
    InMemoryIndicatorRepository,
};
use crate::assessment::store::ClassificationDraft;

pub(super) const TOP_JOURNAL: PublicationSeriesId = PublicationSeriesId(7);
pub(super) const GOOD_JOURNAL: PublicationSeriesId = PublicationSeriesId(8);
pub(super) const UNRANKED_JOURNAL: PublicationSeriesId = PublicationSeriesId(9);
pub(super) const CONFERENCE: EventId = EventId(50);
pub(super) const RESEARCHER: PersonId = PersonId(10);
pub(super) const COAUTHOR: PersonId = PersonId(11);

/// Scheduler double that records registrations; jobs only run through [`fire`].
///
/// [`fire`]: RecordingScheduler::fire
#[derive(Default)]
pub(super) struct RecordingScheduler {
    pub registrations: Mutex<BTreeMap<String, Schedule>>,
    jobs: Mutex<BTreeMap<String, ScheduledJob>>,
}

impl RecordingScheduler {
    /// Runs the registered job once with the given flag.
    pub async fn fire(&self, task_id: &str, cancel: CancellationFlag) -> bool {
        let job = self.jobs.lock().expect("jobs lock").get(task_id).cloned();
        match job {
            Some(job) => {
                job(cancel).await;
                true
            }
            None => false,
        }
    }
}

impl TaskScheduler for RecordingScheduler {
    fn schedule(
        &self,
        task_id: &str,
        schedule: Schedule,
        job: ScheduledJob,
    ) -> Result<(), SchedulerError> {
        if let Schedule::Every { interval, .. } = schedule {
            if interval.is_zero() {
                return Err(SchedulerError::InvalidInterval);
            }
        }
        self.registrations
            .lock()
            .expect("registrations lock")
            .insert(task_id.to_string(), schedule);
        self.jobs
            .lock()
            .expect("jobs lock")
            .insert(task_id.to_string(), job);
        Ok(())
    }

    fn cancel(&self, task_id: &str) -> bool {
        self.jobs.lock().expect("jobs lock").remove(task_id);
        self.registrations
            .lock()
            .expect("registrations lock")
            .remove(task_id)
            .is_some()
    }

    fn scheduled(&self) -> Vec<String> {
        self.registrations
            .lock()
            .expect("registrations lock")
            .keys()
            .cloned()
            .collect()
    }
}

pub(super) struct Fixture {
    pub service: Arc<AssessmentService>,
    pub classifications: InMemoryClassificationRepository,
    pub index: InMemoryDocumentIndex,
    pub scheduler: Arc<RecordingScheduler>,
    pub commission: Commission,
    pub rulebook: AssessmentRulebook,
}

impl Fixture {
    pub fn seeded(&self, id: u64) -> DocumentMetadata {
        self.index
            .document(DocumentId(id))
            .expect("index lookup")
            .unwrap_or_else(|| panic!("document {id} seeded"))
    }

    pub fn code(&self, code: &str) -> AssessmentClassificationId {
        self.service
            .catalog()
            .classification_by_code(code)
            .expect("catalog lookup")
            .unwrap_or_else(|| panic!("classification {code} installed"))
            .id
    }

    pub fn commission_named(&self, name: &str) -> Commission {
        self.service
            .commissions()
            .create_commission(commission(name, false, Some(self.rulebook.id)))
            .expect("commission created")
    }

    /// Manual classification of the conference so its proceedings resolve.
    pub fn classify_conference(&self, commission: CommissionId, code: &str) {
        self.service
            .save_manual_classification(ClassificationDraft {
                subject: ClassificationSubject::Event {
                    event_id: CONFERENCE,
                },
                commission_id: commission,
                classification_id: self.code(code),
                year: None,
            })
            .expect("event classified");
    }
}

pub(super) fn settings() -> BatchSettings {
    BatchSettings {
        page_size: 2,
        commit_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
    }
}

pub(super) fn commission(name: &str, is_default: bool, rulebook: Option<RulebookId>) -> Commission {
    Commission {
        id: CommissionId(0),
        description: MultiLingualText::bilingual(name, name),
        formal_description_of_rule: "standard".to_string(),
        assessment_date_from: None,
        assessment_date_to: None,
        recognised_research_areas: Default::default(),
        is_default,
        rulebook_id: rulebook,
    }
}

pub(super) fn ranking(
    series: PublicationSeriesId,
    year: i32,
    rank: u32,
    total: u32,
) -> JournalRanking {
    JournalRanking {
        series_id: series,
        year,
        edition: "SCIE".to_string(),
        category: "Physics".to_string(),
        rank,
        total,
        impact_factor: None,
    }
}

pub(super) fn rankings() -> RankingTable {
    let mut table = RankingTable::new();
    table.insert(ranking(TOP_JOURNAL, 2023, 3, 120)).expect("valid ranking");
    table.insert(ranking(GOOD_JOURNAL, 2023, 30, 100)).expect("valid ranking");
    table.insert(ranking(GOOD_JOURNAL, 2022, 60, 100)).expect("valid ranking");
    table
}

pub(super) fn document(
    id: u64,
    publication_type: PublicationType,
    year: i32,
    authors: &[PersonId],
) -> DocumentMetadata {
    DocumentMetadata {
        document_id: DocumentId(id),
        title: MultiLingualText::bilingual(format!("Paper {id}"), format!("Rad {id}")),
        publication_type,
        year,
        publication_date: None,
        research_area: None,
        author_count: authors.len().max(1) as u32,
        contribution: ContributionFlags::default(),
        series_id: None,
        event_id: None,
        international: true,
        authors: authors.to_vec(),
        organisation_units: Vec::new(),
    }
}

pub(super) fn journal_article(id: u64, series: PublicationSeriesId, year: i32) -> DocumentMetadata {
    DocumentMetadata {
        series_id: Some(series),
        ..document(id, PublicationType::JournalArticle, year, &[RESEARCHER])
    }
}

/// Documents covering every batch kind; two journal articles per page boundary.
pub(super) fn seed_documents(index: &InMemoryDocumentIndex) {
    index.insert_document(journal_article(1, TOP_JOURNAL, 2023));
    index.insert_document(DocumentMetadata {
        author_count: 10,
        authors: vec![RESEARCHER, COAUTHOR],
        ..journal_article(2, GOOD_JOURNAL, 2023)
    });
    index.insert_document(journal_article(3, UNRANKED_JOURNAL, 2023));
    index.insert_document(DocumentMetadata {
        event_id: Some(CONFERENCE),
        ..document(4, PublicationType::ProceedingsFullArticle, 2023, &[RESEARCHER])
    });
    index.insert_document(document(5, PublicationType::PhdThesis, 2022, &[RESEARCHER]));
    index.insert_document(document(6, PublicationType::Monograph, 2023, &[COAUTHOR]));
}

pub(super) fn build_fixture() -> Fixture {
    build_fixture_with(settings())
}

pub(super) fn build_fixture_with(settings: BatchSettings) -> Fixture {
    let rules = Arc::new(RuleRegistry::standard());
    let classifications = InMemoryClassificationRepository::default();
    let index = InMemoryDocumentIndex::new();
    let scheduler = Arc::new(RecordingScheduler::default());
    seed_documents(&index);

    let service = AssessmentService::new(AssessmentCollaborators {
        rules: Arc::clone(&rules),
        classifications: Arc::new(classifications.clone()),
        commissions: Arc::new(InMemoryCommissionRepository::default()),
        catalog: Arc::new(InMemoryCatalogRepository::default()),
        indicators: Arc::new(InMemoryIndicatorRepository::default()),
        rankings: Arc::new(rankings()),
        index: Arc::new(index.clone()),
        authorship: Arc::new(index.clone()),
        scheduler: scheduler.clone(),
        settings,
        priorities: CategoryPriorityTable::from_registry(&rules),
    })
    .expect("standard rules are exclusive");

    let rulebook = service
        .catalog()
        .install_rulebook(
            &rules,
            AssessmentRulebook {
                id: RulebookId(0),
                name: MultiLingualText::bilingual("Rulebook 2025", "Pravilnik 2025"),
                issue_date: None,
                pdf_file: None,
                is_default: true,
            },
            STANDARD_POINT_RULE,
            STANDARD_SCALING_RULE,
        )
        .expect("rulebook installed");

    let commission = service
        .commissions()
        .create_commission(commission("Physics board", true, Some(rulebook.id)))
        .expect("commission created");

    Fixture {
        service: Arc::new(service),
        classifications,
        index,
        scheduler,
        commission,
        rulebook,
    }
}

pub(super) async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("valid json")
}

pub(super) fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
