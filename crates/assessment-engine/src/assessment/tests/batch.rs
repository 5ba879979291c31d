use chrono::{Duration as ChronoDuration, NaiveDate, Utc};

use super::common::*;

use crate::assessment::batch::{
    BatchFilter, BatchJobSpec, BatchKind, BatchReport, CancellationFlag, Dispatch,
    DispatchError, DispatchOutcome, FailureKind, Schedule, SchedulerError,
};
use crate::assessment::domain::{
    AssessmentMeasure, AssessmentRulebook, ClassificationKey, CommissionId, DocumentId,
    EntityRef, MeasureId, MultiLingualText, RulebookId,
};
use crate::assessment::rules::STANDARD_SCALING_RULE;
use crate::assessment::service::AssessmentServiceError;
use crate::assessment::store::RepositoryError;

async fn run_now(fixture: &Fixture, kind: BatchKind, filter: BatchFilter) -> BatchReport {
    match fixture
        .service
        .trigger_batch(BatchJobSpec::new(kind, filter), Dispatch::Now)
        .await
        .expect("batch runs")
    {
        DispatchOutcome::Completed { report } => report,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

fn stored_code(fixture: &Fixture, entity: EntityRef, year: Option<i32>) -> Option<String> {
    let record = fixture
        .service
        .classifications()
        .find(&ClassificationKey {
            entity,
            commission_id: fixture.commission.id,
            year,
        })
        .expect("lookup")?;
    Some(
        fixture
            .service
            .catalog()
            .classification(record.classification_id)
            .expect("classification")
            .code,
    )
}

fn stored_points(fixture: &Fixture, document: u64, year: i32) -> Option<f64> {
    fixture
        .service
        .classifications()
        .find(&ClassificationKey {
            entity: EntityRef::Document(DocumentId(document)),
            commission_id: fixture.commission.id,
            year: Some(year),
        })
        .expect("lookup")
        .and_then(|record| record.subject.points())
        .map(|points| points.scaled)
}

#[tokio::test]
async fn journal_run_pages_until_a_short_page() {
    let fixture = build_fixture();
    let report = run_now(&fixture, BatchKind::JournalPublications, BatchFilter::default()).await;

    assert_eq!(report.pages, 2);
    assert_eq!(report.processed, 3);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.committed_chunks, 1);
    assert!(report.is_clean());

    let top = EntityRef::Document(DocumentId(1));
    assert_eq!(stored_code(&fixture, top, Some(2023)).as_deref(), Some("M21a"));
    assert_eq!(stored_points(&fixture, 1, 2023), Some(20.0));
    // Ten authors on an M21 paper: 8 / (1 + 0.2 * 3).
    assert_eq!(stored_points(&fixture, 2, 2023), Some(5.0));
    assert_eq!(
        stored_code(&fixture, EntityRef::Document(DocumentId(3)), Some(2023)),
        None
    );
}

#[tokio::test]
async fn rerun_converges_on_the_same_state() {
    let fixture = build_fixture();
    run_now(&fixture, BatchKind::JournalPublications, BatchFilter::default()).await;
    let before = fixture.classifications.all_records();

    let report = run_now(&fixture, BatchKind::JournalPublications, BatchFilter::default()).await;
    assert_eq!(report.inserted, 0);
    assert_eq!(report.unchanged, 2);
    assert_eq!(fixture.classifications.all_records(), before);
}

#[tokio::test]
async fn manual_records_are_reported_as_skipped() {
    let fixture = build_fixture();
    fixture
        .service
        .save_manual_classification(crate::assessment::store::ClassificationDraft {
            subject: crate::assessment::domain::ClassificationSubject::Document {
                document_id: DocumentId(1),
                points: None,
            },
            commission_id: fixture.commission.id,
            classification_id: fixture.code("M23"),
            year: Some(2023),
        })
        .expect("manual");

    let report = run_now(&fixture, BatchKind::JournalPublications, BatchFilter::default()).await;
    assert_eq!(report.skipped_manual, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(
        stored_code(&fixture, EntityRef::Document(DocumentId(1)), Some(2023)).as_deref(),
        Some("M23")
    );
}

#[tokio::test]
async fn contention_is_retried_until_the_chunk_commits() {
    let fixture = build_fixture();
    fixture.classifications.fail_next_transactions([
        RepositoryError::Contention("deadlock".to_string()),
        RepositoryError::Unavailable("failover".to_string()),
    ]);

    let report = run_now(&fixture, BatchKind::JournalPublications, BatchFilter::default()).await;
    assert!(report.failed_chunks.is_empty());
    assert_eq!(report.inserted, 2);
}

#[tokio::test]
async fn exhausted_retries_leave_the_chunk_unwritten() {
    let fixture = build_fixture();
    fixture.classifications.fail_next_transactions(
        (0..3).map(|attempt| RepositoryError::Contention(format!("attempt {attempt}"))),
    );

    let report = run_now(&fixture, BatchKind::JournalPublications, BatchFilter::default()).await;
    assert_eq!(report.failed_chunks.len(), 1);
    let failed = &report.failed_chunks[0];
    assert_eq!(failed.page, 0);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.items, 2);
    assert!(!report.is_clean());
    assert!(fixture.classifications.all_records().is_empty());
}

#[tokio::test]
async fn conflicts_are_not_retried() {
    let fixture = build_fixture();
    fixture
        .classifications
        .fail_next_transactions([RepositoryError::Conflict]);

    let report = run_now(&fixture, BatchKind::JournalPublications, BatchFilter::default()).await;
    assert_eq!(report.failed_chunks.len(), 1);
    assert_eq!(report.failed_chunks[0].attempts, 1);
}

#[tokio::test]
async fn proceedings_wait_for_the_conference_classification() {
    let fixture = build_fixture();
    let report =
        run_now(&fixture, BatchKind::ProceedingsPublications, BatchFilter::default()).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.inserted, 0);

    fixture.classify_conference(fixture.commission.id, "M30");
    let report =
        run_now(&fixture, BatchKind::ProceedingsPublications, BatchFilter::default()).await;
    assert_eq!(report.inserted, 1);
    assert_eq!(stored_points(&fixture, 4, 2023), Some(1.0));
}

#[tokio::test]
async fn theses_and_monographs_are_scored() {
    let fixture = build_fixture();
    let theses = run_now(&fixture, BatchKind::Theses, BatchFilter::default()).await;
    let monographs =
        run_now(&fixture, BatchKind::MonographPublications, BatchFilter::default()).await;

    assert_eq!(theses.inserted, 1);
    assert_eq!(monographs.inserted, 1);
    assert_eq!(stored_points(&fixture, 5, 2022), Some(6.0));
    assert_eq!(stored_points(&fixture, 6, 2023), Some(10.0));
}

#[tokio::test]
async fn series_run_classifies_each_year_in_range() {
    let fixture = build_fixture();
    let filter = BatchFilter {
        date_from: NaiveDate::from_ymd_opt(2022, 1, 1),
        until_year: Some(2023),
        ..BatchFilter::default()
    };
    let report = run_now(&fixture, BatchKind::PublicationSeries, filter).await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.inserted, 3);
    let top = EntityRef::PublicationSeries(TOP_JOURNAL);
    let good = EntityRef::PublicationSeries(GOOD_JOURNAL);
    assert_eq!(stored_code(&fixture, top, Some(2023)).as_deref(), Some("M21a"));
    assert_eq!(stored_code(&fixture, top, Some(2022)), None);
    assert_eq!(stored_code(&fixture, good, Some(2022)).as_deref(), Some("M23"));
    assert_eq!(stored_code(&fixture, good, Some(2023)).as_deref(), Some("M21"));
}

#[tokio::test]
async fn filters_narrow_the_run() {
    let fixture = build_fixture();
    let filter = BatchFilter {
        series_ids: [GOOD_JOURNAL].into_iter().collect(),
        ..BatchFilter::default()
    };
    let report = run_now(&fixture, BatchKind::JournalPublications, filter).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.pages, 1);
    assert_eq!(report.inserted, 1);

    let later = BatchFilter {
        date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
        ..BatchFilter::default()
    };
    let report = run_now(&fixture, BatchKind::JournalPublications, later).await;
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn unusable_point_rule_is_an_item_failure() {
    let fixture = build_fixture();
    let catalog = fixture.service.catalog();
    let strict = catalog
        .create_rulebook(AssessmentRulebook {
            id: RulebookId(0),
            name: MultiLingualText::bilingual("Strict", "Strogi"),
            issue_date: None,
            pdf_file: None,
            is_default: false,
        })
        .expect("rulebook");
    catalog
        .create_measure(AssessmentMeasure {
            id: MeasureId(0),
            rulebook_id: strict.id,
            code: "M21a".to_string(),
            title: MultiLingualText::new(),
            point_rule: "retiredPointRule".to_string(),
            scaling_rule: STANDARD_SCALING_RULE.to_string(),
        })
        .expect("measure");
    let board = fixture
        .service
        .commissions()
        .create_commission(commission("Strict board", false, Some(strict.id)))
        .expect("commission");

    let filter = BatchFilter {
        commission_id: Some(board.id),
        ..BatchFilter::default()
    };
    let report = run_now(&fixture, BatchKind::JournalPublications, filter).await;

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.entity, EntityRef::Document(DocumentId(1)));
    assert_eq!(failure.commission_id, board.id);
    assert_eq!(failure.kind, FailureKind::Other);
    assert!(failure.message.contains("retiredPointRule"));
    // The M21 paper falls back to the default rulebook's measure.
    assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn unknown_commission_fails_the_run() {
    let fixture = build_fixture();
    let filter = BatchFilter {
        commission_id: Some(CommissionId(404)),
        ..BatchFilter::default()
    };
    let error = fixture
        .service
        .trigger_batch(
            BatchJobSpec::new(BatchKind::Theses, filter),
            Dispatch::Now,
        )
        .await
        .expect_err("commission missing");
    assert_eq!(error.status_code(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scheduled_run_records_its_report() {
    let fixture = build_fixture();
    let spec = BatchJobSpec::new(BatchKind::JournalPublications, BatchFilter::default());
    let at = Utc::now() + ChronoDuration::hours(1);

    let outcome = fixture
        .service
        .trigger_batch(spec.clone(), Dispatch::At { at })
        .await
        .expect("scheduled");
    let task_id = match outcome {
        DispatchOutcome::Scheduled { task_id } => task_id,
        other => panic!("expected scheduling, got {other:?}"),
    };
    assert_eq!(task_id, spec.task_id());
    assert_eq!(fixture.service.scheduled_batches(), vec![task_id.clone()]);
    assert_eq!(
        fixture
            .scheduler
            .registrations
            .lock()
            .expect("registrations lock")
            .get(&task_id),
        Some(&Schedule::Once { at })
    );
    assert!(fixture.service.last_batch_report(&task_id).is_none());

    assert!(fixture.scheduler.fire(&task_id, CancellationFlag::new()).await);
    let report = fixture
        .service
        .last_batch_report(&task_id)
        .expect("report remembered");
    assert_eq!(report.inserted, 2);

    assert!(fixture.service.cancel_batch(&task_id));
    assert!(!fixture.service.cancel_batch(&task_id));
    assert!(fixture.service.scheduled_batches().is_empty());
}

#[tokio::test]
async fn cancelled_run_stops_before_the_first_page() {
    let fixture = build_fixture();
    let spec = BatchJobSpec::new(BatchKind::JournalPublications, BatchFilter::default());
    fixture
        .service
        .trigger_batch(
            spec.clone(),
            Dispatch::Every {
                start: Utc::now(),
                interval_secs: 3600,
            },
        )
        .await
        .expect("scheduled");

    let cancel = CancellationFlag::new();
    cancel.cancel();
    assert!(fixture.scheduler.fire(&spec.task_id(), cancel).await);

    let report = fixture
        .service
        .last_batch_report(&spec.task_id())
        .expect("report remembered");
    assert!(report.cancelled);
    assert_eq!(report.pages, 0);
    assert!(fixture.classifications.all_records().is_empty());
}

#[tokio::test]
async fn zero_interval_is_rejected() {
    let fixture = build_fixture();
    let error = fixture
        .service
        .trigger_batch(
            BatchJobSpec::new(BatchKind::Theses, BatchFilter::default()),
            Dispatch::Every {
                start: Utc::now(),
                interval_secs: 0,
            },
        )
        .await
        .expect_err("zero interval");
    assert!(matches!(
        error,
        AssessmentServiceError::Dispatch(DispatchError::Scheduler(
            SchedulerError::InvalidInterval
        ))
    ));
    assert!(fixture.service.scheduled_batches().is_empty());
}
