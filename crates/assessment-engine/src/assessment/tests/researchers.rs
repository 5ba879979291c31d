use axum::http::StatusCode;

use super::common::*;

use crate::assessment::batch::{BatchFilter, BatchJobSpec, BatchKind, Dispatch};
use crate::assessment::domain::{
    AssessmentClassification, AssessmentClassificationId, ClassificationSubject, CommissionId,
    DocumentId, EntityKind, MultiLingualText, OrganisationUnitId,
};
use crate::assessment::researchers::{ResearcherAssessment, ResearcherQuery};
use crate::assessment::store::ClassificationDraft;

async fn classify_everything(fixture: &Fixture) {
    for kind in [
        BatchKind::JournalPublications,
        BatchKind::Theses,
        BatchKind::MonographPublications,
    ] {
        fixture
            .service
            .trigger_batch(BatchJobSpec::new(kind, BatchFilter::default()), Dispatch::Now)
            .await
            .expect("batch runs");
    }
}

fn query(fixture: &Fixture, start_year: i32, end_year: i32) -> ResearcherQuery {
    ResearcherQuery {
        commission_id: fixture.commission.id,
        researcher_ids: vec![RESEARCHER, COAUTHOR, RESEARCHER],
        start_year,
        end_year,
        institution_filter: Default::default(),
    }
}

fn category_codes(assessment: &ResearcherAssessment) -> Vec<&str> {
    assessment
        .publications_per_category
        .iter()
        .map(|category| category.code.as_str())
        .collect()
}

#[tokio::test]
async fn report_groups_publications_by_category() {
    let fixture = build_fixture();
    classify_everything(&fixture).await;

    let report = fixture
        .service
        .assess_researchers(&query(&fixture, 2022, 2023))
        .expect("report");
    assert_eq!(report.len(), 2);

    let researcher = &report[0];
    assert_eq!(researcher.person_id, RESEARCHER);
    assert_eq!(category_codes(researcher), vec!["M21a", "M21", "M70"]);
    assert_eq!(researcher.total_points, 31.0);
    // The unranked article and the unclassified conference paper.
    assert_eq!(researcher.pending_reclassification, 2);
    let thesis = &researcher.publications_per_category[2].publications[0];
    assert_eq!(thesis.document_id, DocumentId(5));
    assert_eq!(thesis.year, 2022);
    assert_eq!(thesis.points, Some(6.0));

    let coauthor = &report[1];
    assert_eq!(coauthor.person_id, COAUTHOR);
    assert_eq!(category_codes(coauthor), vec!["M12", "M21"]);
    assert_eq!(coauthor.total_points, 15.0);
    assert_eq!(coauthor.pending_reclassification, 0);
}

#[tokio::test]
async fn year_window_and_institutions_narrow_the_report() {
    let fixture = build_fixture();
    classify_everything(&fixture).await;

    let report = fixture
        .service
        .assess_researchers(&query(&fixture, 2023, 2023))
        .expect("report");
    assert_eq!(category_codes(&report[0]), vec!["M21a", "M21"]);
    assert_eq!(report[0].total_points, 25.0);

    let faculty = OrganisationUnitId(3);
    let restricted = ResearcherQuery {
        institution_filter: [faculty].into_iter().collect(),
        ..query(&fixture, 2022, 2023)
    };
    let report = fixture
        .service
        .assess_researchers(&restricted)
        .expect("report");
    assert!(report
        .iter()
        .all(|assessment| assessment.publications_per_category.is_empty()));
    assert!(report.iter().all(|assessment| assessment.total_points == 0.0));
}

#[tokio::test]
async fn unknown_category_codes_sort_last() {
    let fixture = build_fixture();
    classify_everything(&fixture).await;
    let local = fixture
        .service
        .catalog()
        .create_classification(AssessmentClassification {
            id: AssessmentClassificationId(0),
            code: "LOCAL1".to_string(),
            title: MultiLingualText::bilingual("Local list", "Lokalna lista"),
            formal_description_of_rule: MultiLingualText::new(),
            applicable_types: [EntityKind::Document].into_iter().collect(),
        })
        .expect("classification");
    fixture
        .service
        .save_manual_classification(ClassificationDraft {
            subject: ClassificationSubject::Document {
                document_id: DocumentId(3),
                points: None,
            },
            commission_id: fixture.commission.id,
            classification_id: local.id,
            year: Some(2023),
        })
        .expect("manual");

    let report = fixture
        .service
        .assess_researchers(&query(&fixture, 2022, 2023))
        .expect("report");
    assert_eq!(category_codes(&report[0]), vec!["M21a", "M21", "M70", "LOCAL1"]);
    assert_eq!(report[0].pending_reclassification, 1);
    assert_eq!(report[0].total_points, 31.0);
}

#[test]
fn unknown_commission_is_rejected() {
    let fixture = build_fixture();
    let error = fixture
        .service
        .assess_researchers(&ResearcherQuery {
            commission_id: CommissionId(404),
            ..query(&fixture, 2022, 2023)
        })
        .expect_err("unknown commission");
    assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
}
