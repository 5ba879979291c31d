#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use assessment_engine::assessment::batch::{
    BatchSettings, DocumentIndex, InMemoryDocumentIndex, TokioTaskScheduler,
};
use assessment_engine::assessment::domain::{
    AssessmentRulebook, Commission, CommissionId, ContributionFlags, DocumentId,
    DocumentMetadata, EntityRef, MultiLingualText, PersonId, PublicationSeriesId,
    PublicationType, RulebookId,
};
use assessment_engine::assessment::researchers::CategoryPriorityTable;
use assessment_engine::assessment::resolver::{JournalRanking, RankingTable};
use assessment_engine::assessment::rules::{
    RuleRegistry, STANDARD_POINT_RULE, STANDARD_SCALING_RULE,
};
use assessment_engine::assessment::service::{AssessmentCollaborators, AssessmentService};
use assessment_engine::assessment::store::memory::{
    InMemoryCatalogRepository, InMemoryClassificationRepository, InMemoryCommissionRepository,
    InMemoryIndicatorRepository,
};

pub const TOP_JOURNAL: PublicationSeriesId = PublicationSeriesId(7);
pub const GOOD_JOURNAL: PublicationSeriesId = PublicationSeriesId(8);
pub const AUTHOR: PersonId = PersonId(10);
pub const SECOND_AUTHOR: PersonId = PersonId(11);

pub struct Engine {
    pub service: Arc<AssessmentService>,
    pub documents: InMemoryDocumentIndex,
    pub commission: Commission,
}

impl Engine {
    /// `(document, code, scaled points)` for every seeded document, in id order.
    pub fn snapshot(&self) -> Vec<(u64, String, Option<f64>)> {
        let mut rows = Vec::new();
        for id in 1..=self.documents.len() as u64 {
            let records = self
                .service
                .classifications_for_entity(
                    EntityRef::Document(DocumentId(id)),
                    Some(self.commission.id),
                )
                .expect("records readable");
            for record in records {
                let code = self
                    .service
                    .catalog()
                    .classification(record.classification_id)
                    .expect("classification exists")
                    .code;
                rows.push((id, code, record.subject.points().map(|points| points.scaled)));
            }
        }
        rows
    }
}

pub fn settings() -> BatchSettings {
    BatchSettings {
        page_size: 2,
        commit_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
    }
}

pub fn article(id: u64, series: PublicationSeriesId, authors: &[PersonId]) -> DocumentMetadata {
    DocumentMetadata {
        document_id: DocumentId(id),
        title: MultiLingualText::bilingual(format!("Article {id}"), format!("Članak {id}")),
        publication_type: PublicationType::JournalArticle,
        year: 2023,
        publication_date: None,
        research_area: None,
        author_count: authors.len() as u32,
        contribution: ContributionFlags::default(),
        series_id: Some(series),
        event_id: None,
        international: true,
        authors: authors.to_vec(),
        organisation_units: Vec::new(),
    }
}

/// Five journal articles: three in the top journal, two in the good one.
pub fn seeded_documents() -> InMemoryDocumentIndex {
    let documents = InMemoryDocumentIndex::new();
    documents.insert_document(article(1, TOP_JOURNAL, &[AUTHOR]));
    documents.insert_document(article(2, TOP_JOURNAL, &[AUTHOR, SECOND_AUTHOR]));
    documents.insert_document(article(3, GOOD_JOURNAL, &[AUTHOR]));
    documents.insert_document(article(4, GOOD_JOURNAL, &[SECOND_AUTHOR]));
    documents.insert_document(article(5, TOP_JOURNAL, &[SECOND_AUTHOR]));
    documents
}

pub fn rankings() -> RankingTable {
    let mut table = RankingTable::new();
    for (series, rank) in [(TOP_JOURNAL, 4), (GOOD_JOURNAL, 25)] {
        table
            .insert(JournalRanking {
                series_id: series,
                year: 2023,
                edition: "SCIE".to_string(),
                category: "Physics, Applied".to_string(),
                rank,
                total: 100,
                impact_factor: None,
            })
            .expect("valid ranking");
    }
    table
}

/// Engine over `index`; must be called inside a tokio runtime.
pub fn engine_with_index(
    documents: InMemoryDocumentIndex,
    index: Arc<dyn DocumentIndex>,
) -> Engine {
    let rules = RuleRegistry::standard();
    let priorities = CategoryPriorityTable::from_registry(&rules);
    let rules = Arc::new(rules);
    let scheduler = TokioTaskScheduler::new().expect("tokio runtime");

    let service = AssessmentService::new(AssessmentCollaborators {
        rules: Arc::clone(&rules),
        classifications: Arc::new(InMemoryClassificationRepository::default()),
        commissions: Arc::new(InMemoryCommissionRepository::default()),
        catalog: Arc::new(InMemoryCatalogRepository::default()),
        indicators: Arc::new(InMemoryIndicatorRepository::default()),
        rankings: Arc::new(rankings()),
        index,
        authorship: Arc::new(documents.clone()),
        scheduler: Arc::new(scheduler),
        settings: settings(),
        priorities,
    })
    .expect("standard rules are valid");

    let rulebook = service
        .catalog()
        .install_rulebook(
            &rules,
            AssessmentRulebook {
                id: RulebookId(0),
                name: MultiLingualText::bilingual("Rulebook", "Pravilnik"),
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
        .create_commission(Commission {
            id: CommissionId(0),
            description: MultiLingualText::bilingual("Natural sciences", "Prirodne nauke"),
            formal_description_of_rule: "standard".to_string(),
            assessment_date_from: None,
            assessment_date_to: None,
            recognised_research_areas: Default::default(),
            is_default: true,
            rulebook_id: Some(rulebook.id),
        })
        .expect("commission created");

    Engine {
        service: Arc::new(service),
        documents,
        commission,
    }
}

pub fn engine() -> Engine {
    let documents = seeded_documents();
    engine_with_index(documents.clone(), Arc::new(documents))
}
