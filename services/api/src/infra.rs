use assessment_engine::assessment::batch::{
    BatchSettings, InMemoryDocumentIndex, TaskScheduler,
};
use assessment_engine::assessment::domain::{
    AssessmentRulebook, ClassificationSubject, Commission, CommissionId, ContributionFlags,
    DocumentId, DocumentMetadata, EventId, MultiLingualText, PersonId, PublicationSeriesId,
    PublicationType, RulebookId,
};
use assessment_engine::assessment::researchers::CategoryPriorityTable;
use assessment_engine::assessment::resolver::{JournalRanking, RankingError, RankingTable};
use assessment_engine::assessment::rules::{
    RuleRegistry, STANDARD_POINT_RULE, STANDARD_SCALING_RULE,
};
use assessment_engine::assessment::service::{AssessmentCollaborators, AssessmentService};
use assessment_engine::assessment::store::memory::{
    InMemoryCatalogRepository, InMemoryClassificationRepository, InMemoryCommissionRepository,
    InMemoryIndicatorRepository,
};
use assessment_engine::assessment::store::{ClassificationDraft, StoreError};
use assessment_engine::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) const DEMO_TOP_JOURNAL: PublicationSeriesId = PublicationSeriesId(101);
pub(crate) const DEMO_GOOD_JOURNAL: PublicationSeriesId = PublicationSeriesId(102);
pub(crate) const DEMO_REGIONAL_JOURNAL: PublicationSeriesId = PublicationSeriesId(103);
pub(crate) const DEMO_CONFERENCE: EventId = EventId(201);
pub(crate) const DEMO_RESEARCHER: PersonId = PersonId(1);
pub(crate) const DEMO_COLLEAGUE: PersonId = PersonId(2);

/// Standard registry unless a JSON registry path is configured.
pub(crate) fn load_rules(path: Option<&Path>) -> Result<RuleRegistry, AppError> {
    match path {
        Some(path) => {
            let rules = RuleRegistry::from_path(path)?;
            info!(path = %path.display(), "loaded rule registry");
            Ok(rules)
        }
        None => Ok(RuleRegistry::standard()),
    }
}

pub(crate) fn load_rankings(path: Option<&Path>) -> Result<RankingTable, AppError> {
    match path {
        Some(path) => {
            let table = RankingTable::from_csv_path(path)?;
            info!(path = %path.display(), rows = table.len(), "imported journal rankings");
            Ok(table)
        }
        None => Ok(RankingTable::new()),
    }
}

/// In-memory wiring of every collaborator plus one default rulebook and commission.
pub(crate) struct Assembly {
    pub(crate) service: Arc<AssessmentService>,
    pub(crate) documents: InMemoryDocumentIndex,
    pub(crate) commission: Commission,
}

pub(crate) fn assemble(
    rules: RuleRegistry,
    rankings: RankingTable,
    documents: InMemoryDocumentIndex,
    scheduler: Arc<dyn TaskScheduler>,
    settings: BatchSettings,
) -> Result<Assembly, AppError> {
    let priorities = CategoryPriorityTable::from_registry(&rules);
    let rules = Arc::new(rules);

    let service = AssessmentService::new(AssessmentCollaborators {
        rules: Arc::clone(&rules),
        classifications: Arc::new(InMemoryClassificationRepository::default()),
        commissions: Arc::new(InMemoryCommissionRepository::default()),
        catalog: Arc::new(InMemoryCatalogRepository::default()),
        indicators: Arc::new(InMemoryIndicatorRepository::default()),
        rankings: Arc::new(rankings),
        index: Arc::new(documents.clone()),
        authorship: Arc::new(documents.clone()),
        scheduler,
        settings,
        priorities,
    })?;

    let rulebook = service.catalog().install_rulebook(
        &rules,
        AssessmentRulebook {
            id: RulebookId(0),
            name: MultiLingualText::bilingual(
                "Research outputs rulebook",
                "Pravilnik o vrednovanju",
            ),
            issue_date: None,
            pdf_file: None,
            is_default: true,
        },
        STANDARD_POINT_RULE,
        STANDARD_SCALING_RULE,
    )?;

    let commission = service.commissions().create_commission(Commission {
        id: CommissionId(0),
        description: MultiLingualText::bilingual("Default commission", "Podrazumevana komisija"),
        formal_description_of_rule: STANDARD_POINT_RULE.to_string(),
        assessment_date_from: None,
        assessment_date_to: None,
        recognised_research_areas: Default::default(),
        is_default: true,
        rulebook_id: Some(rulebook.id),
    })?;
    info!(commission = %commission.id, rulebook = %rulebook.id, "assessment catalog installed");

    Ok(Assembly {
        service: Arc::new(service),
        documents,
        commission,
    })
}

pub(crate) fn demo_rankings() -> Result<RankingTable, RankingError> {
    let mut table = RankingTable::new();
    for (series, year, rank, total) in [
        (DEMO_TOP_JOURNAL, 2023, 6, 140),
        (DEMO_TOP_JOURNAL, 2024, 9, 142),
        (DEMO_GOOD_JOURNAL, 2023, 31, 140),
        (DEMO_GOOD_JOURNAL, 2024, 58, 142),
        (DEMO_REGIONAL_JOURNAL, 2023, 120, 140),
    ] {
        table.insert(JournalRanking {
            series_id: series,
            year,
            edition: "SCIE".to_string(),
            category: "Physics, Condensed Matter".to_string(),
            rank,
            total,
            impact_factor: None,
        })?;
    }
    Ok(table)
}

fn demo_document(
    id: u64,
    publication_type: PublicationType,
    year: i32,
    authors: &[PersonId],
) -> DocumentMetadata {
    DocumentMetadata {
        document_id: DocumentId(id),
        title: MultiLingualText::bilingual(format!("Demo output {id}"), format!("Rezultat {id}")),
        publication_type,
        year,
        publication_date: None,
        research_area: Some("NATURAL".to_string()),
        author_count: authors.len() as u32,
        contribution: ContributionFlags::default(),
        series_id: None,
        event_id: None,
        international: true,
        authors: authors.to_vec(),
        organisation_units: Vec::new(),
    }
}

/// Outputs covering every batch kind for two researchers.
pub(crate) fn seed_demo_documents(documents: &InMemoryDocumentIndex) {
    let both = [DEMO_RESEARCHER, DEMO_COLLEAGUE];
    for (id, series, year) in [
        (1, DEMO_TOP_JOURNAL, 2023),
        (2, DEMO_GOOD_JOURNAL, 2023),
        (3, DEMO_GOOD_JOURNAL, 2024),
        (4, DEMO_REGIONAL_JOURNAL, 2023),
    ] {
        documents.insert_document(DocumentMetadata {
            series_id: Some(series),
            ..demo_document(id, PublicationType::JournalArticle, year, &both)
        });
    }
    documents.insert_document(DocumentMetadata {
        event_id: Some(DEMO_CONFERENCE),
        ..demo_document(5, PublicationType::ProceedingsFullArticle, 2024, &[DEMO_RESEARCHER])
    });
    documents.insert_document(DocumentMetadata {
        event_id: Some(DEMO_CONFERENCE),
        ..demo_document(6, PublicationType::ProceedingsInvitedFullArticle, 2024, &both)
    });
    documents.insert_document(demo_document(
        7,
        PublicationType::Monograph,
        2022,
        &[DEMO_COLLEAGUE],
    ));
    documents.insert_document(demo_document(
        8,
        PublicationType::PhdThesis,
        2022,
        &[DEMO_RESEARCHER],
    ));
}

/// The demo conference is an international event of the default commission.
pub(crate) fn classify_demo_conference(assembly: &Assembly) -> Result<(), AppError> {
    let code = assembly
        .service
        .catalog()
        .classification_by_code("M30")?
        .ok_or_else(|| StoreError::NotFound {
            what: "classification",
            id: "M30".to_string(),
        })?;
    assembly
        .service
        .save_manual_classification(ClassificationDraft {
            subject: ClassificationSubject::Event {
                event_id: DEMO_CONFERENCE,
            },
            commission_id: assembly.commission.id,
            classification_id: code.id,
            year: None,
        })?;
    Ok(())
}
