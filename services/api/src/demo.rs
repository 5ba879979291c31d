use crate::infra::{
    assemble, classify_demo_conference, demo_rankings, load_rankings, load_rules,
    seed_demo_documents, Assembly, DEMO_COLLEAGUE, DEMO_RESEARCHER,
};
use crate::routes::summarize_rules;
use assessment_engine::assessment::batch::{
    BatchFilter, BatchJobSpec, BatchKind, BatchReport, BatchSettings, Dispatch, DispatchOutcome,
    InMemoryDocumentIndex, TokioTaskScheduler,
};
use assessment_engine::assessment::domain::{PublicationSeriesId, PublicationType};
use assessment_engine::assessment::imaginary::ImaginaryJournalPublication;
use assessment_engine::assessment::researchers::{ResearcherAssessment, ResearcherQuery};
use assessment_engine::assessment::resolver::JournalRanking;
use assessment_engine::assessment::rules::RuleRegistry;
use assessment_engine::config::AppConfig;
use assessment_engine::error::AppError;
use chrono::{Datelike, Local};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_BATCHES: [BatchKind; 5] = [
    BatchKind::JournalPublications,
    BatchKind::ProceedingsPublications,
    BatchKind::MonographPublications,
    BatchKind::Theses,
    BatchKind::PublicationSeries,
];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Journal ranking CSV export replacing the built-in demo rankings.
    #[arg(long)]
    pub(crate) rankings_csv: Option<PathBuf>,
    /// First year of the researcher report window.
    #[arg(long, default_value_t = 2022)]
    pub(crate) from_year: i32,
    /// Last year of the researcher report window. Defaults to the current year.
    #[arg(long)]
    pub(crate) to_year: Option<i32>,
    /// Skip the what-if scoring of a hypothetical journal article.
    #[arg(long)]
    pub(crate) skip_imaginary: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RulesArgs {
    /// JSON rule registry to validate. Defaults to ASSESSMENT_RULES_PATH, then the
    /// standard registry.
    #[arg(long)]
    pub(crate) path: Option<PathBuf>,
    /// Print the summary as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        rankings_csv,
        from_year,
        to_year,
        skip_imaginary,
    } = args;
    let config = AppConfig::load()?;
    let to_year = to_year.unwrap_or_else(|| Local::now().year());

    let rules = load_rules(config.assessment.rules_path.as_deref())?;
    let rankings = match rankings_csv.as_deref() {
        Some(path) => load_rankings(Some(path))?,
        None => demo_rankings()?,
    };
    let documents = InMemoryDocumentIndex::new();
    seed_demo_documents(&documents);
    let scheduler = TokioTaskScheduler::with_handle(tokio::runtime::Handle::current());
    let assembly = assemble(
        rules,
        rankings,
        documents,
        Arc::new(scheduler),
        BatchSettings::from(&config.assessment),
    )?;
    classify_demo_conference(&assembly)?;

    println!("Assessment engine demo");
    println!(
        "- {} seeded outputs | commission {} | page size {}",
        assembly.documents.len(),
        assembly.commission.id,
        config.assessment.page_size
    );

    println!("\nBatch classification");
    for report in classify_demo_catalog(&assembly).await? {
        render_batch_report(&report);
    }

    println!("\nResearcher report {from_year}-{to_year}");
    let assessments = assembly.service.assess_researchers(&ResearcherQuery {
        commission_id: assembly.commission.id,
        researcher_ids: vec![DEMO_RESEARCHER, DEMO_COLLEAGUE],
        start_year: from_year,
        end_year: to_year,
        institution_filter: Default::default(),
    })?;
    for assessment in &assessments {
        render_researcher(assessment);
    }

    if !skip_imaginary {
        let request = hypothetical_article(&assembly, to_year);
        let result = assembly
            .service
            .assess_imaginary_journal_publication(&request)?;
        println!("\nWhat-if: article in a journal ranked 12/150, {} authors", request.author_count);
        println!(
            "- {} | {:.2} raw points | {:.2} scaled points",
            result.assessment_code, result.raw_points, result.scaled_points
        );
        println!("- {}", result.scaled_points_reason.preferred("en"));
    }

    Ok(())
}

/// Runs every batch kind once, in dependency order: events before proceedings.
pub(crate) async fn classify_demo_catalog(
    assembly: &Assembly,
) -> Result<Vec<BatchReport>, AppError> {
    let mut reports = Vec::with_capacity(DEMO_BATCHES.len());
    for kind in DEMO_BATCHES {
        let spec = BatchJobSpec::new(kind, BatchFilter::default());
        if let DispatchOutcome::Completed { report } =
            assembly.service.trigger_batch(spec, Dispatch::Now).await?
        {
            reports.push(report);
        }
    }
    Ok(reports)
}

fn hypothetical_article(assembly: &Assembly, year: i32) -> ImaginaryJournalPublication {
    let series_id = PublicationSeriesId(999);
    ImaginaryJournalPublication {
        commission_id: assembly.commission.id,
        journal_id: None,
        rankings: vec![JournalRanking {
            series_id,
            year,
            edition: "SCIE".to_string(),
            category: "Physics, Condensed Matter".to_string(),
            rank: 12,
            total: 150,
            impact_factor: None,
        }],
        year,
        research_area: Some("NATURAL".to_string()),
        author_count: 9,
        contribution: Default::default(),
        publication_type: PublicationType::JournalArticle,
    }
}

fn render_batch_report(report: &BatchReport) {
    println!(
        "- {}: {} processed over {} page(s) | {} inserted, {} replaced, {} unchanged, {} kept manual",
        report.kind.label(),
        report.processed,
        report.pages,
        report.inserted,
        report.replaced,
        report.unchanged,
        report.skipped_manual
    );
    for failure in &report.failures {
        println!("    ! {} ({}): {}", failure.entity, failure.commission_id, failure.message);
    }
    for chunk in &report.failed_chunks {
        println!(
            "    ! page {} failed after {} attempt(s): {}",
            chunk.page, chunk.attempts, chunk.message
        );
    }
}

fn render_researcher(assessment: &ResearcherAssessment) {
    println!(
        "- researcher {}: {:.2} points | {} awaiting classification",
        assessment.person_id, assessment.total_points, assessment.pending_reclassification
    );
    for category in &assessment.publications_per_category {
        let titles: Vec<String> = category
            .publications
            .iter()
            .map(|entry| match entry.points {
                Some(points) => format!(
                    "{} ({}, {:.2})",
                    entry.title.preferred("en"),
                    entry.year,
                    points
                ),
                None => format!("{} ({})", entry.title.preferred("en"), entry.year),
            })
            .collect();
        println!("  {}: {}", category.code, titles.join("; "));
    }
}

pub(crate) fn run_rules(args: RulesArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let path = args.path.or(config.assessment.rules_path);
    let rules = match path.as_deref() {
        Some(path) => load_rules(Some(path))?,
        None => {
            let rules = RuleRegistry::standard();
            rules.validate()?;
            rules
        }
    };

    let summary = summarize_rules(&rules);
    if args.json {
        let rendered = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
        println!("{rendered}");
        return Ok(());
    }

    println!("Rule registry");
    println!("- point rules: {}", summary.point_rules.join(", "));
    println!("- scaling rules: {}", summary.scaling_rules.join(", "));
    println!("- ranking lookback: {} year(s)", summary.ranking_lookback_years);
    println!("- document mapping rules: {}", summary.document_rules);
    println!("Journal tiers:");
    for tier in &summary.journal_tiers {
        println!("  - {tier}");
    }
    println!("Category order: {}", summary.category_priority.join(" > "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_catalog_classifies_every_kind() {
        let documents = InMemoryDocumentIndex::new();
        seed_demo_documents(&documents);
        let scheduler = TokioTaskScheduler::with_handle(tokio::runtime::Handle::current());
        let assembly = assemble(
            RuleRegistry::standard(),
            demo_rankings().expect("demo rankings are valid"),
            documents,
            Arc::new(scheduler),
            BatchSettings::default(),
        )
        .expect("demo wiring");
        classify_demo_conference(&assembly).expect("conference classified");

        let reports = classify_demo_catalog(&assembly).await.expect("batches run");
        assert_eq!(reports.len(), DEMO_BATCHES.len());
        let inserted: Vec<usize> = reports.iter().map(|report| report.inserted).collect();
        assert_eq!(&inserted[..4], &[4, 2, 1, 1]);
        assert!(reports[..4].iter().all(BatchReport::is_clean));

        let assessments = assembly
            .service
            .assess_researchers(&ResearcherQuery {
                commission_id: assembly.commission.id,
                researcher_ids: vec![DEMO_RESEARCHER],
                start_year: 2022,
                end_year: 2024,
                institution_filter: Default::default(),
            })
            .expect("report");
        let researcher = &assessments[0];
        assert_eq!(researcher.publications_per_category[0].code, "M21a");
        assert_eq!(researcher.pending_reclassification, 0);
    }

    #[tokio::test]
    async fn hypothetical_article_is_scaled_for_large_teams() {
        let documents = InMemoryDocumentIndex::new();
        let scheduler = TokioTaskScheduler::with_handle(tokio::runtime::Handle::current());
        let assembly = assemble(
            RuleRegistry::standard(),
            demo_rankings().expect("demo rankings are valid"),
            documents,
            Arc::new(scheduler),
            BatchSettings::default(),
        )
        .expect("wiring");

        let result = assembly
            .service
            .assess_imaginary_journal_publication(&hypothetical_article(&assembly, 2024))
            .expect("scored");
        assert_eq!(result.assessment_code, "M21a");
        assert_eq!(result.raw_points, 20.0);
        assert!(result.scaled_points < result.raw_points);
    }

    #[test]
    fn rules_command_accepts_the_standard_registry() {
        run_rules(RulesArgs {
            path: None,
            json: true,
        })
        .expect("standard registry is valid");
    }
}
