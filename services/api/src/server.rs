use crate::cli::ServeArgs;
use crate::infra::{
    assemble, classify_demo_conference, demo_rankings, load_rankings, load_rules,
    seed_demo_documents, AppState,
};
use crate::routes::with_assessment_routes;
use assessment_engine::assessment::batch::{
    BatchSettings, InMemoryDocumentIndex, TokioTaskScheduler,
};
use assessment_engine::config::AppConfig;
use assessment_engine::error::AppError;
use assessment_engine::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let rules = load_rules(config.assessment.rules_path.as_deref())?;
    let rankings = match args.rankings_csv.as_deref() {
        Some(path) => load_rankings(Some(path))?,
        None if args.seed_demo => demo_rankings()?,
        None => load_rankings(None)?,
    };
    let documents = InMemoryDocumentIndex::new();
    if args.seed_demo {
        seed_demo_documents(&documents);
    }
    let scheduler = TokioTaskScheduler::with_handle(tokio::runtime::Handle::current());
    let assembly = assemble(
        rules,
        rankings,
        documents,
        Arc::new(scheduler),
        BatchSettings::from(&config.assessment),
    )?;
    if args.seed_demo {
        classify_demo_conference(&assembly)?;
        info!(documents = assembly.documents.len(), "demo catalog seeded");
    }

    let app = with_assessment_routes(assembly.service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        commission = %assembly.commission.id,
        "assessment engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
