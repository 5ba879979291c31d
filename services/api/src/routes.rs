use crate::infra::AppState;
use assessment_engine::assessment::router::assessment_router;
use assessment_engine::assessment::service::AssessmentService;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Compact view of the active rule registry.
#[derive(Debug, Serialize)]
pub(crate) struct RulesSummary {
    pub(crate) point_rules: Vec<String>,
    pub(crate) scaling_rules: Vec<String>,
    pub(crate) journal_tiers: Vec<String>,
    pub(crate) document_rules: usize,
    pub(crate) ranking_lookback_years: u8,
    pub(crate) category_priority: Vec<String>,
}

pub(crate) fn summarize_rules(
    rules: &assessment_engine::assessment::rules::RuleRegistry,
) -> RulesSummary {
    RulesSummary {
        point_rules: rules.point_rules.keys().cloned().collect(),
        scaling_rules: rules.scaling_rules.keys().cloned().collect(),
        journal_tiers: rules
            .journal_tiers
            .iter()
            .map(|tier| {
                format!(
                    "{} ({} < percentile <= {}, {})",
                    tier.code,
                    tier.above_percentile,
                    tier.up_to_percentile,
                    tier.editions.join("/")
                )
            })
            .collect(),
        document_rules: rules.document_rules.len(),
        ranking_lookback_years: rules.ranking_lookback_years,
        category_priority: rules.category_priority.clone(),
    }
}

pub(crate) fn with_assessment_routes(service: Arc<AssessmentService>) -> axum::Router {
    let rules = axum::Router::new()
        .route("/api/v1/assessment/rules", axum::routing::get(rules_endpoint))
        .with_state(Arc::clone(&service));

    assessment_router(service)
        .merge(rules)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn rules_endpoint(
    State(service): State<Arc<AssessmentService>>,
) -> Json<RulesSummary> {
    Json(summarize_rules(service.rules()))
}
