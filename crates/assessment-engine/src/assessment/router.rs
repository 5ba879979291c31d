use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::batch::{BatchFilter, BatchJobSpec, BatchKind, Dispatch, DispatchOutcome};
use super::domain::{
    AccessLevel, ClassificationRecordId, CommissionId, DocumentId, EntityKind, EntityRef,
    RelationId,
};
use super::imaginary::{ImaginaryJournalPublication, ImaginaryProceedingsPublication};
use super::researchers::ResearcherQuery;
use super::service::{AssessmentService, AssessmentServiceError, CommissionResultQuery};
use super::store::{ClassificationDraft, UpsertOutcome};

type SharedService = Arc<AssessmentService>;

/// Router exposing classification, batch, what-if and report endpoints.
pub fn assessment_router(service: SharedService) -> Router {
    Router::new()
        .route(
            "/api/v1/assessment/classifications",
            post(save_manual_handler),
        )
        .route(
            "/api/v1/assessment/classifications/automatic",
            post(upsert_automatic_handler),
        )
        .route(
            "/api/v1/assessment/classifications/:record_id",
            get(classification_handler).delete(delete_classification_handler),
        )
        .route(
            "/api/v1/assessment/entities/:kind/:entity_id/classifications",
            get(entity_classifications_handler),
        )
        .route(
            "/api/v1/assessment/entities/:kind/:entity_id/indicators",
            get(entity_indicators_handler),
        )
        .route(
            "/api/v1/assessment/documents/:document_id/classify",
            post(classify_document_handler),
        )
        .route(
            "/api/v1/assessment/batches",
            post(trigger_batch_handler).get(scheduled_batches_handler),
        )
        .route(
            "/api/v1/assessment/batches/:task_id",
            get(batch_report_handler).delete(cancel_batch_handler),
        )
        .route(
            "/api/v1/assessment/imaginary/journal-publications",
            post(imaginary_journal_handler),
        )
        .route(
            "/api/v1/assessment/imaginary/proceedings-publications",
            post(imaginary_proceedings_handler),
        )
        .route(
            "/api/v1/assessment/researchers/report",
            post(researcher_report_handler),
        )
        .route(
            "/api/v1/assessment/commissions/:commission_id/default",
            put(set_default_handler),
        )
        .route(
            "/api/v1/assessment/commissions/:commission_id/relations",
            get(relations_handler),
        )
        .route(
            "/api/v1/assessment/relations/swap-priority",
            post(swap_priority_handler),
        )
        .route(
            "/api/v1/assessment/commission-results",
            post(commission_result_handler),
        )
        .with_state(service)
}

fn failure(error: AssessmentServiceError) -> Response {
    let status = error.status_code();
    if status.is_server_error() {
        warn!(%error, "assessment request failed");
    }
    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn entity_from_path(kind: &str, entity_id: u64) -> Result<EntityRef, Response> {
    EntityKind::parse(kind)
        .map(|kind| EntityRef::from_parts(kind, entity_id))
        .ok_or_else(|| bad_request(format!("unknown entity kind {kind}")))
}

pub(crate) async fn save_manual_handler(
    State(service): State<SharedService>,
    Json(draft): Json<ClassificationDraft>,
) -> Response {
    match service.save_manual_classification(draft) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn upsert_automatic_handler(
    State(service): State<SharedService>,
    Json(draft): Json<ClassificationDraft>,
) -> Response {
    match service.upsert_automatic_classification(draft) {
        Ok(outcome @ UpsertOutcome::Inserted(_)) => {
            (StatusCode::CREATED, Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn classification_handler(
    State(service): State<SharedService>,
    Path(record_id): Path<u64>,
) -> Response {
    match service.classification(ClassificationRecordId(record_id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn delete_classification_handler(
    State(service): State<SharedService>,
    Path(record_id): Path<u64>,
) -> Response {
    match service.delete_classification(ClassificationRecordId(record_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => failure(error),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CommissionParams {
    commission_id: Option<u64>,
}

pub(crate) async fn entity_classifications_handler(
    State(service): State<SharedService>,
    Path((kind, entity_id)): Path<(String, u64)>,
    Query(params): Query<CommissionParams>,
) -> Response {
    let entity = match entity_from_path(&kind, entity_id) {
        Ok(entity) => entity,
        Err(response) => return response,
    };
    match service.classifications_for_entity(entity, params.commission_id.map(CommissionId)) {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(error) => failure(error),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AccessParams {
    #[serde(default)]
    access_level: Option<AccessLevel>,
}

/// Callers without a stated clearance only see open values.
pub(crate) async fn entity_indicators_handler(
    State(service): State<SharedService>,
    Path((kind, entity_id)): Path<(String, u64)>,
    Query(params): Query<AccessParams>,
) -> Response {
    let entity = match entity_from_path(&kind, entity_id) {
        Ok(entity) => entity,
        Err(response) => return response,
    };
    let clearance = params.access_level.unwrap_or(AccessLevel::Open);
    match service.indicators_for(entity, clearance) {
        Ok(values) => (StatusCode::OK, Json(values)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn classify_document_handler(
    State(service): State<SharedService>,
    Path(document_id): Path<u64>,
    Query(params): Query<CommissionParams>,
) -> Response {
    let Some(commission_id) = params.commission_id else {
        return bad_request("commission_id query parameter is required".to_string());
    };
    match service.classify_document(DocumentId(document_id), CommissionId(commission_id)) {
        Ok(Some(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(None) => {
            let payload = json!({
                "document_id": document_id,
                "commission_id": commission_id,
                "outcome": "unclassified",
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => failure(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchTrigger {
    kind: BatchKind,
    #[serde(default)]
    filter: BatchFilter,
    #[serde(default = "run_now")]
    dispatch: Dispatch,
}

fn run_now() -> Dispatch {
    Dispatch::Now
}

pub(crate) async fn trigger_batch_handler(
    State(service): State<SharedService>,
    Json(trigger): Json<BatchTrigger>,
) -> Response {
    let spec = BatchJobSpec::new(trigger.kind, trigger.filter);
    match service.trigger_batch(spec, trigger.dispatch).await {
        Ok(outcome @ DispatchOutcome::Completed { .. }) => {
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Ok(outcome @ DispatchOutcome::Scheduled { .. }) => {
            (StatusCode::ACCEPTED, Json(outcome)).into_response()
        }
        Err(error) => failure(error),
    }
}

pub(crate) async fn scheduled_batches_handler(State(service): State<SharedService>) -> Response {
    let payload = json!({ "scheduled": service.scheduled_batches() });
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn batch_report_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    match service.last_batch_report(&task_id) {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => {
            let payload = json!({
                "task_id": task_id,
                "error": "no finished run recorded",
            });
            (StatusCode::NOT_FOUND, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn cancel_batch_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    if service.cancel_batch(&task_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        let payload = json!({
            "task_id": task_id,
            "error": "task is not scheduled",
        });
        (StatusCode::NOT_FOUND, Json(payload)).into_response()
    }
}

pub(crate) async fn imaginary_journal_handler(
    State(service): State<SharedService>,
    Json(request): Json<ImaginaryJournalPublication>,
) -> Response {
    match service.assess_imaginary_journal_publication(&request) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn imaginary_proceedings_handler(
    State(service): State<SharedService>,
    Json(request): Json<ImaginaryProceedingsPublication>,
) -> Response {
    match service.assess_imaginary_proceedings_publication(&request) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn researcher_report_handler(
    State(service): State<SharedService>,
    Json(query): Json<ResearcherQuery>,
) -> Response {
    if query.end_year < query.start_year {
        return bad_request("end_year precedes start_year".to_string());
    }
    match service.assess_researchers(&query) {
        Ok(assessments) => (StatusCode::OK, Json(assessments)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn set_default_handler(
    State(service): State<SharedService>,
    Path(commission_id): Path<u64>,
) -> Response {
    match service.set_default_commission(CommissionId(commission_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn relations_handler(
    State(service): State<SharedService>,
    Path(commission_id): Path<u64>,
) -> Response {
    match service.relations(CommissionId(commission_id)) {
        Ok(relations) => (StatusCode::OK, Json(relations)).into_response(),
        Err(error) => failure(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PrioritySwap {
    first: RelationId,
    second: RelationId,
}

pub(crate) async fn swap_priority_handler(
    State(service): State<SharedService>,
    Json(swap): Json<PrioritySwap>,
) -> Response {
    match service.swap_relation_priority(swap.first, swap.second) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn commission_result_handler(
    State(service): State<SharedService>,
    Json(query): Json<CommissionResultQuery>,
) -> Response {
    match service.commission_result(&query) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => failure(error),
    }
}
