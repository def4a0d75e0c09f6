use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::domain::{EnrollmentId, SectionId, SectionProfile, StudentId, TermCalendar};
use super::ledger::LedgerError;
use super::repository::{EnrollmentRepository, EventPublisher, RepositoryError};
use super::service::{EnrollmentError, EnrollmentService};

/// Router builder exposing the enrollment surface. Authentication and role
/// checks happen upstream; handlers only enforce business rules.
pub fn enrollment_router<R, E>(service: Arc<EnrollmentService<R, E>>) -> Router
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    Router::new()
        .route("/api/v1/enrollment/sections", post(open_section_handler::<R, E>))
        .route(
            "/api/v1/enrollment/sections/:section_id/capacity",
            put(adjust_capacity_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/sections/:section_id/status",
            get(section_status_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/sections/:section_id/waitlist/:student_id",
            get(waitlist_position_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/requests",
            post(request_enrollment_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/records/:enrollment_id",
            get(record_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/records/:enrollment_id/drop",
            post(drop_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/records/:enrollment_id/withdraw",
            post(withdraw_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/records/:enrollment_id/waitlist-withdraw",
            post(waitlist_withdraw_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/records/:enrollment_id/offer/accept",
            post(accept_offer_handler::<R, E>),
        )
        .route(
            "/api/v1/enrollment/records/:enrollment_id/offer/decline",
            post(decline_offer_handler::<R, E>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenSectionRequest {
    pub(crate) section_id: String,
    pub(crate) term: TermCalendar,
    pub(crate) capacity: u32,
    #[serde(default)]
    pub(crate) waitlist_capacity: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnrollmentRequest {
    pub(crate) student_id: String,
    pub(crate) section_id: String,
    pub(crate) acting_user_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdjustCapacityRequest {
    pub(crate) new_capacity: u32,
}

fn error_response(error: EnrollmentError) -> Response {
    let status = match &error {
        EnrollmentError::DeadlinePassed { .. }
        | EnrollmentError::InvalidTermCalendar
        | EnrollmentError::Ledger(LedgerError::InvalidCapacity) => StatusCode::UNPROCESSABLE_ENTITY,
        EnrollmentError::DuplicateActiveEnrollment
        | EnrollmentError::SectionAndWaitlistFull(_)
        | EnrollmentError::InvalidTransition { .. }
        | EnrollmentError::OfferExpired(_)
        | EnrollmentError::NoPendingOffer(_)
        | EnrollmentError::Ledger(LedgerError::SectionExists(_)) => StatusCode::CONFLICT,
        EnrollmentError::UnknownSection(_)
        | EnrollmentError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn open_section_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    axum::Json(payload): axum::Json<OpenSectionRequest>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    let section_id = SectionId(payload.section_id);
    let profile = SectionProfile {
        section_id: section_id.clone(),
        term: payload.term,
        capacity: payload.capacity,
        waitlist_capacity: payload.waitlist_capacity,
    };
    match service.open_section(profile) {
        Ok(()) => match service.section_status(&section_id) {
            Ok(view) => (StatusCode::CREATED, axum::Json(view)).into_response(),
            Err(err) => error_response(err),
        },
        Err(err) => error_response(err),
    }
}

pub(crate) async fn adjust_capacity_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(section_id): Path<String>,
    axum::Json(payload): axum::Json<AdjustCapacityRequest>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    let section_id = SectionId(section_id);
    match service.adjust_capacity(&section_id, payload.new_capacity, Utc::now()) {
        Ok(adjustment) => {
            let payload = json!({
                "section_id": section_id.0,
                "previous_capacity": adjustment.previous,
                "capacity": adjustment.current,
                "enrolled": adjustment.enrolled,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn section_status_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(section_id): Path<String>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.section_status(&SectionId(section_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn waitlist_position_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path((section_id, student_id)): Path<(String, String)>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    let section_id = SectionId(section_id);
    let student_id = StudentId(student_id);
    match service.waitlist_position(&student_id, &section_id) {
        Ok(position) => {
            let payload = json!({
                "section_id": section_id.0,
                "student_id": student_id.0,
                "position": position,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn request_enrollment_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    axum::Json(payload): axum::Json<EnrollmentRequest>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.request_enrollment(
        StudentId(payload.student_id),
        SectionId(payload.section_id),
        &payload.acting_user_id,
        Utc::now(),
    ) {
        Ok(record) => (StatusCode::CREATED, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn record_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.get_record(&EnrollmentId(enrollment_id)) {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn drop_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.request_drop(&EnrollmentId(enrollment_id), Utc::now()) {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn withdraw_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.request_withdraw(&EnrollmentId(enrollment_id), Utc::now()) {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn waitlist_withdraw_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.request_waitlist_withdraw(&EnrollmentId(enrollment_id), Utc::now()) {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn accept_offer_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.accept_offer(&EnrollmentId(enrollment_id), Utc::now()) {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn decline_offer_handler<R, E>(
    State(service): State<Arc<EnrollmentService<R, E>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    match service.decline_offer(&EnrollmentId(enrollment_id), Utc::now()) {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}
