// libs/consultation-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::actor::Actor;
use shared_models::error::AppError;

use crate::models::{
    BookConsultationRequest, ConsultationDecision, ConsultationError, ConsultationStatus,
    RespondConsultationRequest,
};
use crate::services::booking::ConsultationBookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct FreeSlotsQuery {
    pub doctor_id: Uuid,
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct ListConsultationsQuery {
    pub status: Option<ConsultationStatus>,
}

// ==============================================================================
// CONSULTATION HANDLERS
// ==============================================================================

/// Book a consultation for the calling patient.
#[axum::debug_handler]
pub async fn book_consultation(
    State(state): State<Arc<AppConfig>>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BookConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    if !actor.is_patient() {
        return Err(AppError::Auth(
            "Only patients can book consultations".to_string(),
        ));
    }

    let booking_service = ConsultationBookingService::new(&state);
    let consultation = booking_service
        .book(&actor, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation,
        "message": "Consultation booked successfully"
    })))
}

/// Free slots of one doctor on one date, for either side to browse.
#[axum::debug_handler]
pub async fn free_slots(
    State(state): State<Arc<AppConfig>>,
    Extension(_actor): Extension<Actor>,
    Query(query): Query<FreeSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let booking_service = ConsultationBookingService::new(&state);
    let free = booking_service
        .free_slots(query.doctor_id, &query.date)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "doctor_id": query.doctor_id,
        "date": query.date,
        "free_slots": free
    })))
}

#[axum::debug_handler]
pub async fn get_consultation(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    let booking_service = ConsultationBookingService::new(&state);
    let consultation = booking_service
        .get_consultation(&actor, consultation_id)
        .await
        .map_err(map_error)?;

    Ok(Json(json!(consultation)))
}

/// The caller's own consultations, optionally filtered by status. A doctor
/// uses this to find pending requests waiting for a response.
#[axum::debug_handler]
pub async fn list_consultations(
    State(state): State<Arc<AppConfig>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListConsultationsQuery>,
) -> Result<Json<Value>, AppError> {
    let booking_service = ConsultationBookingService::new(&state);
    let consultations = booking_service
        .list_consultations(&actor, query.status)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "count": consultations.len(),
        "consultations": consultations
    })))
}

#[axum::debug_handler]
pub async fn cancel_consultation(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    if !actor.is_patient() {
        return Err(AppError::Auth(
            "Only the booking patient can cancel a consultation".to_string(),
        ));
    }

    let booking_service = ConsultationBookingService::new(&state);
    let consultation = booking_service
        .cancel(&actor, consultation_id)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation,
        "message": "Consultation cancelled"
    })))
}

/// Doctor's answer to a pending request: confirm or deny.
#[axum::debug_handler]
pub async fn respond_consultation(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<RespondConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    if !actor.is_doctor() {
        return Err(AppError::Auth(
            "Only the assigned doctor can respond to a consultation".to_string(),
        ));
    }

    let booking_service = ConsultationBookingService::new(&state);
    let consultation = booking_service
        .respond(&actor, consultation_id, request.decision)
        .await
        .map_err(map_error)?;

    let message = match request.decision {
        ConsultationDecision::Confirm => "Consultation confirmed",
        ConsultationDecision::Deny => "Consultation denied",
    };

    Ok(Json(json!({
        "success": true,
        "consultation": consultation,
        "message": message
    })))
}

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

/// Total mapping from cell errors to transport errors. Every variant keeps
/// its identity; nothing collapses into a catch-all.
fn map_error(e: ConsultationError) -> AppError {
    match e {
        ConsultationError::NotFound => AppError::NotFound("Consultation not found".to_string()),
        ConsultationError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
        ConsultationError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        ConsultationError::DiscountNotFound => {
            AppError::NotFound("Discount code not found".to_string())
        }
        ConsultationError::ScheduleNotPublished => {
            AppError::NotFound("No working slots published for this date".to_string())
        }
        ConsultationError::SlotUnavailable => {
            AppError::Conflict("Requested slots are no longer available".to_string())
        }
        ConsultationError::IllegalTransition { .. } => AppError::Conflict(e.to_string()),
        ConsultationError::Unauthorized => {
            AppError::Auth("Not authorized for this consultation".to_string())
        }
        ConsultationError::InsufficientFunds => {
            AppError::BadRequest("Insufficient wallet balance".to_string())
        }
        ConsultationError::DiscountExpired => {
            AppError::BadRequest("Discount code has expired".to_string())
        }
        ConsultationError::InvalidDate(msg) => AppError::BadRequest(format!("Invalid date: {}", msg)),
        ConsultationError::InvalidSlots(msg) => {
            AppError::BadRequest(format!("Invalid slots: {}", msg))
        }
        ConsultationError::ValidationError(msg) => AppError::ValidationError(msg),
        ConsultationError::BookingFailed(msg) => {
            AppError::Internal(format!("Booking failed: {}", msg))
        }
        ConsultationError::UpstreamTimeout => {
            AppError::UpstreamTimeout("Upstream service timed out".to_string())
        }
        ConsultationError::Upstream(msg) => AppError::ExternalService(msg),
        ConsultationError::DatabaseError(msg) => AppError::Database(msg),
    }
}
