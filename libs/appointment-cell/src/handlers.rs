// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentError, AppointmentQuery, AppointmentStatus, BookAppointmentRequest,
    QueueEstimateRequest, SlotOccupancy, SlotOccupancyQuery, UpdateStatusRequest,
};
use crate::state::AppointmentState;

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::Validation(_) => AppError::ValidationError(message),
            AppointmentError::NotFound => AppError::NotFound(message),
            AppointmentError::CapacityConflict { .. } | AppointmentError::TransitionConflict { .. } => {
                AppError::Conflict(message)
            }
            AppointmentError::Storage(_) => AppError::Database(message),
            AppointmentError::StorageTimeout { .. } => AppError::Unavailable(message),
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    params
        .map(|Query(query)| query)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    payload: Result<Json<BookAppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let request = json_body(payload)?;
    let appointment = state.booking.book_appointment(request, &user).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    params: Result<Query<AppointmentQuery>, QueryRejection>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    let query = query_params(params)?;
    debug!("User {} listing appointments", user.id);

    let appointments = state.booking.list_appointments(query).await?;
    Ok(Json(appointments))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Appointment>, AppError> {
    debug!("User {} fetching appointment {}", user.id, appointment_id);

    let appointment = state.booking.get_appointment(appointment_id).await?;
    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn get_slot_occupancy(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    params: Result<Query<SlotOccupancyQuery>, QueryRejection>,
) -> Result<Json<SlotOccupancy>, AppError> {
    let query = query_params(params)?;
    debug!("User {} checking occupancy for doctor {}", user.id, query.doctor_id);

    let occupancy = state.occupancy.slot_occupancy(query).await?;
    Ok(Json(occupancy))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn update_status(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Appointment>, AppError> {
    let request = json_body(payload)?;
    let target = request
        .status
        .parse::<AppointmentStatus>()
        .map_err(AppointmentError::from)?;

    let appointment = state.lifecycle.set_status(appointment_id, target, &user).await?;
    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = state.lifecycle.cancel_appointment(appointment_id, &user).await?;
    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn record_queue_estimate(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    payload: Result<Json<QueueEstimateRequest>, JsonRejection>,
) -> Result<Json<Appointment>, AppError> {
    let request = json_body(payload)?;
    let appointment = state
        .lifecycle
        .record_queue_estimate(appointment_id, request, &user)
        .await?;
    Ok(Json(appointment))
}
