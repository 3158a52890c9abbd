// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::DoctorRegistry;
use shared_models::auth::User;

use crate::models::{
    Appointment, AppointmentError, AppointmentQuery, BookAppointmentRequest, BookingMode,
    BookingValidationError, NewAppointment, Session,
};
use crate::services::bounded;
use crate::services::events::{publish_best_effort, AppointmentEvent, AppointmentEventPublisher};
use crate::services::store::AppointmentStore;

/// Minutes between bookable slot start times.
pub const SLOT_INTERVAL_MINUTES: u32 = 15;

pub fn is_slot_aligned(start_time: &DateTime<Utc>) -> bool {
    start_time.minute() % SLOT_INTERVAL_MINUTES == 0
        && start_time.second() == 0
        && start_time.nanosecond() == 0
}

/// Checks the shape of a booking request without touching storage.
/// Rules are applied in order and the first failure wins.
pub fn validate_booking_request(
    request: &BookAppointmentRequest,
) -> Result<NewAppointment, BookingValidationError> {
    if request.patient_id.trim().is_empty() {
        return Err(BookingValidationError::MissingPatient);
    }

    let has_slot_fields = request.doctor_id.is_some() || request.start_time.is_some();
    let mode = match (&request.session, has_slot_fields) {
        (Some(_), true) => return Err(BookingValidationError::AmbiguousBookingMode),
        (None, false) => return Err(BookingValidationError::MissingBookingMode),
        (Some(session), false) => BookingMode::Session(session.parse::<Session>()?),
        (None, true) => {
            let doctor_id = request.doctor_id.ok_or(BookingValidationError::MissingDoctor)?;
            let start_time = request.start_time.ok_or(BookingValidationError::MissingStartTime)?;
            if !is_slot_aligned(&start_time) {
                return Err(BookingValidationError::MisalignedStartTime);
            }
            BookingMode::Slot { doctor_id, start_time }
        }
    };

    Ok(NewAppointment {
        patient_id: request.patient_id.clone(),
        mode,
        notes: request.notes.clone().filter(|n| !n.trim().is_empty()),
    })
}

pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    registry: Arc<dyn DoctorRegistry>,
    events: Arc<dyn AppointmentEventPublisher>,
    timeout: Duration,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        registry: Arc<dyn DoctorRegistry>,
        events: Arc<dyn AppointmentEventPublisher>,
        timeout: Duration,
    ) -> Self {
        Self { store, registry, events, timeout }
    }

    /// Books a slot seat or a session place.
    ///
    /// Slot bookings consult the doctor's capacity and then perform a single
    /// atomic count-and-insert; a full slot yields `CapacityConflict`.
    #[instrument(skip(self, request, user), fields(user_id = %user.id, patient_id = %request.patient_id))]
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        user: &User,
    ) -> Result<Appointment, AppointmentError> {
        let draft = validate_booking_request(&request).map_err(|e| {
            warn!("Rejected booking request: {}", e);
            AppointmentError::Validation(e)
        })?;

        let appointment = match draft.mode {
            BookingMode::Slot { doctor_id, .. } => {
                let capacity = bounded(self.timeout, "capacity_lookup", async {
                    Ok(self.registry.get_slot_capacity(doctor_id).await?)
                }).await?;

                bounded(
                    self.timeout,
                    "insert_within_capacity",
                    self.store.insert_within_capacity(draft, capacity),
                ).await?
            }
            BookingMode::Session(_) => {
                bounded(self.timeout, "insert_session", self.store.insert_session(draft)).await?
            }
        };

        info!("Booked appointment {} for patient {}", appointment.id, appointment.patient_id);
        publish_best_effort(self.events.as_ref(), AppointmentEvent::booked(&appointment), self.timeout).await;

        Ok(appointment)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment {}", appointment_id);

        bounded(self.timeout, "get", self.store.get(appointment_id))
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn list_appointments(&self, query: AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let query = query.normalized();
        debug!("Listing appointments with {:?}", query);

        bounded(self.timeout, "list", self.store.list(&query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn slot_request(start_time: DateTime<Utc>) -> BookAppointmentRequest {
        BookAppointmentRequest {
            patient_id: "patient-1".to_string(),
            doctor_id: Some(Uuid::new_v4()),
            start_time: Some(start_time),
            ..Default::default()
        }
    }

    #[test]
    fn test_alignment() {
        assert!(is_slot_aligned(&Utc.with_ymd_and_hms(2025, 3, 1, 9, 45, 0).unwrap()));
        assert!(!is_slot_aligned(&Utc.with_ymd_and_hms(2025, 3, 1, 9, 10, 0).unwrap()));
        assert!(!is_slot_aligned(&Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 30).unwrap()));

        let fractional = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::milliseconds(5);
        assert!(!is_slot_aligned(&fractional));
    }

    #[test]
    fn test_validation_order() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 10, 0).unwrap();

        let mut request = slot_request(start);
        request.patient_id = " ".to_string();
        request.session = Some("evening".to_string());
        assert_matches!(validate_booking_request(&request), Err(BookingValidationError::MissingPatient));

        request.patient_id = "patient-1".to_string();
        assert_matches!(validate_booking_request(&request), Err(BookingValidationError::AmbiguousBookingMode));

        request.session = None;
        assert_matches!(validate_booking_request(&request), Err(BookingValidationError::MisalignedStartTime));

        request.doctor_id = None;
        assert_matches!(validate_booking_request(&request), Err(BookingValidationError::MissingDoctor));
    }

    #[test]
    fn test_session_only_with_start_time_is_ambiguous() {
        let request = BookAppointmentRequest {
            patient_id: "patient-1".to_string(),
            start_time: Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()),
            session: Some("morning".to_string()),
            ..Default::default()
        };
        assert_matches!(validate_booking_request(&request), Err(BookingValidationError::AmbiguousBookingMode));
    }

    #[test]
    fn test_missing_start_time() {
        let request = BookAppointmentRequest {
            patient_id: "patient-1".to_string(),
            doctor_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert_matches!(validate_booking_request(&request), Err(BookingValidationError::MissingStartTime));
    }

    #[test]
    fn test_blank_notes_become_none() {
        let mut request = slot_request(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        request.notes = Some("   ".to_string());

        let draft = validate_booking_request(&request).unwrap();
        assert_eq!(draft.notes, None);
        assert_matches!(draft.mode, BookingMode::Slot { .. });
    }
}
