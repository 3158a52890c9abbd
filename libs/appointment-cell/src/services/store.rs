// libs/appointment-cell/src/services/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentQuery, AppointmentStatus, NewAppointment};

/// Result of a compare-and-set on an appointment's status.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Appointment),
    /// The row exists but its status was not one of the accepted sources.
    Rejected { current: AppointmentStatus },
    Missing,
}

/// Authoritative appointment storage.
///
/// Every write is a single atomic step relative to concurrent callers: an
/// implementation must never expose a state where a check has passed but the
/// matching write has not landed.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Inserts a slot booking only if fewer than `capacity` active rows hold
    /// the same (doctor, start_time). The count and the insert are one step.
    async fn insert_within_capacity(
        &self,
        draft: NewAppointment,
        capacity: u32,
    ) -> Result<Appointment, AppointmentError>;

    /// Inserts a session booking. Sessions have no capacity.
    async fn insert_session(&self, draft: NewAppointment) -> Result<Appointment, AppointmentError>;

    async fn count_active_in_slot(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
    ) -> Result<u32, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Rows matching `query`, ordered by start_time (rows without one last),
    /// then created_at, then id.
    async fn list(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError>;

    /// Sets `target` if the current status is in `allowed_from`.
    async fn transition_status(
        &self,
        id: Uuid,
        target: AppointmentStatus,
        allowed_from: &[AppointmentStatus],
    ) -> Result<TransitionOutcome, AppointmentError>;

    /// Writes queue coordinator fields; `None` leaves a field unchanged.
    /// Returns `None` when no row has this id.
    async fn record_queue_estimate(
        &self,
        id: Uuid,
        estimated_time: Option<DateTime<Utc>>,
        queue_position: Option<i32>,
    ) -> Result<Option<Appointment>, AppointmentError>;
}

/// Sort used by every store for list results.
pub fn sort_for_listing(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| {
        let by_start = match (a.start_time, b.start_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        by_start
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}
