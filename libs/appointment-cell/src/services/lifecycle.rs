// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookingValidationError, QueueEstimateRequest,
};
use crate::services::bounded;
use crate::services::events::{publish_best_effort, AppointmentEvent, AppointmentEventPublisher};
use crate::services::store::{AppointmentStore, TransitionOutcome};

const FROM_SCHEDULED: &[AppointmentStatus] = &[
    AppointmentStatus::CheckedIn,
    AppointmentStatus::Cancelled,
    AppointmentStatus::NoShow,
];
const FROM_CHECKED_IN: &[AppointmentStatus] = &[
    AppointmentStatus::InProgress,
    AppointmentStatus::Cancelled,
    AppointmentStatus::NoShow,
];
const FROM_IN_PROGRESS: &[AppointmentStatus] = &[
    AppointmentStatus::Completed,
    AppointmentStatus::Cancelled,
];

/// Statuses reachable in one step from `current`.
pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
    match current {
        AppointmentStatus::Scheduled => FROM_SCHEDULED,
        AppointmentStatus::CheckedIn => FROM_CHECKED_IN,
        AppointmentStatus::InProgress => FROM_IN_PROGRESS,
        // Terminal states
        AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow => &[],
    }
}

pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    valid_transitions(from).contains(&to)
}

/// Every status from which `target` is one legal step away.
pub fn allowed_sources(target: AppointmentStatus) -> Vec<AppointmentStatus> {
    AppointmentStatus::ALL
        .into_iter()
        .filter(|from| can_transition(*from, target))
        .collect()
}

/// Statuses a cancel request may start from. Broader than the graph: a
/// no-show may still be cancelled, only completed and cancelled rows are final.
pub fn cancellable_from() -> Vec<AppointmentStatus> {
    AppointmentStatus::ALL
        .into_iter()
        .filter(|s| !matches!(s, AppointmentStatus::Completed | AppointmentStatus::Cancelled))
        .collect()
}

pub struct AppointmentLifecycleService {
    store: Arc<dyn AppointmentStore>,
    events: Arc<dyn AppointmentEventPublisher>,
    timeout: Duration,
}

impl AppointmentLifecycleService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        events: Arc<dyn AppointmentEventPublisher>,
        timeout: Duration,
    ) -> Self {
        Self { store, events, timeout }
    }

    /// Moves an appointment one step along the status graph. The current
    /// status is checked inside the same storage write that applies `target`.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn set_status(
        &self,
        appointment_id: Uuid,
        target: AppointmentStatus,
        user: &User,
    ) -> Result<Appointment, AppointmentError> {
        let sources = allowed_sources(target);

        let outcome = bounded(
            self.timeout,
            "transition_status",
            self.store.transition_status(appointment_id, target, &sources),
        ).await?;

        match outcome {
            TransitionOutcome::Applied(appointment) => {
                info!("Appointment {} moved to {}", appointment_id, target);
                if target == AppointmentStatus::Cancelled {
                    publish_best_effort(self.events.as_ref(), AppointmentEvent::cancelled(&appointment), self.timeout).await;
                }
                Ok(appointment)
            }
            TransitionOutcome::Rejected { current } => {
                warn!("Refused transition {} -> {} for appointment {}", current, target, appointment_id);
                Err(AppointmentError::TransitionConflict { from: Some(current), to: target })
            }
            TransitionOutcome::Missing => Err(AppointmentError::NotFound),
        }
    }

    /// Cancels unless the appointment is completed or already cancelled.
    /// A missing id is reported the same way as a finalised one.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
    ) -> Result<Appointment, AppointmentError> {
        let sources = cancellable_from();

        let outcome = bounded(
            self.timeout,
            "cancel",
            self.store.transition_status(appointment_id, AppointmentStatus::Cancelled, &sources),
        ).await?;

        match outcome {
            TransitionOutcome::Applied(appointment) => {
                info!("Appointment {} cancelled", appointment_id);
                publish_best_effort(self.events.as_ref(), AppointmentEvent::cancelled(&appointment), self.timeout).await;
                Ok(appointment)
            }
            TransitionOutcome::Rejected { .. } | TransitionOutcome::Missing => {
                warn!("Cancellation refused for appointment {}", appointment_id);
                Err(AppointmentError::TransitionConflict {
                    from: None,
                    to: AppointmentStatus::Cancelled,
                })
            }
        }
    }

    /// Queue coordinator write path; status is left alone.
    #[instrument(skip(self, request, user), fields(user_id = %user.id))]
    pub async fn record_queue_estimate(
        &self,
        appointment_id: Uuid,
        request: QueueEstimateRequest,
        user: &User,
    ) -> Result<Appointment, AppointmentError> {
        if request.estimated_time.is_none() && request.queue_position.is_none() {
            return Err(BookingValidationError::EmptyQueueEstimate.into());
        }
        if let Some(position) = request.queue_position {
            if position < 1 {
                return Err(BookingValidationError::InvalidQueuePosition(position).into());
            }
        }

        let updated = bounded(
            self.timeout,
            "record_queue_estimate",
            self.store.record_queue_estimate(appointment_id, request.estimated_time, request.queue_position),
        ).await?;

        match updated {
            Some(appointment) => {
                debug!(
                    "Queue estimate for {}: position {:?}, eta {:?}",
                    appointment_id, appointment.queue_position, appointment.estimated_time
                );
                Ok(appointment)
            }
            None => Err(AppointmentError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.is_terminal(), valid_transitions(status).is_empty(), "{}", status);
        }
    }

    #[test]
    fn test_graph_edges() {
        assert!(can_transition(Scheduled, CheckedIn));
        assert!(can_transition(CheckedIn, InProgress));
        assert!(can_transition(InProgress, Completed));
        assert!(!can_transition(Scheduled, InProgress));
        assert!(!can_transition(Completed, Scheduled));
        assert!(!can_transition(Cancelled, Scheduled));
        assert!(!can_transition(Scheduled, Scheduled));
    }

    #[test]
    fn test_allowed_sources() {
        assert_eq!(allowed_sources(Cancelled), vec![Scheduled, CheckedIn, InProgress]);
        assert_eq!(allowed_sources(NoShow), vec![Scheduled, CheckedIn]);
        assert!(allowed_sources(Scheduled).is_empty());
    }

    #[test]
    fn test_cancellable_from() {
        assert_eq!(cancellable_from(), vec![Scheduled, CheckedIn, InProgress, NoShow]);
    }
}
