// libs/appointment-cell/src/services/memory_store.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentQuery, AppointmentStatus, BookingMode, NewAppointment,
};
use crate::services::store::{sort_for_listing, AppointmentStore, TransitionOutcome};

type SlotKey = (Uuid, DateTime<Utc>);
type SlotLocks = Arc<StdMutex<HashMap<SlotKey, Arc<Mutex<()>>>>>;

/// Process-local store. Slot bookings are serialised per (doctor, start_time)
/// by an async mutex held across the occupancy count and the insert.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    rows: RwLock<HashMap<Uuid, Appointment>>,
    slot_locks: SlotLocks,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_slot(&self, key: SlotKey) -> Result<SlotGuard, AppointmentError> {
        let slot = {
            let mut locks = self.slot_locks
                .lock()
                .map_err(|_| AppointmentError::Storage("slot lock table poisoned".to_string()))?;
            Arc::clone(locks.entry(key).or_default())
        };

        let guard = slot.lock_owned().await;
        Ok(SlotGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.slot_locks),
        })
    }

    async fn active_in_slot(&self, doctor_id: Uuid, start_time: DateTime<Utc>) -> u32 {
        let rows = self.rows.read().await;
        rows.values()
            .filter(|a| a.occupies_slot() && a.slot() == Some((doctor_id, start_time)))
            .count() as u32
    }

    /// Number of per-slot locks currently tracked.
    pub fn tracked_slot_locks(&self) -> usize {
        self.slot_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

/// Holds a slot lock and prunes the lock table once nobody else waits on it.
struct SlotGuard {
    key: SlotKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: SlotLocks,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut locks) = self.locks.lock() {
            let idle = locks
                .get(&self.key)
                .map(|slot| Arc::strong_count(slot) == 1)
                .unwrap_or(false);
            if idle {
                locks.remove(&self.key);
            }
        }
    }
}

/// `updated_at` must move forward even when the clock has not.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert_within_capacity(
        &self,
        draft: NewAppointment,
        capacity: u32,
    ) -> Result<Appointment, AppointmentError> {
        let (doctor_id, start_time) = match draft.mode {
            BookingMode::Slot { doctor_id, start_time } => (doctor_id, start_time),
            BookingMode::Session(_) => {
                return Err(AppointmentError::Storage(
                    "session booking routed to slot allocation".to_string(),
                ))
            }
        };

        let _slot = self.lock_slot((doctor_id, start_time)).await?;

        let active = self.active_in_slot(doctor_id, start_time).await;
        if active >= capacity {
            warn!("Slot full for doctor {} at {} ({}/{})", doctor_id, start_time, active, capacity);
            return Err(AppointmentError::CapacityConflict { doctor_id, start_time, capacity });
        }

        let appointment = Appointment::from_new(draft, Utc::now());
        self.rows.write().await.insert(appointment.id, appointment.clone());

        debug!("Seat {}/{} taken for doctor {} at {}", active + 1, capacity, doctor_id, start_time);
        Ok(appointment)
    }

    async fn insert_session(&self, draft: NewAppointment) -> Result<Appointment, AppointmentError> {
        if !matches!(draft.mode, BookingMode::Session(_)) {
            return Err(AppointmentError::Storage(
                "slot booking routed to session insert".to_string(),
            ));
        }

        let appointment = Appointment::from_new(draft, Utc::now());
        self.rows.write().await.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn count_active_in_slot(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
    ) -> Result<u32, AppointmentError> {
        Ok(self.active_in_slot(doctor_id, start_time).await)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments: Vec<Appointment> = self.rows
            .read()
            .await
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        sort_for_listing(&mut appointments);
        Ok(appointments)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        target: AppointmentStatus,
        allowed_from: &[AppointmentStatus],
    ) -> Result<TransitionOutcome, AppointmentError> {
        let mut rows = self.rows.write().await;
        let Some(appointment) = rows.get_mut(&id) else {
            return Ok(TransitionOutcome::Missing);
        };

        if !allowed_from.contains(&appointment.status) {
            return Ok(TransitionOutcome::Rejected { current: appointment.status });
        }

        appointment.status = target;
        appointment.updated_at = next_timestamp(appointment.updated_at);
        Ok(TransitionOutcome::Applied(appointment.clone()))
    }

    async fn record_queue_estimate(
        &self,
        id: Uuid,
        estimated_time: Option<DateTime<Utc>>,
        queue_position: Option<i32>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut rows = self.rows.write().await;
        let Some(appointment) = rows.get_mut(&id) else {
            return Ok(None);
        };

        if estimated_time.is_some() {
            appointment.estimated_time = estimated_time;
        }
        if queue_position.is_some() {
            appointment.queue_position = queue_position;
        }
        appointment.updated_at = next_timestamp(appointment.updated_at);
        Ok(Some(appointment.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::models::Session;

    fn slot_draft(doctor_id: Uuid, start_time: DateTime<Utc>) -> NewAppointment {
        NewAppointment {
            patient_id: "patient".to_string(),
            mode: BookingMode::Slot { doctor_id, start_time },
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_slot_locks_are_pruned() {
        let store = InMemoryAppointmentStore::new();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        store.insert_within_capacity(slot_draft(Uuid::new_v4(), start), 3).await.unwrap();
        assert_eq!(store.tracked_slot_locks(), 0);
    }

    #[tokio::test]
    async fn test_zero_capacity_rejects() {
        let store = InMemoryAppointmentStore::new();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        let result = store.insert_within_capacity(slot_draft(Uuid::new_v4(), start), 0).await;
        assert!(matches!(result, Err(AppointmentError::CapacityConflict { capacity: 0, .. })));
    }

    #[tokio::test]
    async fn test_mode_mismatch_is_refused() {
        let store = InMemoryAppointmentStore::new();
        let session = NewAppointment {
            patient_id: "patient".to_string(),
            mode: BookingMode::Session(Session::Morning),
            notes: None,
        };
        assert!(store.insert_within_capacity(session, 3).await.is_err());

        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        assert!(store.insert_session(slot_draft(Uuid::new_v4(), start)).await.is_err());
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let future = Utc::now() + Duration::hours(1);
        assert!(next_timestamp(future) > future);

        let past = Utc::now() - Duration::hours(1);
        assert!(next_timestamp(past) > past);
    }
}
