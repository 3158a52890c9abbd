// libs/appointment-cell/src/services/occupancy.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use doctor_cell::DoctorRegistry;

use crate::models::{AppointmentError, SlotOccupancy, SlotOccupancyQuery};
use crate::services::bounded;
use crate::services::store::AppointmentStore;

/// Read-only view of how full a (doctor, start_time) slot is.
/// Counts are read from storage on every call and never cached.
pub struct SlotOccupancyService {
    store: Arc<dyn AppointmentStore>,
    registry: Arc<dyn DoctorRegistry>,
    timeout: Duration,
}

impl SlotOccupancyService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        registry: Arc<dyn DoctorRegistry>,
        timeout: Duration,
    ) -> Self {
        Self { store, registry, timeout }
    }

    pub async fn slot_occupancy(&self, query: SlotOccupancyQuery) -> Result<SlotOccupancy, AppointmentError> {
        let SlotOccupancyQuery { doctor_id, start_time } = query;

        let capacity = bounded(self.timeout, "capacity_lookup", async {
            Ok(self.registry.get_slot_capacity(doctor_id).await?)
        }).await?;

        let active = bounded(
            self.timeout,
            "count_active_in_slot",
            self.store.count_active_in_slot(doctor_id, start_time),
        ).await?;

        debug!("Slot {} at {}: {}/{} active", doctor_id, start_time, active, capacity);
        Ok(SlotOccupancy::new(doctor_id, start_time, capacity, active))
    }
}
