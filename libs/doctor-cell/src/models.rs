use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use shared_config::DEFAULT_SLOT_CAPACITY;

/// Registry view of a doctor. Only `slot_capacity` matters to booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub specialization: Option<String>,
    pub slot_capacity: Option<u32>,
}

impl Doctor {
    pub fn new(name: impl Into<String>, slot_capacity: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            specialization: None,
            slot_capacity,
        }
    }

    /// Capacity per slot, falling back to `default` when none is configured.
    pub fn effective_slot_capacity(&self, default: u32) -> u32 {
        self.slot_capacity.unwrap_or(default)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DoctorRegistryError {
    #[error("Doctor registry unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed doctor record: {0}")]
    Malformed(String),
}
