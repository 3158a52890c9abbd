use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Doctor, DoctorRegistryError, DEFAULT_SLOT_CAPACITY};

/// Read-only source of per-slot booking capacity.
#[async_trait]
pub trait DoctorRegistry: Send + Sync {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, DoctorRegistryError>;

    fn default_slot_capacity(&self) -> u32 {
        DEFAULT_SLOT_CAPACITY
    }

    /// Capacity for one slot of `doctor_id`; unknown doctors get the default.
    async fn get_slot_capacity(&self, doctor_id: Uuid) -> Result<u32, DoctorRegistryError> {
        let capacity = match self.find_doctor(doctor_id).await? {
            Some(doctor) => doctor.effective_slot_capacity(self.default_slot_capacity()),
            None => {
                debug!("No registry record for doctor {}, using default capacity", doctor_id);
                self.default_slot_capacity()
            }
        };
        Ok(capacity)
    }
}

pub struct SupabaseDoctorRegistry {
    supabase: Arc<SupabaseClient>,
    default_capacity: u32,
}

impl SupabaseDoctorRegistry {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)), config.default_slot_capacity)
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, default_capacity: u32) -> Self {
        Self { supabase, default_capacity }
    }
}

#[async_trait]
impl DoctorRegistry for SupabaseDoctorRegistry {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, DoctorRegistryError> {
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&select=id,name,specialization,slot_capacity",
            doctor_id
        );

        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            self.supabase.service_key(),
            None,
        ).await.map_err(|e| {
            warn!("Doctor lookup failed for {}: {}", doctor_id, e);
            DoctorRegistryError::Unavailable(e.to_string())
        })?;

        match rows.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| DoctorRegistryError::Malformed(e.to_string())),
            None => Ok(None),
        }
    }

    fn default_slot_capacity(&self) -> u32 {
        self.default_capacity
    }
}

/// Registry backed by a map, for local runs and tests.
#[derive(Default)]
pub struct InMemoryDoctorRegistry {
    doctors: RwLock<HashMap<Uuid, Doctor>>,
    default_capacity: Option<u32>,
}

impl InMemoryDoctorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_capacity(default_capacity: u32) -> Self {
        Self {
            doctors: RwLock::new(HashMap::new()),
            default_capacity: Some(default_capacity),
        }
    }

    pub async fn upsert(&self, doctor: Doctor) {
        self.doctors.write().await.insert(doctor.id, doctor);
    }
}

#[async_trait]
impl DoctorRegistry for InMemoryDoctorRegistry {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, DoctorRegistryError> {
        Ok(self.doctors.read().await.get(&doctor_id).cloned())
    }

    fn default_slot_capacity(&self) -> u32 {
        self.default_capacity.unwrap_or(DEFAULT_SLOT_CAPACITY)
    }
}
