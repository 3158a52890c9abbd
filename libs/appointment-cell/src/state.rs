// libs/appointment-cell/src/state.rs
use std::sync::Arc;

use tracing::{info, warn};

use doctor_cell::{DoctorRegistry, InMemoryDoctorRegistry, SupabaseDoctorRegistry};
use shared_config::{AppConfig, StorageBackend};
use shared_database::supabase::SupabaseClient;

use crate::services::booking::AppointmentBookingService;
use crate::services::events::{AppointmentEventPublisher, LoggingEventPublisher, RedisEventPublisher};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::memory_store::InMemoryAppointmentStore;
use crate::services::occupancy::SlotOccupancyService;
use crate::services::store::AppointmentStore;
use crate::services::supabase_store::SupabaseAppointmentStore;

/// Everything the appointment routes need, shared across requests.
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub booking: AppointmentBookingService,
    pub lifecycle: AppointmentLifecycleService,
    pub occupancy: SlotOccupancyService,
}

impl AppointmentState {
    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn AppointmentStore>,
        registry: Arc<dyn DoctorRegistry>,
        events: Arc<dyn AppointmentEventPublisher>,
    ) -> Self {
        let timeout = config.request_timeout();

        Self {
            booking: AppointmentBookingService::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                Arc::clone(&events),
                timeout,
            ),
            lifecycle: AppointmentLifecycleService::new(Arc::clone(&store), events, timeout),
            occupancy: SlotOccupancyService::new(store, registry, timeout),
            config,
        }
    }

    /// Process-local store and registry; events go to the log.
    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        let registry = Arc::new(InMemoryDoctorRegistry::with_default_capacity(config.default_slot_capacity));
        Self::from_parts(
            config,
            Arc::new(InMemoryAppointmentStore::new()),
            registry,
            Arc::new(LoggingEventPublisher),
        )
    }

    /// Picks the store, registry and event publisher named by the configuration.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let events = event_publisher(&config);

        let (store, registry): (Arc<dyn AppointmentStore>, Arc<dyn DoctorRegistry>) =
            match config.storage_backend {
                StorageBackend::Supabase => {
                    info!("Using Supabase appointment store at {}", config.supabase_url);
                    let supabase = Arc::new(SupabaseClient::new(&config));
                    (
                        Arc::new(SupabaseAppointmentStore::with_client(Arc::clone(&supabase))),
                        Arc::new(SupabaseDoctorRegistry::with_client(supabase, config.default_slot_capacity)),
                    )
                }
                StorageBackend::Memory => {
                    warn!("Using in-memory appointment store; bookings are lost on restart");
                    (
                        Arc::new(InMemoryAppointmentStore::new()),
                        Arc::new(InMemoryDoctorRegistry::with_default_capacity(config.default_slot_capacity)),
                    )
                }
            };

        Self::from_parts(config, store, registry, events)
    }
}

fn event_publisher(config: &AppConfig) -> Arc<dyn AppointmentEventPublisher> {
    match config.redis_url.as_deref() {
        Some(url) => match RedisEventPublisher::new(url) {
            Ok(publisher) => Arc::new(publisher),
            Err(e) => {
                warn!("Redis event publisher unavailable, logging events instead: {}", e);
                Arc::new(LoggingEventPublisher)
            }
        },
        None => {
            info!("REDIS_URL not set, appointment events will only be logged");
            Arc::new(LoggingEventPublisher)
        }
    }
}
