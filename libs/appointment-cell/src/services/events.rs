// libs/appointment-cell/src/services/events.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Appointment, Session};

pub const BOOKED_CHANNEL: &str = "clinic.events.appointment.booked";
pub const CANCELLED_CHANNEL: &str = "clinic.events.appointment.cancelled";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppointmentEvent {
    Booked {
        appointment_id: Uuid,
        patient_id: String,
        doctor_id: Option<Uuid>,
        start_time: Option<DateTime<Utc>>,
        session: Option<Session>,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        appointment_id: Uuid,
        patient_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl AppointmentEvent {
    pub fn booked(appointment: &Appointment) -> Self {
        AppointmentEvent::Booked {
            appointment_id: appointment.id,
            patient_id: appointment.patient_id.clone(),
            doctor_id: appointment.doctor_id,
            start_time: appointment.start_time,
            session: appointment.session,
            occurred_at: Utc::now(),
        }
    }

    pub fn cancelled(appointment: &Appointment) -> Self {
        AppointmentEvent::Cancelled {
            appointment_id: appointment.id,
            patient_id: appointment.patient_id.clone(),
            occurred_at: Utc::now(),
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            AppointmentEvent::Booked { .. } => BOOKED_CHANNEL,
            AppointmentEvent::Cancelled { .. } => CANCELLED_CHANNEL,
        }
    }

    pub fn appointment_id(&self) -> Uuid {
        match self {
            AppointmentEvent::Booked { appointment_id, .. } => *appointment_id,
            AppointmentEvent::Cancelled { appointment_id, .. } => *appointment_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventPublishError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fan-out of committed appointment changes to other services.
///
/// Publishing happens after the write has landed; a failure here never undoes it.
#[async_trait]
pub trait AppointmentEventPublisher: Send + Sync {
    async fn publish(&self, event: &AppointmentEvent) -> Result<(), EventPublishError>;
}

/// Publishes an event within `timeout`, logging and swallowing failures.
/// An expired publish counts as failed; the caller still gets its result.
pub async fn publish_best_effort(
    publisher: &dyn AppointmentEventPublisher,
    event: AppointmentEvent,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, publisher.publish(&event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            "Failed to publish {} for appointment {}: {}",
            event.channel(),
            event.appointment_id(),
            e
        ),
        Err(_) => warn!(
            "Publishing {} for appointment {} timed out after {}ms",
            event.channel(),
            event.appointment_id(),
            timeout.as_millis()
        ),
    }
}

pub struct RedisEventPublisher {
    pool: Pool,
}

impl RedisEventPublisher {
    /// Builds the pool lazily; no connection is opened until the first publish.
    pub fn new(redis_url: &str) -> Result<Self, EventPublishError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| EventPublishError::Pool(format!("Failed to create Redis pool: {}", e)))?;

        info!("Redis event publisher configured");
        Ok(Self { pool })
    }
}

#[async_trait]
impl AppointmentEventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &AppointmentEvent) -> Result<(), EventPublishError> {
        let payload = serde_json::to_string(event)?;

        let mut conn = self.pool.get().await
            .map_err(|e| EventPublishError::Pool(e.to_string()))?;

        let receivers: i64 = conn.publish(event.channel(), payload).await?;
        debug!("Published {} to {} subscribers", event.channel(), receivers);
        Ok(())
    }
}

/// Used when no Redis URL is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventPublisher;

#[async_trait]
impl AppointmentEventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: &AppointmentEvent) -> Result<(), EventPublishError> {
        debug!(
            channel = event.channel(),
            appointment_id = %event.appointment_id(),
            "Appointment event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingMode, NewAppointment};

    fn session_appointment() -> Appointment {
        let draft = NewAppointment {
            patient_id: "patient-9".to_string(),
            mode: BookingMode::Session(Session::Afternoon),
            notes: None,
        };
        Appointment::from_new(draft, Utc::now())
    }

    #[test]
    fn test_event_payload_is_tagged() {
        let appointment = session_appointment();
        let event = AppointmentEvent::booked(&appointment);
        let payload = serde_json::to_value(&event).unwrap();

        assert_eq!(payload["type"], "booked");
        assert_eq!(payload["appointment_id"], appointment.id.to_string());
        assert_eq!(payload["patient_id"], "patient-9");
        assert_eq!(payload["session"], "afternoon");
        assert!(payload["doctor_id"].is_null());
        assert_eq!(event.channel(), BOOKED_CHANNEL);

        let cancelled = serde_json::to_value(AppointmentEvent::cancelled(&appointment)).unwrap();
        assert_eq!(cancelled["type"], "cancelled");
        assert!(cancelled.get("session").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_redis_is_swallowed() {
        let publisher = RedisEventPublisher::new("redis://127.0.0.1:1").unwrap();
        publish_best_effort(
            &publisher,
            AppointmentEvent::booked(&session_appointment()),
            Duration::from_secs(5),
        ).await;
    }

    struct HangingPublisher;

    #[async_trait]
    impl AppointmentEventPublisher for HangingPublisher {
        async fn publish(&self, _event: &AppointmentEvent) -> Result<(), EventPublishError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hanging_publish_gives_up_at_deadline() {
        let event = AppointmentEvent::booked(&session_appointment());
        let finished = tokio::time::timeout(
            Duration::from_secs(2),
            publish_best_effort(&HangingPublisher, event, Duration::from_millis(50)),
        ).await;
        assert!(finished.is_ok());
    }
}
