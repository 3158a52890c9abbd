// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

use doctor_cell::DoctorRegistryError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: String,
    pub doctor_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub session: Option<Session>,
    /// Written by the queue coordinator only.
    pub estimated_time: Option<DateTime<Utc>>,
    /// Written by the queue coordinator only.
    pub queue_position: Option<i32>,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn from_new(draft: NewAppointment, now: DateTime<Utc>) -> Self {
        let (doctor_id, start_time, session) = match draft.mode {
            BookingMode::Slot { doctor_id, start_time } => (Some(doctor_id), Some(start_time), None),
            BookingMode::Session(session) => (None, None, Some(session)),
        };

        Self {
            id: Uuid::new_v4(),
            patient_id: draft.patient_id,
            doctor_id,
            start_time,
            session,
            estimated_time: None,
            queue_position: None,
            notes: draft.notes,
            status: AppointmentStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }

    /// The (doctor, start_time) slot this appointment is pinned to, if any.
    pub fn slot(&self) -> Option<(Uuid, DateTime<Utc>)> {
        self.doctor_id.zip(self.start_time)
    }

    /// Whether this row counts against its slot's capacity.
    pub fn occupies_slot(&self) -> bool {
        self.slot().is_some() && self.status.occupies_slot()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::CheckedIn,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::CheckedIn => "checked_in",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Cancelled and no-show rows free their seat.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = BookingValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BookingValidationError::UnknownStatus(s.to_string()))
    }
}

/// Half-day window for bookings that are not pinned to a doctor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Morning,
    Afternoon,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Morning => "morning",
            Session::Afternoon => "afternoon",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Session {
    type Err = BookingValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(Session::Morning),
            "afternoon" => Ok(Session::Afternoon),
            other => Err(BookingValidationError::InvalidSession(other.to_string())),
        }
    }
}

// ==============================================================================
// BOOKING MODELS
// ==============================================================================

/// Validated shape of a booking.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingMode {
    Slot {
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
    },
    Session(Session),
}

/// A booking that passed validation and is ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub patient_id: String,
    pub mode: BookingMode,
    pub notes: Option<String>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: String,
    pub doctor_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    /// Kept as text so an unknown session is a validation error, not a parse error.
    pub session: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueEstimateRequest {
    pub estimated_time: Option<DateTime<Utc>>,
    pub queue_position: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentQuery {
    pub patient_id: Option<String>,
    pub doctor_id: Option<Uuid>,
    /// Calendar date (UTC) of `start_time`.
    pub date: Option<NaiveDate>,
}

impl AppointmentQuery {
    /// Drops blank text filters so `?patient_id=` means "no filter".
    pub fn normalized(mut self) -> Self {
        self.patient_id = self.patient_id.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        if let Some(patient_id) = &self.patient_id {
            if &appointment.patient_id != patient_id {
                return false;
            }
        }
        if let Some(doctor_id) = self.doctor_id {
            if appointment.doctor_id != Some(doctor_id) {
                return false;
            }
        }
        if let Some(date) = self.date {
            if appointment.start_time.map(|t| t.date_naive()) != Some(date) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotOccupancyQuery {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotOccupancy {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub capacity: u32,
    pub active: u32,
    pub available: u32,
}

impl SlotOccupancy {
    pub fn new(doctor_id: Uuid, start_time: DateTime<Utc>, capacity: u32, active: u32) -> Self {
        Self {
            doctor_id,
            start_time,
            capacity,
            active,
            available: capacity.saturating_sub(active),
        }
    }

    pub fn is_full(&self) -> bool {
        self.available == 0
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingValidationError {
    #[error("patient_id is required")]
    MissingPatient,

    #[error("provide either doctor_id with start_time, or session - not both")]
    AmbiguousBookingMode,

    #[error("provide either doctor_id with start_time, or session")]
    MissingBookingMode,

    #[error("doctor_id is required for slot bookings")]
    MissingDoctor,

    #[error("start_time is required for slot bookings")]
    MissingStartTime,

    #[error("start_time must be on a 15 minute interval")]
    MisalignedStartTime,

    #[error("session must be 'morning' or 'afternoon', got '{0}'")]
    InvalidSession(String),

    #[error("unknown appointment status '{0}'")]
    UnknownStatus(String),

    #[error("queue estimate must set estimated_time or queue_position")]
    EmptyQueueEstimate,

    #[error("queue_position must be at least 1, got {0}")]
    InvalidQueuePosition(i32),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    Validation(#[from] BookingValidationError),

    #[error("Appointment not found")]
    NotFound,

    #[error("Slot is full for doctor {doctor_id} at {start_time} (capacity {capacity})")]
    CapacityConflict {
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        capacity: u32,
    },

    /// `from` is withheld when the row may not exist, so a refused cancel
    /// does not reveal whether the id was known.
    #[error("Appointment cannot move to {to}")]
    TransitionConflict {
        from: Option<AppointmentStatus>,
        to: AppointmentStatus,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage did not answer within {timeout_ms}ms during {operation}")]
    StorageTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl AppointmentError {
    /// Failures a client may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppointmentError::StorageTimeout { .. })
    }
}

impl From<DoctorRegistryError> for AppointmentError {
    fn from(error: DoctorRegistryError) -> Self {
        AppointmentError::Storage(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.as_str().parse::<AppointmentStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
        assert!("done".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_session_parsing_is_exact() {
        assert_eq!("morning".parse::<Session>(), Ok(Session::Morning));
        assert_eq!("afternoon".parse::<Session>(), Ok(Session::Afternoon));
        assert_eq!(
            "Morning".parse::<Session>(),
            Err(BookingValidationError::InvalidSession("Morning".to_string()))
        );
        assert!("evening".parse::<Session>().is_err());
    }

    #[test]
    fn test_query_matching() {
        let doctor_id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let draft = NewAppointment {
            patient_id: "patient-1".to_string(),
            mode: BookingMode::Slot { doctor_id, start_time: start },
            notes: None,
        };
        let appointment = Appointment::from_new(draft, start);

        assert!(AppointmentQuery::default().matches(&appointment));
        assert!(AppointmentQuery {
            patient_id: Some("patient-1".into()),
            doctor_id: Some(doctor_id),
            date: NaiveDate::from_ymd_opt(2025, 3, 1),
        }
        .matches(&appointment));
        assert!(!AppointmentQuery {
            date: NaiveDate::from_ymd_opt(2025, 3, 2),
            ..Default::default()
        }
        .matches(&appointment));

        let blank = AppointmentQuery { patient_id: Some("  ".into()), ..Default::default() };
        assert!(blank.normalized().patient_id.is_none());
    }

    #[test]
    fn test_occupancy_arithmetic() {
        let occupancy = SlotOccupancy::new(Uuid::new_v4(), Utc::now(), 3, 3);
        assert!(occupancy.is_full());
        let over = SlotOccupancy::new(Uuid::new_v4(), Utc::now(), 2, 3);
        assert_eq!(over.available, 0);
    }
}
