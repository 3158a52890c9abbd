// libs/appointment-cell/src/services/supabase_store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentQuery, AppointmentStatus, BookingMode, NewAppointment,
};
use crate::services::store::{AppointmentStore, TransitionOutcome};

const SEAT_INDEX: &str = "appointments_active_slot_seat";
const UNIQUE_VIOLATION: &str = "23505";

const APPOINTMENT_COLUMNS: &str =
    "id,patient_id,doctor_id,start_time,session,estimated_time,queue_position,notes,status,created_at,updated_at";

/// Appointment rows in Postgres, reached through PostgREST.
///
/// Slot bookings go through the `book_slot_appointment` function, which counts
/// and inserts under one advisory lock. Status changes are conditional PATCHes
/// filtered on the accepted source statuses.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)))
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn token(&self) -> Option<&str> {
        self.supabase.service_key()
    }

    fn parse_rows(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    error!("Malformed appointment row: {}", e);
                    AppointmentError::Storage(format!("Malformed appointment row: {}", e))
                })
            })
            .collect()
    }

    async fn patch_rows(&self, path: &str, body: Value) -> Result<Vec<Appointment>, AppointmentError> {
        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            path,
            self.token(),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(storage_error)?;

        Self::parse_rows(rows)
    }
}

fn storage_error(error: anyhow::Error) -> AppointmentError {
    AppointmentError::Storage(error.to_string())
}

fn encode_time(time: DateTime<Utc>) -> String {
    urlencoding::encode(&time.to_rfc3339_opts(SecondsFormat::Micros, true)).into_owned()
}

/// True when a PostgREST error is the seat index rejecting a duplicate seat.
/// Other constraint failures (foreign keys, checks) are not capacity problems.
fn is_seat_violation(error: &anyhow::Error) -> bool {
    let message = error.to_string();
    let Some(body) = message.strip_prefix("Constraint violation: ") else {
        return false;
    };

    match serde_json::from_str::<Value>(body) {
        Ok(details) => {
            let code = details.get("code").and_then(Value::as_str);
            let text = ["message", "details"]
                .iter()
                .filter_map(|key| details.get(*key).and_then(Value::as_str))
                .any(|text| text.contains(SEAT_INDEX));
            code == Some(UNIQUE_VIOLATION) && text
        }
        Err(_) => false,
    }
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
}

/// PostgREST filter string for a listing query.
pub fn list_path(query: &AppointmentQuery) -> String {
    let mut filters = vec![format!("select={}", APPOINTMENT_COLUMNS)];

    if let Some(patient_id) = &query.patient_id {
        filters.push(format!("patient_id=eq.{}", urlencoding::encode(patient_id)));
    }
    if let Some(doctor_id) = query.doctor_id {
        filters.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(date) = query.date {
        let day_start = date.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        if let Some(day_start) = day_start {
            let day_end = day_start + Duration::days(1);
            filters.push(format!("start_time=gte.{}", encode_time(day_start)));
            filters.push(format!("start_time=lt.{}", encode_time(day_end)));
        }
    }

    filters.push("order=start_time.asc.nullslast,created_at.asc,id.asc".to_string());
    format!("/rest/v1/appointments?{}", filters.join("&"))
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
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

        let body = json!({
            "p_patient_id": draft.patient_id,
            "p_doctor_id": doctor_id,
            "p_start_time": start_time.to_rfc3339_opts(SecondsFormat::Micros, true),
            "p_notes": draft.notes,
            "p_capacity": capacity,
        });

        let result: Result<Vec<Value>, _> = self.supabase.request(
            Method::POST,
            "/rest/v1/rpc/book_slot_appointment",
            self.token(),
            Some(body),
        ).await;

        let rows = match result {
            Ok(rows) => rows,
            // unique seat index caught a writer that bypassed the function
            Err(e) if is_seat_violation(&e) => {
                warn!("Seat constraint rejected booking for doctor {} at {}: {}", doctor_id, start_time, e);
                return Err(AppointmentError::CapacityConflict { doctor_id, start_time, capacity });
            }
            Err(e) => return Err(storage_error(e)),
        };

        match Self::parse_rows(rows)?.into_iter().next() {
            Some(appointment) => Ok(appointment),
            None => {
                debug!("Slot full for doctor {} at {} (capacity {})", doctor_id, start_time, capacity);
                Err(AppointmentError::CapacityConflict { doctor_id, start_time, capacity })
            }
        }
    }

    async fn insert_session(&self, draft: NewAppointment) -> Result<Appointment, AppointmentError> {
        let session = match draft.mode {
            BookingMode::Session(session) => session,
            BookingMode::Slot { .. } => {
                return Err(AppointmentError::Storage(
                    "slot booking routed to session insert".to_string(),
                ))
            }
        };

        let body = json!({
            "patient_id": draft.patient_id,
            "session": session,
            "notes": draft.notes,
            "status": AppointmentStatus::Scheduled,
        });

        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            self.token(),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(storage_error)?;

        Self::parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Storage("Insert returned no row".to_string()))
    }

    async fn count_active_in_slot(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
    ) -> Result<u32, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?select=id&doctor_id=eq.{}&start_time=eq.{}&status=not.in.(cancelled,no_show)",
            doctor_id,
            encode_time(start_time),
        );

        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, self.token(), None)
            .await
            .map_err(storage_error)?;

        Ok(rows.len() as u32)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&select={}", id, APPOINTMENT_COLUMNS);

        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, self.token(), None)
            .await
            .map_err(storage_error)?;

        Ok(Self::parse_rows(rows)?.into_iter().next())
    }

    async fn list(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let path = list_path(query);

        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, self.token(), None)
            .await
            .map_err(storage_error)?;

        Self::parse_rows(rows)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        target: AppointmentStatus,
        allowed_from: &[AppointmentStatus],
    ) -> Result<TransitionOutcome, AppointmentError> {
        if !allowed_from.is_empty() {
            let path = format!(
                "/rest/v1/appointments?id=eq.{}&status=in.({})&select={}",
                id,
                status_list(allowed_from),
                APPOINTMENT_COLUMNS,
            );

            let updated = self.patch_rows(&path, json!({ "status": target })).await?;
            if let Some(appointment) = updated.into_iter().next() {
                return Ok(TransitionOutcome::Applied(appointment));
            }
        }

        // Nothing matched the guarded update; find out why.
        Ok(match self.get(id).await? {
            Some(current) => TransitionOutcome::Rejected { current: current.status },
            None => TransitionOutcome::Missing,
        })
    }

    async fn record_queue_estimate(
        &self,
        id: Uuid,
        estimated_time: Option<DateTime<Utc>>,
        queue_position: Option<i32>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut body = Map::new();
        if let Some(estimated_time) = estimated_time {
            body.insert(
                "estimated_time".to_string(),
                json!(estimated_time.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }
        if let Some(queue_position) = queue_position {
            body.insert("queue_position".to_string(), json!(queue_position));
        }

        let path = format!("/rest/v1/appointments?id=eq.{}&select={}", id, APPOINTMENT_COLUMNS);
        let updated = self.patch_rows(&path, Value::Object(body)).await?;
        Ok(updated.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_list_path_filters_by_utc_day() {
        let doctor_id = Uuid::new_v4();
        let query = AppointmentQuery {
            patient_id: Some("p 1".to_string()),
            doctor_id: Some(doctor_id),
            date: NaiveDate::from_ymd_opt(2025, 3, 1),
        };

        let path = list_path(&query);
        assert!(path.starts_with("/rest/v1/appointments?select="));
        assert!(path.contains("patient_id=eq.p%201"));
        assert!(path.contains(&format!("doctor_id=eq.{}", doctor_id)));
        assert!(path.contains("start_time=gte.2025-03-01T00%3A00%3A00.000000Z"));
        assert!(path.contains("start_time=lt.2025-03-02T00%3A00%3A00.000000Z"));
        assert!(path.ends_with("order=start_time.asc.nullslast,created_at.asc,id.asc"));
    }

    #[test]
    fn test_list_path_without_filters() {
        let path = list_path(&AppointmentQuery::default());
        assert!(!path.contains("patient_id"));
        assert!(!path.contains("start_time=gte"));
    }

    #[test]
    fn test_seat_violation_detection() {
        let seat = anyhow::anyhow!(
            "Constraint violation: {}",
            json!({ "code": "23505", "message": "duplicate key value violates unique constraint \"appointments_active_slot_seat\"" })
        );
        assert!(is_seat_violation(&seat));

        let foreign_key = anyhow::anyhow!(
            "Constraint violation: {}",
            json!({ "code": "23503", "message": "insert or update on table \"appointments\" violates foreign key constraint \"appointments_doctor_id_fkey\"" })
        );
        assert!(!is_seat_violation(&foreign_key));

        let other_unique = anyhow::anyhow!(
            "Constraint violation: {}",
            json!({ "code": "23505", "message": "duplicate key value violates unique constraint \"appointments_pkey\"" })
        );
        assert!(!is_seat_violation(&other_unique));

        assert!(!is_seat_violation(&anyhow::anyhow!("Constraint violation: not json")));
        assert!(!is_seat_violation(&anyhow::anyhow!("API error (500): boom")));
    }

    #[test]
    fn test_status_list() {
        assert_eq!(
            status_list(&[AppointmentStatus::Scheduled, AppointmentStatus::NoShow]),
            "scheduled,no_show"
        );
    }
}
