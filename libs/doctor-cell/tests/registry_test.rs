use std::sync::Arc;

use assert_matches::assert_matches;
use tokio_test::assert_ok;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use doctor_cell::{Doctor, DoctorRegistry, DoctorRegistryError, InMemoryDoctorRegistry, SupabaseDoctorRegistry};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn supabase_registry(server: &MockServer) -> SupabaseDoctorRegistry {
    let config = TestConfig::with_supabase_url(server.uri()).to_supabase_config();
    SupabaseDoctorRegistry::with_client(Arc::new(SupabaseClient::new(&config)), 3)
}

#[tokio::test]
async fn test_configured_capacity_is_returned() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_row(doctor_id, "Dr. Tan", Some(5))
        ])))
        .mount(&server)
        .await;

    let registry = supabase_registry(&server);
    assert_eq!(registry.get_slot_capacity(doctor_id).await.unwrap(), 5);
}

#[tokio::test]
async fn test_null_capacity_defaults_to_three() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_row(doctor_id, "Dr. Lim", None)
        ])))
        .mount(&server)
        .await;

    let registry = supabase_registry(&server);
    assert_eq!(registry.get_slot_capacity(doctor_id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_unknown_doctor_defaults_to_three() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let registry = supabase_registry(&server);
    assert_eq!(registry.get_slot_capacity(Uuid::new_v4()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_registry_outage_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let registry = supabase_registry(&server);
    let result = registry.get_slot_capacity(Uuid::new_v4()).await;
    assert_matches!(result, Err(DoctorRegistryError::Unavailable(_)));
}

#[tokio::test]
async fn test_in_memory_registry() {
    let registry = InMemoryDoctorRegistry::new();
    let doctor = Doctor::new("Dr. Wong", Some(1));
    let doctor_id = doctor.id;
    registry.upsert(doctor).await;

    assert_eq!(assert_ok!(registry.get_slot_capacity(doctor_id).await), 1);
    assert_eq!(assert_ok!(registry.get_slot_capacity(Uuid::new_v4()).await), 3);
    assert_eq!(assert_ok!(registry.find_doctor(doctor_id).await).map(|d| d.name), Some("Dr. Wong".to_string()));

    let generous = InMemoryDoctorRegistry::with_default_capacity(10);
    assert_eq!(generous.get_slot_capacity(Uuid::new_v4()).await.unwrap(), 10);
}
