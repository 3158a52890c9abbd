pub mod models;
pub mod services;

pub use models::{Doctor, DoctorRegistryError};
pub use services::registry::{DoctorRegistry, InMemoryDoctorRegistry, SupabaseDoctorRegistry};
