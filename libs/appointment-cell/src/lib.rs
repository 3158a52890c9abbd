pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;

pub use models::{Appointment, AppointmentError, AppointmentStatus, BookingValidationError};
pub use router::appointment_routes;
pub use services::booking::AppointmentBookingService;
pub use services::lifecycle::AppointmentLifecycleService;
pub use services::store::AppointmentStore;
pub use state::AppointmentState;
