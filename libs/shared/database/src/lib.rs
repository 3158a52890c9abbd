pub mod supabase;

/// Schema for the `appointments` table and the slot allocation function.
pub const APPOINTMENTS_MIGRATION: &str = include_str!("../migrations/0001_appointments.sql");
