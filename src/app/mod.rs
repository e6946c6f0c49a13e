pub mod appointments;
pub mod auth;
pub mod notifications;
pub mod providers;
pub mod schedule;
