//! Outbound notifications to users.

pub mod email;

pub use email::SystemEmailService;
