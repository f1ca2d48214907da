//! journey-os — onboarding journey engine.

pub mod comms;
pub mod config;
pub mod error;
pub mod journey;
pub mod notify;
pub mod store;
pub mod templates;
pub mod users;
