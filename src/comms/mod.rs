//! Lifecycle-triggered communications.

pub mod dispatcher;
pub mod model;

pub use dispatcher::{dispatch_communications, DispatchSummary};
pub use model::{CommChannel, CommunicationTemplate, TriggerEvent};
