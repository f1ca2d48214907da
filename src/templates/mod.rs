//! Journey templates — shared, versioned step definitions.

pub mod admin;
pub mod model;

pub use model::{ContentBlock, ContentPayload, JourneyTemplate, StepType, TemplateStep};
