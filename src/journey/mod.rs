//! Journey engine: compilation, progress tracking, and the identity flip.

pub mod compiler;
pub mod conditions;
pub mod flip;
pub mod model;
pub mod profile;
pub mod progress;
pub mod routes;

pub use compiler::{compile_all_journeys_for_user, compile_journey, preview_compilation};
pub use flip::{process_identity_flip, rollback_identity_flip, IdentityFlipOutcome};
pub use model::{
    ChecklistState, JourneyStatus, JourneyStep, JourneyStepDetail, JourneyWithSteps, StepStatus,
    UserJourney,
};
pub use profile::UserProfile;
