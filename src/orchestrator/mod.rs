pub mod engine;
pub mod state;

pub use engine::{CommandOutcome, DriveOutcome, EngineSettings, Orchestrator};
pub use state::{ProjectSession, ProjectState};
