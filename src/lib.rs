pub mod checkpoint;
pub mod coordinator;
pub mod errors;
pub mod escalation;
pub mod executor;
pub mod init;
pub mod orchestrator;
pub mod phase;
pub mod plan;
pub mod preflight;
pub mod store;
pub mod stream;
pub mod telemetry;
pub mod tracker;
pub mod ui;
pub mod waypoint_config;
