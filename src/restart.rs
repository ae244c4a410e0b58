//! Verified restarts of a single app
//!
//! A restart is stop, settle, start, wait for the app and one instance to
//! come up, then confirm the public URL is healthy. Only a verified restart
//! leaves a restart record behind.

pub mod machine;
pub mod orchestrator;

pub use machine::RestartRun;
pub use orchestrator::Orchestrator;
