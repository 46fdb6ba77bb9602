pub mod artifacts;
pub mod backend;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod materialize;
pub mod memory;
pub mod milestone;
pub mod onboard;
pub mod orchestrator;
pub mod proposal;
pub mod review;
pub mod ui;
