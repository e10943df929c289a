pub mod narrator;
pub mod orchestrator;
pub mod sink;
pub mod types;
