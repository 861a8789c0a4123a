//! Orchestrator: execution lifecycle ownership and the internal batch
//! endpoints workers flush into.

pub mod client;
pub mod http;
pub mod service;

pub use client::OrchestratorClient;
pub use http::{AppState, build_router};
pub use service::ExecutionService;
