//! HTTP server for the flow-step actions.
//!
//! Exposes each action's orchestrator plus the platform's install-time
//! endpoints (service definition, picklists, OpenAPI document, icons).
//!
//! # Endpoints
//!
//! - `GET  /health`: liveness probe
//! - `POST /{base}/submitAsyncAction`: run a batch
//! - `GET  /{base}/status`, `/getServiceDefinition`, `/install`,
//!   `/serviceIcon`, `/brandIcon`
//! - `POST /{base}/getPicklist`

pub mod auth;
pub mod routes;

pub use routes::{app_router, AppState};
