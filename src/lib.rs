//! # flowstep-gateway
//!
//! An integration gateway that serves three flow-step actions (formula
//! evaluation, LLM text completion and SMS dispatch) to a marketing-automation
//! platform. Every action follows the same shape: the platform posts a batch of
//! records, each record is processed independently, and exactly one aggregated
//! callback is delivered back to the platform. Batch and per-record outcomes are
//! appended, best-effort, to a spreadsheet ledger.
//!
//! The moving parts:
//!
//! - [`batch`] parses the inbound request into a [`batch::Batch`] of items.
//! - [`processors`] holds the per-item [`processors::Processor`] adapters and
//!   their action manifests.
//! - [`orchestrator`] drives a batch through a processor to a single callback.
//! - [`callback`] assembles and delivers the callback payload.
//! - [`sink`] is the append-only, rate-limited ledger writer.
//! - [`server`] exposes everything over axum.

pub mod batch;
pub mod callback;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod processors;
pub mod server;
pub mod sink;

pub use batch::{Batch, Item, ItemError, ItemResult};
pub use callback::{CallbackClient, CallbackPayload, DeliveryOutcome, HttpCallbackClient};
pub use config::GatewayConfig;
pub use orchestrator::{Action, ActionResponse, Orchestrator, OrchestratorSettings};
pub use processors::{ActionManifest, Processor};
pub use sink::{LedgerRow, Sink};

/// Crate version reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
