//! Batch callback orchestration.
//!
//! [`Orchestrator`] drives one inbound batch through a [`Processor`]:
//!
//! 1. parse the body into a [`Batch`]; a malformed body is recorded to the
//!    ledger and answered with a server error, no callback is sent
//! 2. process every item concurrently, each failure (or panic) staying with
//!    its own item
//! 3. assemble one [`CallbackPayload`] in item order and deliver it once
//! 4. hand item and batch rows to the ledger, best-effort
//!
//! The delivery outcome alone decides the [`ActionResponse`].

pub mod ledger;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use uuid::Uuid;

use crate::batch::{Batch, Item, ItemError, ItemResult};
use crate::callback::{CallbackClient, CallbackPayload};
use crate::config::GatewayConfig;
use crate::errors::{BatchError, ProcessError};
use crate::processors::{ActionManifest, Processor};
use crate::sink::Sink;

pub use ledger::Ledger;

/// Per-deployment values the orchestrator stamps on callbacks and rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub munchkin_id: String,
    pub lead_url_prefix: String,
    /// Wait for ledger appends before answering.
    pub await_ledger: bool,
}

impl From<&GatewayConfig> for OrchestratorSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            munchkin_id: config.munchkin_id.clone(),
            lead_url_prefix: config.lead_url_prefix.clone(),
            await_ledger: config.await_ledger_writes,
        }
    }
}

/// Result of one `submitAsyncAction` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResponse {
    /// Callback delivered with a 2xx.
    Accepted,
    /// Callback rejected or unreachable; carries the platform's response body
    /// or the transport error.
    DeliveryFailed { detail: String },
    /// The batch never got as far as processing.
    Fatal,
}

/// Object-safe view of an orchestrator, so the router can hold one per action.
#[async_trait]
pub trait Action: Send + Sync {
    fn manifest(&self) -> &ActionManifest;

    async fn submit(&self, body: &[u8]) -> ActionResponse;

    /// Fail a batch whose body never became readable.
    async fn reject(&self, error: BatchError, body: &[u8]) -> ActionResponse;
}

/// Generic batch driver for one action kind.
pub struct Orchestrator<P: Processor> {
    processor: Arc<P>,
    callback: Arc<dyn CallbackClient>,
    ledger: Ledger,
    settings: OrchestratorSettings,
}

impl<P: Processor> Orchestrator<P> {
    pub fn new(
        processor: P,
        callback: Arc<dyn CallbackClient>,
        sink: Arc<dyn Sink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            processor: Arc::new(processor),
            callback,
            ledger: Ledger::new(sink, settings.await_ledger),
            settings,
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Handle a raw `submitAsyncAction` body end to end.
    pub async fn submit(&self, body: &[u8]) -> ActionResponse {
        let manifest = self.processor.manifest();
        let timestamp = ledger::timestamp();

        let batch = match Batch::parse(body) {
            Ok(batch) => batch,
            Err(err) => return self.reject(&err, body).await,
        };

        log::info!(
            "[{}] batch {} received with {} items",
            manifest.base,
            batch.id,
            batch.len()
        );

        let results = self.process_all(&batch.items).await;
        let failed = results.iter().filter(|r| !r.is_success()).count();

        let payload = CallbackPayload::assemble(self.settings.munchkin_id.as_str(), &results);
        let outcome = self.callback.deliver(&batch.callback, &payload).await;

        if outcome.is_success() {
            log::info!(
                "[{}] batch {} done: {} ok, {} failed, callback {:?}",
                manifest.base,
                batch.id,
                results.len() - failed,
                failed,
                outcome.status
            );
        } else {
            log::warn!(
                "[{}] batch {} callback failed: {}",
                manifest.base,
                batch.id,
                outcome.summary()
            );
        }

        let item_rows: Vec<_> = batch
            .items
            .iter()
            .zip(&results)
            .zip(&payload.object_data)
            .map(|((item, result), fragment)| {
                ledger::item_row(
                    self.processor.as_ref(),
                    &timestamp,
                    &self.settings.lead_url_prefix,
                    item,
                    result,
                    fragment,
                )
            })
            .collect();
        let batch_row = ledger::batch_row(&timestamp, batch.id, &outcome, body);
        self.ledger
            .record(vec![
                (manifest.items_table(), item_rows),
                (manifest.batches_table(), vec![batch_row]),
            ])
            .await;

        if outcome.is_success() {
            ActionResponse::Accepted
        } else {
            ActionResponse::DeliveryFailed {
                detail: outcome.failure_detail(),
            }
        }
    }

    /// Log a batch that failed before any item ran and answer `Fatal`.
    /// No callback is sent.
    pub async fn reject(&self, error: &BatchError, body: &[u8]) -> ActionResponse {
        let manifest = self.processor.manifest();
        let batch_id = Uuid::new_v4();
        log::error!("[{}] batch {} rejected: {}", manifest.base, batch_id, error);
        let row = ledger::fatal_row(
            &ledger::timestamp(),
            batch_id,
            &ItemError::from_error(error),
            body,
        );
        self.ledger
            .record(vec![(manifest.batches_table(), vec![row])])
            .await;
        ActionResponse::Fatal
    }

    /// Process items concurrently; results come back in item order.
    pub async fn process_all(&self, items: &[Item]) -> Vec<ItemResult> {
        join_all(items.iter().map(|item| self.process_one(item))).await
    }

    async fn process_one(&self, item: &Item) -> ItemResult {
        let outcome = AssertUnwindSafe(self.processor.process(item))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessError::Panicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(output) => ItemResult::Success {
                record_id: item.record_id.clone(),
                output_field: self.processor.output_field(item),
                output_value: output.value,
                trace: output.activity,
            },
            Err(err) => {
                log::warn!(
                    "[{}] item {} (record {:?}) failed: {}",
                    self.processor.manifest().base,
                    item.index,
                    item.record_label(),
                    err
                );
                let error = ItemError::from_error(&err);
                let trace = self.processor.failure_activity(item, &error);
                ItemResult::Failure {
                    record_id: item.record_id.clone(),
                    error,
                    trace,
                }
            }
        }
    }
}

#[async_trait]
impl<P: Processor> Action for Orchestrator<P> {
    fn manifest(&self) -> &ActionManifest {
        self.processor.manifest()
    }

    async fn submit(&self, body: &[u8]) -> ActionResponse {
        Orchestrator::submit(self, body).await
    }

    async fn reject(&self, error: BatchError, body: &[u8]) -> ActionResponse {
        Orchestrator::reject(self, &error, body).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
