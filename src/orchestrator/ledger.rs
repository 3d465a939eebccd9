//! Ledger rows written after each batch.

use std::sync::Arc;

use uuid::Uuid;

use crate::batch::{Item, ItemError, ItemResult};
use crate::callback::{CallbackFragment, DeliveryOutcome};
use crate::processors::{value_text, Processor};
use crate::errors::SinkError;
use crate::sink::{LedgerRow, Sink};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local wall-clock time as written to every row.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Row describing one item of a batch.
pub fn item_row<P: Processor + ?Sized>(
    processor: &P,
    timestamp: &str,
    lead_url_prefix: &str,
    item: &Item,
    result: &ItemResult,
    fragment: &CallbackFragment,
) -> LedgerRow {
    let manifest = processor.manifest();
    let mut row = LedgerRow::new()
        .with("timestamp", timestamp)
        .with("lead_id", format!("{}{}", lead_url_prefix, item.record_label()));

    for (column, value) in processor.input_columns(item) {
        row.set(column, value);
    }
    if manifest.response_attribute.is_some() {
        row.set("response_field", processor.output_field(item).unwrap_or_default());
    }

    row.set(
        manifest.output_column,
        result.output_value().map(value_text).unwrap_or_default(),
    );
    row.set(
        "error",
        result.error().map(ItemError::describe).unwrap_or_default(),
    );
    let fragment_json = serde_json::to_string(fragment).unwrap_or_default();
    row.set_split("callback_objects", Some(&fragment_json));
    row
}

/// Row summarizing a batch whose callback was attempted.
pub fn batch_row(
    timestamp: &str,
    batch_id: Uuid,
    outcome: &DeliveryOutcome,
    request: &[u8],
) -> LedgerRow {
    let mut row = LedgerRow::new()
        .with("timestamp", timestamp)
        .with("batch_id", batch_id.to_string())
        .with("error", outcome.summary());
    row.set_split("cb_response", Some(&outcome.body));
    row.set_split("request", Some(&String::from_utf8_lossy(request)));
    row
}

/// Row recording a batch that failed before any item ran.
pub fn fatal_row(timestamp: &str, batch_id: Uuid, error: &ItemError, request: &[u8]) -> LedgerRow {
    let mut row = LedgerRow::new()
        .with("timestamp", timestamp)
        .with("batch_id", batch_id.to_string())
        .with("error", error.describe())
        .with("cb_response", "");
    row.set_split("request", Some(&String::from_utf8_lossy(request)));
    row
}

/// A sink error with its causes, for the warning log.
fn failure_text(err: &SinkError) -> String {
    ItemError::from_error(err).describe().replace('\n', "; ")
}

/// Writes rows to the sink, best-effort.
#[derive(Clone)]
pub struct Ledger {
    sink: Arc<dyn Sink>,
    await_writes: bool,
}

impl Ledger {
    pub fn new(sink: Arc<dyn Sink>, await_writes: bool) -> Self {
        Self { sink, await_writes }
    }

    /// Append each `(table, rows)` pair in order, skipping empty row sets.
    ///
    /// Failures are logged and dropped. Unless `await_writes` is set the
    /// appends run on a spawned task and this returns immediately.
    pub async fn record(&self, writes: Vec<(String, Vec<LedgerRow>)>) {
        let sink = Arc::clone(&self.sink);
        let task = async move {
            for (table, rows) in writes {
                if rows.is_empty() {
                    continue;
                }
                match sink.append(&table, &rows).await {
                    Ok(()) => log::debug!("Ledger: appended {} rows to {}", rows.len(), table),
                    Err(e) => log::warn!("Ledger write to {} failed: {}", table, failure_text(&e)),
                }
            }
        };

        if self.await_writes {
            task.await;
        } else {
            tokio::spawn(task);
        }
    }
}
