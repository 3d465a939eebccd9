//! Append-only audit ledger.
//!
//! A [`Sink`] appends [`LedgerRow`]s to a named table of a tabular store. It
//! never reads or mutates existing rows. Callers treat every append as best
//! effort: a [`SinkError`] is logged and otherwise ignored.

pub mod memory;
pub mod sheets;
pub mod split;
pub mod throttle;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::SinkError;

pub use memory::MemorySink;
pub use sheets::SheetsSink;
pub use split::{split_long_text, MAX_CELL_BYTES, SAFE_SLICE_BYTES};
pub use throttle::RequestThrottle;

/// One denormalized ledger row: ordered column names with string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    columns: Vec<(String, String)>,
}

impl LedgerRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing its value if the name already exists.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name, value)),
        }
        self
    }

    /// Builder form of [`LedgerRow::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a possibly oversized column, fanning it out per [`split_long_text`].
    pub fn set_split(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        for (column, chunk) in split_long_text(name, value) {
            self.set(column, chunk);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Values in column order, as appended to the store.
    pub fn values(&self) -> Vec<String> {
        self.columns.iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Append-only ledger store.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Append `rows` to `table`.
    async fn append(&self, table: &str, rows: &[LedgerRow]) -> Result<(), SinkError>;
}

/// Sink used when no ledger store is configured; drops every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSink;

#[async_trait]
impl Sink for DisabledSink {
    async fn append(&self, table: &str, rows: &[LedgerRow]) -> Result<(), SinkError> {
        log::debug!("Ledger disabled; dropping {} rows for {}", rows.len(), table);
        Ok(())
    }
}
