//! In-process ledger store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LedgerRow, Sink};
use crate::errors::SinkError;

/// [`Sink`] that keeps appended rows in memory.
///
/// Can be switched into a failing mode where every append errors, which is
/// how the best-effort behavior of the ledger is exercised.
#[derive(Debug, Default)]
pub struct MemorySink {
    appends: Mutex<Vec<(String, Vec<LedgerRow>)>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every append fails.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of append calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// All rows appended to `table`, in append order.
    pub fn rows(&self, table: &str) -> Vec<LedgerRow> {
        self.appends
            .lock()
            .iter()
            .filter(|(name, _)| name == table)
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }

    /// Table names in the order they were appended to.
    pub fn tables(&self) -> Vec<String> {
        self.appends.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn append(&self, table: &str, rows: &[LedgerRow]) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink set to fail".into()));
        }
        self.appends.lock().push((table.to_string(), rows.to_vec()));
        Ok(())
    }
}
