//! Per-item outcomes.

use std::error::Error as StdError;

use serde_json::{Map, Value};

use crate::errors::error_trace;

/// Human-readable description of why an item failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub message: String,
    /// Cause chain, one cause per line. May be empty.
    pub trace: String,
}

impl ItemError {
    pub fn new(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: trace.into(),
        }
    }

    /// Capture an error's message and its `source()` chain.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        Self::new(err.to_string(), error_trace(err))
    }

    /// Message followed by the trace, as written to callbacks and ledger rows.
    pub fn describe(&self) -> String {
        if self.trace.is_empty() {
            self.message.clone()
        } else {
            format!("{}\n{}", self.message, self.trace)
        }
    }
}

/// Outcome of processing one item. Exactly one per item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemResult {
    Success {
        record_id: Option<Value>,
        /// Field the platform should write `output_value` into.
        output_field: Option<String>,
        output_value: Value,
        /// Activity data echoed back to the platform.
        trace: Map<String, Value>,
    },
    Failure {
        record_id: Option<Value>,
        error: ItemError,
        /// Activity data echoed back to the platform.
        trace: Map<String, Value>,
    },
}

impl ItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn record_id(&self) -> Option<&Value> {
        match self {
            Self::Success { record_id, .. } | Self::Failure { record_id, .. } => {
                record_id.as_ref()
            }
        }
    }

    pub fn activity(&self) -> &Map<String, Value> {
        match self {
            Self::Success { trace, .. } | Self::Failure { trace, .. } => trace,
        }
    }

    pub fn error(&self) -> Option<&ItemError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn output_value(&self) -> Option<&Value> {
        match self {
            Self::Success { output_value, .. } => Some(output_value),
            Self::Failure { .. } => None,
        }
    }
}
