//! Error types shared across the gateway.
//!
//! Each tier gets its own enum: batch setup errors abort a request before any
//! item runs, process errors are confined to a single item, and sink errors are
//! only ever logged.

use std::error::Error as StdError;

use thiserror::Error;

use crate::processors::formula::FormulaError;

/// Errors raised while reading [`crate::GatewayConfig`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors that make an inbound batch unusable before any item is processed.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The body is not JSON or does not have the batch shape.
    #[error("Malformed batch request: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A field parsed but carries an unusable value.
    #[error("Invalid batch field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The body could not be read, typically because it exceeds the limit.
    #[error("Unreadable batch request: {0}")]
    Unreadable(String),
}

/// Errors from an upstream API used by a processor (completion, SMS).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The service's API key was never configured.
    #[error("{service} API key not configured")]
    MissingApiKey { service: &'static str },

    /// The request never produced an HTTP response.
    #[error("{service} request failed")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("{service} API error ({status}): {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// The service answered 2xx with a body we cannot use.
    #[error("{service} returned an unexpected response: {reason}")]
    InvalidResponse { service: &'static str, reason: String },
}

/// Errors confined to a single item of a batch.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A flow-step input has the wrong type or an unusable value.
    #[error("Invalid input '{field}': {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The requested output type name is not one of int/float/str/bool.
    #[error("Unsupported output_type: {0}")]
    UnsupportedOutputType(String),

    /// The computed value cannot be represented in the requested type.
    #[error("Cannot convert {value} to {target}")]
    Coercion { value: String, target: &'static str },

    #[error("Formula evaluation failed")]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The processor panicked; the payload message is preserved.
    #[error("Processor panicked: {0}")]
    Panicked(String),
}

/// Errors from appending rows to the ledger store.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Invalid ledger table name {0:?}")]
    InvalidTable(String),

    #[error("Ledger request failed")]
    Transport(#[from] reqwest::Error),

    #[error("Ledger store rejected append ({status}): {body}")]
    Api { status: u16, body: String },

    /// The store is unreachable or refusing writes for another reason.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Render the `source()` chain of an error, one cause per line.
///
/// Returns an empty string for errors without a cause.
pub fn error_trace(err: &(dyn StdError + 'static)) -> String {
    let mut lines = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        lines.push(format!("caused by: {}", cause));
        current = cause.source();
    }
    lines.join("\n")
}
