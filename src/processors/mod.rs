//! Per-item processors.
//!
//! A [`Processor`] turns one [`Item`]'s flow-step inputs into an output value
//! by calling a computation or an external API. The orchestrator is generic
//! over it; each action plugs in its own:
//!
//! - [`formula::FormulaProcessor`]: spreadsheet formula evaluation
//! - [`completion::CompletionProcessor`]: LLM chat completion
//! - [`sms::SmsProcessor`]: SMS dispatch

pub mod completion;
pub mod formula;
pub mod manifest;
pub mod sms;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::batch::{Item, ItemError};
use crate::errors::ProcessError;

pub use manifest::{ActionManifest, AttributeDef, Picklist};

/// Value produced for one item plus the activity data echoed to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub value: Value,
    /// Activity fields for the callback fragment (without `success`).
    pub activity: Map<String, Value>,
}

/// Per-item work for one action kind.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    fn manifest(&self) -> &ActionManifest;

    /// Process one item. Errors stay with the item.
    async fn process(&self, item: &Item) -> Result<ProcessOutput, ProcessError>;

    /// Activity fields for an item that failed (without `success`).
    fn failure_activity(&self, item: &Item, error: &ItemError) -> Map<String, Value>;

    /// Ledger columns describing the item's inputs, in column order.
    fn input_columns(&self, item: &Item) -> Vec<(String, String)>;

    /// Field the item's result is written back to, when the action has one.
    fn output_field(&self, item: &Item) -> Option<String> {
        self.manifest()
            .response_attribute
            .and_then(|attr| item.input(attr))
            .filter(|field| !field.is_empty())
    }
}

/// Render a JSON value as ledger text: strings unquoted, null empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build an activity map from `(key, value)` pairs.
pub(crate) fn activity<I>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Read a numeric flow-step input that may arrive as a number or a string.
pub(crate) fn numeric_input(
    item: &Item,
    key: &'static str,
    default: f64,
) -> Result<f64, ProcessError> {
    match item.context.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| ProcessError::InvalidInput {
            field: key,
            reason: format!("{} is not representable as a float", n),
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(default),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|e| ProcessError::InvalidInput {
            field: key,
            reason: format!("could not convert {:?} to float: {}", s, e),
        }),
        Some(other) => Err(ProcessError::InvalidInput {
            field: key,
            reason: format!("expected a number, got {}", other),
        }),
    }
}
