//! Inbound batch model.
//!
//! The calling platform posts one JSON document per flow-step invocation:
//!
//! ```json
//! {
//!   "objectData": [
//!     { "objectContext": { "id": 42 }, "flowStepContext": { "formula": "=1+1" } }
//!   ],
//!   "callbackUrl": "https://platform.example/callback",
//!   "apiCallBackKey": "key",
//!   "token": "token"
//! }
//! ```
//!
//! [`Batch::parse`] turns that document into an ordered list of [`Item`]s plus
//! the [`CallbackTarget`]. Anything wrong at this level is a [`BatchError`] and
//! aborts the request before a single item runs. Problems inside a
//! `flowStepContext` are left for the processor to report per item.

pub mod result;

use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::BatchError;

pub use result::{ItemError, ItemResult};

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    #[serde(default)]
    object_data: Vec<ObjectRecord>,
    callback_url: String,
    api_call_back_key: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectRecord {
    #[serde(default)]
    object_context: ObjectContext,
    #[serde(default)]
    flow_step_context: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectContext {
    #[serde(default)]
    id: Option<Value>,
}

// ---------------------------------------------------------------------------
// Batch model
// ---------------------------------------------------------------------------

/// Where and how the single aggregated callback is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub url: String,
    /// Sent as `x-api-key`.
    pub api_key: String,
    /// Sent as `x-callback-token`.
    pub token: String,
}

/// One record to process.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Position of the item within its batch.
    pub index: usize,
    /// External record identifier; the platform may send null.
    pub record_id: Option<Value>,
    /// Kind-specific flow-step inputs, untouched.
    pub context: Map<String, Value>,
}

impl Item {
    pub fn new(index: usize, record_id: Option<Value>, context: Map<String, Value>) -> Self {
        Self {
            index,
            record_id,
            context,
        }
    }

    /// The record id as plain text, empty when absent.
    pub fn record_label(&self) -> String {
        match &self.record_id {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Read a flow-step input as text.
    ///
    /// Missing and null inputs are `None`; numbers and booleans are rendered
    /// as their JSON text.
    pub fn input(&self, key: &str) -> Option<String> {
        match self.context.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Read a flow-step input as text, falling back to `default`.
    pub fn input_or(&self, key: &str, default: &str) -> String {
        self.input(key).unwrap_or_else(|| default.to_string())
    }
}

/// One inbound flow-step invocation.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Correlation id generated on receipt; used in logs and ledger rows.
    pub id: Uuid,
    pub items: Vec<Item>,
    pub callback: CallbackTarget,
}

impl Batch {
    /// Parse and validate a raw request body.
    pub fn parse(body: &[u8]) -> Result<Self, BatchError> {
        let request: BatchRequest = serde_json::from_slice(body)?;

        let url = request.callback_url.trim();
        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Err(BatchError::InvalidField {
                    field: "callbackUrl",
                    reason: format!("unsupported scheme '{}'", parsed.scheme()),
                })
            }
            Err(e) => {
                return Err(BatchError::InvalidField {
                    field: "callbackUrl",
                    reason: e.to_string(),
                })
            }
        }

        let items = request
            .object_data
            .into_iter()
            .enumerate()
            .map(|(index, record)| Item::new(index, record.object_context.id, record.flow_step_context))
            .collect();

        Ok(Self {
            id: Uuid::new_v4(),
            items,
            callback: CallbackTarget {
                url: url.to_string(),
                api_key: request.api_call_back_key,
                token: request.token,
            },
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_parse_preserves_item_order() {
        let batch = Batch::parse(&body(json!({
            "objectData": [
                {"objectContext": {"id": 7}, "flowStepContext": {"formula": "=1"}},
                {"objectContext": {"id": "abc"}, "flowStepContext": {"formula": "=2"}},
                {"objectContext": {}, "flowStepContext": {}},
            ],
            "callbackUrl": "https://callback.example/done",
            "apiCallBackKey": "key-1",
            "token": "tok-1",
        })))
        .unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.items[0].record_label(), "7");
        assert_eq!(batch.items[1].record_label(), "abc");
        assert_eq!(batch.items[2].record_label(), "");
        assert_eq!(batch.items[1].input("formula").as_deref(), Some("=2"));
        assert_eq!(batch.items[2].index, 2);
        assert_eq!(
            batch.callback,
            CallbackTarget {
                url: "https://callback.example/done".into(),
                api_key: "key-1".into(),
                token: "tok-1".into(),
            }
        );
    }

    #[test]
    fn test_missing_object_data_is_an_empty_batch() {
        let batch = Batch::parse(&body(json!({
            "callbackUrl": "http://localhost:9000/cb",
            "apiCallBackKey": "k",
            "token": "t",
        })))
        .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_missing_callback_url_is_malformed() {
        let err = Batch::parse(&body(json!({
            "objectData": [],
            "apiCallBackKey": "k",
            "token": "t",
        })))
        .unwrap_err();
        assert!(matches!(err, BatchError::Malformed(_)));
        assert!(err.to_string().contains("callbackUrl"));
    }

    #[test]
    fn test_relative_callback_url_is_rejected() {
        let err = Batch::parse(&body(json!({
            "callbackUrl": "/not/absolute",
            "apiCallBackKey": "k",
            "token": "t",
        })))
        .unwrap_err();
        assert!(matches!(err, BatchError::InvalidField { field: "callbackUrl", .. }));
    }

    #[test]
    fn test_non_json_body_is_malformed() {
        assert!(matches!(
            Batch::parse(b"objectData=1"),
            Err(BatchError::Malformed(_))
        ));
    }

    #[test]
    fn test_item_input_renders_scalars() {
        let item = Item::new(
            0,
            None,
            json!({"temperature": 0.7, "flag": true, "empty": null})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(item.input("temperature").as_deref(), Some("0.7"));
        assert_eq!(item.input("flag").as_deref(), Some("true"));
        assert_eq!(item.input("empty"), None);
        assert_eq!(item.input_or("missing", "str"), "str");
    }
}
