//! The single aggregated callback sent back to the platform per batch.
//!
//! [`CallbackPayload::assemble`] turns the item results into the platform's
//! `{munchkinId, objectData: [{leadData, activityData}]}` document, one
//! fragment per item in input order. A [`CallbackClient`] delivers it exactly
//! once; there is no retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::batch::{CallbackTarget, ItemResult};

/// Header carrying the platform's callback API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying the per-invocation callback token.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One record's entry in the callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackFragment {
    /// Record id plus, on success, the designated output field.
    pub lead_data: Map<String, Value>,
    /// Inputs, outputs and the `success` flag.
    pub activity_data: Map<String, Value>,
}

impl From<&ItemResult> for CallbackFragment {
    fn from(result: &ItemResult) -> Self {
        let mut lead_data = Map::new();
        lead_data.insert(
            "id".to_string(),
            result.record_id().cloned().unwrap_or(Value::Null),
        );

        if let ItemResult::Success {
            output_field: Some(field),
            output_value,
            ..
        } = result
        {
            if !field.is_empty() && field != "id" {
                lead_data.insert(field.clone(), output_value.clone());
            }
        }

        let mut activity_data = result.activity().clone();
        activity_data.insert("success".to_string(), Value::Bool(result.is_success()));

        Self {
            lead_data,
            activity_data,
        }
    }
}

/// The document posted to the callback URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub munchkin_id: String,
    pub object_data: Vec<CallbackFragment>,
}

impl CallbackPayload {
    /// Build the payload from item results, preserving their order.
    pub fn assemble(munchkin_id: impl Into<String>, results: &[ItemResult]) -> Self {
        Self {
            munchkin_id: munchkin_id.into(),
            object_data: results.iter().map(CallbackFragment::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.object_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_data.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// What happened when the callback was sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryOutcome {
    /// HTTP status, if a response arrived.
    pub status: Option<u16>,
    /// Response body text, empty if none.
    pub body: String,
    /// Transport failure (timeout, connection refused, ...).
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn responded(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
            error: None,
        }
    }

    pub fn transport_error(error: impl Into<String>) -> Self {
        Self {
            status: None,
            body: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status, Some(s) if (200..300).contains(&s))
    }

    /// Short summary for the batch ledger row; empty on success.
    pub fn summary(&self) -> String {
        if self.is_success() {
            return String::new();
        }
        match (&self.error, self.status) {
            (Some(error), _) => format!("Callback failed: {}", error),
            (None, Some(status)) => format!("Callback HTTP {}", status),
            (None, None) => "Callback failed".to_string(),
        }
    }

    /// Detail returned to the caller when delivery failed.
    ///
    /// The platform's response body when there is one, otherwise the
    /// transport error.
    pub fn failure_detail(&self) -> String {
        if !self.body.is_empty() {
            return self.body.clone();
        }
        self.summary()
    }
}

/// Delivers a callback payload to its target.
///
/// Implementations never retry and never fail: every problem is folded into
/// the returned [`DeliveryOutcome`].
#[async_trait]
pub trait CallbackClient: Send + Sync {
    async fn deliver(&self, target: &CallbackTarget, payload: &CallbackPayload) -> DeliveryOutcome;
}

/// `reqwest`-backed callback client with a fixed timeout.
#[derive(Debug, Clone)]
pub struct HttpCallbackClient {
    client: reqwest::Client,
}

impl HttpCallbackClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackClient for HttpCallbackClient {
    async fn deliver(&self, target: &CallbackTarget, payload: &CallbackPayload) -> DeliveryOutcome {
        log::debug!(
            "Delivering callback with {} fragments to {}",
            payload.len(),
            target.url
        );

        let response = self
            .client
            .post(&target.url)
            .header(API_KEY_HEADER, &target.api_key)
            .header(CALLBACK_TOKEN_HEADER, &target.token)
            .json(payload)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => return DeliveryOutcome::transport_error(e.to_string()),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => DeliveryOutcome::responded(status, body),
            Err(e) => DeliveryOutcome {
                status: Some(status),
                body: String::new(),
                error: Some(format!("Failed to read callback response: {}", e)),
            },
        }
    }
}
