//! SMS dispatch through the Telnyx messaging API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{activity, ActionManifest, AttributeDef, ProcessOutput, Processor};
use crate::batch::{Item, ItemError};
use crate::errors::{BackendError, ProcessError};

const SERVICE: &str = "Telnyx";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One outbound text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsMessage {
    pub from: String,
    pub to: String,
    pub text: String,
}

/// Messaging backend.
#[async_trait]
pub trait SmsBackend: Send + Sync {
    /// Send `message` and return the backend's description of the queued message.
    async fn send(&self, message: &SmsMessage) -> Result<Value, BackendError>;
}

// ---------------------------------------------------------------------------
// Telnyx backend
// ---------------------------------------------------------------------------

/// Posts to `{base_url}/messages`. Requests are attempted once.
#[derive(Debug, Clone)]
pub struct TelnyxBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TelnyxBackend {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Pull the most specific reason out of a Telnyx error body.
    fn rejection_reason(body: &str) -> String {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let first = parsed.as_ref().and_then(|v| v.get("errors")).and_then(|e| e.get(0));
        first
            .and_then(|e| e.get("detail").or_else(|| e.get("title")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string())
    }
}

#[async_trait]
impl SmsBackend for TelnyxBackend {
    async fn send(&self, message: &SmsMessage) -> Result<Value, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(BackendError::MissingApiKey { service: SERVICE })?;

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(api_key)
            .json(message)
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| BackendError::Transport {
            service: SERVICE,
            source,
        })?;

        if !status.is_success() {
            return Err(BackendError::Api {
                service: SERVICE,
                status: status.as_u16(),
                message: Self::rejection_reason(&body),
            });
        }

        let mut json: Value =
            serde_json::from_str(&body).map_err(|e| BackendError::InvalidResponse {
                service: SERVICE,
                reason: e.to_string(),
            })?;
        let data = json
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| BackendError::InvalidResponse {
                service: SERVICE,
                reason: "missing 'data' object".into(),
            })?;

        log::debug!("Telnyx accepted message {}", data["id"]);
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub static SMS_MANIFEST: Lazy<ActionManifest> = Lazy::new(|| ActionManifest {
    base: "sendSMS",
    api_name: "send-sms",
    display_name: "Send SMS",
    description: "Uses the Telnyx SMS API to send an SMS message",
    trigger_name: "SMS is Sent",
    filter_name: "SMS was Sent",
    primary_attribute: "to_phone",
    realm: "Workflow Pro Send SMS",
    flow_attributes: vec![
        AttributeDef::new("to_phone", "string", "To Phone", "The phone number that should receive the text"),
        AttributeDef::new("from_phone", "string", "From Phone", "The phone number that should send the text"),
        AttributeDef::new("message", "text", "Message", "The message to be sent"),
    ],
    callback_attributes: vec![
        AttributeDef::new(
            "to_phone_value",
            "string",
            "To Phone Value",
            "The phone number value that should receive the text",
        ),
        AttributeDef::new("from_phone", "string", "From Phone", "The phone number that should send the text"),
        AttributeDef::new("message", "text", "Message", "The message to be sent"),
        AttributeDef::new("sms_response", "text", "SMS Response", "Response from Telnyx SMS API"),
        AttributeDef::new("sms_error", "text", "SMS Error", "Error from the SMS gateway"),
    ],
    callback_user_driven_mapping: false,
    picklists: Vec::new(),
    response_attribute: None,
    output_column: "sms_response",
});

/// Sends one SMS per item.
#[derive(Clone)]
pub struct SmsProcessor {
    backend: Arc<dyn SmsBackend>,
}

impl SmsProcessor {
    pub fn new(backend: Arc<dyn SmsBackend>) -> Self {
        Self { backend }
    }

    fn message(item: &Item) -> Result<SmsMessage, ProcessError> {
        let message = SmsMessage {
            from: item.input_or("from_phone", ""),
            to: item.input_or("to_phone", ""),
            text: item.input_or("message", ""),
        };
        if message.to.trim().is_empty() {
            return Err(ProcessError::InvalidInput {
                field: "to_phone",
                reason: "recipient number is empty".into(),
            });
        }
        if message.from.trim().is_empty() {
            return Err(ProcessError::InvalidInput {
                field: "from_phone",
                reason: "sender number is empty".into(),
            });
        }
        Ok(message)
    }

    fn echoed_inputs(item: &Item) -> Vec<(&'static str, Value)> {
        vec![
            ("from_phone", Value::String(item.input_or("from_phone", ""))),
            ("to_phone_value", Value::String(item.input_or("to_phone", ""))),
            ("message", Value::String(item.input_or("message", ""))),
        ]
    }
}

#[async_trait]
impl Processor for SmsProcessor {
    fn manifest(&self) -> &ActionManifest {
        &SMS_MANIFEST
    }

    async fn process(&self, item: &Item) -> Result<ProcessOutput, ProcessError> {
        let message = Self::message(item)?;
        let response = self.backend.send(&message).await?;

        let mut fields = Self::echoed_inputs(item);
        fields.push(("sms_response", response.clone()));
        Ok(ProcessOutput {
            value: response,
            activity: activity(fields),
        })
    }

    fn failure_activity(&self, item: &Item, error: &ItemError) -> Map<String, Value> {
        let mut fields = Self::echoed_inputs(item);
        fields.push(("sms_error", Value::String(error.describe())));
        activity(fields)
    }

    fn input_columns(&self, item: &Item) -> Vec<(String, String)> {
        ["from_phone", "to_phone", "message"]
            .into_iter()
            .map(|key| (key.to_string(), item.input_or(key, "")))
            .collect()
    }
}
