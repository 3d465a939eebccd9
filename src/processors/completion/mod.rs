//! LLM chat completion.
//!
//! Each item carries a system/user prompt pair plus model, temperature and
//! output-token limit. The prompt goes to a [`CompletionBackend`]; the
//! generated text is trimmed and written back to the lead field named by
//! `field`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{activity, numeric_input, ActionManifest, AttributeDef, ProcessOutput, Processor};
use crate::batch::{Item, ItemError};
use crate::errors::{BackendError, ProcessError};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.5;
pub const DEFAULT_OUTPUT_TOKENS: u32 = 256;

const SERVICE: &str = "OpenAI";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// One chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Text-generation backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Return the generated text for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
}

// ---------------------------------------------------------------------------
// OpenAI Chat Completions backend
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

/// Calls `{base_url}/chat/completions`. Requests are attempted once.
#[derive(Debug, Clone)]
pub struct OpenAiChatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiChatBackend {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn parse_response(response: &Value) -> Result<String, BackendError> {
        let invalid = |reason: &str| BackendError::InvalidResponse {
            service: SERVICE,
            reason: reason.to_string(),
        };

        let message = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| invalid("no message in first choice"))?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| invalid("message has no text content"))?;

        if let Some(usage) = response.get("usage") {
            log::debug!(
                "OpenAI token usage: prompt={}, completion={}, total={}",
                usage.get("prompt_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
                usage.get("completion_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
                usage.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            );
        }

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl CompletionBackend for OpenAiChatBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(BackendError::MissingApiKey { service: SERVICE })?;

        let body = ChatRequest {
            model: &request.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        log::debug!(
            "OpenAI chat completion: model={}, max_tokens={}",
            request.model,
            request.max_tokens
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| BackendError::Transport {
            service: SERVICE,
            source,
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(BackendError::Api {
                service: SERVICE,
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| BackendError::InvalidResponse {
            service: SERVICE,
            reason: format!("{} - Body: {}", e, text.chars().take(500).collect::<String>()),
        })?;
        Self::parse_response(&json)
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub static COMPLETION_MANIFEST: Lazy<ActionManifest> = Lazy::new(|| ActionManifest {
    base: "gptCompletion",
    api_name: "gpt-completion",
    display_name: "GPT Completion",
    description: "Makes a request to the OpenAI completion endpoint",
    trigger_name: "GPT Completion is Made",
    filter_name: "GPT Completion was Made",
    primary_attribute: "user",
    realm: "Workflow Pro GPT Completion",
    flow_attributes: vec![
        AttributeDef::new("user", "text", "User", "Open-text field containing the user message"),
        AttributeDef::new("system", "text", "System", "Open-text field containing the system message"),
        AttributeDef::new("model", "string", "Model", "OpenAI model"),
        AttributeDef::new("field", "string", "Response Field", "Field to store the GPT response"),
        AttributeDef::new(
            "output-tokens",
            "integer",
            "Output Tokens",
            "Number of output tokens to restrict the response",
        ),
        AttributeDef::new("temperature", "float", "Temperature", "Temperature of the completion"),
    ],
    callback_attributes: vec![
        AttributeDef::new("system", "text", "System message", "System message"),
        AttributeDef::new("model", "string", "Model", "Model"),
        AttributeDef::new("field", "string", "Response Field", "Field to store the GPT response"),
        AttributeDef::new("temperature", "float", "Temperature", "Temperature"),
        AttributeDef::new("output-tokens", "integer", "Output Tokens", "Output token constraint"),
        AttributeDef::new("gpt-response", "text", "GPT Response", "GPT Response"),
        AttributeDef::new("gpt-error", "text", "GPT Error", "GPT Error"),
    ],
    callback_user_driven_mapping: true,
    picklists: Vec::new(),
    response_attribute: Some("field"),
    output_column: "gpt_response",
});

/// Sends each item's prompts to a [`CompletionBackend`].
#[derive(Clone)]
pub struct CompletionProcessor {
    backend: Arc<dyn CompletionBackend>,
}

impl CompletionProcessor {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    fn request(item: &Item) -> Result<CompletionRequest, ProcessError> {
        let temperature = numeric_input(item, "temperature", DEFAULT_TEMPERATURE)?;
        let tokens = numeric_input(item, "output-tokens", f64::from(DEFAULT_OUTPUT_TOKENS))?.trunc();
        if tokens < 1.0 || tokens > f64::from(u32::MAX) {
            return Err(ProcessError::InvalidInput {
                field: "output-tokens",
                reason: format!("{} is not a positive token count", tokens),
            });
        }

        Ok(CompletionRequest {
            system: item.input_or("system", ""),
            user: item.input_or("user", ""),
            model: item.input_or("model", DEFAULT_MODEL),
            temperature,
            max_tokens: tokens as u32,
        })
    }
}

#[async_trait]
impl Processor for CompletionProcessor {
    fn manifest(&self) -> &ActionManifest {
        &COMPLETION_MANIFEST
    }

    async fn process(&self, item: &Item) -> Result<ProcessOutput, ProcessError> {
        let request = Self::request(item)?;
        let text = self.backend.complete(&request).await?;
        let text = text.trim().to_string();

        Ok(ProcessOutput {
            value: Value::String(text.clone()),
            activity: activity([
                ("system", Value::String(request.system)),
                ("user", Value::String(request.user)),
                ("model", Value::String(request.model)),
                ("temperature", json!(request.temperature)),
                ("output-tokens", json!(request.max_tokens)),
                ("field", item.context.get("field").cloned().unwrap_or(Value::Null)),
                ("gpt-response", Value::String(text)),
            ]),
        })
    }

    fn failure_activity(&self, _item: &Item, error: &ItemError) -> Map<String, Value> {
        activity([("gpt-error", Value::String(error.describe()))])
    }

    fn input_columns(&self, item: &Item) -> Vec<(String, String)> {
        vec![
            ("system".to_string(), item.input_or("system", "")),
            ("user".to_string(), item.input_or("user", "")),
            ("model".to_string(), item.input_or("model", DEFAULT_MODEL)),
            (
                "temperature".to_string(),
                item.input_or("temperature", &DEFAULT_TEMPERATURE.to_string()),
            ),
            (
                "max_tokens".to_string(),
                item.input_or("output-tokens", &DEFAULT_OUTPUT_TOKENS.to_string()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use parking_lot::Mutex;

    /// Replies with a canned text, or fails when the user prompt is "fail".
    #[derive(Default)]
    struct ScriptedBackend {
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
            self.requests.lock().push(request.clone());
            if request.user == "fail" {
                return Err(BackendError::Api {
                    service: SERVICE,
                    status: 429,
                    message: "Rate limit reached".into(),
                });
            }
            Ok(format!("  echo: {}\n", request.user))
        }
    }

    fn item(context: Value) -> Item {
        Item::new(0, Some(json!(7)), context.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_defaults_and_trimmed_output() {
        let backend = Arc::new(ScriptedBackend::default());
        let processor = CompletionProcessor::new(backend.clone());

        let out = processor
            .process(&item(json!({"user": "hello", "field": "summary"})))
            .await
            .unwrap();

        assert_eq!(out.value, json!("echo: hello"));
        assert_eq!(out.activity["gpt-response"], "echo: hello");
        assert_eq!(out.activity["model"], DEFAULT_MODEL);
        assert_eq!(out.activity["temperature"], 0.5);
        assert_eq!(out.activity["output-tokens"], 256);
        assert_eq!(out.activity["field"], "summary");

        let sent = backend.requests.lock();
        assert_eq!(sent[0].system, "");
        assert_eq!(sent[0].max_tokens, DEFAULT_OUTPUT_TOKENS);
    }

    #[tokio::test]
    async fn test_numeric_inputs_accept_strings() {
        let backend = Arc::new(ScriptedBackend::default());
        let processor = CompletionProcessor::new(backend.clone());

        processor
            .process(&item(json!({
                "user": "hi",
                "model": "gpt-4o",
                "temperature": "0.2",
                "output-tokens": "100.9",
            })))
            .await
            .unwrap();

        let sent = backend.requests.lock();
        assert_eq!(sent[0].model, "gpt-4o");
        assert_eq!(sent[0].temperature, 0.2);
        assert_eq!(sent[0].max_tokens, 100);
    }

    #[tokio::test]
    async fn test_bad_inputs_fail_without_calling_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let processor = CompletionProcessor::new(backend.clone());

        let err = processor
            .process(&item(json!({"user": "hi", "temperature": "warm"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidInput { field: "temperature", .. }));

        let err = processor
            .process(&item(json!({"user": "hi", "output-tokens": 0})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidInput { field: "output-tokens", .. }));

        assert!(backend.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_is_reported() {
        let processor = CompletionProcessor::new(Arc::new(ScriptedBackend::default()));
        let err = processor.process(&item(json!({"user": "fail"}))).await.unwrap_err();
        assert_eq!(err.to_string(), "OpenAI API error (429): Rate limit reached");

        let activity = processor.failure_activity(&item(json!({})), &ItemError::from_error(&err));
        assert_eq!(activity["gpt-error"], "OpenAI API error (429): Rate limit reached");
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "Be brief.".into(),
            user: "Say hi".into(),
            model: DEFAULT_MODEL.into(),
            temperature: 0.5,
            max_tokens: 16,
        }
    }

    #[tokio::test]
    async fn test_openai_backend_round_trip() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "Say hi");
                assert_eq!(body["max_tokens"], 16);
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": "\n Hi! \n"}}],
                    "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11},
                }))
            }),
        );
        let base = serve(app).await;

        let backend = OpenAiChatBackend::new(Some("sk-test".into()), base).unwrap();
        assert_eq!(backend.complete(&request()).await.unwrap(), "Hi!");
    }

    #[tokio::test]
    async fn test_openai_backend_surfaces_api_errors() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": {"message": "Incorrect API key provided"}})),
                )
            }),
        );
        let base = serve(app).await;

        let backend = OpenAiChatBackend::new(Some("sk-bad".into()), base).unwrap();
        match backend.complete(&request()).await {
            Err(BackendError::Api { status, message, .. }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_backend_requires_key() {
        let backend = OpenAiChatBackend::new(None, "http://127.0.0.1:9").unwrap();
        assert!(matches!(
            backend.complete(&request()).await,
            Err(BackendError::MissingApiKey { service: "OpenAI" })
        ));
    }
}
