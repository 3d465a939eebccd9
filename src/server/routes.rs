//! Axum route handlers for the gateway.
//!
//! # Routes
//!
//! - `GET  /health` returns `{"status": "ok", "version": ..., "service": ...}`
//!
//! Per action, nested under `/{base}` (`/calcFormula`, `/gptCompletion`,
//! `/sendSMS`):
//!
//! - `POST /submitAsyncAction` runs a batch (Basic auth)
//! - `GET  /status` (Basic auth)
//! - `GET  /getServiceDefinition`
//! - `POST /getPicklist`
//! - `GET  /install` serves the OpenAPI document
//! - `GET  /serviceIcon`, `GET /brandIcon`

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::{require_basic_auth, BasicAuthGate};
use crate::config::{BasicCredentials, DEFAULT_MAX_BODY_BYTES};
use crate::errors::BatchError;
use crate::orchestrator::{Action, ActionResponse};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// One entry per mounted action.
    pub actions: Vec<Arc<dyn Action>>,
    /// Basic-auth credentials for the gated routes; `None` refuses every call.
    pub credentials: Option<Arc<BasicCredentials>>,
    /// PNG served by the icon routes.
    pub icon_path: PathBuf,
    /// Largest `submitAsyncAction` body read before the batch is failed.
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(credentials: Option<BasicCredentials>, icon_path: impl Into<PathBuf>) -> Self {
        Self {
            actions: Vec::new(),
            credentials: credentials.map(Arc::new),
            icon_path: icon_path.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }
}

#[derive(Clone)]
struct ActionState {
    action: Arc<dyn Action>,
    icon_path: Arc<PathBuf>,
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    let icon_path = Arc::new(state.icon_path);
    let mut router = Router::new().route("/health", get(health_handler));

    for action in state.actions {
        let base = format!("/{}", action.manifest().base);
        let gate = BasicAuthGate::new(state.credentials.clone(), action.manifest().realm);
        let action_state = ActionState {
            action,
            icon_path: Arc::clone(&icon_path),
        };
        router = router.nest(&base, action_router(action_state, gate, state.max_body_bytes));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn action_router(state: ActionState, gate: BasicAuthGate, max_body_bytes: usize) -> Router {
    let gated = Router::new()
        .route("/status", get(status_handler))
        .route(
            "/submitAsyncAction",
            post(submit_handler).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route_layer(middleware::from_fn_with_state(gate, require_basic_auth));

    Router::new()
        .route("/getServiceDefinition", get(service_definition_handler))
        .route("/getPicklist", post(picklist_handler))
        .route("/install", get(install_handler))
        .route("/serviceIcon", get(icon_handler))
        .route("/brandIcon", get(icon_handler))
        .merge(gated)
        .with_state(state)
}

impl IntoResponse for ActionResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Accepted => StatusCode::ACCEPTED.into_response(),
            Self::DeliveryFailed { detail } => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": detail }))).into_response()
            }
            Self::Fatal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "server error" })),
            )
                .into_response(),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

/// GET /health: liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "flowstep-gateway",
    }))
}

/// POST /{base}/submitAsyncAction
///
/// Takes the raw body so that malformed JSON still reaches the orchestrator
/// and gets its fatal ledger row. A body that cannot be read (over the size
/// limit, or a broken stream) takes the same fatal path.
async fn submit_handler(
    State(state): State<ActionState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match body {
        Ok(body) => state.action.submit(&body).await.into_response(),
        Err(rejection) => state
            .action
            .reject(BatchError::Unreadable(rejection.body_text()), &[])
            .await
            .into_response(),
    }
}

/// GET /{base}/status
async fn status_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /{base}/getServiceDefinition
async fn service_definition_handler(State(state): State<ActionState>) -> impl IntoResponse {
    Json(state.action.manifest().service_definition())
}

/// POST /{base}/getPicklist
///
/// Request: `{"name": "<flow attribute>"}`. Response: `{"choices": [...]}`.
async fn picklist_handler(
    State(state): State<ActionState>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let name = payload
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();
    if name.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Missing 'name' in request body",
        ));
    }

    match state.action.manifest().picklist(name) {
        Some(picklist) => Ok(Json(picklist.to_json())),
        None => Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Unknown field name '{}'", name),
        )),
    }
}

/// GET /{base}/install: OpenAPI document for the action.
async fn install_handler(State(state): State<ActionState>, headers: HeaderMap) -> impl IntoResponse {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let server_url = host.map(|host| format!("{}://{}", scheme, host));
    Json(state.action.manifest().openapi(server_url.as_deref()))
}

/// GET /{base}/serviceIcon and /{base}/brandIcon
async fn icon_handler(State(state): State<ActionState>) -> Response {
    match tokio::fs::read(state.icon_path.as_ref()).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => {
            log::warn!("Icon {} unavailable: {}", state.icon_path.display(), e);
            error_response(StatusCode::NOT_FOUND, "Icon not found").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::formula::FORMULA_MANIFEST;
    use crate::processors::ActionManifest;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use parking_lot::Mutex;
    use std::io::Write;
    use tower::ServiceExt;

    /// Action answering every submission with a canned response.
    struct StubAction {
        response: ActionResponse,
        bodies: Mutex<Vec<Vec<u8>>>,
        rejections: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Action for StubAction {
        fn manifest(&self) -> &ActionManifest {
            &FORMULA_MANIFEST
        }

        async fn submit(&self, body: &[u8]) -> ActionResponse {
            self.bodies.lock().push(body.to_vec());
            self.response.clone()
        }

        async fn reject(&self, error: BatchError, _body: &[u8]) -> ActionResponse {
            self.rejections.lock().push(error.to_string());
            ActionResponse::Fatal
        }
    }

    fn stub(response: ActionResponse) -> Arc<StubAction> {
        Arc::new(StubAction {
            response,
            bodies: Mutex::new(Vec::new()),
            rejections: Mutex::new(Vec::new()),
        })
    }

    fn credentials() -> BasicCredentials {
        BasicCredentials {
            username: "marketo".into(),
            password: "secret".into(),
        }
    }

    fn app_with(action: Arc<StubAction>, icon_path: &str) -> Router {
        app_router(AppState::new(Some(credentials()), icon_path).with_action(action))
    }

    fn app(action: Arc<StubAction>) -> Router {
        app_with(action, "/nonexistent/icon.png")
    }

    fn authorization() -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode("marketo:secret");
        format!("Basic {}", encoded)
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn submit_request(auth: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/calcFormula/submitAsyncAction")
            .header("content-type", "application/json");
        if auth {
            builder = builder.header("authorization", authorization());
        }
        builder.body(Body::from(r#"{"objectData": []}"#)).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app(stub(ActionResponse::Accepted))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::VERSION);
        assert_eq!(json["service"], "flowstep-gateway");
    }

    #[tokio::test]
    async fn test_submit_accepted_is_empty_202() {
        let action = stub(ActionResponse::Accepted);
        let response = app(action.clone()).oneshot(submit_request(true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(action.bodies.lock()[0], br#"{"objectData": []}"#.to_vec());
    }

    #[tokio::test]
    async fn test_submit_failures_are_500_with_error() {
        let response = app(stub(ActionResponse::DeliveryFailed {
            detail: "callback said no".into(),
        }))
        .oneshot(submit_request(true))
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "callback said no"}));

        let response = app(stub(ActionResponse::Fatal))
            .oneshot(submit_request(true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "server error"}));
    }

    #[tokio::test]
    async fn test_oversized_submit_is_a_fatal_json_error() {
        let action = stub(ActionResponse::Accepted);
        let app = app_router(
            AppState::new(Some(credentials()), "/nonexistent/icon.png")
                .with_max_body_bytes(1024)
                .with_action(action.clone()),
        );
        let oversized = format!(r#"{{"objectData": [], "pad": "{}"}}"#, "x".repeat(4096));
        let request = Request::builder()
            .method("POST")
            .uri("/calcFormula/submitAsyncAction")
            .header("content-type", "application/json")
            .header("authorization", authorization())
            .body(Body::from(oversized))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "server error"}));
        assert!(action.bodies.lock().is_empty());
        let rejections = action.rejections.lock();
        assert_eq!(rejections.len(), 1);
        assert!(rejections[0].starts_with("Unreadable batch request"));
    }

    #[tokio::test]
    async fn test_default_limit_admits_bodies_over_two_megabytes() {
        let action = stub(ActionResponse::Accepted);
        let large = format!(r#"{{"objectData": [], "pad": "{}"}}"#, "x".repeat(3 * 1024 * 1024));
        let request = Request::builder()
            .method("POST")
            .uri("/calcFormula/submitAsyncAction")
            .header("content-type", "application/json")
            .header("authorization", authorization())
            .body(Body::from(large))
            .unwrap();

        let response = app(action.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(action.bodies.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_gated_routes_require_credentials() {
        let action = stub(ActionResponse::Accepted);
        let response = app(action.clone()).oneshot(submit_request(false)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            "Basic realm=Workflow Pro Calculate Formula"
        );
        assert!(action.bodies.lock().is_empty());

        let response = app(action.clone())
            .oneshot(Request::builder().uri("/calcFormula/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(action)
            .oneshot(
                Request::builder()
                    .uri("/calcFormula/status")
                    .header("authorization", authorization())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_missing_credentials_configuration_fails_closed() {
        let app = app_router(
            AppState::new(None, "/nonexistent/icon.png").with_action(stub(ActionResponse::Accepted)),
        );
        let response = app.oneshot(submit_request(true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_service_definition_is_open() {
        let response = app(stub(ActionResponse::Accepted))
            .oneshot(
                Request::builder()
                    .uri("/calcFormula/getServiceDefinition")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["apiName"], "calc-formula");
        assert_eq!(json["callbackPayloadDef"]["userDrivenMapping"], true);
    }

    async fn picklist(body: &'static str) -> Response {
        app(stub(ActionResponse::Accepted))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/calcFormula/getPicklist")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_picklist_lookup() {
        let response = picklist(r#"{"name": " data_type "}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let submitted: Vec<&str> = json["choices"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["submittedValue"].as_str().unwrap())
            .collect();
        assert_eq!(submitted, vec!["int", "str", "bool", "float"]);

        let response = picklist(r#"{"name": ""}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Missing 'name' in request body"})
        );

        let response = picklist(r#"{"name": "colour"}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Unknown field name 'colour'"})
        );

        let response = picklist("not json").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_install_serves_openapi() {
        let response = app(stub(ActionResponse::Accepted))
            .oneshot(
                Request::builder()
                    .uri("/calcFormula/install")
                    .header("host", "gateway.example")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["openapi"], "3.0.0");
        assert_eq!(json["servers"][0]["url"], "https://gateway.example");
        assert!(json["paths"]["/calcFormula/submitAsyncAction"].is_object());
    }

    #[tokio::test]
    async fn test_icons() {
        let mut icon = tempfile::NamedTempFile::new().unwrap();
        icon.write_all(b"\x89PNG\r\n\x1a\nfake").unwrap();
        let path = icon.path().to_str().unwrap().to_string();

        for uri in ["/calcFormula/serviceIcon", "/calcFormula/brandIcon"] {
            let response = app_with(stub(ActionResponse::Accepted), &path)
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
            let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
            assert!(body.starts_with(b"\x89PNG"));
        }

        let response = app(stub(ActionResponse::Accepted))
            .oneshot(
                Request::builder()
                    .uri("/calcFormula/serviceIcon")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_action_is_404() {
        let response = app(stub(ActionResponse::Accepted))
            .oneshot(
                Request::builder()
                    .uri("/hearAbout/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
