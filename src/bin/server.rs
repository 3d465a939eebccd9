//! flowstep-gateway HTTP server binary.
//!
//! Mounts the formula, completion and SMS actions behind one axum server.
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP port (default: 3000)
//! - `MARKETO_USER`, `MARKETO_PASSWORD`: Basic-auth credentials for the
//!   gated routes; when unset every gated call is refused
//! - `OPENAI_API_KEY`, `OPENAI_BASE_URL`: completion backend
//! - `TELNYX_API_KEY`, `TELNYX_BASE_URL`: SMS backend
//! - `LEDGER_SPREADSHEET_ID`, `LEDGER_ACCESS_TOKEN`: enable the spreadsheet
//!   ledger (`LEDGER_BASE_URL`, `LEDGER_REQUESTS_PER_MINUTE`,
//!   `LEDGER_AWAIT_WRITES` tune it)
//! - `MUNCHKIN_ID`, `CALLBACK_TIMEOUT_SECS`, `LEAD_URL_PREFIX`, `ICON_PATH`,
//!   `MAX_BODY_BYTES`
//! - `RUST_LOG`: tracing filter (default: "info,flowstep_gateway=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use anyhow::Context;
use flowstep_gateway::callback::{CallbackClient, HttpCallbackClient};
use flowstep_gateway::config::GatewayConfig;
use flowstep_gateway::orchestrator::{Action, Orchestrator, OrchestratorSettings};
use flowstep_gateway::processors::completion::{CompletionProcessor, OpenAiChatBackend};
use flowstep_gateway::processors::formula::FormulaProcessor;
use flowstep_gateway::processors::sms::{SmsProcessor, TelnyxBackend};
use flowstep_gateway::server::{app_router, AppState};
use flowstep_gateway::sink::{DisabledSink, RequestThrottle, SheetsSink, Sink};

fn build_sink(config: &GatewayConfig) -> anyhow::Result<Arc<dyn Sink>> {
    let ledger = match &config.ledger {
        Some(ledger) => ledger,
        None => {
            tracing::warn!("LEDGER_SPREADSHEET_ID/LEDGER_ACCESS_TOKEN not set; ledger disabled");
            return Ok(Arc::new(DisabledSink));
        }
    };

    // One throttle for every action: the store's quota is per process.
    let throttle = Arc::new(RequestThrottle::per_minute(ledger.requests_per_minute));
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("building ledger HTTP client")?;

    tracing::info!(
        "Ledger: spreadsheet {} at {} ({} req/min)",
        ledger.spreadsheet_id,
        ledger.base_url,
        ledger.requests_per_minute
    );
    Ok(Arc::new(SheetsSink::new(
        client,
        ledger.base_url.clone(),
        ledger.spreadsheet_id.clone(),
        ledger.access_token.clone(),
        throttle,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowstep_gateway=debug".into()),
        )
        .init();

    let config = GatewayConfig::from_env().context("reading configuration")?;
    let bind_addr = config.bind_addr();

    if config.credentials.is_none() {
        tracing::warn!("MARKETO_USER/MARKETO_PASSWORD not set; gated routes will refuse all calls");
    }

    let sink = build_sink(&config)?;
    let callback: Arc<dyn CallbackClient> = Arc::new(
        HttpCallbackClient::new(config.callback_timeout).context("building callback client")?,
    );
    let settings = OrchestratorSettings::from(&config);

    let completion_backend =
        OpenAiChatBackend::new(config.openai_api_key.clone(), config.openai_base_url.clone())
            .context("building OpenAI client")?;
    let sms_backend = TelnyxBackend::new(config.telnyx_api_key.clone(), config.telnyx_base_url.clone())
        .context("building Telnyx client")?;

    let actions: Vec<Arc<dyn Action>> = vec![
        Arc::new(Orchestrator::new(
            FormulaProcessor::new(),
            Arc::clone(&callback),
            Arc::clone(&sink),
            settings.clone(),
        )),
        Arc::new(Orchestrator::new(
            CompletionProcessor::new(Arc::new(completion_backend)),
            Arc::clone(&callback),
            Arc::clone(&sink),
            settings.clone(),
        )),
        Arc::new(Orchestrator::new(
            SmsProcessor::new(Arc::new(sms_backend)),
            callback,
            sink,
            settings,
        )),
    ];

    let mut state = AppState::new(config.credentials.clone(), config.icon_path.clone())
        .with_max_body_bytes(config.max_body_bytes);
    for action in actions {
        tracing::info!("  /{}/submitAsyncAction", action.manifest().base);
        state = state.with_action(action);
    }
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    tracing::info!("flowstep-gateway {} listening on {}", flowstep_gateway::VERSION, bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("server failed")?;

    Ok(())
}
