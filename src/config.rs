//! Gateway configuration read from environment variables.
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP port (default: 3000)
//! - `MARKETO_USER`, `MARKETO_PASSWORD`: basic-auth credentials for the
//!   gated routes. When either is missing every gated request is rejected.
//! - `OPENAI_API_KEY`, `OPENAI_BASE_URL`: completion backend
//! - `TELNYX_API_KEY`, `TELNYX_BASE_URL`: SMS backend
//! - `LEDGER_SPREADSHEET_ID`, `LEDGER_ACCESS_TOKEN`: Google Sheets ledger.
//!   The ledger is disabled unless both are set. `LEDGER_BASE_URL` overrides
//!   the Sheets API endpoint.
//! - `LEDGER_REQUESTS_PER_MINUTE`: ledger append ceiling (default: 60)
//! - `MUNCHKIN_ID`: `munchkinId` sent with every callback (default: "123")
//! - `CALLBACK_TIMEOUT_SECS`: callback delivery timeout (default: 10)
//! - `LEAD_URL_PREFIX`: prefix for lead links in ledger rows
//! - `ICON_PATH`: PNG served by the icon routes
//! - `LEDGER_AWAIT_WRITES`: when true, ledger writes finish before the
//!   response is returned (default: false)
//! - `MAX_BODY_BYTES`: largest accepted `submitAsyncAction` body
//!   (default: 32 MiB)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default Telnyx API base URL.
pub const DEFAULT_TELNYX_BASE_URL: &str = "https://api.telnyx.com/v2";
/// Default Google Sheets API base URL.
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";
/// Default ceiling on a `submitAsyncAction` body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
/// Default prefix used to turn a lead id into a clickable link.
pub const DEFAULT_LEAD_URL_PREFIX: &str =
    "https://app-ab20.marketo.com/leadDatabase/loadLeadDetail?leadId=";

/// Basic-auth credentials for the gated routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Google Sheets ledger settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub spreadsheet_id: String,
    pub access_token: String,
    pub base_url: String,
    pub requests_per_minute: u32,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub credentials: Option<BasicCredentials>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub telnyx_api_key: Option<String>,
    pub telnyx_base_url: String,
    /// `None` disables the spreadsheet ledger.
    pub ledger: Option<LedgerConfig>,
    pub munchkin_id: String,
    pub callback_timeout: Duration,
    pub lead_url_prefix: String,
    pub icon_path: PathBuf,
    pub await_ledger_writes: bool,
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            credentials: None,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            telnyx_api_key: None,
            telnyx_base_url: DEFAULT_TELNYX_BASE_URL.to_string(),
            ledger: None,
            munchkin_id: "123".to_string(),
            callback_timeout: Duration::from_secs(10),
            lead_url_prefix: DEFAULT_LEAD_URL_PREFIX.to_string(),
            icon_path: PathBuf::from("wfp_logo.png"),
            await_ledger_writes: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let credentials = match (get("MARKETO_USER"), get("MARKETO_PASSWORD")) {
            (Some(username), Some(password)) => Some(BasicCredentials { username, password }),
            _ => None,
        };

        let await_ledger_writes =
            parse_or("LEDGER_AWAIT_WRITES", get("LEDGER_AWAIT_WRITES"), false)?;

        let ledger = match (get("LEDGER_SPREADSHEET_ID"), get("LEDGER_ACCESS_TOKEN")) {
            (Some(spreadsheet_id), Some(access_token)) => Some(LedgerConfig {
                spreadsheet_id,
                access_token,
                base_url: get("LEDGER_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_SHEETS_BASE_URL.to_string()),
                requests_per_minute: parse_or(
                    "LEDGER_REQUESTS_PER_MINUTE",
                    get("LEDGER_REQUESTS_PER_MINUTE"),
                    60,
                )?,
            }),
            _ => None,
        };

        let timeout_secs: u64 = parse_or(
            "CALLBACK_TIMEOUT_SECS",
            get("CALLBACK_TIMEOUT_SECS"),
            defaults.callback_timeout.as_secs(),
        )?;

        Ok(Self {
            port: parse_or("PORT", get("PORT"), defaults.port)?,
            credentials,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            telnyx_api_key: get("TELNYX_API_KEY"),
            telnyx_base_url: get("TELNYX_BASE_URL").unwrap_or(defaults.telnyx_base_url),
            ledger,
            munchkin_id: get("MUNCHKIN_ID").unwrap_or(defaults.munchkin_id),
            callback_timeout: Duration::from_secs(timeout_secs),
            lead_url_prefix: get("LEAD_URL_PREFIX").unwrap_or(defaults.lead_url_prefix),
            icon_path: get("ICON_PATH").map(PathBuf::from).unwrap_or(defaults.icon_path),
            await_ledger_writes,
            max_body_bytes: parse_or("MAX_BODY_BYTES", get("MAX_BODY_BYTES"), defaults.max_body_bytes)?,
        })
    }

    /// Socket address string the server binds to.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                value: value.clone(),
                reason: e.to_string(),
            }),
    }
}
