//! Google Sheets ledger store.
//!
//! Rows are appended with the Sheets `values:append` API below the header row
//! (`{table}!A2`), raw values, inserting new rows. Each table is a sheet tab
//! of one spreadsheet. Appends go through a shared [`RequestThrottle`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{LedgerRow, RequestThrottle, Sink};
use crate::errors::SinkError;

/// Sheets-backed [`Sink`].
#[derive(Debug, Clone)]
pub struct SheetsSink {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: String,
    throttle: Arc<RequestThrottle>,
}

impl SheetsSink {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        access_token: impl Into<String>,
        throttle: Arc<RequestThrottle>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            spreadsheet_id: spreadsheet_id.into(),
            access_token: access_token.into(),
            throttle,
        }
    }

    /// `.../spreadsheets/{id}/values/{table}!A2:append`
    pub fn append_url(&self, table: &str) -> Result<reqwest::Url, SinkError> {
        if table.is_empty() || table.contains(['!', '\'', '/']) {
            return Err(SinkError::InvalidTable(table.to_string()));
        }
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SinkError::Unavailable(format!("invalid Sheets base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| SinkError::Unavailable("Sheets base URL cannot be a base".into()))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&format!("{}!A2:append", table));
        Ok(url)
    }
}

#[async_trait]
impl Sink for SheetsSink {
    async fn append(&self, table: &str, rows: &[LedgerRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = self.append_url(table)?;
        let values: Vec<Vec<String>> = rows.iter().map(LedgerRow::values).collect();
        let body = serde_json::json!({ "values": values });

        let _permit = self.throttle.acquire().await;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SinkError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let updated = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.pointer("/updates/updatedCells").and_then(Value::as_u64))
            .unwrap_or(0);
        log::debug!("{} cells updated in {}", updated, table);
        Ok(())
    }
}
