use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use tracing::{debug, instrument, warn};

use super::model::{ApiErrorBody, BatchUpdateRequest, BatchUpdateResponse, UpdateRange, ValueRange};
use super::{a1_cell, a1_columns, CellWrite, Grid, TableBackend};
use crate::config::{Config, TableRef};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/";

/// Widest ledger range read in one call.
const READ_WIDTH: usize = 26;

/// One tab of a Google spreadsheet, accessed through the values API.
#[derive(Clone)]
pub struct SheetsTable {
    http: Client,
    base_url: Url,
    token: String,
    spreadsheet_id: String,
    tab: String,
}

impl fmt::Debug for SheetsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsTable")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("tab", &self.tab)
            .finish_non_exhaustive()
    }
}

impl SheetsTable {
    pub fn new(token: String, table: &TableRef) -> Result<Self> {
        let base_url = Url::parse(SHEETS_API_BASE).context("invalid Sheets base URL")?;
        Self::with_base_url(token, table, base_url)
    }

    pub fn with_base_url(token: String, table: &TableRef, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("creative-ledger/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
            spreadsheet_id: table.spreadsheet_id.clone(),
            tab: table.tab.clone(),
        })
    }

    pub fn from_config(cfg: &Config, table: &TableRef) -> Result<Self> {
        Self::new(cfg.google.access_token.clone(), table)
    }

    /// `spreadsheets/{id}/values/{range}{suffix}` with each path segment escaped.
    pub fn values_url(&self, range: &str, suffix: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets base URL cannot be a base"))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }

    fn batch_url(&self) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets base URL cannot be a base"))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .push("values:batchUpdate");
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let res = request
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("failed to reach Sheets API ({what})"))?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(what, "rate limited by Sheets API");
            return Err(anyhow!("received 429 from Sheets API during {what}: {body}"));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            warn!(what, %status, "Sheets API error");
            return Err(anyhow!("sheets error {status} during {what}: {message}"));
        }
        Ok(res)
    }
}

/// Body for a single-range RAW write.
pub fn build_update_body(range: &str, rows: Vec<Vec<String>>) -> Value {
    serde_json::json!({
        "range": range,
        "majorDimension": "ROWS",
        "values": rows,
    })
}

/// Body for `values:batchUpdate`: one range per cell.
pub fn build_batch_body(tab: &str, cells: &[CellWrite]) -> BatchUpdateRequest {
    BatchUpdateRequest {
        value_input_option: "RAW",
        data: cells
            .iter()
            .map(|c| UpdateRange {
                range: a1_cell(tab, c.row_number, c.column),
                major_dimension: "ROWS",
                values: vec![vec![c.value.clone()]],
            })
            .collect(),
    }
}

#[async_trait]
impl TableBackend for SheetsTable {
    fn describe(&self) -> String {
        format!("sheets:{}/{}", self.spreadsheet_id, self.tab)
    }

    #[instrument(skip_all)]
    async fn read_all(&self) -> Result<Grid> {
        let url = self.values_url(&a1_columns(&self.tab, READ_WIDTH), "")?;
        let res = self.send(self.http.get(url), "read").await?;
        let range: ValueRange = res.json().await.context("invalid Sheets values JSON")?;
        let mut rows = range.into_strings().into_iter();
        let header = rows.next().unwrap_or_default();
        Ok(Grid {
            header,
            rows: rows.collect(),
        })
    }

    #[instrument(skip_all)]
    async fn write_header(&self, header: &[String]) -> Result<()> {
        let range = a1_cell(&self.tab, 1, 0);
        let mut url = self.values_url(&range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = build_update_body(&range, vec![header.to_vec()]);
        self.send(self.http.put(url).json(&body), "write header").await?;
        debug!(columns = header.len(), "header written");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let range = a1_cell(&self.tab, 1, 0);
        let mut url = self.values_url(&range, ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = build_update_body(&range, rows.to_vec());
        self.send(self.http.post(url).json(&body), "append").await?;
        debug!(rows = rows.len(), "rows appended");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn batch_update(&self, cells: &[CellWrite]) -> Result<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let body = build_batch_body(&self.tab, cells);
        let res = self
            .send(self.http.post(self.batch_url()?).json(&body), "batch update")
            .await?;
        let summary: BatchUpdateResponse =
            res.json().await.context("invalid Sheets batchUpdate JSON")?;
        debug!(cells = cells.len(), updated = ?summary.total_updated_cells, "cells updated");
        Ok(())
    }
}
