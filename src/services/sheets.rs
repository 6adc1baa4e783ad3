use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::models::{Column, COLUMN_COUNT};
use crate::db::repository::{SheetRow, SheetTable};
use crate::error::{AppError, AppResult};
use crate::services::google_auth::GoogleAuth;

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// First data row; row 1 holds the header.
const FIRST_DATA_ROW: usize = 2;

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct CellUpdate {
    range: String,
    values: Vec<Vec<String>>,
}

/// Retry on network errors, 429 and 5xx with exponential backoff.
///
/// Other statuses are returned to the caller untouched.
async fn send_with_backoff<F>(make_request: F) -> AppResult<Response>
where
    F: Fn() -> RequestBuilder,
{
    const MAX_RETRIES: usize = 4;
    let mut backoff_secs: u64 = 1;
    let max_backoff_secs: u64 = 16;

    for attempt in 0..MAX_RETRIES {
        let last = attempt + 1 >= MAX_RETRIES;
        match make_request().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status != reqwest::StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                    return Ok(resp);
                }
                if last {
                    let err_text = resp.text().await.unwrap_or_default();
                    return Err(AppError::StoreUnavailable(format!(
                        "sheets request failed after {} attempts ({}): {}",
                        attempt + 1,
                        status,
                        err_text
                    )));
                }

                let wait_secs = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map_or(backoff_secs, |secs| secs.min(max_backoff_secs));
                tracing::warn!(
                    "Transient Sheets API error (status: {}). Retrying in {}s (attempt {}/{})",
                    status,
                    wait_secs,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
            }
            Err(e) => {
                if last {
                    return Err(AppError::StoreUnavailable(format!("sheets request failed: {}", e)));
                }
                tracing::warn!(
                    "Sheets API request failed: {}. Retrying in {}s (attempt {}/{})",
                    e,
                    backoff_secs,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }
        }
        backoff_secs = std::cmp::min(backoff_secs * 2, max_backoff_secs);
    }

    Err(AppError::StoreUnavailable(
        "exceeded Sheets API retry attempts".to_string(),
    ))
}

/// Booking table stored in one worksheet of a Google spreadsheet.
pub struct GoogleSheetsTable {
    http: Client,
    auth: GoogleAuth,
    spreadsheet_id: String,
    worksheet: String,
}

impl GoogleSheetsTable {
    pub fn new(http: Client, auth: GoogleAuth, spreadsheet_id: String, worksheet: String) -> Self {
        Self {
            http,
            auth,
            spreadsheet_id,
            worksheet,
        }
    }

    /// Send an authorized request with transient failures retried.
    async fn send<F>(&self, make_request: F) -> AppResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self
            .auth
            .access_token(&[SHEETS_SCOPE], AppError::StoreUnavailable)
            .await?;
        send_with_backoff(|| make_request(&self.http).bearer_auth(&token)).await
    }

    /// A1 range inside the worksheet, e.g. `'График'!A2:L`.
    fn range(&self, cells: &str) -> String {
        a1_range(&self.worksheet, cells)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            SHEETS_API_URL,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    async fn get_values(&self, range: &str) -> AppResult<ValueRange> {
        let url = self.values_url(range);
        let response = self
            .send(|client| client.get(&url).query(&[("majorDimension", "ROWS")]))
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::StoreUnavailable(format!(
                "sheets read {} failed ({}): {}",
                range, status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("failed to parse sheet values: {}", e)))
    }
}

/// Quote a worksheet name for A1 notation; embedded quotes are doubled.
fn a1_range(worksheet: &str, cells: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), cells)
}

fn last_column() -> char {
    Column::ALL[COLUMN_COUNT - 1].letter()
}

#[async_trait]
impl SheetTable for GoogleSheetsTable {
    async fn read_rows(&self) -> AppResult<Vec<SheetRow>> {
        let range = self.range(&format!("A{}:{}", FIRST_DATA_ROW, last_column()));
        let values = self.get_values(&range).await?;

        Ok(values
            .values
            .into_iter()
            .enumerate()
            .map(|(i, cells)| SheetRow {
                number: FIRST_DATA_ROW + i,
                cells,
            })
            .collect())
    }

    async fn read_row(&self, number: usize) -> AppResult<Option<SheetRow>> {
        if number < FIRST_DATA_ROW {
            return Ok(None);
        }
        let range = self.range(&format!("A{n}:{c}{n}", n = number, c = last_column()));
        let values = self.get_values(&range).await?;

        Ok(values
            .values
            .into_iter()
            .next()
            .map(|cells| SheetRow { number, cells }))
    }

    async fn write_cells(&self, number: usize, cells: &[(Column, String)]) -> AppResult<()> {
        if cells.is_empty() {
            return Ok(());
        }

        let data: Vec<CellUpdate> = cells
            .iter()
            .map(|(column, value)| CellUpdate {
                range: self.range(&format!("{}{}", column.letter(), number)),
                values: vec![vec![value.clone()]],
            })
            .collect();
        let body = json!({ "valueInputOption": "RAW", "data": data });
        let url = format!("{}/{}/values:batchUpdate", SHEETS_API_URL, self.spreadsheet_id);

        let response = self.send(|client| client.post(&url).json(&body)).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::StoreUnavailable(format!(
                "sheets write to row {} failed ({}): {}",
                number, status, error_text
            )));
        }

        tracing::debug!("Wrote {} cells to sheet row {}", cells.len(), number);
        Ok(())
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let range = self.range(&format!("A1:{}", last_column()));
        let url = format!("{}:append", self.values_url(&range));
        let body = json!({ "values": rows });

        let response = self
            .send(|client| {
                client
                    .post(&url)
                    .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
                    .json(&body)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::StoreUnavailable(format!(
                "sheets append failed ({}): {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worksheet_names_are_quoted() {
        assert_eq!(a1_range("График", "A2:L"), "'График'!A2:L");
        assert_eq!(a1_range("Bob's", "C5"), "'Bob''s'!C5");
    }

    #[test]
    fn last_column_matches_row_layout() {
        assert_eq!(last_column(), 'L');
    }

    #[test]
    fn missing_values_decode_as_empty() {
        let parsed: ValueRange = serde_json::from_str(r#"{"range":"'x'!A2:L","majorDimension":"ROWS"}"#).unwrap();
        assert!(parsed.values.is_empty());
    }
}
