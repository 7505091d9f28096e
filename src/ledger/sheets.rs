//! Google Sheets REST (v4) backend.
//!
//! Auth is a pre-issued OAuth bearer token from config or `SHEETS_API_TOKEN`;
//! token refresh is out of scope and handled by the operator's environment.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{SheetClient, SheetRow};

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub struct GoogleSheetsClient {
    http: reqwest::Client,
    token: String,
    spreadsheet_id: String,
    worksheet: String,
    /// Numeric sheet id, required by structural batchUpdate requests.
    sheet_id: i64,
}

impl GoogleSheetsClient {
    /// Resolve the worksheet's numeric id and return a ready client.
    pub async fn connect(
        spreadsheet_id: String,
        worksheet: String,
        token: String,
    ) -> Result<Self> {
        let http = reqwest::Client::new();
        let meta: Value = http
            .get(format!("{API_BASE}/{spreadsheet_id}"))
            .query(&[("fields", "sheets.properties")])
            .bearer_auth(&token)
            .send()
            .await
            .context("spreadsheet metadata request failed")?
            .error_for_status()
            .context("spreadsheet metadata request rejected")?
            .json()
            .await
            .context("spreadsheet metadata parse failed")?;

        let sheet_id = meta["sheets"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|s| s["properties"]["title"].as_str() == Some(worksheet.as_str()))
            .and_then(|s| s["properties"]["sheetId"].as_i64())
            .ok_or_else(|| anyhow!("worksheet '{worksheet}' not found in spreadsheet"))?;

        debug!("connected to worksheet '{worksheet}' (sheet id {sheet_id})");
        Ok(Self {
            http,
            token,
            spreadsheet_id,
            worksheet,
            sheet_id,
        })
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = format!(
            "{API_BASE}/{}/values/{}!{range}",
            self.spreadsheet_id, self.worksheet
        );
        let body: Value = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("values read failed for {range}"))?
            .error_for_status()
            .with_context(|| format!("values read rejected for {range}"))?
            .json()
            .await?;

        let rows = body["values"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .into_iter()
                            .flatten()
                            .map(|c| c.as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn batch_update(&self, requests: Value) -> Result<()> {
        let url = format!("{API_BASE}/{}:batchUpdate", self.spreadsheet_id);
        self.http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .context("batchUpdate request failed")?
            .error_for_status()
            .context("batchUpdate rejected")?;
        Ok(())
    }

    fn column_range(&self, col: u32) -> Value {
        json!({
            "sheetId": self.sheet_id,
            "dimension": "COLUMNS",
            "startIndex": col - 1,
            "endIndex": col,
        })
    }
}

/// 1-based column index to A1 letters (1 -> A, 27 -> AA).
fn column_letter(mut col: u32) -> String {
    let mut out = String::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.insert(0, (b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    out
}

#[async_trait]
impl SheetClient for GoogleSheetsClient {
    async fn rows(&self) -> Result<Vec<SheetRow>> {
        let values = self.get_values("A2:C").await?;
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(i, row)| SheetRow {
                index: i as u32 + 2,
                target: row.get(1).cloned().unwrap_or_default(),
                query: row.get(2).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn header_row(&self) -> Result<Vec<String>> {
        let values = self.get_values("1:1").await?;
        Ok(values.into_iter().next().unwrap_or_default())
    }

    async fn read_column(&self, col: u32) -> Result<Vec<String>> {
        let letter = column_letter(col);
        let values = self.get_values(&format!("{letter}1:{letter}")).await?;
        Ok(values
            .into_iter()
            .map(|row| row.into_iter().next().unwrap_or_default())
            .collect())
    }

    async fn insert_column(&self, col: u32) -> Result<()> {
        self.batch_update(json!([{
            "insertDimension": {
                "range": self.column_range(col),
                "inheritFromBefore": false,
            }
        }]))
        .await
    }

    async fn delete_column(&self, col: u32) -> Result<()> {
        self.batch_update(json!([{
            "deleteDimension": { "range": self.column_range(col) }
        }]))
        .await
    }

    async fn write_cell(&self, row: u32, col: u32, value: &str) -> Result<()> {
        let a1 = format!("{}{row}", column_letter(col));
        let url = format!(
            "{API_BASE}/{}/values/{}!{a1}",
            self.spreadsheet_id, self.worksheet
        );
        self.http
            .put(&url)
            .bearer_auth(&self.token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": [[value]] }))
            .send()
            .await
            .with_context(|| format!("cell write failed at {a1}"))?
            .error_for_status()
            .with_context(|| format!("cell write rejected at {a1}"))?;
        Ok(())
    }

    async fn highlight_cell(&self, row: u32, col: u32) -> Result<()> {
        self.batch_update(json!([{
            "repeatCell": {
                "range": {
                    "sheetId": self.sheet_id,
                    "startRowIndex": row - 1,
                    "endRowIndex": row,
                    "startColumnIndex": col - 1,
                    "endColumnIndex": col,
                },
                "cell": {
                    "userEnteredFormat": {
                        "backgroundColor": { "red": 0.72, "green": 0.88, "blue": 0.70 }
                    }
                },
                "fields": "userEnteredFormat.backgroundColor",
            }
        }]))
        .await
    }
}

impl std::fmt::Debug for GoogleSheetsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSheetsClient")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("worksheet", &self.worksheet)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::column_letter;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(4), "D");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(53), "BA");
    }
}
