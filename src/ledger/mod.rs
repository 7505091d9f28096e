//! Spreadsheet-backed result ledger.
//!
//! Storage is external (a spreadsheet API or an in-memory grid), but all
//! bucket and consolidation policy lives here in [`ResultLedger`]. Sheet
//! layout: column B carries the product article on header rows, column C
//! the query on task rows, bucket columns start at D.

pub mod bucket;
pub mod memory;
pub mod sheets;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::core::types::{SearchResult, SearchTask, TaskStatus};

pub use memory::MemorySheet;
pub use sheets::GoogleSheetsClient;

/// First column that may hold a bucket (column D); new hourly buckets are
/// inserted here, right after the query column.
pub const FIRST_BUCKET_COL: u32 = 4;

/// One data row as the storage backend sees it: 1-based sheet row plus the
/// article and query cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub index: u32,
    pub target: String,
    pub query: String,
}

/// Storage backend seam. Implemented by [`GoogleSheetsClient`] and by
/// [`MemorySheet`] for dry runs and tests. Columns and rows are 1-based.
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// Data rows (sheet row 2 down), in sheet order.
    async fn rows(&self) -> Result<Vec<SheetRow>>;
    /// Sheet row 1, where bucket headers live.
    async fn header_row(&self) -> Result<Vec<String>>;
    /// Full column including its header; index 0 = sheet row 1.
    async fn read_column(&self, col: u32) -> Result<Vec<String>>;
    /// Insert an empty column at `col`, shifting existing columns right.
    async fn insert_column(&self, col: u32) -> Result<()>;
    async fn delete_column(&self, col: u32) -> Result<()>;
    async fn write_cell(&self, row: u32, col: u32, value: &str) -> Result<()>;
    /// Background highlight marking a found position.
    async fn highlight_cell(&self, row: u32, col: u32) -> Result<()>;
}

/// The bucket column chosen for the current run.
#[derive(Debug, Clone)]
pub struct BucketHandle {
    pub column: u32,
    pub resumed: bool,
    filled: HashSet<u32>,
}

impl BucketHandle {
    /// Whether `row` still needs a result this run. Filled cells are left
    /// untouched so re-runs are idempotent.
    pub fn needs(&self, row: u32) -> bool {
        !self.filled.contains(&row)
    }
}

pub struct ResultLedger {
    client: Arc<dyn SheetClient>,
    ceiling: u32,
}

impl ResultLedger {
    pub fn new(client: Arc<dyn SheetClient>, ceiling: u32) -> Self {
        Self { client, ceiling }
    }

    pub fn client(&self) -> Arc<dyn SheetClient> {
        self.client.clone()
    }

    /// Parse tasks from the sheet. A row whose article cell is non-empty is
    /// a header row: it sets the target id for the task rows below it and
    /// is not itself a task.
    pub async fn load_tasks(&self) -> Result<Vec<SearchTask>> {
        let mut tasks = Vec::new();
        let mut current_target: Option<String> = None;

        for row in self.client.rows().await? {
            let target = row.target.trim();
            if !target.is_empty() {
                current_target = Some(target.to_string());
                continue;
            }
            let query = row.query.trim();
            if query.is_empty() {
                continue;
            }
            let Some(target_id) = current_target.clone() else {
                warn!("row {} has a query but no preceding article row, skipped", row.index);
                continue;
            };
            tasks.push(SearchTask {
                row: row.index,
                target_id,
                query: query.to_string(),
            });
        }

        info!("loaded {} tasks from sheet", tasks.len());
        Ok(tasks)
    }

    /// Pick or create the bucket column for this run: resume the current
    /// hour's column if it exists (writing only unfilled cells), otherwise
    /// insert a fresh hourly column at the bucket position.
    pub async fn prepare_bucket(&self, now: DateTime<Local>) -> Result<BucketHandle> {
        let label = bucket::hourly_label(&now);
        let headers = self.client.header_row().await?;

        if let Some(idx0) = headers.iter().position(|h| h.trim() == label) {
            let column = idx0 as u32 + 1;
            let values = self.client.read_column(column).await?;
            let filled: HashSet<u32> = values
                .iter()
                .enumerate()
                .skip(1) // header
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(i, _)| i as u32 + 1)
                .collect();
            info!(
                "resuming bucket '{label}' (column {column}, {} cells already filled)",
                filled.len()
            );
            return Ok(BucketHandle {
                column,
                resumed: true,
                filled,
            });
        }

        self.client.insert_column(FIRST_BUCKET_COL).await?;
        self.client.write_cell(1, FIRST_BUCKET_COL, &label).await?;
        info!("created bucket '{label}' at column {FIRST_BUCKET_COL}");
        Ok(BucketHandle {
            column: FIRST_BUCKET_COL,
            resumed: false,
            filled: HashSet::new(),
        })
    }

    /// Write one task's terminal status into the bucket column.
    pub async fn record(&self, result: &SearchResult, column: u32) -> Result<()> {
        let value = result.status.cell_value(self.ceiling);
        self.client
            .write_cell(result.task.row, column, &value)
            .await?;
        if matches!(result.status, TaskStatus::Found(_)) {
            self.client.highlight_cell(result.task.row, column).await?;
        }
        debug!("row {} <- '{value}'", result.task.row);
        Ok(())
    }

    /// Collapse all of `date`'s hourly buckets into one daily bucket.
    ///
    /// One hourly bucket is renamed in place; two or more are averaged per
    /// row (rounded mean, sentinel treated as the ceiling). A date that only
    /// has a daily bucket is left untouched, so re-runs are no-ops.
    pub async fn consolidate(&self, date: &str) -> Result<()> {
        let headers = self.client.header_row().await?;
        let hourly: Vec<u32> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| {
                bucket::parse_label(h)
                    .filter(|b| b.date == date && b.hour.is_some())
                    .map(|_| i as u32 + 1)
            })
            .collect();

        match hourly.len() {
            0 => {
                debug!("no hourly buckets for {date}, nothing to consolidate");
                Ok(())
            }
            1 => {
                info!("single hourly bucket for {date}, renaming to daily");
                self.client.write_cell(1, hourly[0], date).await
            }
            n => {
                info!("consolidating {n} hourly buckets for {date}");
                let mut columns = Vec::with_capacity(n);
                for &col in &hourly {
                    columns.push(self.client.read_column(col).await?);
                }
                let row_count = columns.iter().map(Vec::len).max().unwrap_or(0) as u32;

                let daily_col = hourly[0];
                self.client.insert_column(daily_col).await?;
                self.client.write_cell(1, daily_col, date).await?;
                for row in 2..=row_count {
                    let cells: Vec<String> = columns
                        .iter()
                        .map(|c| c.get(row as usize - 1).cloned().unwrap_or_default())
                        .collect();
                    let value = bucket::consolidate_row(&cells, self.ceiling);
                    if !value.is_empty() {
                        self.client.write_cell(row, daily_col, &value).await?;
                    }
                }

                // Source columns sit one further right after the insert;
                // delete right-to-left so earlier indices stay valid.
                for &col in hourly.iter().rev() {
                    self.client.delete_column(col + 1).await?;
                }
                Ok(())
            }
        }
    }
}
