use serde::{Deserialize, Serialize};

/// One search task parsed from the ledger sheet. Immutable once enqueued.
///
/// `row` is the 1-based sheet row the result is written back to and doubles
/// as the task id. `target_id` is inherited from the nearest preceding
/// header row (the row carrying the product article).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTask {
    pub row: u32,
    pub target_id: String,
    pub query: String,
}

/// Page classification produced by the challenge detector.
///
/// Recomputed on every poll; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Normal,
    Captcha,
    Blocked,
}

/// Outcome of one `RankSearcher` run.
///
/// `BlockedAbort` is a value, not an error: it tells the scheduler the
/// session fingerprint is burned and a restart is needed before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Exact 1-based rank of the target among deduplicated items.
    Found(u32),
    /// The full position ceiling was scanned without a match.
    NotFound,
    /// The listing ended before the ceiling was reached while the page was
    /// still growing — a scraping failure rather than a genuine end.
    Incomplete,
    /// A block page could not be cleared within the resolver's bound.
    BlockedAbort,
}

/// Terminal status recorded in the ledger for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Found(u32),
    NotFound,
    Incomplete,
    Error(String),
}

impl TaskStatus {
    /// Cell value written into the ledger bucket column.
    ///
    /// `NotFound` uses the ceiling sentinel (e.g. "1000+") so the
    /// consolidation mean can treat it as the ceiling value.
    pub fn cell_value(&self, ceiling: u32) -> String {
        match self {
            TaskStatus::Found(pos) => pos.to_string(),
            TaskStatus::NotFound => format!("{ceiling}+"),
            TaskStatus::Incomplete => "-1".to_string(),
            TaskStatus::Error(_) => "err".to_string(),
        }
    }
}

/// One (task, status) pair produced by the scheduler.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub task: SearchTask,
    pub status: TaskStatus,
}

/// How the result listing is advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    /// Start in scroll mode; switch to pagination if the first scroll
    /// yields zero new items (heuristic, see RankSearcher).
    #[default]
    Auto,
    Scroll,
    Paginate,
}
