pub mod core;
pub mod features;
pub mod ledger;
pub mod scheduler;
pub mod scraping;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::AppState;
pub use ledger::{ResultLedger, SheetClient};
pub use scheduler::TaskScheduler;
pub use scraping::{BrowserSession, PageDriver, RankSearcher, SearchSession};
