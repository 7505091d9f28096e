pub mod challenge;
pub mod driver;
pub mod search;
pub mod session;

pub use challenge::{ChallengeDetector, ChallengeResolver, Resolution};
pub use driver::PageDriver;
pub use search::RankSearcher;
pub use session::{BrowserSession, SearchSession, SessionOptions};
