//! Position search over a paginated / infinite-scroll result listing.
//!
//! The searcher walks the listing, deduplicates product ids in first-seen
//! order, and reports the target's exact 1-based rank among unique items.
//! All terminal states are values ([`SearchOutcome`]), never errors.

use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::config::SearchConfigSection;
use crate::core::error::DriverError;
use crate::core::types::{Classification, ListingMode, SearchOutcome, SearchTask};
use crate::scraping::challenge::{ChallengeDetector, ChallengeResolver, Resolution};
use crate::scraping::driver::PageDriver;

/// Anchor that identifies a product card; also the readiness probe.
const PRODUCT_LINK_SELECTOR: &str = "a[href*='/product/']";

/// Readiness: how long we poll for product cards after navigation.
const PRODUCTS_WAIT: Duration = Duration::from_secs(15);
/// Thin-body handling: a JS interstitial renders a near-empty shell first.
const THIN_BODY_THRESHOLD: usize = 5_000;
const GROWN_BODY_THRESHOLD: usize = 10_000;
const THIN_BODY_POLLS: u32 = 30;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Extract product ids from the current DOM, skipping ids already seen.
///
/// Id = trailing digit run of the product slug. Review/question deep links
/// reuse the slug and are skipped so one card never counts twice.
fn extract_js(seen_json: &str) -> String {
    format!(
        r#"
(() => {{
    const seen = new Set({seen_json});
    const out = [];
    for (const a of document.querySelectorAll("a[href*='/product/']")) {{
        const href = a.getAttribute('href') || '';
        if (href.includes('/reviews') || href.includes('/questions')) continue;
        const m = href.match(/\/product\/([^\/?#]+)/);
        if (!m) continue;
        const tail = m[1].split('-').pop();
        if (!/^\d+$/.test(tail)) continue;
        if (seen.has(tail)) continue;
        seen.add(tail);
        out.push(tail);
    }}
    return out;
}})()
"#
    )
}

const HEIGHT_JS: &str = "document.body ? document.body.scrollHeight : 0";
const BODY_SIZE_JS: &str = "document.body ? document.body.innerHTML.length : 0";

pub struct RankSearcher {
    detector: Arc<ChallengeDetector>,
    resolver: Arc<ChallengeResolver>,
    clock: Arc<dyn Clock>,
    config: SearchConfigSection,
}

impl RankSearcher {
    pub fn new(
        detector: Arc<ChallengeDetector>,
        resolver: Arc<ChallengeResolver>,
        clock: Arc<dyn Clock>,
        config: SearchConfigSection,
    ) -> Self {
        Self {
            detector,
            resolver,
            clock,
            config,
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search/?text={}",
            self.config.base_url.trim_end_matches('/'),
            utf8_percent_encode(query, NON_ALPHANUMERIC)
        )
    }

    fn page_url(&self, query: &str, page: u32) -> String {
        format!("{}&page={page}", self.search_url(query))
    }

    /// Run one search to a terminal outcome. Only driver failures escape as
    /// errors; every content-level result is an outcome value.
    pub async fn find_position(
        &self,
        driver: &dyn PageDriver,
        task: &SearchTask,
    ) -> Result<SearchOutcome, DriverError> {
        let url = self.search_url(&task.query);
        info!(row = task.row, query = %task.query, "searching for {}", task.target_id);

        self.navigate_tolerant(driver, &url).await?;
        if let Some(abort) = self.ensure_ready(driver).await? {
            return Ok(abort);
        }

        let ceiling = self.config.max_position as usize;
        let mut mode = self.config.listing_mode;
        let mut seen: Vec<String> = Vec::with_capacity(ceiling.min(1024));
        let mut page = 1u32;
        let mut advances = 0u32;
        let mut empty_streak = 0u32;
        let mut grew_during_streak = false;
        // Height snapshot taken just before each advance; compared against
        // the height observed after it to tell a stalled page from a dead
        // end that simply has no more items.
        let mut height_before_advance = 0u64;

        loop {
            let batch = self.extract_new_ids(driver, &seen, ceiling).await?;
            let batch_len = batch.len();
            debug!(
                row = task.row,
                "batch of {batch_len} new ids after {advances} advances ({} total)",
                seen.len() + batch_len
            );

            for id in batch {
                let is_target = id == task.target_id;
                seen.push(id);
                if is_target {
                    let position = seen.len() as u32;
                    info!(row = task.row, "found {} at position {position}", task.target_id);
                    return Ok(SearchOutcome::Found(position));
                }
                if seen.len() >= ceiling {
                    info!(
                        row = task.row,
                        "scanned {ceiling} unique items without finding {}", task.target_id
                    );
                    return Ok(SearchOutcome::NotFound);
                }
            }

            // This batch reflects the previous advance; judge that advance.
            if advances > 0 {
                if batch_len == 0 {
                    // A scroll listing answering the very first advance with
                    // nothing new is almost always server-side paginated.
                    if mode == ListingMode::Auto && advances == 1 {
                        debug!(
                            row = task.row,
                            "first scroll yielded nothing, switching to pagination"
                        );
                        mode = ListingMode::Paginate;
                    } else {
                        empty_streak += 1;
                        let height = self.page_height(driver).await?;
                        if height > height_before_advance {
                            grew_during_streak = true;
                        }
                        if empty_streak > self.config.empty_advance_limit {
                            return if grew_during_streak {
                                warn!(
                                    row = task.row,
                                    "listing stalled while still growing after {} items",
                                    seen.len()
                                );
                                Ok(SearchOutcome::Incomplete)
                            } else {
                                info!(
                                    row = task.row,
                                    "listing ended at {} items, {} not present",
                                    seen.len(),
                                    task.target_id
                                );
                                Ok(SearchOutcome::NotFound)
                            };
                        }
                    }
                } else {
                    empty_streak = 0;
                    grew_during_streak = false;
                }
            }

            // Advance the listing.
            height_before_advance = self.page_height(driver).await?;
            match mode {
                ListingMode::Paginate => {
                    page += 1;
                    self.navigate_tolerant(driver, &self.page_url(&task.query, page))
                        .await?;
                    if let Some(abort) = self.ensure_ready(driver).await? {
                        return Ok(abort);
                    }
                }
                ListingMode::Auto | ListingMode::Scroll => {
                    // Draw both jitters before awaiting; ThreadRng is !Send
                    // and must not live across a suspension point.
                    let step = rand::rng().random_range(650..950);
                    let pause = rand::rng().random_range(700..1200);
                    driver.scroll_by(step).await?;
                    self.clock.sleep(Duration::from_millis(pause)).await;
                    if self.detector.classify(driver).await? != Classification::Normal {
                        if let Some(abort) = self.ensure_ready(driver).await? {
                            return Ok(abort);
                        }
                    }
                }
            }
            advances += 1;
        }
    }

    /// Navigate, tolerating a navigation timeout: heavy listings often keep
    /// a subresource pending long after the cards are in the DOM. Readiness
    /// is judged afterwards by `ensure_ready`.
    async fn navigate_tolerant(
        &self,
        driver: &dyn PageDriver,
        url: &str,
    ) -> Result<(), DriverError> {
        match driver.navigate(url).await {
            Ok(()) => Ok(()),
            Err(DriverError::Timeout(msg)) => {
                debug!("navigation timeout tolerated for {url}: {msg}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Bring the page to a scannable state: clear challenges, wait out a
    /// thin JS-interstitial body, then wait for product cards.
    ///
    /// `Some(outcome)` means the run must abort with that outcome.
    async fn ensure_ready(
        &self,
        driver: &dyn PageDriver,
    ) -> Result<Option<SearchOutcome>, DriverError> {
        let classification = self.detector.classify(driver).await?;
        if classification != Classification::Normal {
            match self.resolver.resolve(driver, classification).await? {
                // TimedOut = captcha window expired; scan best-effort anyway.
                Resolution::Resolved | Resolution::TimedOut => {}
                Resolution::Unresolved => return Ok(Some(SearchOutcome::BlockedAbort)),
            }
        }

        self.wait_out_thin_body(driver).await?;

        let deadline = PRODUCTS_WAIT.as_millis() / POLL_INTERVAL.as_millis();
        for _ in 0..deadline {
            match driver.query_text(PRODUCT_LINK_SELECTOR).await? {
                Some(_) => return Ok(None),
                None => self.clock.sleep(POLL_INTERVAL).await,
            }
        }
        warn!("no product cards appeared within {PRODUCTS_WAIT:?}");
        Ok(None)
    }

    /// JS challenge pages first render a near-empty shell; give the real
    /// document time to replace it before scanning.
    async fn wait_out_thin_body(&self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        let size = self.body_size(driver).await?;
        if size >= THIN_BODY_THRESHOLD {
            return Ok(());
        }
        debug!("thin body ({size} chars), waiting for document to settle");
        for _ in 0..THIN_BODY_POLLS {
            self.clock.sleep(POLL_INTERVAL).await;
            if self.body_size(driver).await? > GROWN_BODY_THRESHOLD {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn body_size(&self, driver: &dyn PageDriver) -> Result<usize, DriverError> {
        Ok(driver
            .evaluate(BODY_SIZE_JS)
            .await?
            .as_u64()
            .unwrap_or(0) as usize)
    }

    async fn page_height(&self, driver: &dyn PageDriver) -> Result<u64, DriverError> {
        Ok(driver.evaluate(HEIGHT_JS).await?.as_u64().unwrap_or(0))
    }

    async fn extract_new_ids(
        &self,
        driver: &dyn PageDriver,
        seen: &[String],
        ceiling: usize,
    ) -> Result<Vec<String>, DriverError> {
        let seen_json = serde_json::to_string(seen)
            .map_err(|e| DriverError::Eval(format!("seen-list serialization: {e}")))?;
        let value = driver.evaluate(&extract_js(&seen_json)).await?;
        let mut out = Vec::new();
        if let Value::Array(items) = value {
            let room = ceiling.saturating_sub(seen.len());
            for item in items.into_iter().take(room) {
                if let Value::String(id) = item {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }
}
