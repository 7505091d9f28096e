//! End-to-end engine tests over scripted drivers and an in-memory sheet.
//!
//! No browser, no network: the driver seam is scripted per query, the clock
//! sleeps instantly, and ledger writes land in a `MemorySheet` grid.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use serde_json::{json, Value};
use tokio::sync::watch;

use rankwatch::core::clock::Clock;
use rankwatch::core::config::{SchedulerConfigSection, SearchConfigSection};
use rankwatch::core::error::DriverError;
use rankwatch::core::types::{ListingMode, SearchOutcome, SearchTask, TaskStatus};
use rankwatch::ledger::{MemorySheet, ResultLedger};
use rankwatch::scheduler::TaskScheduler;
use rankwatch::scraping::challenge::{ChallengeDetector, ChallengeResolver};
use rankwatch::scraping::driver::PageDriver;
use rankwatch::scraping::search::RankSearcher;
use rankwatch::scraping::session::SearchSession;

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Fixed-now clock whose sleeps only yield, so poll loops run instantly.
struct TestClock {
    now: DateTime<Local>,
}

impl TestClock {
    fn at(hour: u32) -> Arc<Self> {
        Arc::new(Self {
            now: Local.with_ymd_and_hms(2026, 8, 3, hour, 5, 0).unwrap(),
        })
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> DateTime<Local> {
        self.now
    }

    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}

/// One query's listing: the set of ids visible after each advance. Stages
/// are cumulative snapshots, so overlap between them exercises dedup.
#[derive(Clone, Default)]
struct Listing {
    stages: Vec<Vec<&'static str>>,
    /// Page height grows on every probe, simulating a listing that keeps
    /// loading even though nothing extractable appears.
    growing_height: bool,
    /// Serve a challenge page on every probe.
    blocked: bool,
}

impl Listing {
    fn of(stages: Vec<Vec<&'static str>>) -> Self {
        Self {
            stages,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct DriverState {
    active: Option<String>,
    stage: usize,
    height_probes: u64,
}

/// Driver scripted per query keyword: `navigate` selects the listing whose
/// key appears in the URL, scrolls and page navigations advance its stage.
struct ScriptedDriver {
    listings: HashMap<String, Listing>,
    fail_navigation: HashSet<String>,
    state: Mutex<DriverState>,
    scrolls: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    fn new(listings: HashMap<String, Listing>) -> Arc<Self> {
        Arc::new(Self {
            listings,
            fail_navigation: HashSet::new(),
            state: Mutex::new(DriverState::default()),
            scrolls: AtomicUsize::new(0),
            navigations: Mutex::new(Vec::new()),
        })
    }

    fn single(key: &str, listing: Listing) -> Arc<Self> {
        Self::new(HashMap::from([(key.to_string(), listing)]))
    }

    fn failing_for(mut self: Arc<Self>, key: &str) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("configure before cloning")
            .fail_navigation
            .insert(key.to_string());
        self
    }

    fn active_listing(&self) -> (Listing, usize) {
        let state = self.state.lock().unwrap();
        let listing = state
            .active
            .as_ref()
            .and_then(|k| self.listings.get(k))
            .cloned()
            .unwrap_or_default();
        (listing, state.stage)
    }

    fn visible_ids(&self) -> Vec<&'static str> {
        let (listing, stage) = self.active_listing();
        if listing.stages.is_empty() {
            return Vec::new();
        }
        let stage = stage.min(listing.stages.len() - 1);
        listing.stages[stage].clone()
    }

    /// Pull the seen list back out of the extraction script.
    fn parse_seen(js: &str) -> HashSet<String> {
        let Some(start) = js.find("new Set(") else {
            return HashSet::new();
        };
        let rest = &js[start + "new Set(".len()..];
        let Some(end) = rest.find(')') else {
            return HashSet::new();
        };
        serde_json::from_str::<Vec<String>>(&rest[..end])
            .map(|v| v.into_iter().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.navigations.lock().unwrap().push(url.to_string());
        for key in &self.fail_navigation {
            if url.contains(key) {
                return Err(DriverError::Navigation(format!("scripted failure for {key}")));
            }
        }
        let mut state = self.state.lock().unwrap();
        if url.contains("page=") {
            state.stage += 1;
            return Ok(());
        }
        for key in self.listings.keys() {
            if url.contains(key) {
                state.active = Some(key.clone());
                state.stage = 0;
                return Ok(());
            }
        }
        state.active = None;
        state.stage = 0;
        Ok(())
    }

    async fn evaluate(&self, js: &str) -> Result<Value, DriverError> {
        let (listing, _) = self.active_listing();

        if js.contains("document.title") {
            return if listing.blocked {
                Ok(json!({"title": "Antibot", "heading": "Доступ ограничен"}))
            } else {
                Ok(json!({"title": "Поиск", "heading": "Результаты"}))
            };
        }
        if js.contains("innerHTML.length") {
            return Ok(json!(50_000));
        }
        if js.contains("scrollHeight") {
            let mut state = self.state.lock().unwrap();
            state.height_probes += 1;
            let height = if listing.growing_height {
                1_000 + state.height_probes * 500
            } else {
                1_000
            };
            return Ok(json!(height));
        }
        if js.contains("new Set(") {
            let seen = Self::parse_seen(js);
            let fresh: Vec<&str> = self
                .visible_ids()
                .into_iter()
                .filter(|id| !seen.contains(*id))
                .collect();
            return Ok(json!(fresh));
        }
        Ok(Value::Null)
    }

    async fn query_text(&self, _selector: &str) -> Result<Option<String>, DriverError> {
        Ok(Some("card".to_string()))
    }

    async fn click(&self, _selector: &str) -> Result<bool, DriverError> {
        Ok(false)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn scroll_by(&self, _delta_y: i64) -> Result<(), DriverError> {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().stage += 1;
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok("https://example.test/search".to_string())
    }
}

struct ScriptedSession {
    driver: Arc<ScriptedDriver>,
    restarts: AtomicUsize,
    fresh_tabs: AtomicUsize,
}

impl ScriptedSession {
    fn new(driver: Arc<ScriptedDriver>) -> Arc<Self> {
        Arc::new(Self {
            driver,
            restarts: AtomicUsize::new(0),
            fresh_tabs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SearchSession for ScriptedSession {
    async fn tab(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        Ok(self.driver.clone())
    }

    async fn fresh_tab(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        self.fresh_tabs.fetch_add(1, Ordering::SeqCst);
        Ok(self.driver.clone())
    }

    async fn restart(&self) -> Result<(), DriverError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {}
}

/// Driver whose navigations never complete; `started` fires when the first
/// one begins, so shutdown tests can cancel a run mid-page-load.
struct HangingDriver {
    started: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl PageDriver for HangingDriver {
    async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
        self.started.notify_one();
        std::future::pending::<()>().await;
        unreachable!()
    }

    async fn evaluate(&self, _js: &str) -> Result<Value, DriverError> {
        Ok(Value::Null)
    }

    async fn query_text(&self, _selector: &str) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    async fn click(&self, _selector: &str) -> Result<bool, DriverError> {
        Ok(false)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(Vec::new())
    }

    async fn scroll_by(&self, _delta_y: i64) -> Result<(), DriverError> {
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(String::new())
    }
}

struct HangingSession {
    driver: Arc<HangingDriver>,
}

#[async_trait]
impl SearchSession for HangingSession {
    async fn tab(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        Ok(self.driver.clone())
    }

    async fn fresh_tab(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        Ok(self.driver.clone())
    }

    async fn restart(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&self) {}
}

// ── Harness ──────────────────────────────────────────────────────────────────

fn search_config(ceiling: u32, mode: ListingMode) -> SearchConfigSection {
    SearchConfigSection {
        base_url: "https://example.test".to_string(),
        max_position: ceiling,
        listing_mode: mode,
        empty_advance_limit: 3,
        captcha_wait_secs: 2,
    }
}

fn searcher_with(clock: Arc<dyn Clock>, config: SearchConfigSection) -> Arc<RankSearcher> {
    let detector = Arc::new(ChallengeDetector::new());
    let resolver = Arc::new(ChallengeResolver::new(
        detector.clone(),
        clock.clone(),
        None,
        None,
        config.captcha_wait_secs,
    ));
    Arc::new(RankSearcher::new(detector, resolver, clock, config))
}

fn task(row: u32, target: &str, query: &str) -> SearchTask {
    SearchTask {
        row,
        target_id: target.to_string(),
        query: query.to_string(),
    }
}

async fn run_search(
    driver: &ScriptedDriver,
    config: SearchConfigSection,
    t: &SearchTask,
) -> SearchOutcome {
    let clock: Arc<dyn Clock> = TestClock::at(14);
    let searcher = searcher_with(clock, config);
    searcher.find_position(driver, t).await.expect("no driver error")
}

/// Sheet with two articles and three queries, laid out as the tracker
/// expects: article header rows in column B, queries in column C.
fn seeded_sheet() -> Arc<MemorySheet> {
    Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос"],
        &["", "111", ""],
        &["", "", "redshoes"],
        &["", "222", ""],
        &["", "", "bluehat"],
    ]))
}

// ── RankSearcher properties ──────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_batches_never_double_count() {
    // Stage overlap: b and c repeat; unique order is a b c d T -> Found(5).
    let driver = ScriptedDriver::single(
        "overlap",
        Listing::of(vec![
            vec!["a", "b", "c"],
            vec!["b", "c", "d", "T"],
        ]),
    );
    let outcome = run_search(
        &driver,
        search_config(50, ListingMode::Scroll),
        &task(2, "T", "overlap"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::Found(5));
}

#[tokio::test]
async fn short_circuits_on_target() {
    // Target sits in the very first batch; no advancement should happen.
    let driver = ScriptedDriver::single(
        "instant",
        Listing::of(vec![vec!["x", "T", "y"], vec!["z"]]),
    );
    let outcome = run_search(
        &driver,
        search_config(50, ListingMode::Scroll),
        &task(2, "T", "instant"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::Found(2));
    assert_eq!(driver.scrolls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ceiling_is_exact() {
    // 12 unique ids, target is the 11th. Ceiling 10 must stop at exactly 10
    // uniques and report NotFound; ceiling 11 must find it.
    let ids: Vec<&'static str> = vec![
        "p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8", "p9", "p10", "T", "p12",
    ];
    let listing = Listing::of(vec![ids.clone()]);

    let driver = ScriptedDriver::single("exact", listing.clone());
    let outcome = run_search(
        &driver,
        search_config(10, ListingMode::Scroll),
        &task(2, "T", "exact"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::NotFound);

    let driver = ScriptedDriver::single("exact", listing);
    let outcome = run_search(
        &driver,
        search_config(11, ListingMode::Scroll),
        &task(2, "T", "exact"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::Found(11));
}

#[tokio::test]
async fn ended_listing_is_not_found_when_height_stable() {
    let driver = ScriptedDriver::single(
        "short",
        Listing::of(vec![vec!["a", "b"]]),
    );
    let outcome = run_search(
        &driver,
        search_config(50, ListingMode::Scroll),
        &task(2, "T", "short"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::NotFound);
}

#[tokio::test]
async fn stalled_but_growing_listing_is_incomplete() {
    let listing = Listing {
        stages: vec![vec!["a", "b"]],
        growing_height: true,
        blocked: false,
    };
    let driver = ScriptedDriver::single("stall", listing);
    let outcome = run_search(
        &driver,
        search_config(50, ListingMode::Scroll),
        &task(2, "T", "stall"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::Incomplete);
}

#[tokio::test]
async fn auto_mode_switches_to_pagination_after_empty_first_scroll() {
    // Scroll yields nothing new, but page 2 has the target.
    let driver = ScriptedDriver::single(
        "paged",
        Listing::of(vec![
            vec!["a", "b"],
            vec!["a", "b"],        // after the probing scroll: no change
            vec!["c", "T"],        // after the page=2 navigation
        ]),
    );
    let outcome = run_search(
        &driver,
        search_config(50, ListingMode::Auto),
        &task(2, "T", "paged"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::Found(4));
    let navs = driver.navigations.lock().unwrap().clone();
    assert!(
        navs.iter().any(|u| u.contains("page=2")),
        "expected a page=2 navigation, got {navs:?}"
    );
}

#[tokio::test]
async fn unresolved_block_aborts_with_value() {
    let listing = Listing {
        stages: vec![vec!["a"]],
        growing_height: false,
        blocked: true,
    };
    let driver = ScriptedDriver::single("walled", listing);
    let outcome = run_search(
        &driver,
        search_config(50, ListingMode::Scroll),
        &task(2, "T", "walled"),
    )
    .await;
    assert_eq!(outcome, SearchOutcome::BlockedAbort);
}

#[tokio::test]
async fn search_runs_inside_a_spawned_task() {
    // Workers run searches under tokio::spawn, so the whole search future
    // must stay Send even across the randomized scroll pauses.
    let driver = ScriptedDriver::single(
        "spawned",
        Listing::of(vec![vec!["a"], vec!["a", "T"]]),
    );
    let clock: Arc<dyn Clock> = TestClock::at(14);
    let searcher = searcher_with(clock, search_config(10, ListingMode::Scroll));
    let t = task(2, "T", "spawned");
    let handle = tokio::spawn(async move { searcher.find_position(driver.as_ref(), &t).await });
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, SearchOutcome::Found(2));
}

// ── Scheduler + ledger end-to-end ────────────────────────────────────────────

fn scheduler_config(concurrency: usize) -> SchedulerConfigSection {
    SchedulerConfigSection {
        concurrency,
        retry_attempts: 2,
        backoff_max_ms: 1,
        startup_jitter_ms: 1,
        cancel_grace_ms: 1,
        consolidate_at_hour: 0,
    }
}

fn build_pool(
    sheet: Arc<MemorySheet>,
    driver: Arc<ScriptedDriver>,
    concurrency: usize,
    ceiling: u32,
) -> (TaskScheduler, Arc<ResultLedger>, Vec<Arc<dyn SearchSession>>) {
    let clock: Arc<dyn Clock> = TestClock::at(14);
    let searcher = searcher_with(clock.clone(), search_config(ceiling, ListingMode::Scroll));
    let ledger = Arc::new(ResultLedger::new(sheet, ceiling));
    let scheduler = TaskScheduler::new(
        searcher,
        ledger.clone(),
        clock,
        None,
        scheduler_config(concurrency),
    );
    let sessions: Vec<Arc<dyn SearchSession>> = (0..concurrency)
        .map(|_| ScriptedSession::new(driver.clone()) as Arc<dyn SearchSession>)
        .collect();
    (scheduler, ledger, sessions)
}

#[tokio::test]
async fn two_task_run_writes_expected_cells() {
    // "111" is the 7th unique id for redshoes; "222" never appears within
    // the ceiling for bluehat.
    let sheet = seeded_sheet();
    let driver = ScriptedDriver::new(HashMap::from([
        (
            "redshoes".to_string(),
            Listing::of(vec![
                vec!["p1", "p2", "p3", "p4"],
                vec!["p3", "p4", "p5", "p6", "111"],
            ]),
        ),
        (
            "bluehat".to_string(),
            Listing::of(vec![vec!["q1", "q2", "q3"]]),
        ),
    ]));
    let (scheduler, ledger, sessions) = build_pool(sheet.clone(), driver, 1, 50);

    let tasks = ledger.load_tasks().await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0], task(3, "111", "redshoes"));
    assert_eq!(tasks[1], task(5, "222", "bluehat"));

    let (_tx, cancel) = watch::channel(false);
    let results = scheduler.run(tasks, &sessions, cancel).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, TaskStatus::Found(7));
    assert_eq!(results[1].status, TaskStatus::NotFound);

    // Bucket column inserted at D with the hour header; cells written.
    assert_eq!(sheet.cell(1, 4), "03.08 14:00");
    assert_eq!(sheet.cell(3, 4), "7");
    assert_eq!(sheet.cell(5, 4), "50+");
    assert!(sheet.highlighted().contains(&(3, 4)));
}

#[tokio::test]
async fn one_failing_task_does_not_block_the_rest() {
    let sheet = seeded_sheet();
    let driver = ScriptedDriver::new(HashMap::from([
        (
            "redshoes".to_string(),
            Listing::of(vec![vec!["111"]]),
        ),
        (
            "bluehat".to_string(),
            Listing::of(vec![vec!["q1"]]),
        ),
    ]))
    .failing_for("bluehat");
    let (scheduler, ledger, sessions) = build_pool(sheet.clone(), driver, 2, 50);

    let tasks = ledger.load_tasks().await.unwrap();
    let (_tx, cancel) = watch::channel(false);
    let results = scheduler.run(tasks, &sessions, cancel).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, TaskStatus::Found(1));
    assert!(matches!(results[1].status, TaskStatus::Error(_)));
    assert_eq!(sheet.cell(3, 4), "1");
    assert_eq!(sheet.cell(5, 4), "err");
}

#[tokio::test]
async fn blocked_task_restarts_session_then_records_error() {
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос"],
        &["", "111", ""],
        &["", "", "walled"],
    ]));
    let listing = Listing {
        stages: vec![vec!["a"]],
        growing_height: false,
        blocked: true,
    };
    let driver = ScriptedDriver::single("walled", listing);
    let (scheduler, ledger, _) = build_pool(sheet.clone(), driver.clone(), 1, 50);
    let session = ScriptedSession::new(driver);
    let sessions: Vec<Arc<dyn SearchSession>> = vec![session.clone()];

    let tasks = ledger.load_tasks().await.unwrap();
    let (_tx, cancel) = watch::channel(false);
    let results = scheduler.run(tasks, &sessions, cancel).await.unwrap();

    assert!(matches!(results[0].status, TaskStatus::Error(_)));
    // Every failed attempt rebuilds the session.
    assert_eq!(session.restarts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn resumed_bucket_only_processes_unfilled_cells() {
    // The current hour's column already exists with row 3 filled.
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос", "03.08 14:00"],
        &["", "111", "", ""],
        &["", "", "redshoes", "4"],
        &["", "222", "", ""],
        &["", "", "bluehat", ""],
    ]));
    let driver = ScriptedDriver::new(HashMap::from([
        (
            "redshoes".to_string(),
            Listing::of(vec![vec!["111"]]),
        ),
        (
            "bluehat".to_string(),
            Listing::of(vec![vec!["222"]]),
        ),
    ]));
    let (scheduler, ledger, sessions) = build_pool(sheet.clone(), driver, 1, 50);

    let tasks = ledger.load_tasks().await.unwrap();
    let (_tx, cancel) = watch::channel(false);
    let results = scheduler.run(tasks, &sessions, cancel).await.unwrap();

    // Only bluehat ran; the filled redshoes cell is untouched.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].task.row, 5);
    assert_eq!(sheet.cell(3, 4), "4");
    assert_eq!(sheet.cell(5, 4), "1");
}

#[tokio::test]
async fn cancellation_abandons_a_hung_page_within_the_grace_window() {
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос"],
        &["", "111", ""],
        &["", "", "hung"],
    ]));
    let started = Arc::new(tokio::sync::Notify::new());
    let driver = Arc::new(HangingDriver {
        started: started.clone(),
    });
    let sessions: Vec<Arc<dyn SearchSession>> = vec![Arc::new(HangingSession { driver })];

    let clock: Arc<dyn Clock> = TestClock::at(14);
    let searcher = searcher_with(clock.clone(), search_config(50, ListingMode::Scroll));
    let ledger = Arc::new(ResultLedger::new(sheet.clone(), 50));
    let scheduler = TaskScheduler::new(searcher, ledger.clone(), clock, None, scheduler_config(1));

    let tasks = ledger.load_tasks().await.unwrap();
    let (tx, cancel) = watch::channel(false);
    let run = tokio::spawn(async move { scheduler.run(tasks, &sessions, cancel).await });

    // Cancel only once the worker is stuck inside the page load.
    started.notified().await;
    tx.send(true).unwrap();

    let results = run.await.unwrap().unwrap();
    assert_eq!(results.len(), 1);
    assert!(
        matches!(&results[0].status, TaskStatus::Error(msg) if msg.contains("cancelled")),
        "expected a cancelled error, got {:?}",
        results[0].status
    );
    assert_eq!(sheet.cell(3, 4), "err");
}

// ── Consolidation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn consolidation_averages_hourly_buckets() {
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос", "03.08 12:00", "03.08 11:00", "03.08 10:00"],
        &["", "111", "", "", "", ""],
        &["", "", "redshoes", "1000+", "15", "5"],
    ]));
    let ledger = ResultLedger::new(sheet.clone(), 1000);
    ledger.consolidate("03.08").await.unwrap();

    let grid = sheet.snapshot();
    // round((1000 + 15 + 5) / 3) = 340
    assert_eq!(grid[0], vec!["№", "Артикул", "Запрос", "03.08"]);
    assert_eq!(sheet.cell(3, 4), "340");
}

#[tokio::test]
async fn consolidation_at_ceiling_re_emits_sentinel() {
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос", "03.08 11:00", "03.08 10:00"],
        &["", "111", "", "", ""],
        &["", "", "redshoes", "1000+", "1000+"],
    ]));
    let ledger = ResultLedger::new(sheet.clone(), 1000);
    ledger.consolidate("03.08").await.unwrap();
    assert_eq!(sheet.cell(4, 4), ""); // no stray rows
    assert_eq!(sheet.cell(3, 4), "1000+");
}

#[tokio::test]
async fn single_hourly_bucket_is_renamed_not_averaged() {
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос", "03.08 10:00"],
        &["", "111", "", ""],
        &["", "", "redshoes", "7"],
    ]));
    let ledger = ResultLedger::new(sheet.clone(), 1000);
    ledger.consolidate("03.08").await.unwrap();

    assert_eq!(sheet.cell(1, 4), "03.08");
    assert_eq!(sheet.cell(3, 4), "7");
}

#[tokio::test]
async fn consolidation_is_idempotent_on_daily_buckets() {
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос", "03.08"],
        &["", "111", "", ""],
        &["", "", "redshoes", "42"],
    ]));
    let ledger = ResultLedger::new(sheet.clone(), 1000);
    let before = sheet.snapshot();
    ledger.consolidate("03.08").await.unwrap();
    assert_eq!(sheet.snapshot(), before);
}

#[tokio::test]
async fn consolidation_leaves_other_dates_alone() {
    let sheet = Arc::new(MemorySheet::from_rows(&[
        &["№", "Артикул", "Запрос", "04.08 09:00", "03.08 11:00", "03.08 10:00"],
        &["", "111", "", "", "", ""],
        &["", "", "redshoes", "3", "20", "10"],
    ]));
    let ledger = ResultLedger::new(sheet.clone(), 1000);
    ledger.consolidate("03.08").await.unwrap();

    let headers = sheet.snapshot()[0].clone();
    assert_eq!(headers, vec!["№", "Артикул", "Запрос", "04.08 09:00", "03.08"]);
    assert_eq!(sheet.cell(3, 4), "3");
    assert_eq!(sheet.cell(3, 5), "15");
}
