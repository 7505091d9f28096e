use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Timelike;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use rankwatch::core::config::{load_config, TrackerConfig};
use rankwatch::core::AppState;
use rankwatch::features::notify::Notifier;
use rankwatch::features::solver::SolverClient;
use rankwatch::ledger::{bucket, GoogleSheetsClient, MemorySheet, ResultLedger, SheetClient};
use rankwatch::scheduler::TaskScheduler;
use rankwatch::scraping::challenge::{ChallengeDetector, ChallengeResolver};
use rankwatch::scraping::search::RankSearcher;
use rankwatch::scraping::session::{BrowserSession, SearchSession, SessionOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunMode {
    /// Single tracking pass (default).
    Once,
    /// Resident: one pass per hour, daily consolidation at the configured hour.
    Serve,
    /// One-shot consolidation of the given date (default: yesterday).
    Consolidate(Option<String>),
}

fn arg_value(name: &str) -> Option<String> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == name {
            if let Some(v) = args.peek() {
                if !v.starts_with("--") {
                    return args.next();
                }
            }
            return None;
        } else if let Some(rest) = a.strip_prefix(&format!("{name}=")) {
            return Some(rest.to_string());
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().any(|a| a == name || a.starts_with(&format!("{name}=")))
}

fn parse_mode() -> RunMode {
    if has_flag("--consolidate") {
        RunMode::Consolidate(arg_value("--consolidate"))
    } else if has_flag("--serve") {
        RunMode::Serve
    } else {
        RunMode::Once
    }
}

fn apply_cli_overrides(config: &mut TrackerConfig) {
    if let Some(v) = arg_value("--max-position").and_then(|v| v.parse().ok()) {
        config.search.max_position = v;
    }
    if let Some(v) = arg_value("--concurrency").and_then(|v| v.parse().ok()) {
        config.scheduler.concurrency = v;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = load_config();
    apply_cli_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    let mode = parse_mode();
    let dry_run = has_flag("--dry-run");
    info!("rankwatch starting (mode: {mode:?}, dry_run: {dry_run})");

    let mut state = AppState::new(config);
    if let Some(api_key) = state.config.solver_api_key() {
        let base_url = state.config.solver.base_url.clone();
        let clock = state.clock.clone();
        state = state.with_solver(Arc::new(SolverClient::new(api_key, base_url, clock)));
        info!("captcha solver enabled");
    }
    if let (Some(token), Some(chat_id)) = (
        state.config.notify_bot_token(),
        state.config.notify.chat_id.clone(),
    ) {
        state = state.with_notifier(Arc::new(Notifier::new(token, chat_id)));
        info!("notifications enabled");
    }

    let sheet = build_sheet_client(&state.config, dry_run).await?;
    let ledger = Arc::new(ResultLedger::new(
        sheet,
        state.config.search.max_position,
    ));

    if let RunMode::Consolidate(date) = &mode {
        let date = date.clone().unwrap_or_else(|| {
            bucket::daily_label(&(state.clock.now() - chrono::Duration::days(1)))
        });
        ledger.consolidate(&date).await?;
        info!("consolidation of {date} finished");
        return Ok(());
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("shutdown requested, finishing in-flight tasks");
        let _ = cancel_tx.send(true);
    });

    let detector = Arc::new(ChallengeDetector::new());
    let resolver = Arc::new(ChallengeResolver::new(
        detector.clone(),
        state.clock.clone(),
        state.solver.clone(),
        state.notifier.clone(),
        state.config.search.captcha_wait_secs,
    ));
    let searcher = Arc::new(RankSearcher::new(
        detector,
        resolver,
        state.clock.clone(),
        state.config.search.clone(),
    ));
    let scheduler = TaskScheduler::new(
        searcher,
        ledger.clone(),
        state.clock.clone(),
        state.notifier.clone(),
        state.config.scheduler.clone(),
    );
    let sessions = build_sessions(&state.config)?;

    let outcome = match mode {
        RunMode::Once => tracking_pass(&scheduler, &ledger, &sessions, cancel_rx).await,
        RunMode::Serve => serve_loop(&state, &scheduler, &ledger, &sessions, cancel_rx).await,
        RunMode::Consolidate(_) => unreachable!("handled above"),
    };

    for session in &sessions {
        session.close().await;
    }
    if dry_run {
        if let Err(e) = dump_sheet(&ledger).await {
            error!("failed to dump dry-run results: {e:#}");
        }
    }
    outcome?;
    info!("rankwatch stopped");
    Ok(())
}

/// One full tracking pass: load tasks, run the pool.
async fn tracking_pass(
    scheduler: &TaskScheduler,
    ledger: &ResultLedger,
    sessions: &[Arc<dyn SearchSession>],
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    let tasks = ledger.load_tasks().await.context("task sheet unreachable")?;
    if tasks.is_empty() {
        warn!("no tasks found in sheet");
        return Ok(());
    }
    scheduler.run(tasks, sessions, cancel).await?;
    Ok(())
}

/// Resident mode: a pass every hour, consolidating yesterday's buckets once
/// per day at the configured hour.
async fn serve_loop(
    state: &AppState,
    scheduler: &TaskScheduler,
    ledger: &ResultLedger,
    sessions: &[Arc<dyn SearchSession>],
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let mut last_consolidated: Option<String> = None;

    loop {
        if *cancel.borrow() {
            break;
        }

        let now = state.clock.now();
        if now.hour() == u32::from(state.config.scheduler.consolidate_at_hour) {
            let yesterday = bucket::daily_label(&(now - chrono::Duration::days(1)));
            if last_consolidated.as_deref() != Some(yesterday.as_str()) {
                if let Err(e) = ledger.consolidate(&yesterday).await {
                    error!("consolidation of {yesterday} failed: {e:#}");
                } else {
                    last_consolidated = Some(yesterday);
                }
            }
        }

        if let Err(e) = tracking_pass(scheduler, ledger, sessions, cancel.clone()).await {
            error!("tracking pass failed: {e:#}");
        }
        if *cancel.borrow() {
            break;
        }

        // Sleep to the top of the next hour.
        let now = state.clock.now();
        let until_next_hour = 3600 - u64::from(now.minute()) * 60 - u64::from(now.second());
        info!("next pass in {until_next_hour}s");
        tokio::select! {
            _ = cancel.changed() => break,
            _ = state.clock.sleep(Duration::from_secs(until_next_hour.max(1))) => {}
        }
    }
    Ok(())
}

fn build_sessions(config: &TrackerConfig) -> Result<Vec<Arc<dyn SearchSession>>> {
    let profile_root = config.profile_root();
    let warmup = Some(config.search.base_url.clone());
    let mut sessions: Vec<Arc<dyn SearchSession>> = Vec::new();
    for i in 0..config.scheduler.concurrency {
        let options = SessionOptions::for_worker(&config.browser, &profile_root, warmup.clone(), i)
            .context("session options")?;
        sessions.push(BrowserSession::new(options));
    }
    Ok(sessions)
}

/// Entry in the local task file used by `--dry-run`.
#[derive(Debug, Deserialize)]
struct DryRunTask {
    target_id: String,
    query: String,
}

async fn build_sheet_client(
    config: &TrackerConfig,
    dry_run: bool,
) -> Result<Arc<dyn SheetClient>> {
    if dry_run {
        let path = arg_value("--tasks").unwrap_or_else(|| "tasks.json".to_string());
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("dry run needs a task file at {path}"))?;
        let tasks: Vec<DryRunTask> =
            serde_json::from_str(&raw).with_context(|| format!("invalid task file {path}"))?;
        info!(
            "dry run: {} tasks from {path}, results stay in memory",
            tasks.len()
        );
        let sheet: Arc<dyn SheetClient> = Arc::new(memory_sheet_from_tasks(&tasks));
        return Ok(sheet);
    }

    let token = config
        .sheets_token()
        .context("no sheets API token configured (ledger.api_token or SHEETS_API_TOKEN)")?;
    if config.ledger.spreadsheet_id.is_empty() {
        anyhow::bail!("ledger.spreadsheet_id is not configured");
    }
    let client = GoogleSheetsClient::connect(
        config.ledger.spreadsheet_id.clone(),
        config.ledger.worksheet.clone(),
        token,
    )
    .await?;
    let sheet: Arc<dyn SheetClient> = Arc::new(client);
    Ok(sheet)
}

/// Build the dry-run grid in ledger layout: an article header row per
/// distinct target, query rows beneath it.
fn memory_sheet_from_tasks(tasks: &[DryRunTask]) -> MemorySheet {
    let mut rows: Vec<Vec<String>> = vec![vec![
        String::new(),
        "Артикул".to_string(),
        "Запрос".to_string(),
    ]];
    let mut current: Option<&str> = None;
    for task in tasks {
        if current != Some(task.target_id.as_str()) {
            rows.push(vec![String::new(), task.target_id.clone(), String::new()]);
            current = Some(task.target_id.as_str());
        }
        rows.push(vec![String::new(), String::new(), task.query.clone()]);
    }
    let refs: Vec<Vec<&str>> = rows
        .iter()
        .map(|r| r.iter().map(String::as_str).collect())
        .collect();
    let slices: Vec<&[&str]> = refs.iter().map(|r| r.as_slice()).collect();
    MemorySheet::from_rows(&slices)
}

/// Print the whole grid to stdout, tab-separated (dry-run results).
async fn dump_sheet(ledger: &ResultLedger) -> Result<()> {
    let client = ledger.client();
    let headers = client.header_row().await?;
    let mut columns = Vec::new();
    for col in 1..=headers.len().max(3) as u32 {
        columns.push(client.read_column(col).await?);
    }
    let row_count = columns.iter().map(Vec::len).max().unwrap_or(0);
    for row in 0..row_count {
        let line: Vec<String> = columns
            .iter()
            .map(|c| c.get(row).cloned().unwrap_or_default())
            .collect();
        println!("{}", line.join("\t"));
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
