//! Captcha/block page detection and recovery.
//!
//! Detection is a pure classification over a single batched page probe;
//! recovery is a bounded state machine that either clears the challenge or
//! reports it unresolved. Neither ever panics the worker.

use std::sync::Arc;
use std::time::Duration;

use aho_corasick::AhoCorasick;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::error::DriverError;
use crate::core::types::Classification;
use crate::features::notify::Notifier;
use crate::features::solver::SolverClient;
use crate::scraping::driver::PageDriver;

/// Title fragments that mark an interstitial challenge page. Matched on the
/// lowercased document title, so both Cyrillic and Latin variants hit.
const CAPTCHA_TITLE_KEYWORDS: &[&str] = &[
    "бот",
    "robot",
    "bot",
    "captcha",
    "подтверд",
    "confirm",
    "antibot",
    "challenge",
];

/// Heading text shown on a hard access-denied page.
const BLOCKED_HEADING: &str = "доступ ограничен";

/// Button label on the block page that re-requests access.
const BLOCK_RETRY_BUTTON: &str = "button";

/// Batched probe: one round-trip fetches everything classification needs.
const PROBE_JS: &str = r#"
(() => {
    const h1 = document.querySelector('h1');
    return {
        title: document.title || '',
        heading: h1 ? (h1.innerText || '') : '',
    };
})()
"#;

/// Stateless page classifier. Built once, shared across workers.
pub struct ChallengeDetector {
    title_matcher: AhoCorasick,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeDetector {
    pub fn new() -> Self {
        let title_matcher = AhoCorasick::new(CAPTCHA_TITLE_KEYWORDS)
            .expect("static keyword set always compiles");
        Self { title_matcher }
    }

    /// Classify the current page. Blocked wins over Captcha when both
    /// signals are present. Non-fatal probe failures classify as Normal so
    /// a flaky evaluation never spoofs a challenge; fatal ones propagate.
    pub async fn classify(
        &self,
        driver: &dyn PageDriver,
    ) -> Result<Classification, DriverError> {
        let probe = match driver.evaluate(PROBE_JS).await {
            Ok(v) => v,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!("challenge probe failed, assuming normal page: {e}");
                return Ok(Classification::Normal);
            }
        };
        Ok(self.classify_probe(&probe))
    }

    fn classify_probe(&self, probe: &Value) -> Classification {
        let heading = probe
            .get("heading")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if heading.contains(BLOCKED_HEADING) {
            return Classification::Blocked;
        }

        let title = probe
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if self.title_matcher.is_match(&title) {
            return Classification::Captcha;
        }

        Classification::Normal
    }
}

/// Terminal verdict of one recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    /// Captcha wait window expired. The caller proceeds best-effort; the
    /// page may still clear mid-scan.
    TimedOut,
    /// Block page persisted through every refresh attempt. The session
    /// fingerprint is burned; only a restart helps.
    Unresolved,
}

/// Passive re-check cadence while a block page may clear on its own.
const BLOCK_PASSIVE_CHECKS: u32 = 5;
const BLOCK_PASSIVE_INTERVAL: Duration = Duration::from_secs(2);
/// Active refresh attempts after passive waiting fails.
const BLOCK_REFRESH_ATTEMPTS: u32 = 3;
const BLOCK_REFRESH_SETTLE: Duration = Duration::from_secs(5);

/// Bounded challenge recovery.
///
/// Captcha: optional automatic solve, then a poll window for the page to
/// clear (covering both solver latency and a human solving it in a headed
/// session). Blocked: passive waits, then button/reload refresh attempts.
pub struct ChallengeResolver {
    detector: Arc<ChallengeDetector>,
    clock: Arc<dyn Clock>,
    solver: Option<Arc<SolverClient>>,
    notifier: Option<Arc<Notifier>>,
    captcha_wait_secs: u32,
}

impl ChallengeResolver {
    pub fn new(
        detector: Arc<ChallengeDetector>,
        clock: Arc<dyn Clock>,
        solver: Option<Arc<SolverClient>>,
        notifier: Option<Arc<Notifier>>,
        captcha_wait_secs: u32,
    ) -> Self {
        Self {
            detector,
            clock,
            solver,
            notifier,
            captcha_wait_secs,
        }
    }

    /// Drive recovery for a non-normal classification. Returns the verdict;
    /// only fatal driver errors escape.
    pub async fn resolve(
        &self,
        driver: &dyn PageDriver,
        classification: Classification,
    ) -> Result<Resolution, DriverError> {
        match classification {
            Classification::Normal => Ok(Resolution::Resolved),
            Classification::Captcha => self.resolve_captcha(driver).await,
            Classification::Blocked => self.resolve_blocked(driver).await,
        }
    }

    async fn resolve_captcha(&self, driver: &dyn PageDriver) -> Result<Resolution, DriverError> {
        info!("captcha page detected, attempting recovery");
        self.snapshot_to_chat(driver, "captcha page encountered")
            .await;

        if let Some(solver) = &self.solver {
            if let Err(e) = self.try_auto_solve(driver, solver).await {
                warn!("automatic captcha solve failed: {e}");
            }
        }

        // Poll window: covers solver token propagation and, in headed runs,
        // a human clicking through the challenge.
        for _ in 0..self.captcha_wait_secs {
            self.clock.sleep(Duration::from_secs(1)).await;
            match self.detector.classify(driver).await? {
                Classification::Captcha => continue,
                Classification::Blocked => return self.resolve_blocked(driver).await,
                Classification::Normal => {
                    info!("captcha cleared");
                    return Ok(Resolution::Resolved);
                }
            }
        }

        warn!("captcha not cleared within {}s, proceeding anyway", self.captcha_wait_secs);
        Ok(Resolution::TimedOut)
    }

    /// Best-effort automatic solve through the external service.
    ///
    /// Widget challenges (sitekey present in the DOM) get a token injected
    /// into the response field; plain image captchas are screenshotted and
    /// the answer typed into the visible input.
    async fn try_auto_solve(
        &self,
        driver: &dyn PageDriver,
        solver: &SolverClient,
    ) -> Result<(), crate::features::solver::SolverError> {
        let sitekey_js = r#"
(() => {
    const el = document.querySelector('[data-sitekey]');
    return el ? (el.getAttribute('data-sitekey') || '') : '';
})()
"#;
        let sitekey = driver
            .evaluate(sitekey_js)
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty());

        if let Some(sitekey) = sitekey {
            let page_url = driver.current_url().await.unwrap_or_default();
            let token = solver.solve_turnstile(&sitekey, &page_url).await?;
            let inject = format!(
                r#"
(() => {{
    const token = {token_json};
    for (const name of ['cf-turnstile-response', 'g-recaptcha-response']) {{
        const input = document.querySelector(`[name="${{name}}"]`);
        if (input) input.value = token;
    }}
    const form = document.querySelector('form');
    if (form) form.submit();
    return true;
}})()
"#,
                token_json = serde_json::to_string(&token).unwrap_or_default()
            );
            let _ = driver.evaluate(&inject).await;
            info!("widget captcha token injected");
            return Ok(());
        }

        // No widget: treat it as an image captcha.
        let png = match driver.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("captcha screenshot failed: {e}");
                return Ok(());
            }
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let answer = solver.solve_image(&encoded).await?;
        let fill = format!(
            r#"
(() => {{
    const input = document.querySelector('input[type="text"], input:not([type])');
    if (!input) return false;
    input.value = {answer_json};
    const btn = document.querySelector('button[type="submit"], button');
    if (btn) btn.click();
    return true;
}})()
"#,
            answer_json = serde_json::to_string(&answer).unwrap_or_default()
        );
        let _ = driver.evaluate(&fill).await;
        info!("image captcha answer submitted");
        Ok(())
    }

    async fn resolve_blocked(&self, driver: &dyn PageDriver) -> Result<Resolution, DriverError> {
        info!("block page detected, attempting recovery");
        self.snapshot_to_chat(driver, "access blocked").await;

        // The block sometimes lifts on its own within seconds.
        for _ in 0..BLOCK_PASSIVE_CHECKS {
            self.clock.sleep(BLOCK_PASSIVE_INTERVAL).await;
            if self.detector.classify(driver).await? == Classification::Normal {
                info!("block lifted without refresh");
                return Ok(Resolution::Resolved);
            }
        }

        for attempt in 1..=BLOCK_REFRESH_ATTEMPTS {
            debug!("block refresh attempt {attempt}/{BLOCK_REFRESH_ATTEMPTS}");
            let clicked = driver.click(BLOCK_RETRY_BUTTON).await.unwrap_or(false);
            if !clicked {
                if let Err(e) = driver.reload().await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    debug!("reload during block recovery failed: {e}");
                }
            }
            self.clock.sleep(BLOCK_REFRESH_SETTLE).await;
            if self.detector.classify(driver).await? == Classification::Normal {
                info!("block cleared after refresh attempt {attempt}");
                return Ok(Resolution::Resolved);
            }
        }

        warn!("block page not cleared after {BLOCK_REFRESH_ATTEMPTS} refresh attempts");
        Ok(Resolution::Unresolved)
    }

    /// Screenshot + message to the configured chat; failures are logged only.
    async fn snapshot_to_chat(&self, driver: &dyn PageDriver, caption: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        match driver.screenshot().await {
            Ok(png) => notifier.send_photo(&png, caption).await,
            Err(_) => notifier.send_message(caption).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normal_page_classifies_normal() {
        let detector = ChallengeDetector::new();
        let probe = json!({"title": "Кроссовки — купить", "heading": "Результаты поиска"});
        assert_eq!(detector.classify_probe(&probe), Classification::Normal);
    }

    #[test]
    fn captcha_keywords_match_case_insensitively() {
        let detector = ChallengeDetector::new();
        for title in [
            "Are you a robot?",
            "Подтвердите, что вы не БОТ",
            "Antibot Challenge",
            "Captcha required",
        ] {
            let probe = json!({"title": title, "heading": ""});
            assert_eq!(
                detector.classify_probe(&probe),
                Classification::Captcha,
                "title: {title}"
            );
        }
    }

    #[test]
    fn blocked_heading_wins_over_captcha_title() {
        let detector = ChallengeDetector::new();
        let probe = json!({"title": "Antibot", "heading": "Доступ ограничен"});
        assert_eq!(detector.classify_probe(&probe), Classification::Blocked);
    }

    #[test]
    fn missing_probe_fields_classify_normal() {
        let detector = ChallengeDetector::new();
        assert_eq!(detector.classify_probe(&json!({})), Classification::Normal);
        assert_eq!(
            detector.classify_probe(&json!(null)),
            Classification::Normal
        );
    }
}
