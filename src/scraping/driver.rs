//! Browser capability boundary.
//!
//! The engine (challenge detection, rank search, scheduler) only ever talks
//! to [`PageDriver`]; `CdpTab` is the chromiumoxide-backed implementation.
//! Tests substitute a scripted driver.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{BlockPattern, SetBlockedUrLsParams};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde_json::Value;

use crate::core::error::DriverError;

/// One browser tab, as seen by the engine.
///
/// Implementations must never panic on a dead tab — every failure surfaces
/// as a typed [`DriverError`] the worker can classify.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;
    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&self, js: &str) -> Result<Value, DriverError>;
    /// Inner text of the first element matching `selector`, if any.
    async fn query_text(&self, selector: &str) -> Result<Option<String>, DriverError>;
    /// Click the first match; `false` when no element matched.
    async fn click(&self, selector: &str) -> Result<bool, DriverError>;
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
    async fn scroll_by(&self, delta_y: i64) -> Result<(), DriverError>;
    async fn reload(&self) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
}

/// URL patterns suppressed on every tab (heavy assets + tracker endpoints).
/// `Network.setBlockedURLs` takes absolute URLPattern constructor strings
/// (scheme://host:port/path); relative globs silently match nothing.
pub const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*://*:*/*.jpg",
    "*://*:*/*.jpeg",
    "*://*:*/*.png",
    "*://*:*/*.gif",
    "*://*:*/*.webp",
    "*://*:*/*.svg",
    "*://*:*/*.woff",
    "*://*:*/*.woff2",
    "*://*:*/*.ttf",
    "*://*:*/*.mp4",
    "*://*:*/*.webm",
    "*://*:*/*.mp3",
    "*://mc.yandex.ru:*/*",
    "*://mc.yandex.com:*/*",
    "*://*.google-analytics.com:*/*",
    "*://*.criteo.com:*/*",
    "*://*.criteo.net:*/*",
    "*://top-fwz1.mail.ru:*/*",
    "*://vk.com:*/rtrg*",
    "*://connect.facebook.net:*/*",
];

/// Chromiumoxide-backed tab.
pub struct CdpTab {
    page: Page,
}

impl CdpTab {
    /// Wrap a freshly opened page, applying the session-level
    /// resource-blocking policy before any navigation happens.
    pub async fn new(page: Page) -> Result<Self, DriverError> {
        let patterns = BLOCKED_URL_PATTERNS
            .iter()
            .map(|p| BlockPattern::new(*p, true));
        page.execute(SetBlockedUrLsParams::builder().url_patterns(patterns).build())
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(Self { page })
    }

    pub async fn close(&self) {
        let _ = self.page.clone().close().await;
    }
}

/// Map a raw CDP error message onto the driver taxonomy. Channel/connection
/// failures mean the tab or browser process died underneath us.
fn classify_cdp_error(msg: &str) -> DriverError {
    let lower = msg.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        DriverError::Timeout(msg.to_string())
    } else if lower.contains("channel")
        || lower.contains("closed")
        || lower.contains("disconnect")
        || lower.contains("target")
    {
        DriverError::TabClosed(msg.to_string())
    } else {
        DriverError::Eval(msg.to_string())
    }
}

#[async_trait]
impl PageDriver for CdpTab {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page.goto(url).await.map_err(|e| {
            let msg = e.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("timeout") || lower.contains("err_timed_out") {
                DriverError::Timeout(msg)
            } else if lower.contains("channel") || lower.contains("closed") {
                DriverError::TabClosed(msg)
            } else {
                DriverError::Navigation(msg)
            }
        })?;
        Ok(())
    }

    async fn evaluate(&self, js: &str) -> Result<Value, DriverError> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        result
            .into_value::<Value>()
            .map_err(|e| DriverError::Eval(format!("result deserialization: {e}")))
    }

    async fn query_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        let element = match self.page.find_element(selector).await {
            Ok(el) => el,
            // find_element errors on "no match"; only surface dead-tab errors.
            Err(e) => {
                let err = classify_cdp_error(&e.to_string());
                return if err.is_fatal() { Err(err) } else { Ok(None) };
            }
        };
        element
            .inner_text()
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))
    }

    async fn click(&self, selector: &str) -> Result<bool, DriverError> {
        let element = match self.page.find_element(selector).await {
            Ok(el) => el,
            Err(e) => {
                let err = classify_cdp_error(&e.to_string());
                return if err.is_fatal() { Err(err) } else { Ok(false) };
            }
        };
        element
            .click()
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(true)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<(), DriverError> {
        self.page
            .evaluate(format!(
                "window.scrollBy({{top: {delta_y}, behavior: 'smooth'}});"
            ))
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        self.page
            .reload()
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(url.unwrap_or_default())
    }
}
