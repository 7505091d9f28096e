//! External captcha-solving service client.
//!
//! Speaks the classic two-endpoint protocol: submit a job to `/in.php`,
//! then poll `/res.php` until the answer is ready. Supported job kinds are
//! widget challenges (sitekey) and plain image captchas (base64 PNG).

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::clock::Clock;

const DEFAULT_BASE_URL: &str = "https://rucaptcha.com";
const POLL_ATTEMPTS: u32 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("solver transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("solver rejected request: {0}")]
    Api(String),
    #[error("solver did not produce an answer within the poll window")]
    Timeout,
}

pub struct SolverClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl SolverClient {
    pub fn new(api_key: String, base_url: Option<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            clock,
        }
    }

    /// Solve a Turnstile-style widget challenge; returns the response token.
    pub async fn solve_turnstile(
        &self,
        sitekey: &str,
        page_url: &str,
    ) -> Result<String, SolverError> {
        let id = self
            .submit(&[
                ("method", "turnstile"),
                ("sitekey", sitekey),
                ("pageurl", page_url),
            ])
            .await?;
        self.poll(&id).await
    }

    /// Solve an image captcha from base64-encoded PNG bytes.
    pub async fn solve_image(&self, png_base64: &str) -> Result<String, SolverError> {
        let id = self
            .submit(&[("method", "base64"), ("body", png_base64)])
            .await?;
        self.poll(&id).await
    }

    /// Submit a job; returns the job id from an `OK|<id>` response.
    async fn submit(&self, fields: &[(&str, &str)]) -> Result<String, SolverError> {
        let mut form: Vec<(&str, &str)> = vec![("key", self.api_key.as_str())];
        form.extend_from_slice(fields);

        let body = self
            .http
            .post(format!("{}/in.php", self.base_url))
            .form(&form)
            .send()
            .await?
            .text()
            .await?;

        match body.split_once('|') {
            Some(("OK", id)) => {
                debug!("solver accepted job {id}");
                Ok(id.to_string())
            }
            _ => Err(SolverError::Api(body)),
        }
    }

    async fn poll(&self, id: &str) -> Result<String, SolverError> {
        for _ in 0..POLL_ATTEMPTS {
            self.clock.sleep(POLL_INTERVAL).await;
            let body = self
                .http
                .get(format!("{}/res.php", self.base_url))
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", id),
                ])
                .send()
                .await?
                .text()
                .await?;

            if body == "CAPCHA_NOT_READY" {
                continue;
            }
            return match body.split_once('|') {
                Some(("OK", answer)) => Ok(answer.to_string()),
                _ => Err(SolverError::Api(body)),
            };
        }
        Err(SolverError::Timeout)
    }
}

impl std::fmt::Debug for SolverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
