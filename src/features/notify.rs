//! Best-effort chat notifications (Telegram bot API).
//!
//! Every method swallows its own failures: a dead bot or bad chat id must
//! never affect a tracking run, so errors are logged and dropped here.

use tracing::{debug, warn};

pub struct Notifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    pub async fn send_message(&self, text: &str) {
        let result = self
            .http
            .post(self.endpoint("sendMessage"))
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => debug!("notification sent"),
            Ok(resp) => warn!("notification rejected: HTTP {}", resp.status()),
            Err(e) => warn!("notification failed: {e}"),
        }
    }

    pub async fn send_photo(&self, png: &[u8], caption: &str) {
        let part = reqwest::multipart::Part::bytes(png.to_vec())
            .file_name("screenshot.png")
            .mime_str("image/png")
            .unwrap_or_else(|_| reqwest::multipart::Part::bytes(png.to_vec()));
        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", part);

        let result = self
            .http
            .post(self.endpoint("sendPhoto"))
            .multipart(form)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => debug!("screenshot sent"),
            Ok(resp) => warn!("screenshot rejected: HTTP {}", resp.status()),
            Err(e) => warn!("screenshot upload failed: {e}"),
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}
