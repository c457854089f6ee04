use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{NotificationSink, SenderError};
use crate::config::TelegramConfig;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Telegram rejects photo captions longer than this many characters.
pub const MAX_CAPTION_CHARS: usize = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A sink pushing notifications via the Telegram Bot API.
pub struct TelegramSink {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> Result<Self, SenderError> {
        if config.bot_token.trim().is_empty() || config.chat_id.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Telegram bot_token and chat_id must both be set.".to_string(),
            ));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    async fn check_response(response: reqwest::Response) -> Result<(), SenderError> {
        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Telegram API returned non-success status: {status}. Body: {error_body}"
            )));
        }
        Ok(())
    }
}

/// Escapes text for Telegram MarkdownV2.
/// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped_text = String::with_capacity(text.len());
    for char_to_escape in text.chars() {
        match char_to_escape {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
            | '{' | '}' | '.' | '!' | '\\' => {
                escaped_text.push('\\');
                escaped_text.push(char_to_escape);
            }
            _ => {
                escaped_text.push(char_to_escape);
            }
        }
    }
    escaped_text
}

/// Cuts `caption` to the Telegram limit, counting characters rather than bytes.
pub fn truncate_caption(caption: &str) -> &str {
    match caption.char_indices().nth(MAX_CAPTION_CHARS) {
        Some((byte_index, _)) => &caption[..byte_index],
        None => caption,
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send_text(&self, message: &str) -> Result<(), SenderError> {
        let escaped_message = escape_markdown_v2(message);
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text: &escaped_message,
            parse_mode: "MarkdownV2",
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await?;
        Self::check_response(response).await
    }

    async fn send_photo(&self, jpeg: Vec<u8>, caption: &str) -> Result<(), SenderError> {
        let photo = Part::bytes(jpeg)
            .file_name("snapshot.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", escape_markdown_v2(truncate_caption(caption)))
            .text("parse_mode", "MarkdownV2")
            .part("photo", photo);

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        Self::check_response(response).await
    }
}
