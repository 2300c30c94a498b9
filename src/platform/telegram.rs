use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TelegramConfig;
use crate::error::NotifyError;
use crate::platform::{IncomingMessage, Notifier};

/// Telegram rejects messages over 4096 characters; stay under it in bytes.
pub const MAX_MESSAGE_LEN: usize = 4000;

// ── Inbound ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Message {
    /// `None` for photos, stickers and anything else without text.
    pub fn into_incoming(self) -> Option<IncomingMessage> {
        let text = self.text.filter(|t| !t.is_empty())?;
        Some(IncomingMessage {
            user_id: self.from.map(|u| u.id),
            chat_id: self.chat.id,
            text,
        })
    }
}

// ── Outbound ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(dead_code)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(dead_code)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(dead_code)]
pub struct KeyboardButton {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(dead_code)]
pub struct ReplyKeyboardMarkup {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
    pub one_time_keyboard: bool,
}

/// Keyboard attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
#[allow(dead_code)]
pub enum ReplyMarkup {
    Inline(InlineKeyboardMarkup),
    Keyboard(ReplyKeyboardMarkup),
}

/// Body of a `sendMessage` call.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub parse_mode: ParseMode,
    pub disable_web_page_preview: bool,
    pub reply_markup: Option<ReplyMarkup>,
}

impl OutgoingMessage {
    pub fn new(chat_id: i64, text: impl Into<String>, reply_markup: Option<ReplyMarkup>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: ParseMode::Html,
            disable_web_page_preview: true,
            reply_markup,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Split long messages for Telegram's length limit.
///
/// Replies go out with `parse_mode: HTML`, and Telegram rejects a chunk whose
/// tags do not balance. Tags still open at a cut are closed at the end of
/// that chunk and reopened at the start of the next, so a chunk can run past
/// `max_len` by its closing tags. A cut never lands inside a tag or entity.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    // (tag name, full opening tag) carried over from the previous chunk
    let mut open: Vec<(String, String)> = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let prefix: String = open.iter().map(|(_, tag)| tag.as_str()).collect();
        let budget = max_len.saturating_sub(prefix.len()).max(1);

        let mut end = (start + budget).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = text[start..]
                .char_indices()
                .nth(1)
                .map_or(text.len(), |(i, _)| start + i);
        }

        let mut actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };
        if actual_end < text.len() {
            if let Some(cut) = unfinished_markup(&text[start..actual_end]) {
                if cut > 0 {
                    actual_end = start + cut;
                }
            }
        }

        let body = &text[start..actual_end];
        track_open_tags(&mut open, body);

        let mut chunk = prefix;
        chunk.push_str(body);
        for (name, _) in open.iter().rev() {
            chunk.push_str("</");
            chunk.push_str(name);
            chunk.push('>');
        }
        chunks.push(chunk);
        start = actual_end;
    }

    chunks
}

/// Offset of a trailing `<tag` or `&entity` that has not been terminated.
fn unfinished_markup(s: &str) -> Option<usize> {
    let tag = s
        .rfind('<')
        .filter(|&lt| !s[lt..].contains('>'));
    let entity = s
        .rfind('&')
        .filter(|&amp| !s[amp..].contains(';') && s.len() - amp <= 10);
    match (tag, entity) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn track_open_tags(open: &mut Vec<(String, String)>, html: &str) {
    let mut rest = html;
    while let Some(lt) = rest.find('<') {
        let after = &rest[lt + 1..];
        let Some(gt) = after.find('>') else {
            break;
        };
        let inner = &after[..gt];
        if let Some(closing) = inner.strip_prefix('/') {
            let name = closing.trim().to_ascii_lowercase();
            if let Some(pos) = open.iter().rposition(|(n, _)| *n == name) {
                open.truncate(pos);
            }
        } else if !inner.ends_with('/') {
            let name = inner
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_ascii_lowercase();
            if !name.is_empty() {
                open.push((name, format!("<{inner}>")));
            }
        }
        rest = &after[gt + 1..];
    }
}

// ── Notifier ───────────────────────────────────────────────────────────────────

pub struct TelegramNotifier {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    // Contains the bot token; keep it out of logs.
    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.bot_token
        )
    }

    async fn post(&self, message: &OutgoingMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }

        let reply: ApiResponse = response.json().await?;
        if !reply.ok {
            return Err(NotifyError::Rejected(
                reply.description.unwrap_or_else(|| "ok=false".to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyMarkup>,
    ) -> Result<(), NotifyError> {
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let last = chunks.len() - 1;

        if chunks.len() > 1 {
            info!("Splitting reply to chat {} into {} messages", chat_id, chunks.len());
        }

        // The keyboard rides on the final chunk only.
        let mut keyboard = keyboard;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let markup = if i == last { keyboard.take() } else { None };
            self.post(&OutgoingMessage::new(chat_id, chunk, markup)).await?;
        }

        debug!("Delivered reply to chat {}", chat_id);
        Ok(())
    }
}
