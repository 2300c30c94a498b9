pub mod telegram;

use async_trait::async_trait;

use crate::error::NotifyError;
use crate::platform::telegram::ReplyMarkup;

/// A text message received from the chat platform.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Sender id; absent for channel posts
    pub user_id: Option<i64>,
    pub chat_id: i64,
    pub text: String,
}

impl IncomingMessage {
    /// Length of the text in characters, not bytes.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Delivers a reply back to a chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyMarkup>,
    ) -> Result<(), NotifyError>;
}
