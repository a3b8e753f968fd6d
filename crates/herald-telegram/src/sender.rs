use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;

use herald_core::{domain::UserId, ports::OutboundSender, Error, Result};

/// `OutboundSender` over the Telegram Bot API.
///
/// For direct bots the chat id equals the user id, so one numeric id is
/// enough to address a recipient.
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl OutboundSender for TelegramSender {
    async fn send_text(&self, user: UserId, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(user.0), text)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }
}
