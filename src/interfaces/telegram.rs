use async_trait::async_trait;
use std::time::Duration;
use teloxide::payloads::{GetUpdatesSetters, SendPhotoSetters};
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};
use teloxide::types::{BotCommand, InputFile, UpdateKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::gateway::{
    EventCallback, HandlerRoutes, InboundEvent, MessageFilter, MessagingGateway, RecipientId,
};
use crate::core::error::GatewayError;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks the next `getUpdates` offset and the highest one Telegram has
/// answered. Updates below the answered offset will not be sent again.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PollCursor {
    next: i32,
    confirmed: i32,
}

impl PollCursor {
    fn offset(&self) -> i32 {
        self.next
    }

    fn advance(&mut self, next: i32) {
        self.next = self.next.max(next);
    }

    fn confirm(&mut self, offset: i32) {
        self.confirmed = self.confirmed.max(offset);
    }

    /// Offset that still has to be sent once so Telegram drops handled updates.
    fn unconfirmed(&self) -> Option<i32> {
        (self.next > self.confirmed).then_some(self.next)
    }
}

/// Long-polling Telegram gateway. Updates are dispatched one at a time.
pub struct TelegramGateway {
    bot: Bot,
    routes: HandlerRoutes,
    shutdown: CancellationToken,
    poll_timeout_secs: u32,
}

impl TelegramGateway {
    pub fn new(token: &str, poll_timeout_secs: u32) -> Self {
        Self {
            bot: Bot::new(token),
            routes: HandlerRoutes::new(),
            shutdown: CancellationToken::new(),
            poll_timeout_secs,
        }
    }

    /// One non-blocking poll so updates handled before shutdown are not
    /// delivered again on the next start.
    async fn acknowledge(&self, offset: i32) {
        let request = self.bot.get_updates().offset(offset).timeout(0);
        match tokio::time::timeout(ACK_TIMEOUT, request.send()).await {
            Ok(Ok(_)) => debug!("Acknowledged updates below offset {}", offset),
            Ok(Err(e)) => warn!("Could not acknowledge handled updates: {}", e),
            Err(_) => warn!("Acknowledging handled updates timed out"),
        }
    }

    async fn publish_commands(&self) {
        let commands: Vec<BotCommand> = self
            .routes
            .commands()
            .into_iter()
            .map(|(name, description)| {
                let description = if description.is_empty() {
                    name.clone()
                } else {
                    description
                };
                BotCommand::new(name, description)
            })
            .collect();
        if commands.is_empty() {
            return;
        }
        if let Err(e) = self.bot.set_my_commands(commands).await {
            error!("Failed to set telegram bot commands: {}", e);
        }
    }

    fn send_error(recipient: RecipientId, e: impl std::fmt::Display) -> GatewayError {
        GatewayError::Send {
            recipient,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), GatewayError> {
        self.bot
            .send_message(ChatId(recipient), text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| Self::send_error(recipient, e))
    }

    async fn send_binary(
        &self,
        recipient: RecipientId,
        payload: Vec<u8>,
        filename: &str,
    ) -> Result<(), GatewayError> {
        let file = InputFile::memory(payload).file_name(filename.to_string());
        self.bot
            .send_document(ChatId(recipient), file)
            .await
            .map(|_| ())
            .map_err(|e| Self::send_error(recipient, e))
    }

    async fn send_photo(
        &self,
        recipient: RecipientId,
        payload: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut request = self
            .bot
            .send_photo(ChatId(recipient), InputFile::memory(payload));
        if let Some(caption) = caption {
            request = request.caption(caption.to_string());
        }
        request
            .await
            .map(|_| ())
            .map_err(|e| Self::send_error(recipient, e))
    }

    fn register_command_handler(
        &self,
        owner: &str,
        command: &str,
        description: &str,
        callback: EventCallback,
    ) -> Result<(), GatewayError> {
        self.routes.add_command(owner, command, description, callback)
    }

    fn register_message_handler(
        &self,
        owner: &str,
        filter: MessageFilter,
        callback: EventCallback,
    ) -> Result<(), GatewayError> {
        self.routes.add_message(owner, filter, callback);
        Ok(())
    }

    fn remove_handlers(&self, owner: &str) -> usize {
        self.routes.remove_owner(owner)
    }

    async fn run_receive_loop(&self) -> Result<(), GatewayError> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Stopped);
        }
        self.publish_commands().await;
        info!("Telegram receive loop started");

        let mut cursor = PollCursor::default();
        loop {
            let sent = cursor.offset();
            let request = self
                .bot
                .get_updates()
                .offset(sent)
                .timeout(self.poll_timeout_secs);

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = request.send() => result,
            };

            match result {
                Ok(updates) => {
                    cursor.confirm(sent);
                    for update in updates {
                        cursor.advance(update.id.as_offset());
                        let UpdateKind::Message(msg) = update.kind else {
                            continue;
                        };
                        let Some(text) = msg.text() else {
                            continue;
                        };
                        let event = InboundEvent::from_text(msg.chat.id.0, text);
                        if !self.routes.dispatch(event).await {
                            debug!("No handler for message in chat {}", msg.chat.id.0);
                        }
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                    }
                }
                Err(RequestError::Api(ApiError::InvalidToken)) => {
                    error!("Telegram rejected the bot token");
                    return Err(GatewayError::Receive("invalid bot token".into()));
                }
                Err(e) => {
                    warn!("Telegram polling failed: {}", e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        if let Some(offset) = cursor.unconfirmed() {
            self.acknowledge(offset).await;
        }
        info!("Telegram receive loop stopped");
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cursor_has_nothing_to_acknowledge() {
        assert_eq!(PollCursor::default().unconfirmed(), None);
    }

    #[test]
    fn updates_handled_after_the_last_poll_need_acknowledging() {
        let mut cursor = PollCursor::default();
        cursor.confirm(cursor.offset());
        cursor.advance(101);
        cursor.advance(102);
        // Shutdown before the next poll went out.
        assert_eq!(cursor.unconfirmed(), Some(102));

        cursor.confirm(cursor.offset());
        assert_eq!(cursor.unconfirmed(), None);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut cursor = PollCursor::default();
        cursor.advance(50);
        cursor.advance(40);
        assert_eq!(cursor.offset(), 50);
        cursor.confirm(50);
        cursor.confirm(10);
        assert_eq!(cursor.unconfirmed(), None);
    }
}
