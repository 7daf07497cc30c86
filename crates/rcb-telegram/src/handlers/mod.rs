//! Telegram update handlers.
//!
//! Each inbound message is first offered to a pending login prompt of its
//! chat. Only text nobody is waiting for reaches command routing.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::debug;

use rcb_core::{
    domain::{ChatId, UserId},
    messaging::types::TextMessage,
};

use crate::router::AppState;

mod commands;

pub use commands::{handle_command, parse_command};

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !msg.chat.is_private() || msg.forward().is_some() {
        return Ok(());
    }
    let (Some(user), Some(text)) = (msg.from(), msg.text()) else {
        return Ok(());
    };

    let inbound = TextMessage {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        display_name: user.full_name(),
        text: text.to_string(),
    };
    route_text(state, inbound).await;
    Ok(())
}

/// Platform-independent part of [`handle_message`].
pub async fn route_text(state: Arc<AppState>, msg: TextMessage) {
    if state.replies.offer(msg.chat_id, &msg.text).await {
        debug!(chat_id = msg.chat_id.0, "reply delivered to pending prompt");
        return;
    }
    if msg.text.starts_with('/') {
        handle_command(state, msg).await;
    }
}
