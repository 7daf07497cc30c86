use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use crate::{domain::ChatId, messaging::port::MessagingPort};

/// Why an `ask` produced no reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AskError {
    #[error("no reply before the timeout")]
    Timeout,

    #[error("a newer prompt replaced this one")]
    Superseded,

    #[error("failed to send prompt: {0}")]
    Send(String),
}

/// Send a prompt into a chat and wait for the next text reply from it.
#[async_trait]
pub trait ReplyWaiter: Send + Sync {
    async fn ask(&self, chat_id: ChatId, prompt_html: &str, timeout: Duration)
        -> Result<String, AskError>;
}

/// Registry of chats that currently wait for a reply.
///
/// The inbound side calls [`PendingReplies::offer`] for every text message;
/// a pending prompt consumes the text instead of the normal command routing.
pub struct PendingReplies {
    messenger: Arc<dyn MessagingPort>,
    pending: Mutex<HashMap<i64, oneshot::Sender<String>>>,
}

impl PendingReplies {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            messenger,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver `text` to the prompt waiting in `chat_id`, if any.
    ///
    /// Returns `true` when the text was consumed.
    pub async fn offer(&self, chat_id: ChatId, text: &str) -> bool {
        let Some(tx) = self.pending.lock().await.remove(&chat_id.0) else {
            return false;
        };
        // A dropped receiver means the waiter timed out between lookup and send.
        tx.send(text.to_string()).is_ok()
    }

    pub async fn is_waiting(&self, chat_id: ChatId) -> bool {
        self.pending
            .lock()
            .await
            .get(&chat_id.0)
            .is_some_and(|tx| !tx.is_closed())
    }

    async fn register(&self, chat_id: ChatId) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        // Replacing an older sender drops it, which wakes its waiter with `Superseded`.
        self.pending.lock().await.insert(chat_id.0, tx);
        rx
    }

    async fn unregister_closed(&self, chat_id: ChatId) {
        let mut map = self.pending.lock().await;
        if map.get(&chat_id.0).is_some_and(|tx| tx.is_closed()) {
            map.remove(&chat_id.0);
        }
    }
}

#[async_trait]
impl ReplyWaiter for PendingReplies {
    async fn ask(
        &self,
        chat_id: ChatId,
        prompt_html: &str,
        timeout: Duration,
    ) -> Result<String, AskError> {
        // Register before sending so a fast reply cannot slip past us.
        let rx = self.register(chat_id).await;

        if let Err(e) = self.messenger.send_html(chat_id, prompt_html).await {
            drop(rx);
            self.unregister_closed(chat_id).await;
            return Err(AskError::Send(e.to_string()));
        }

        let out = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(_)) => Err(AskError::Superseded),
            Err(_) => Err(AskError::Timeout),
        };
        self.unregister_closed(chat_id).await;
        out
    }
}
