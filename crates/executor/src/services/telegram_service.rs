use std::env;

use async_trait::async_trait;
use common::actors::{Actor, ActorType, ControlMessage, HeartbeatGuard};
use teloxide::prelude::*;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Bot and destination chat, validated once at start-up.
#[derive(Clone)]
pub struct TelegramTarget {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramTarget {
    /// `None` unless both `TELEGRAM_BOT_TOKEN` and a numeric
    /// `TELEGRAM_CHAT_ID` are set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.is_empty())?;
        let raw_chat = lookup("TELEGRAM_CHAT_ID")?;
        let chat_id = match raw_chat.trim().parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                warn!(
                    "TELEGRAM_CHAT_ID '{}' is not a number; notifications disabled",
                    raw_chat
                );
                return None;
            }
        };

        Some(Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
        })
    }
}

/// Forwards trade notifications from the session broadcast to one chat.
pub struct TelegramService {
    id: Uuid,
    target: TelegramTarget,
    rx: broadcast::Receiver<String>,
}

impl TelegramService {
    pub fn new(target: TelegramTarget, rx: broadcast::Receiver<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            rx,
        }
    }
}

#[async_trait]
impl Actor for TelegramService {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::NotifierActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let _heartbeat = HeartbeatGuard::new(self.spawn_heartbeat(supervisor_tx.clone()));
        info!("Starting Telegram notification service");

        loop {
            match self.rx.recv().await {
                Ok(msg) => {
                    // Delivery failures are logged, never fatal.
                    let sent = self.target.bot.send_message(self.target.chat_id, msg).await;
                    if let Err(e) = sent {
                        error!("Failed to send Telegram message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Telegram service lagged behind. Missed {} messages.", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Notification channel closed. Stopping Telegram service.");
                    let _ = supervisor_tx.send(ControlMessage::Shutdown(self.id)).await;
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(
        token: Option<&'static str>,
        chat: Option<&'static str>,
    ) -> impl Fn(&str) -> Option<String> {
        move |key| match key {
            "TELEGRAM_BOT_TOKEN" => token.map(str::to_string),
            "TELEGRAM_CHAT_ID" => chat.map(str::to_string),
            _ => None,
        }
    }

    #[test]
    fn test_disabled_without_credentials() {
        assert!(TelegramTarget::from_lookup(lookup_from(None, None)).is_none());
        assert!(TelegramTarget::from_lookup(lookup_from(Some("123:abc"), None)).is_none());
        assert!(TelegramTarget::from_lookup(lookup_from(Some(""), Some("42"))).is_none());
    }

    #[test]
    fn test_rejects_non_numeric_chat_id() {
        let lookup = lookup_from(Some("123:abc"), Some("my-chat"));
        assert!(TelegramTarget::from_lookup(lookup).is_none());
    }

    #[tokio::test]
    async fn test_closed_channel_shuts_down() {
        let target =
            TelegramTarget::from_lookup(lookup_from(Some("123:abc"), Some(" -1001 "))).unwrap();
        assert_eq!(target.chat_id, ChatId(-1001));

        let (tx, _) = broadcast::channel::<String>(4);
        let mut svc = TelegramService::new(target, tx.subscribe());
        drop(tx);

        let (sup_tx, mut sup_rx) = mpsc::channel(16);
        svc.run(sup_tx).await.unwrap();

        let mut saw_shutdown = false;
        while let Ok(msg) = sup_rx.try_recv() {
            saw_shutdown |= msg == ControlMessage::Shutdown(svc.id);
        }
        assert!(saw_shutdown);
    }
}
