use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorType {
    TradingSessionActor,
    TrainerActor,
    NotifierActor,
}

/// Messages sent from Actors to the Supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Heartbeat(Uuid),
    Shutdown(Uuid),
    Error(Uuid, String),
}

impl ControlMessage {
    pub fn actor_id(&self) -> Uuid {
        match self {
            Self::Heartbeat(id) | Self::Shutdown(id) | Self::Error(id, _) => *id,
        }
    }
}

/// Aborts the wrapped heartbeat task when the owning actor ends or is aborted,
/// so a dead actor never keeps pulsing.
pub struct HeartbeatGuard(JoinHandle<()>);

impl HeartbeatGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The trait that all restartable services must implement
#[async_trait]
pub trait Actor: Send + Sync {
    fn name(&self) -> ActorType;

    fn id(&self) -> Uuid;

    /// The main loop of the actor.
    /// It must periodically send `ControlMessage::Heartbeat` to the supervisor.
    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()>;

    fn spawn_heartbeat(&self, supervisor_tx: mpsc::Sender<ControlMessage>) -> JoinHandle<()> {
        let id = self.id();
        tokio::spawn(async move {
            loop {
                if supervisor_tx
                    .send(ControlMessage::Heartbeat(id))
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle {
        id: Uuid,
    }

    #[async_trait]
    impl Actor for Idle {
        fn name(&self) -> ActorType {
            ActorType::NotifierActor
        }

        fn id(&self) -> Uuid {
            self.id
        }

        async fn run(&mut self, _tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_heartbeat_carries_actor_id() {
        let actor = Idle { id: Uuid::new_v4() };
        let (tx, mut rx) = mpsc::channel(4);
        let handle = actor.spawn_heartbeat(tx);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, ControlMessage::Heartbeat(actor.id));
        assert_eq!(msg.actor_id(), actor.id);
        handle.abort();
    }

    #[tokio::test]
    async fn test_guard_stops_heartbeat_on_drop() {
        let actor = Idle { id: Uuid::new_v4() };
        let (tx, mut rx) = mpsc::channel(4);
        let guard = HeartbeatGuard::new(actor.spawn_heartbeat(tx));
        assert!(rx.recv().await.is_some());

        drop(guard);
        // The aborted task drops its sender, closing the channel.
        while rx.recv().await.is_some() {}
    }
}
