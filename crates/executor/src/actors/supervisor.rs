use std::collections::{HashMap, HashSet};
use std::time::Duration;

use common::actors::{Actor, ActorType, ControlMessage};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

/// Heartbeat supervisor. Each running actor instance is tracked by its id;
/// an instance that stops pulsing is aborted and replaced from its factory.
pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    ids: HashMap<Uuid, ActorType>,
    pulses: HashMap<Uuid, Instant>,
    handles: HashMap<Uuid, JoinHandle<()>>,
    drain_on_stop: HashSet<ActorType>,
    stop_rx: watch::Receiver<bool>,
    heartbeat_timeout: Duration,
    check_every: Duration,
    /// How long draining actors get to finish their current cycle on stop.
    grace: Duration,
}

impl Supervisor {
    pub fn new(stop_rx: watch::Receiver<bool>) -> Self {
        Self {
            actor_factories: HashMap::new(),
            ids: HashMap::new(),
            pulses: HashMap::new(),
            handles: HashMap::new(),
            drain_on_stop: HashSet::new(),
            stop_rx,
            heartbeat_timeout: Duration::from_secs(3),
            check_every: Duration::from_secs(1),
            grace: Duration::from_secs(30),
        }
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration, check_every: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self.check_every = check_every;
        self
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.actor_factories.insert(actor_type, factory);
    }

    /// Actors of this type watch the stop signal themselves and are awaited
    /// on shutdown instead of aborted.
    pub fn drain_on_stop(&mut self, actor_type: ActorType) {
        self.drain_on_stop.insert(actor_type);
    }

    pub fn running(&self) -> usize {
        self.handles.len()
    }

    /// Runs until the stop signal flips, then drains and returns.
    pub async fn start(&mut self) {
        let mut check_interval = time::interval(self.check_every);
        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(512);

        let actors: Vec<ActorType> = self.actor_factories.keys().copied().collect();
        for actor_type in actors {
            self.spawn_actor(actor_type, supervisor_tx.clone());
        }

        while !*self.stop_rx.borrow() {
            tokio::select! {
                Some(msg) = supervisor_rx.recv() => self.handle_message(msg),

                _ = check_interval.tick() => {
                    let dead_line = Instant::now() - self.heartbeat_timeout;
                    let dead: Vec<Uuid> = self
                        .pulses
                        .iter()
                        .filter(|(_, seen)| **seen < dead_line)
                        .map(|(id, _)| *id)
                        .collect();

                    for id in dead {
                        let Some(actor_type) = self.forget(id) else {
                            continue;
                        };
                        warn!("{:?} ({}) is unresponsive! Restarting.", actor_type, id);
                        self.spawn_actor(actor_type, supervisor_tx.clone());
                    }
                }

                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        warn!("Stop signal sender dropped; shutting down");
                        break;
                    }
                }
            }
        }

        // Actors still reporting would block on a full channel otherwise.
        drop(supervisor_rx);
        self.drain().await;
    }

    fn handle_message(&mut self, msg: ControlMessage) {
        let id = msg.actor_id();
        let Some(actor_type) = self.ids.get(&id).copied() else {
            // Late message from an instance that was already replaced.
            return;
        };

        match msg {
            ControlMessage::Heartbeat(_) => {
                self.pulses.insert(id, Instant::now());
            }
            ControlMessage::Shutdown(_) => {
                warn!("{:?} is shutting down gracefully.", actor_type);
                self.forget(id);
            }
            ControlMessage::Error(_, error_msg) => {
                error!("Actor {:?} reported error: {}", actor_type, error_msg);
                self.pulses.insert(id, Instant::now());
            }
        }
    }

    /// Stops tracking an instance and aborts its task.
    fn forget(&mut self, id: Uuid) -> Option<ActorType> {
        self.pulses.remove(&id);
        if let Some(handle) = self.handles.remove(&id) {
            handle.abort();
        }
        self.ids.remove(&id)
    }

    async fn drain(&mut self) {
        let mut draining = Vec::new();
        for (id, handle) in self.handles.drain() {
            let actor_type = self.ids.get(&id).copied();
            match actor_type {
                Some(t) if self.drain_on_stop.contains(&t) => draining.push((t, handle)),
                _ => handle.abort(),
            }
        }
        self.ids.clear();
        self.pulses.clear();

        for (actor_type, handle) in draining {
            info!("Waiting for {:?} to finish its cycle", actor_type);
            let abort = handle.abort_handle();
            if time::timeout(self.grace, handle).await.is_err() {
                warn!(
                    "{:?} did not stop within {:?}; aborting",
                    actor_type, self.grace
                );
                abort.abort();
            }
        }
        info!("Supervisor stopped");
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: mpsc::Sender<ControlMessage>) {
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            return;
        };
        let mut new_actor = factory();
        let id = new_actor.id();
        let handle = tokio::spawn(async move {
            if let Err(e) = new_actor.run(tx).await {
                error!("Actor {:?} crashed: {:#}", actor_type, e);
            }
        });
        info!("Spawned {:?} ({})", actor_type, id);
        self.ids.insert(id, actor_type);
        self.handles.insert(id, handle);
        self.pulses.insert(id, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::actors::HeartbeatGuard;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Never pulses, never finishes.
    struct Silent {
        id: Uuid,
    }

    #[async_trait]
    impl Actor for Silent {
        fn name(&self) -> ActorType {
            ActorType::TrainerActor
        }

        fn id(&self) -> Uuid {
            self.id
        }

        async fn run(&mut self, _tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Pulses until the stop signal flips, then reports its shutdown.
    struct Graceful {
        id: Uuid,
        stop_rx: watch::Receiver<bool>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Actor for Graceful {
        fn name(&self) -> ActorType {
            ActorType::TradingSessionActor
        }

        fn id(&self) -> Uuid {
            self.id
        }

        async fn run(&mut self, tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
            let _heartbeat = HeartbeatGuard::new(self.spawn_heartbeat(tx.clone()));
            while !*self.stop_rx.borrow() {
                if self.stop_rx.changed().await.is_err() {
                    break;
                }
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(ControlMessage::Shutdown(self.id)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unresponsive_actor_is_respawned() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let spawned = Arc::new(AtomicUsize::new(0));
        let counter = spawned.clone();

        let mut supervisor = Supervisor::new(stop_rx)
            .with_heartbeat_timeout(Duration::from_millis(100), Duration::from_millis(20));
        supervisor.register_actor(
            ActorType::TrainerActor,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(Silent { id: Uuid::new_v4() })
            }),
        );

        let task = tokio::spawn(async move {
            supervisor.start().await;
            supervisor
        });
        time::sleep(Duration::from_millis(400)).await;
        stop_tx.send(true).unwrap();

        let supervisor = time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(spawned.load(Ordering::SeqCst) >= 2);
        assert_eq!(supervisor.running(), 0);
    }

    #[tokio::test]
    async fn test_stop_drains_graceful_actor() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let finished = Arc::new(AtomicUsize::new(0));
        let spawned = Arc::new(AtomicUsize::new(0));

        let mut supervisor = Supervisor::new(stop_rx.clone());
        let (done, count, rx) = (finished.clone(), spawned.clone(), stop_rx.clone());
        supervisor.register_actor(
            ActorType::TradingSessionActor,
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                Box::new(Graceful {
                    id: Uuid::new_v4(),
                    stop_rx: rx.clone(),
                    finished: done.clone(),
                })
            }),
        );
        supervisor.drain_on_stop(ActorType::TradingSessionActor);

        let task = tokio::spawn(async move { supervisor.start().await });
        time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
