//! Transport driving loop with one ordered mailbox per actor.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::InputConfig;
use crate::coordinator::Coordinator;
use crate::errors::FlowError;
use crate::external::Transport;
use crate::session::{ActorId, InboundMessage};

struct Mailbox {
    id: u64,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

type Mailboxes = Arc<DashMap<ActorId, Mailbox>>;

/// Routes inbound messages into per-actor queues. Each queue is drained by
/// its own task, so one actor's inputs are handled strictly in arrival order
/// while different actors run in parallel. A queue left empty for the idle
/// window is closed and its task ends.
pub struct InputRouter {
    coordinator: Arc<Coordinator>,
    mailboxes: Mailboxes,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    idle: Duration,
    housekeeping: Duration,
}

impl InputRouter {
    pub fn new(coordinator: Arc<Coordinator>, config: &InputConfig) -> Self {
        Self {
            coordinator,
            mailboxes: Arc::new(DashMap::new()),
            workers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            idle: config.mailbox_idle(),
            housekeeping: config.housekeeping_interval(),
        }
    }

    /// Queue `message` behind earlier messages from the same actor.
    pub fn route(&self, message: InboundMessage) {
        let actor = message.actor_id.clone();
        // Sending under the entry guard keeps a closing worker from
        // dropping a message it will never read.
        let mut mailbox = self
            .mailboxes
            .entry(actor.clone())
            .or_insert_with(|| self.spawn_worker(actor.clone()));

        if let Err(mpsc::error::SendError(message)) = mailbox.sender.send(message) {
            warn!(actor_id = %actor, "mailbox closed, restarting worker");
            let fresh = self.spawn_worker(actor.clone());
            if fresh.sender.send(message).is_err() {
                error!(actor_id = %actor, "input dropped, mailbox unavailable");
                return;
            }
            *mailbox = fresh;
        }
    }

    pub fn active_mailboxes(&self) -> usize {
        self.mailboxes.len()
    }

    fn spawn_worker(&self, actor: ActorId) -> Mailbox {
        let (sender, mut receiver) = mpsc::unbounded_channel::<InboundMessage>();
        let coordinator = self.coordinator.clone();
        let mailboxes = self.mailboxes.clone();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let idle = self.idle;

        let handle = tokio::spawn(async move {
            debug!(actor_id = %actor, "mailbox opened");
            loop {
                match tokio::time::timeout(idle, receiver.recv()).await {
                    // Errors are logged by the coordinator; the mailbox keeps going.
                    Ok(Some(message)) => {
                        let _ = coordinator.handle_message(message).await;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        let retired = mailboxes
                            .remove_if(&actor, |_, mailbox| {
                                mailbox.id == id && receiver.is_empty()
                            })
                            .is_some();
                        if retired {
                            receiver.close();
                            break;
                        }
                    }
                }
            }
            debug!(actor_id = %actor, "mailbox closed");
        });

        if let Ok(mut workers) = self.workers.lock() {
            workers.retain(|w| !w.is_finished());
            workers.push(handle);
        }
        Mailbox { id, sender }
    }

    /// Pull messages from `transport` until it closes or `shutdown` flips to
    /// true, then let every mailbox drain. Housekeeping runs on a fixed
    /// interval in between.
    pub async fn run(
        &self,
        transport: Arc<dyn Transport>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), FlowError> {
        info!("input router started");
        let mut housekeeping = interval_at(Instant::now() + self.housekeeping, self.housekeeping);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                _ = housekeeping.tick() => {
                    self.coordinator.housekeeping(Utc::now()).await;
                }
                next = transport.next_input() => match next {
                    Ok(Some(message)) => self.route(message),
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(FlowError::from(e)),
                },
            }
        };

        self.drain().await;
        info!("input router stopped");
        result
    }

    /// Close every mailbox and wait for queued messages to be processed.
    pub async fn drain(&self) {
        self.mailboxes.clear();
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "mailbox worker ended abnormally");
            }
        }
    }
}
