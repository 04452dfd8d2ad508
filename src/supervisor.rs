//! Timeout supervisor
//!
//! Every accepted transition arms a one-shot timer for the actor. When a
//! timer fires it takes the actor's lock and compares the stored session with
//! the position it was armed for; only an exact match (same run, same state,
//! same revision) is reset to Idle. Anything else means the actor moved on
//! and the firing is discarded.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::approvals::ApprovalBroadcast;
use crate::coordinator::ActorLocks;
use crate::external::Transport;
use crate::observability::flow_metrics;
use crate::session::{ActorId, ActorSession, OutboundMessage};
use crate::store::{SessionLookup, StateStore};
use crate::workflows::{Prompt, Step, Workflow};

/// Where an actor stood when a timer was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedPosition {
    pub workflow: Workflow,
    pub state: Step,
    pub revision: u64,
    pub started_at: DateTime<Utc>,
}

impl ArmedPosition {
    pub fn of(session: &ActorSession) -> Self {
        Self {
            workflow: session.workflow,
            state: session.state,
            revision: session.revision,
            started_at: session.started_at,
        }
    }

    pub fn matches(&self, session: &ActorSession) -> bool {
        *self == Self::of(session)
    }
}

/// Told to an actor whose session was reset for inactivity.
pub fn timeout_notice(workflow: Workflow) -> Prompt {
    Prompt::text(format!(
        "Your {} session timed out. Nothing was saved.",
        workflow.as_str().replace('_', " ")
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The actor was still at the armed position and is now Idle.
    Reset,
    /// The actor progressed, finished or was already reset.
    Discarded,
}

struct Shared {
    store: Arc<StateStore>,
    locks: Arc<ActorLocks>,
    transport: Arc<dyn Transport>,
    approvals: Arc<ApprovalBroadcast>,
}

pub struct TimeoutSupervisor {
    shared: Arc<Shared>,
    timers: Arc<DashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TimeoutSupervisor {
    pub fn new(
        store: Arc<StateStore>,
        locks: Arc<ActorLocks>,
        transport: Arc<dyn Transport>,
        approvals: Arc<ApprovalBroadcast>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                locks,
                transport,
                approvals,
            }),
            timers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Arm a one-shot timer. Timers are independent: arming again does not
    /// cancel earlier ones, which simply find the actor moved on.
    pub fn arm(&self, actor: ActorId, window: Duration, position: ArmedPosition) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = self.shared.clone();
        let timers = self.timers.clone();

        debug!(
            actor_id = %actor,
            workflow = %position.workflow,
            state = %position.state,
            window_secs = window.as_secs(),
            "timeout armed"
        );

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            shared.fire(&actor, position).await;
            timers.remove(&id);
        });

        self.timers.insert(id, handle);
        self.timers.remove_if(&id, |_, handle| handle.is_finished());
        id
    }

    /// Timers that have not fired yet.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    pub fn abort_all(&self) -> usize {
        let ids: Vec<u64> = self.timers.iter().map(|t| *t.key()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some((_, handle)) = self.timers.remove(&id) {
                handle.abort();
                aborted += 1;
            }
        }
        info!(aborted, "pending timeouts aborted");
        aborted
    }
}

impl Shared {
    async fn fire(&self, actor: &ActorId, position: ArmedPosition) -> FireOutcome {
        let _guard = self.locks.lock(actor).await;

        let session = match self.store.get(actor).await {
            SessionLookup::Active(session) if position.matches(&session) => {
                self.store.clear(actor).await;
                session
            }
            // Lazy expiry beat us to it; the reset still belongs to this timer.
            SessionLookup::Expired(session) if position.matches(&session) => session,
            _ => {
                flow_metrics().record_timeout_discarded();
                debug!(
                    actor_id = %actor,
                    state = %position.state,
                    "timeout discarded, actor moved on"
                );
                return FireOutcome::Discarded;
            }
        };

        flow_metrics().record_timeout_fired();
        info!(
            actor_id = %actor,
            workflow = %session.workflow,
            state = %session.state,
            data = %session.data.redacted(),
            "session timed out"
        );

        if session.state == Step::AwaitingApproval {
            self.approvals.withdraw(actor).await;
        }

        let notice = OutboundMessage {
            to: actor.clone(),
            prompt: timeout_notice(session.workflow),
        };
        if let Err(e) = self.transport.send(&notice).await {
            warn!(actor_id = %actor, error = %e, "failed to deliver timeout notice");
        }
        FireOutcome::Reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApprovalConfig;
    use crate::external::MemoryTransport;
    use crate::workflows::{SessionData, WorkflowRegistry};

    struct Fixture {
        store: Arc<StateStore>,
        transport: Arc<MemoryTransport>,
        supervisor: TimeoutSupervisor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(StateStore::in_memory(WorkflowRegistry::standard()));
        let transport = Arc::new(MemoryTransport::new());
        let approvals = Arc::new(ApprovalBroadcast::new(
            transport.clone(),
            &ApprovalConfig::default(),
        ));
        let supervisor = TimeoutSupervisor::new(
            store.clone(),
            Arc::new(ActorLocks::new()),
            transport.clone(),
            approvals,
        );
        Fixture {
            store,
            transport,
            supervisor,
        }
    }

    fn registrant() -> ActorSession {
        ActorSession::start(
            ActorId::new("r-1"),
            Workflow::Registration.role(),
            Workflow::Registration,
            Step::AwaitingPhone,
            SessionData::empty_for(Workflow::Registration),
            Utc::now(),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_untouched_session_is_reset() {
        let f = fixture();
        let session = registrant();
        f.store.set(&session).await;

        f.supervisor.arm(
            session.actor_id.clone(),
            Duration::from_secs(600),
            ArmedPosition::of(&session),
        );
        assert_eq!(f.supervisor.pending(), 1);

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert!(f.store.get(&session.actor_id).await.active().is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(f.store.get(&session.actor_id).await, SessionLookup::Idle);
        assert!(f
            .transport
            .last_to(&session.actor_id)
            .unwrap()
            .prompt
            .text
            .contains("timed out"));
        assert_eq!(f.supervisor.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_makes_timeout_a_no_op() {
        let f = fixture();
        let mut session = registrant();
        f.store.set(&session).await;
        f.supervisor.arm(
            session.actor_id.clone(),
            Duration::from_secs(60),
            ArmedPosition::of(&session),
        );

        session.advance(Step::AwaitingApproval, session.data.clone());
        f.store.set(&session).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(
            f.store.get(&session.actor_id).await.active(),
            Some(session.clone())
        );
        assert!(f.transport.sent_to(&session.actor_id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_run_at_same_state_is_not_reset_by_old_timer() {
        let f = fixture();
        let first = registrant();
        f.store.set(&first).await;
        f.supervisor.arm(
            first.actor_id.clone(),
            Duration::from_secs(60),
            ArmedPosition::of(&first),
        );

        let mut second = registrant();
        second.started_at = first.started_at + chrono::Duration::seconds(5);
        f.store.set(&second).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(f.store.get(&second.actor_id).await.active(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_valid_firing_has_effect() {
        let f = fixture();
        let session = registrant();
        f.store.set(&session).await;
        let position = ArmedPosition::of(&session);
        f.supervisor
            .arm(session.actor_id.clone(), Duration::from_secs(30), position);
        f.supervisor
            .arm(session.actor_id.clone(), Duration::from_secs(60), position);

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(f.transport.sent_to(&session.actor_id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_all_cancels_pending_timers() {
        let f = fixture();
        let session = registrant();
        f.store.set(&session).await;
        f.supervisor.arm(
            session.actor_id.clone(),
            Duration::from_secs(60),
            ArmedPosition::of(&session),
        );

        assert_eq!(f.supervisor.abort_all(), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert!(f.store.get(&session.actor_id).await.active().is_some());
    }
}
