//! Coordinator
//!
//! Glue between the transport and the workflow components. For each inbound
//! message it takes the actor's lock, drops duplicates, loads the session,
//! lets a step handler decide, persists the outcome, hands terminal side
//! effects to the dispatcher and re-arms the inactivity timer.

pub mod locks;
pub mod sequence;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

use crate::approvals::{parse_decision, ApprovalBroadcast, Resolution};
use crate::config::{FieldflowConfig, TimeoutConfig};
use crate::dispatch::{DispatchError, Dispatcher, EffectRequest, SideEffect};
use crate::errors::FlowError;
use crate::external::{
    ActorProfile, ActorStatus, BusinessApi, CachedIdentity, IdentityError, IdentityLookup,
    MediaIngestion, Transport,
};
use crate::handlers::registration::decide;
use crate::handlers::{
    completion_prompt, prompt_vars, HandlerSet, RemainsHandler, StepContext, StepInput,
    StepOutcome, TaskReportHandler,
};
use crate::observability::{flow_metrics, OperationTimer};
use crate::session::{ActorId, ActorSession, InboundMessage, OutboundMessage, RawInput};
use crate::store::{SessionLookup, StateStore};
use crate::supervisor::{timeout_notice, ArmedPosition, TimeoutSupervisor};
use crate::telemetry::{create_actor_span, generate_correlation_id};
use crate::workflows::{
    ClearPolicy, Decision, EffectKind, Prompt, RetryReason, RouteData, SessionData, Step,
    Workflow, WorkflowRegistry,
};

pub use locks::ActorLocks;
pub use sequence::SequenceTracker;

pub const START_PREFIX: &str = "start:";

/// Workflows an idle actor can open from the menu. Remains adjustment needs a
/// machine snapshot and registration starts on its own for unknown actors.
const MENU_WORKFLOWS: [Workflow; 3] = [
    Workflow::DriverRoute,
    Workflow::WarehouseReceive,
    Workflow::TaskReport,
];

const NUDGE: &str = "Stuck? Send \"cancel\" at any time to stop.";
const NOTHING_TO_CANCEL: &str = "There is nothing to cancel.";
const ALREADY_PROCESSED: &str = "That message was already processed.";

/// External collaborators the coordinator talks to.
pub struct Collaborators {
    pub identity: Arc<dyn IdentityLookup>,
    pub business: Arc<dyn BusinessApi>,
    pub media: Arc<dyn MediaIngestion>,
    pub transport: Arc<dyn Transport>,
}

/// Context an integration already knows when it opens a workflow for an
/// actor.
#[derive(Debug, Clone, PartialEq)]
pub enum StartRequest {
    DriverRoute {
        route_id: Option<String>,
    },
    WarehouseReceive,
    RemainsAdjustment {
        machine_id: String,
        /// `(bunker id, current quantity)` in the order they are asked.
        bunkers: Vec<(String, f64)>,
    },
    TaskReport {
        machine_id: Option<String>,
    },
}

impl StartRequest {
    pub fn workflow(&self) -> Workflow {
        match self {
            StartRequest::DriverRoute { .. } => Workflow::DriverRoute,
            StartRequest::WarehouseReceive => Workflow::WarehouseReceive,
            StartRequest::RemainsAdjustment { .. } => Workflow::RemainsAdjustment,
            StartRequest::TaskReport { .. } => Workflow::TaskReport,
        }
    }

    fn seed(&self) -> Result<SessionData, RetryReason> {
        match self {
            StartRequest::DriverRoute { route_id } => Ok(SessionData::DriverRoute(RouteData {
                route_id: route_id.clone(),
                ..Default::default()
            })),
            StartRequest::WarehouseReceive => Ok(SessionData::empty_for(Workflow::WarehouseReceive)),
            StartRequest::RemainsAdjustment {
                machine_id,
                bunkers,
            } => {
                let mut missing = Vec::new();
                if machine_id.trim().is_empty() {
                    missing.push("machine id".to_string());
                }
                if bunkers.is_empty() {
                    missing.push("bunkers".to_string());
                }
                if !missing.is_empty() {
                    return Err(RetryReason::MissingFields { fields: missing });
                }
                Ok(RemainsHandler::seed(machine_id.trim(), bunkers))
            }
            StartRequest::TaskReport { machine_id } => {
                Ok(TaskReportHandler::seed(machine_id.as_deref()))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub rearmed: usize,
    pub expired: usize,
    pub rebroadcast: usize,
}

/// Per-actor bookkeeping released by one housekeeping pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub sequences: usize,
    pub rejections: usize,
    pub locks: usize,
    pub approvals: usize,
}

pub struct Coordinator {
    registry: WorkflowRegistry,
    handlers: HandlerSet,
    store: Arc<StateStore>,
    identity: CachedIdentity,
    business: Arc<dyn BusinessApi>,
    media: Arc<dyn MediaIngestion>,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    approvals: Arc<ApprovalBroadcast>,
    supervisor: TimeoutSupervisor,
    locks: Arc<ActorLocks>,
    sequences: SequenceTracker,
    /// Consecutive rejected inputs per actor, for the cancel nudge.
    rejections: DashMap<ActorId, u32>,
    timeouts: TimeoutConfig,
    nudge_after: u32,
    sequence_retention: Duration,
}

impl Coordinator {
    pub fn new(store: Arc<StateStore>, collaborators: Collaborators, config: &FieldflowConfig) -> Self {
        let Collaborators {
            identity,
            business,
            media,
            transport,
        } = collaborators;

        let locks = Arc::new(ActorLocks::new());
        let approvals = Arc::new(ApprovalBroadcast::new(transport.clone(), &config.approvals));
        let supervisor = TimeoutSupervisor::new(
            store.clone(),
            locks.clone(),
            transport.clone(),
            approvals.clone(),
        );

        Self {
            registry: WorkflowRegistry::standard(),
            handlers: HandlerSet::standard(),
            store,
            identity: CachedIdentity::new(identity, &config.identity),
            dispatcher: Dispatcher::new(business.clone(), &config.dispatch),
            business,
            media,
            transport,
            approvals,
            supervisor,
            locks,
            sequences: SequenceTracker::new(),
            rejections: DashMap::new(),
            timeouts: config.timeouts.clone(),
            nudge_after: config.input.nudge_after_rejections,
            sequence_retention: config.input.sequence_retention(),
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn approvals(&self) -> &ApprovalBroadcast {
        &self.approvals
    }

    pub fn supervisor(&self) -> &TimeoutSupervisor {
        &self.supervisor
    }

    /// Actors with a sequence watermark held in memory.
    pub fn tracked_actors(&self) -> usize {
        self.sequences.len()
    }

    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    /// Process one inbound message to completion. Inputs of the same actor
    /// are serialized; other actors proceed independently.
    pub async fn handle_message(&self, message: InboundMessage) -> Result<(), FlowError> {
        let correlation_id = generate_correlation_id();
        let span = create_actor_span("handle_message", &message.actor_id, None, &correlation_id);
        let timer = OperationTimer::new("handle_message");

        let result = self.process(message).instrument(span).await;
        timer.finish();

        if let Err(e) = &result {
            error!(
                correlation_id = %correlation_id,
                category = e.category(),
                error = %e,
                "input processing failed"
            );
        }
        result
    }

    /// Open a seeded workflow for `actor`, who must hold the workflow's role
    /// and be idle.
    pub async fn start_workflow(
        &self,
        actor: &ActorId,
        request: StartRequest,
    ) -> Result<(), FlowError> {
        let workflow = request.workflow();
        let profile = self.identity.get_actor_profile(actor).await?;
        if !profile.has_role(workflow.role()) {
            return Err(FlowError::NotPermitted {
                actor: actor.clone(),
                workflow,
            });
        }
        let data = request.seed().map_err(FlowError::InputValidation)?;

        let _guard = self.locks.lock(actor).await;
        let now = Utc::now();
        match self.store.get_at(actor, now).await {
            SessionLookup::Active(session) => {
                return Err(FlowError::SessionActive {
                    actor: actor.clone(),
                    workflow: session.workflow,
                    state: session.state,
                })
            }
            SessionLookup::Expired(session) => self.on_expired(&session).await,
            SessionLookup::Idle | SessionLookup::Corrupt { .. } => {}
        }

        self.open_session(actor, workflow, data, now, None).await;
        Ok(())
    }

    /// A supervisor's decision on a pending registration. The first decision
    /// is applied to the subject; later ones are refused with the winner's
    /// name.
    pub async fn resolve_approval(
        &self,
        supervisor: &ActorId,
        subject: &ActorId,
        decision: Decision,
    ) -> Result<Resolution, FlowError> {
        let resolution = match self.approvals.resolve(subject, supervisor, decision).await {
            Ok(resolution) => resolution,
            Err(e) => {
                self.send(supervisor, Prompt::text(format!("Not applied: {e}.")))
                    .await;
                return Err(e.into());
            }
        };

        let _guard = self.locks.lock(subject).await;
        let session = match self.store.get(subject).await {
            SessionLookup::Active(session) if session.state == Step::AwaitingApproval => session,
            _ => {
                warn!(
                    subject = %subject,
                    supervisor = %supervisor,
                    "approval resolved for a subject no longer awaiting it"
                );
                self.send(
                    supervisor,
                    Prompt::text(format!("{subject} is no longer waiting for approval.")),
                )
                .await;
                return Err(FlowError::StateIntegrity {
                    actor: subject.clone(),
                    detail: "not awaiting approval".to_string(),
                });
            }
        };

        let ctx = self.context(Utc::now());
        let mut session = session;
        match decide(&ctx, &session, decision) {
            StepOutcome::Accepted(accepted) => {
                session.advance(accepted.next_state, accepted.data);
                self.finish(session, accepted.side_effect, accepted.reply)
                    .await;
            }
            other => {
                return Err(FlowError::StateIntegrity {
                    actor: subject.clone(),
                    detail: format!("decision {decision} not applicable: {other:?}"),
                })
            }
        }

        self.send(
            supervisor,
            Prompt::text(format!("Registration of {subject} {decision}.")),
        )
        .await;
        Ok(resolution)
    }

    /// Re-arm timers from persisted expiries after a restart, reset sessions
    /// that expired while the process was down and re-send approval prompts
    /// for subjects still waiting on one.
    pub async fn recover(&self) -> RecoveryReport {
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        for mut session in self.store.list_sessions().await {
            let actor = session.actor_id.clone();
            let _guard = self.locks.lock(&actor).await;
            if let Some(seq) = session.last_seq {
                self.sequences.advance_to(&actor, seq);
                self.transport.resume_after(&actor, seq);
            }

            match session.remaining(now) {
                Some(left) if left.is_zero() => {
                    self.store.clear(&actor).await;
                    flow_metrics().record_timeout_fired();
                    self.on_expired(&session).await;
                    report.expired += 1;
                    continue;
                }
                Some(left) => {
                    self.supervisor
                        .arm(actor.clone(), left, ArmedPosition::of(&session));
                }
                None => self.persist_and_arm(&mut session).await,
            }
            report.rearmed += 1;

            if session.state == Step::AwaitingApproval
                && !self.approvals.is_pending(&actor)
                && self.request_approval(&session).await
            {
                report.rebroadcast += 1;
            }
        }

        info!(
            rearmed = report.rearmed,
            expired = report.expired,
            rebroadcast = report.rebroadcast,
            "sessions recovered"
        );
        report
    }

    /// Drop an actor's session. Returns whether one existed.
    pub async fn reset(&self, actor: &ActorId) -> bool {
        let _guard = self.locks.lock(actor).await;
        let SessionLookup::Active(session) = self.store.get(actor).await else {
            return false;
        };

        self.store.clear(actor).await;
        self.rejections.remove(actor);
        if session.state == Step::AwaitingApproval {
            self.approvals.withdraw(actor).await;
        }
        info!(
            actor_id = %actor,
            workflow = %session.workflow,
            state = %session.state,
            "session reset"
        );
        true
    }

    /// Stop all pending timers.
    pub fn shutdown(&self) -> usize {
        self.supervisor.abort_all()
    }

    /// Release bookkeeping of actors that have been quiet for the sequence
    /// retention window and hold no session, unused actor locks and approval
    /// history past its retention.
    pub async fn housekeeping(&self, now: DateTime<Utc>) -> HousekeepingReport {
        let mut report = HousekeepingReport::default();

        for actor in self.sequences.idle_for(self.sequence_retention) {
            let _guard = self.locks.lock(&actor).await;
            match self.store.get_at(&actor, now).await {
                SessionLookup::Active(_) => continue,
                SessionLookup::Expired(session) => self.on_expired(&session).await,
                SessionLookup::Corrupt { .. } | SessionLookup::Idle => {}
            }
            if self.sequences.forget_if_idle(&actor, self.sequence_retention) {
                report.sequences += 1;
            }
            if self.rejections.remove(&actor).is_some() {
                report.rejections += 1;
            }
        }

        report.locks = self.locks.prune();
        report.approvals = self.approvals.prune_history(now);
        debug!(
            sequences = report.sequences,
            rejections = report.rejections,
            locks = report.locks,
            approvals = report.approvals,
            "housekeeping pass"
        );
        report
    }

    async fn process(&self, message: InboundMessage) -> Result<(), FlowError> {
        let actor = message.actor_id.clone();
        let _guard = self.locks.lock(&actor).await;

        if !self.sequences.observe(&actor, message.seq) {
            self.duplicate(&actor, message.seq).await;
            return Ok(());
        }

        if let Some((decision, subject)) = approval_choice(&message.input) {
            return match self.resolve_approval(&actor, &subject, decision).await {
                Ok(_) | Err(FlowError::Approval(_)) | Err(FlowError::StateIntegrity { .. }) => {
                    Ok(())
                }
                Err(e) => Err(e),
            };
        }

        let now = Utc::now();
        match self.store.get_at(&actor, now).await {
            SessionLookup::Active(session) if session.has_seen(message.seq) => {
                self.duplicate(&actor, message.seq).await;
                Ok(())
            }
            SessionLookup::Active(session) => {
                self.handle_active(session, message.seq, &message.input, now)
                    .await;
                Ok(())
            }
            SessionLookup::Expired(session) => {
                self.on_expired(&session).await;
                self.handle_idle(&actor, &message.input, message.seq, now)
                    .await
            }
            SessionLookup::Corrupt { reason } => {
                error!(actor_id = %actor, reason = %reason, "stored session discarded");
                self.send(
                    &actor,
                    Prompt::text("Your previous session could not be restored and was reset."),
                )
                .await;
                self.handle_idle(&actor, &message.input, message.seq, now)
                    .await
            }
            SessionLookup::Idle => {
                self.handle_idle(&actor, &message.input, message.seq, now)
                    .await
            }
        }
    }

    async fn duplicate(&self, actor: &ActorId, seq: u64) {
        flow_metrics().record_duplicate();
        debug!(actor_id = %actor, seq, "duplicate input dropped");
        self.send(actor, Prompt::text(ALREADY_PROCESSED)).await;
    }

    async fn handle_idle(
        &self,
        actor: &ActorId,
        input: &RawInput,
        seq: u64,
        now: DateTime<Utc>,
    ) -> Result<(), FlowError> {
        let cancelling = StepInput::from_raw(input) == StepInput::Cancel;
        let profile = match self.identity.get_actor_profile(actor).await {
            Ok(profile) => profile,
            Err(IdentityError::NotFound(_)) if cancelling => {
                self.send(actor, Prompt::text(NOTHING_TO_CANCEL)).await;
                return Ok(());
            }
            Err(IdentityError::NotFound(_)) => {
                let data = SessionData::empty_for(Workflow::Registration);
                self.open_session(actor, Workflow::Registration, data, now, Some(seq))
                    .await;
                return Ok(());
            }
            Err(e) => {
                self.send(
                    actor,
                    Prompt::text("The service is temporarily unavailable. Please try again shortly."),
                )
                .await;
                return Err(e.into());
            }
        };

        match profile.status {
            ActorStatus::Pending => {
                self.send(
                    actor,
                    Prompt::text("Your registration is still waiting for approval."),
                )
                .await;
            }
            ActorStatus::Blocked => {
                self.send(
                    actor,
                    Prompt::text("Your account is not active. Please contact a supervisor."),
                )
                .await;
            }
            ActorStatus::Active if cancelling => {
                self.send(actor, idle_menu(&profile).prefixed(NOTHING_TO_CANCEL))
                    .await;
            }
            ActorStatus::Active => match menu_selection(input) {
                Some(workflow)
                    if MENU_WORKFLOWS.contains(&workflow) && profile.has_role(workflow.role()) =>
                {
                    let data = SessionData::empty_for(workflow);
                    self.open_session(actor, workflow, data, now, Some(seq))
                        .await;
                }
                Some(_) => {
                    let menu = idle_menu(&profile).prefixed("That option is not available to you.");
                    self.send(actor, menu).await;
                }
                None => self.send(actor, idle_menu(&profile)).await,
            },
        }
        Ok(())
    }

    async fn handle_active(
        &self,
        mut session: ActorSession,
        seq: u64,
        input: &RawInput,
        now: DateTime<Utc>,
    ) {
        let actor = session.actor_id.clone();
        let ctx = self.context(now);

        match self.handlers.handle(&ctx, &session, input).await {
            StepOutcome::Retry(reason) => self.reject(&session, reason).await,
            StepOutcome::Cancelled => {
                flow_metrics().record_accepted();
                self.rejections.remove(&actor);
                self.store.clear(&actor).await;
                if session.state == Step::AwaitingApproval {
                    self.approvals.withdraw(&actor).await;
                }
                info!(
                    actor_id = %actor,
                    workflow = %session.workflow,
                    state = %session.state,
                    "session cancelled"
                );
                self.send(&actor, completion_prompt(EffectKind::None, &session.data))
                    .await;
            }
            StepOutcome::Accepted(accepted) => {
                flow_metrics().record_accepted();
                self.rejections.remove(&actor);

                let from = session.state;
                session.advance(accepted.next_state, accepted.data);
                session.last_seq = Some(seq);
                session.pending_terminal = None;
                debug!(
                    actor_id = %actor,
                    workflow = %session.workflow,
                    from = %from,
                    to = %session.state,
                    "input accepted"
                );

                if self.registry.is_terminal(session.workflow, session.state) {
                    self.finish(session, accepted.side_effect, accepted.reply)
                        .await;
                    return;
                }

                self.persist_and_arm(&mut session).await;
                self.send(&actor, accepted.reply).await;
                if accepted.request_approval {
                    self.request_approval(&session).await;
                }
            }
        }
    }

    /// Refuse an input without touching the stored session.
    async fn reject(&self, session: &ActorSession, reason: RetryReason) {
        flow_metrics().record_rejected();
        let count = {
            let mut count = self.rejections.entry(session.actor_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        debug!(
            actor_id = %session.actor_id,
            workflow = %session.workflow,
            state = %session.state,
            reason = %reason,
            consecutive = count,
            "input rejected"
        );

        let mut prompt = self
            .registry
            .describe_with(session.workflow, session.state, &prompt_vars(&session.data))
            .prefixed(reason.to_string());
        if self.nudge_after > 0 && count >= self.nudge_after {
            prompt.text.push_str("\n\n");
            prompt.text.push_str(NUDGE);
        }
        self.send(&session.actor_id, prompt).await;
    }

    /// Commit a session that reached a terminal state, honouring the
    /// terminal's clear policy.
    async fn finish(&self, session: ActorSession, effect: Option<SideEffect>, reply: Prompt) {
        let actor = session.actor_id.clone();
        let Some(terminal) = self.registry.terminal(session.workflow, session.state) else {
            error!(
                actor_id = %actor,
                workflow = %session.workflow,
                state = %session.state,
                "finish called on a non-terminal state"
            );
            return;
        };

        let Some(effect) = effect else {
            self.store.clear(&actor).await;
            self.send(&actor, reply).await;
            return;
        };

        let request = EffectRequest::for_session(&session, terminal.policy, effect);
        if terminal.policy == ClearPolicy::BeforeDispatch {
            self.store.clear(&actor).await;
        }

        match self.dispatcher.dispatch(&request).await {
            Ok(_) => {
                if terminal.policy == ClearPolicy::AfterAcknowledgment {
                    self.store.clear(&actor).await;
                }
                if request.effect.kind() == EffectKind::ActivateRegistrant {
                    self.identity.invalidate(&actor).await;
                }
                self.send(&actor, reply).await;
            }
            Err(DispatchError::Transient { attempts, reason }) => {
                error!(
                    actor_id = %actor,
                    workflow = %session.workflow,
                    state = %session.state,
                    data = %session.data.redacted(),
                    attempts,
                    error = %reason,
                    "dispatch failed, awaiting retry confirmation"
                );
                self.park_for_retry(session, &reason).await;
            }
            Err(DispatchError::Permanent(reason)) => {
                error!(
                    actor_id = %actor,
                    workflow = %session.workflow,
                    state = %session.state,
                    data = %session.data.redacted(),
                    error = %reason,
                    "dispatch refused, session discarded"
                );
                if terminal.policy == ClearPolicy::AfterAcknowledgment {
                    self.store.clear(&actor).await;
                }
                self.send(
                    &actor,
                    Prompt::text(format!(
                        "This could not be saved: {reason}. Your entries were discarded."
                    )),
                )
                .await;
            }
        }
    }

    /// Keep the collected data and wait for the actor to confirm a retry.
    async fn park_for_retry(&self, mut session: ActorSession, reason: &str) {
        let terminal = session.state;
        let data = session.data.clone();
        session.advance(Step::AwaitingRetryConfirmation, data);
        session.pending_terminal = Some(terminal);
        self.persist_and_arm(&mut session).await;

        let prompt = self
            .registry
            .describe(session.workflow, Step::AwaitingRetryConfirmation)
            .prefixed(format!("Saving failed ({reason}). Your entries are kept."));
        self.send(&session.actor_id, prompt).await;
    }

    async fn open_session(
        &self,
        actor: &ActorId,
        workflow: Workflow,
        data: SessionData,
        now: DateTime<Utc>,
        seq: Option<u64>,
    ) {
        let definition = self.registry.definition(workflow);
        let mut session = ActorSession::start(
            actor.clone(),
            definition.role,
            workflow,
            definition.entry,
            data,
            now,
        );
        session.last_seq = seq;
        self.rejections.remove(actor);
        self.persist_and_arm(&mut session).await;

        info!(actor_id = %actor, workflow = %workflow, "workflow started");
        let prompt = self
            .registry
            .describe_with(workflow, definition.entry, &prompt_vars(&session.data));
        self.send(actor, prompt).await;
    }

    async fn persist_and_arm(&self, session: &mut ActorSession) {
        let window = self.window_for(session);
        self.store.set_with_ttl(session, window).await;
        self.supervisor.arm(
            session.actor_id.clone(),
            window,
            ArmedPosition::of(session),
        );
    }

    fn window_for(&self, session: &ActorSession) -> Duration {
        if session.state == Step::AwaitingApproval {
            self.timeouts.approval_window()
        } else {
            self.timeouts.window_for(session.workflow)
        }
    }

    /// Broadcast the subject's registration to every supervisor. Returns
    /// whether the prompt went out.
    async fn request_approval(&self, session: &ActorSession) -> bool {
        let phone = match &session.data {
            SessionData::Registration(d) => d.phone.clone().unwrap_or_default(),
            _ => String::new(),
        };
        let summary = format!(
            "New registration from {} (phone {}).",
            session.actor_id, phone
        );

        let targets = match self.identity.list_supervisors().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(actor_id = %session.actor_id, error = %e, "cannot list supervisors");
                return false;
            }
        };
        match self.approvals.broadcast(&session.actor_id, targets, summary).await {
            Ok(_) => true,
            Err(e) => {
                warn!(actor_id = %session.actor_id, error = %e, "approval not broadcast");
                false
            }
        }
    }

    async fn on_expired(&self, session: &ActorSession) {
        info!(
            actor_id = %session.actor_id,
            workflow = %session.workflow,
            state = %session.state,
            data = %session.data.redacted(),
            "expired session discarded"
        );
        if session.state == Step::AwaitingApproval {
            self.approvals.withdraw(&session.actor_id).await;
        }
        self.send(&session.actor_id, timeout_notice(session.workflow))
            .await;
    }

    fn context(&self, now: DateTime<Utc>) -> StepContext<'_> {
        StepContext {
            registry: &self.registry,
            media: self.media.as_ref(),
            catalog: self.business.as_ref(),
            now,
        }
    }

    async fn send(&self, to: &ActorId, prompt: Prompt) {
        let message = OutboundMessage {
            to: to.clone(),
            prompt,
        };
        if let Err(e) = self.transport.send(&message).await {
            warn!(actor_id = %to, error = %e, "failed to deliver reply");
        }
    }
}

fn input_key(input: &RawInput) -> Option<&str> {
    match input {
        RawInput::Choice { key } => Some(key.as_str()),
        RawInput::Text { text } => Some(text.trim()),
        _ => None,
    }
}

/// Only a picked choice counts as a decision; typed text that happens to
/// look like one belongs to the actor's own workflow.
fn approval_choice(input: &RawInput) -> Option<(Decision, ActorId)> {
    match input {
        RawInput::Choice { key } => parse_decision(key.trim()),
        _ => None,
    }
}

fn menu_selection(input: &RawInput) -> Option<Workflow> {
    let key = input_key(input)?;
    let name = key.strip_prefix(START_PREFIX).unwrap_or(key);
    name.parse().ok()
}

fn menu_label(workflow: Workflow) -> &'static str {
    match workflow {
        Workflow::DriverRoute => "Start a route",
        Workflow::WarehouseReceive => "Receive stock",
        Workflow::TaskReport => "Report a problem",
        Workflow::RemainsAdjustment => "Adjust remains",
        Workflow::Registration => "Register",
    }
}

fn idle_menu(profile: &ActorProfile) -> Prompt {
    let mut prompt = Prompt::text(format!(
        "Hello {}. What would you like to do?",
        profile.display_name
    ));
    for workflow in MENU_WORKFLOWS {
        if profile.has_role(workflow.role()) {
            prompt = prompt.with_choice(format!("{START_PREFIX}{workflow}"), menu_label(workflow));
        }
    }
    if prompt.choices.is_empty() {
        return Prompt::text(format!(
            "Hello {}. There is nothing for you to do right now.",
            profile.display_name
        ));
    }
    prompt
}
