//! Approval broadcast
//!
//! A decision any one of several supervisors may make. Every target receives
//! the same prompt; the first `resolve` wins through a single compare-and-set
//! on the approval's resolution slot, and every later caller is told who got
//! there first. Losers never block and never queue.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ApprovalConfig;
use crate::external::Transport;
use crate::observability::flow_metrics;
use crate::session::{ActorId, OutboundMessage};
use crate::workflows::{Decision, Prompt};

pub const APPROVE_PREFIX: &str = "approve:";
pub const REJECT_PREFIX: &str = "reject:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("no pending approval for {0}")]
    NotFound(ActorId),

    #[error("{target} was not asked to decide on {subject}")]
    NotATarget { subject: ActorId, target: ActorId },

    #[error("already resolved by {by} ({decision})")]
    AlreadyResolved { by: ActorId, decision: Decision },

    #[error("nobody is available to decide on {0}")]
    NoTargets(ActorId),

    #[error("{0} is not a decision a supervisor can make")]
    InvalidDecision(Decision),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    pub resolved_by: ActorId,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PendingApproval {
    pub subject: ActorId,
    pub targets: Vec<ActorId>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    resolution: OnceLock<Resolution>,
}

impl PendingApproval {
    fn new(subject: ActorId, targets: Vec<ActorId>, summary: String) -> Self {
        Self {
            subject,
            targets,
            summary,
            created_at: Utc::now(),
            resolution: OnceLock::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.get().is_some()
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.get()
    }

    /// Record `resolution` unless someone already did. On loss, returns the
    /// winning resolution.
    fn try_resolve(&self, resolution: Resolution) -> Result<(), Resolution> {
        match self.resolution.set(resolution) {
            Ok(()) => Ok(()),
            Err(ours) => Err(self.resolution.get().cloned().unwrap_or(ours)),
        }
    }
}

/// Parse a supervisor's `approve:<subject>` / `reject:<subject>` choice.
pub fn parse_decision(key: &str) -> Option<(Decision, ActorId)> {
    let key = key.trim();
    let (decision, subject) = if let Some(subject) = key.strip_prefix(APPROVE_PREFIX) {
        (Decision::Approve, subject)
    } else if let Some(subject) = key.strip_prefix(REJECT_PREFIX) {
        (Decision::Reject, subject)
    } else {
        return None;
    };

    let subject = subject.trim();
    if subject.is_empty() {
        return None;
    }
    Some((decision, ActorId::new(subject)))
}

pub struct ApprovalBroadcast {
    pending: DashMap<ActorId, Arc<PendingApproval>>,
    /// Recently resolved approvals, kept so late answers can be told who won.
    history: DashMap<ActorId, Arc<PendingApproval>>,
    transport: Arc<dyn Transport>,
    retention: Duration,
}

impl ApprovalBroadcast {
    pub fn new(transport: Arc<dyn Transport>, config: &ApprovalConfig) -> Self {
        Self {
            pending: DashMap::new(),
            history: DashMap::new(),
            transport,
            retention: Duration::from_secs(config.history_retention_secs),
        }
    }

    /// Create a pending approval for `subject` and deliver the decision
    /// prompt to every target. Broadcasting again for an unresolved subject
    /// re-sends the prompt without creating a second approval.
    pub async fn broadcast(
        &self,
        subject: &ActorId,
        targets: Vec<ActorId>,
        summary: impl Into<String>,
    ) -> Result<Arc<PendingApproval>, ApprovalError> {
        if targets.is_empty() {
            return Err(ApprovalError::NoTargets(subject.clone()));
        }

        let approval = self
            .pending
            .entry(subject.clone())
            .or_insert_with(|| {
                Arc::new(PendingApproval::new(subject.clone(), targets, summary.into()))
            })
            .value()
            .clone();
        self.history.remove(subject);

        let prompt = Prompt::text(approval.summary.clone())
            .with_choice(format!("{APPROVE_PREFIX}{subject}"), "Approve")
            .with_choice(format!("{REJECT_PREFIX}{subject}"), "Reject");
        for target in &approval.targets {
            self.deliver(target, prompt.clone()).await;
        }

        info!(
            subject = %subject,
            targets = approval.targets.len(),
            "approval broadcast"
        );
        Ok(approval)
    }

    /// First caller wins. Everyone else gets `AlreadyResolved` naming the
    /// winner.
    pub async fn resolve(
        &self,
        subject: &ActorId,
        target: &ActorId,
        decision: Decision,
    ) -> Result<Resolution, ApprovalError> {
        if decision == Decision::Withdrawn {
            return Err(ApprovalError::InvalidDecision(decision));
        }

        let approval = self.lookup(subject)?;
        if !approval.targets.contains(target) {
            return Err(ApprovalError::NotATarget {
                subject: subject.clone(),
                target: target.clone(),
            });
        }

        self.settle(approval, target, decision).await
    }

    /// The subject gave up before anyone decided.
    pub async fn withdraw(&self, subject: &ActorId) -> Option<Resolution> {
        let approval = self.pending.get(subject).map(|a| a.value().clone())?;
        self.settle(approval, subject, Decision::Withdrawn).await.ok()
    }

    pub fn is_pending(&self, subject: &ActorId) -> bool {
        self.pending.contains_key(subject)
    }

    pub fn pending_subjects(&self) -> Vec<ActorId> {
        let mut subjects: Vec<ActorId> = self.pending.iter().map(|a| a.key().clone()).collect();
        subjects.sort();
        subjects
    }

    /// Drop resolved approvals older than the retention window.
    pub fn prune_history(&self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = ChronoDuration::from_std(self.retention) else {
            return 0;
        };
        let before = self.history.len();
        self.history.retain(|_, approval| {
            approval
                .resolution()
                .is_some_and(|r| now - r.resolved_at < retention)
        });
        before - self.history.len()
    }

    fn lookup(&self, subject: &ActorId) -> Result<Arc<PendingApproval>, ApprovalError> {
        if let Some(approval) = self.pending.get(subject) {
            return Ok(approval.value().clone());
        }
        match self.history.get(subject).and_then(|a| a.resolution().cloned()) {
            Some(winner) => Err(ApprovalError::AlreadyResolved {
                by: winner.resolved_by,
                decision: winner.decision,
            }),
            None => Err(ApprovalError::NotFound(subject.clone())),
        }
    }

    async fn settle(
        &self,
        approval: Arc<PendingApproval>,
        by: &ActorId,
        decision: Decision,
    ) -> Result<Resolution, ApprovalError> {
        let resolution = Resolution {
            decision,
            resolved_by: by.clone(),
            resolved_at: Utc::now(),
        };

        if let Err(winner) = approval.try_resolve(resolution.clone()) {
            flow_metrics().record_approval_lost();
            debug!(
                subject = %approval.subject,
                loser = %by,
                winner = %winner.resolved_by,
                "approval already resolved"
            );
            return Err(ApprovalError::AlreadyResolved {
                by: winner.resolved_by,
                decision: winner.decision,
            });
        }

        self.pending
            .remove_if(&approval.subject, |_, current| Arc::ptr_eq(current, &approval));
        self.history
            .insert(approval.subject.clone(), approval.clone());
        flow_metrics().record_approval_resolved();
        info!(
            subject = %approval.subject,
            resolved_by = %by,
            decision = %decision,
            "approval resolved"
        );

        let notice = Prompt::text(format!(
            "Request from {} was {} by {}.",
            approval.subject, decision, by
        ));
        for target in approval.targets.iter().filter(|t| *t != by) {
            self.deliver(target, notice.clone()).await;
        }

        Ok(resolution)
    }

    async fn deliver(&self, to: &ActorId, prompt: Prompt) {
        let message = OutboundMessage {
            to: to.clone(),
            prompt,
        };
        if let Err(e) = self.transport.send(&message).await {
            warn!(to = %to, error = %e, "failed to deliver approval message");
        }
    }
}
