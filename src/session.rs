//! Per-actor conversational session and the inputs that drive it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::workflows::{Prompt, Role, SessionData, Step, Workflow};

/// Stable external identity of one actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Key under which a completed run's side effect is committed. Derived from
/// actor, workflow and start time so a re-dispatch of the same run reuses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(actor: &ActorId, workflow: Workflow, started_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}:{}:{}",
            actor,
            workflow,
            started_at.timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw input as delivered by the transport, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawInput {
    Text { text: String },
    Photo { attachment_id: String },
    Location { latitude: f64, longitude: f64 },
    Choice { key: String },
}

impl RawInput {
    pub fn text(text: impl Into<String>) -> Self {
        RawInput::Text { text: text.into() }
    }

    pub fn photo(attachment_id: impl Into<String>) -> Self {
        RawInput::Photo {
            attachment_id: attachment_id.into(),
        }
    }

    pub fn choice(key: impl Into<String>) -> Self {
        RawInput::Choice { key: key.into() }
    }

    pub fn location(latitude: f64, longitude: f64) -> Self {
        RawInput::Location {
            latitude,
            longitude,
        }
    }
}

/// One delivery from the transport. `seq` increases per actor; duplicates
/// and stale deliveries carry a `seq` at or below the last accepted one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub actor_id: ActorId,
    pub seq: u64,
    pub input: RawInput,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(actor_id: ActorId, seq: u64, input: RawInput) -> Self {
        Self {
            actor_id,
            seq,
            input,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: ActorId,
    pub prompt: Prompt,
}

/// The one non-idle session an actor may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSession {
    pub actor_id: ActorId,
    pub role: Role,
    pub workflow: Workflow,
    pub state: Step,
    pub data: SessionData,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Bumped on every accepted transition; timers compare against it.
    pub revision: u64,
    pub last_seq: Option<u64>,
    /// Terminal state whose dispatch failed and awaits a retry confirmation.
    #[serde(default)]
    pub pending_terminal: Option<Step>,
}

impl ActorSession {
    pub fn start(
        actor_id: ActorId,
        role: Role,
        workflow: Workflow,
        entry: Step,
        data: SessionData,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id,
            role,
            workflow,
            state: entry,
            data,
            started_at: now,
            expires_at: None,
            revision: 0,
            last_seq: None,
            pending_terminal: None,
        }
    }

    /// Move to `next` with `data`, bumping the revision.
    pub fn advance(&mut self, next: Step, data: SessionData) {
        self.state = next;
        self.data = data;
        self.revision += 1;
    }

    pub fn arm_expiry(&mut self, now: DateTime<Utc>, window: Duration) {
        self.expires_at = ChronoDuration::from_std(window)
            .ok()
            .and_then(|w| now.checked_add_signed(w));
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Time left before expiry, zero when already past.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(&self.actor_id, self.workflow, self.started_at)
    }

    /// Whether `seq` was already seen for this session.
    pub fn has_seen(&self, seq: u64) -> bool {
        self.last_seq.is_some_and(|last| seq <= last)
    }
}
