//! Conversational transport: delivers prompts and yields raw actor input.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::session::{ActorId, InboundMessage, OutboundMessage, RawInput};
use crate::workflows::parse_decimal;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("delivery to {to} failed: {reason}")]
    Delivery { to: ActorId, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Next inbound message, `None` once the transport has shut down.
    async fn next_input(&self) -> Result<Option<InboundMessage>, TransportError>;

    /// Number `actor`'s next input after `last_seq`. Called for sessions
    /// recovered from the store, whose inputs were numbered by an earlier run.
    fn resume_after(&self, _actor: &ActorId, _last_seq: u64) {}
}

/// Parse one console line. `@actor` switches the speaking actor; the rest is
/// `photo:<id>`, `loc:<lat>,<lon>`, `choose:<key>`, `cancel` or plain text.
pub fn parse_console_line(line: &str) -> (Option<ActorId>, Option<RawInput>) {
    let mut rest = line.trim();
    let mut actor = None;

    if let Some(tagged) = rest.strip_prefix('@') {
        let (name, tail) = tagged.split_once(char::is_whitespace).unwrap_or((tagged, ""));
        if !name.is_empty() {
            actor = Some(ActorId::new(name));
        }
        rest = tail.trim();
    }

    if rest.is_empty() {
        return (actor, None);
    }

    let input = if let Some(id) = rest.strip_prefix("photo:") {
        RawInput::photo(id.trim())
    } else if let Some(key) = rest.strip_prefix("choose:") {
        RawInput::choice(key.trim())
    } else if let Some(coords) = rest.strip_prefix("loc:") {
        match coords.split_once(',') {
            Some((lat, lon)) => match (parse_decimal(lat), parse_decimal(lon)) {
                (Some(lat), Some(lon)) => RawInput::location(lat, lon),
                _ => RawInput::text(rest),
            },
            None => RawInput::text(rest),
        }
    } else if rest.eq_ignore_ascii_case("cancel") {
        RawInput::choice("cancel")
    } else {
        RawInput::text(rest)
    };

    (actor, Some(input))
}

/// Line-based transport over stdin/stdout for demos.
pub struct ConsoleTransport {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    current: Mutex<ActorId>,
    sequences: DashMap<ActorId, u64>,
}

impl ConsoleTransport {
    pub fn new(initial_actor: ActorId) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            current: Mutex::new(initial_actor),
            sequences: DashMap::new(),
        }
    }

    fn next_seq(&self, actor: &ActorId) -> u64 {
        let mut seq = self.sequences.entry(actor.clone()).or_insert(0);
        *seq += 1;
        *seq
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let mut out = format!("[{}] {}\n", message.to, message.prompt.text);
        for choice in &message.prompt.choices {
            out.push_str(&format!("    choose:{}  ({})\n", choice.key, choice.label));
        }

        let mut stdout = tokio::io::stdout();
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn next_input(&self) -> Result<Option<InboundMessage>, TransportError> {
        loop {
            let line = {
                let mut lines = self.lines.lock().await;
                lines.next_line().await?
            };
            let Some(line) = line else {
                return Ok(None);
            };

            let (switch_to, input) = parse_console_line(&line);
            let mut current = self.current.lock().await;
            if let Some(actor) = switch_to {
                *current = actor;
            }
            if let Some(input) = input {
                let actor = current.clone();
                let seq = self.next_seq(&actor);
                return Ok(Some(InboundMessage::new(actor, seq, input)));
            }
        }
    }

    fn resume_after(&self, actor: &ActorId, last_seq: u64) {
        let mut seq = self.sequences.entry(actor.clone()).or_insert(0);
        *seq = (*seq).max(last_seq);
    }
}
