// src/types/mod.rs - Moderation data model shared by every subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod errors;

pub use errors::{
    ActuatorError, ActuatorResult, ModerationError, ModerationResult, StoreError, StoreResult,
    StuckActionError, ValidationError,
};

pub type UserId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;

/// One inbound chat message as delivered by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub channel_id: ChannelId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub mentions: HashSet<UserId>,
}

impl Event {
    pub fn new(message_id: MessageId, author_id: UserId, channel_id: ChannelId, content: impl Into<String>) -> Self {
        Self {
            message_id,
            author_id,
            channel_id,
            content: content.into(),
            timestamp: Utc::now(),
            mentions: HashSet::new(),
        }
    }

    pub fn with_mentions<I: IntoIterator<Item = UserId>>(mut self, mentions: I) -> Self {
        self.mentions = mentions.into_iter().collect();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_ref(&self) -> EventRef {
        EventRef {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

/// Addresses a single message on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

/// Entry of the shared recent-activity window
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub author_id: UserId,
    pub normalized_content: String,
    pub is_shouting: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Literal, anchored on word boundaries
    Word,
    /// User supplied expression, used verbatim
    Regex,
}

/// A censor, invite or ping expression as registered by staff or users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub kind: PatternKind,
    pub expression: String,
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

impl PatternEntry {
    pub fn word(owner_id: Option<UserId>, expression: impl Into<String>) -> Self {
        Self { kind: PatternKind::Word, expression: expression.into(), owner_id }
    }

    pub fn regex(owner_id: Option<UserId>, expression: impl Into<String>) -> Self {
        Self { kind: PatternKind::Regex, expression: expression.into(), owner_id }
    }

    pub fn is_global(&self) -> bool {
        self.owner_id.is_none()
    }
}

/// Deferred reversal kinds understood by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Unmute,
    Unban,
    Unselfmute,
    RevertStatus,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Unmute => "UNMUTE",
            ActionKind::Unban => "UNBAN",
            ActionKind::Unselfmute => "UNSELFMUTE",
            ActionKind::RevertStatus => "REVERT_STATUS",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNMUTE" => Ok(ActionKind::Unmute),
            "UNBAN" => Ok(ActionKind::Unban),
            "UNSELFMUTE" => Ok(ActionKind::Unselfmute),
            "REVERT_STATUS" | "REMOVE_STATUS" => Ok(ActionKind::RevertStatus),
            _ => Err(ValidationError::UnknownAction(s.to_string())),
        }
    }
}

/// Lifecycle of a persisted action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    /// Claimed by a poll pass; never dispatched a second time
    Executing { started_at: DateTime<Utc> },
    /// Handler failed; waits for an operator
    Stuck { reason: String, since: DateTime<Utc> },
}

impl Default for ActionState {
    fn default() -> Self {
        ActionState::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: Uuid,
    pub due_at: DateTime<Utc>,
    pub kind: ActionKind,
    pub subject_id: UserId,
    pub dedup_tag: String,
    #[serde(default)]
    pub state: ActionState,
    pub created_at: DateTime<Utc>,
}

impl ScheduledAction {
    pub fn new(kind: ActionKind, subject_id: UserId, due_at: DateTime<Utc>, dedup_tag: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            due_at,
            kind,
            subject_id,
            dedup_tag: dedup_tag.into(),
            state: ActionState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ActionState::Pending)
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self.state, ActionState::Stuck { .. })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.due_at <= now
    }

    /// True when both actions target the same timer slot
    pub fn same_slot(&self, kind: ActionKind, subject_id: UserId) -> bool {
        self.kind == kind && self.subject_id == subject_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Clean,
    Warn,
    Sanction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    None,
    Repetition,
    Caps,
    Censored,
    InviteLink,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Reason::None => "none",
            Reason::Repetition => "repeatedly spamming similar messages",
            Reason::Caps => "repeatedly using caps",
            Reason::Censored => "using censored language",
            Reason::InviteLink => "posting an external invite link",
        };
        f.write_str(text)
    }
}

/// Classification of one event; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct SanctionDecision {
    pub verdict: Verdict,
    pub reason: Reason,
    pub matched_expression: Option<String>,
    /// Window count that produced the verdict
    pub score: usize,
}

impl SanctionDecision {
    pub fn clean() -> Self {
        Self { verdict: Verdict::Clean, reason: Reason::None, matched_expression: None, score: 0 }
    }

    pub fn warn(reason: Reason, score: usize) -> Self {
        Self { verdict: Verdict::Warn, reason, matched_expression: None, score }
    }

    pub fn sanction(reason: Reason, score: usize) -> Self {
        Self { verdict: Verdict::Sanction, reason, matched_expression: None, score }
    }

    pub fn is_clean(&self) -> bool {
        self.verdict == Verdict::Clean
    }
}

/// Staff-facing record of an automatic sanction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub subject_id: UserId,
    pub channel_id: ChannelId,
    pub reason: Reason,
    pub score: usize,
    pub threshold: usize,
    /// When the deferred reversal is due, if one was scheduled
    pub expires_at: Option<DateTime<Utc>>,
    /// False when the platform refused or failed the sanction
    pub applied: bool,
    pub recorded_at: DateTime<Utc>,
}
