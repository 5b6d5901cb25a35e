use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::types::{
    ActuatorError, ActuatorResult, AuditRecord, ChannelId, EventRef, StuckActionError, UserId,
};

pub mod memory;

/// Outward calls into the chat platform. Implemented by the host.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn apply_mute(&self, subject: UserId) -> ActuatorResult<()>;

    async fn remove_mute(&self, subject: UserId) -> ActuatorResult<()>;

    /// Current mute state, `NotFound` if the subject cannot be resolved
    async fn is_muted(&self, subject: UserId) -> ActuatorResult<bool>;

    async fn apply_ban(&self, subject: UserId) -> ActuatorResult<()>;

    async fn unban(&self, subject: UserId) -> ActuatorResult<()>;

    async fn is_banned(&self, subject: UserId) -> ActuatorResult<bool>;

    async fn remove_self_mute(&self, subject: UserId) -> ActuatorResult<()>;

    async fn is_self_muted(&self, subject: UserId) -> ActuatorResult<bool>;

    /// Reset the bot's custom status; clearing an empty status succeeds
    async fn clear_status(&self) -> ActuatorResult<()>;

    async fn delete_message(&self, event: &EventRef) -> ActuatorResult<()>;

    /// Re-post the message with its content replaced
    async fn redact_message(&self, event: &EventRef, new_text: &str) -> ActuatorResult<()>;

    async fn send_notice(&self, channel: ChannelId, text: &str) -> ActuatorResult<()>;

    async fn send_direct(&self, subject: UserId, text: &str) -> ActuatorResult<()>;
}

/// Surfaces events that need human attention
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn report_stuck_action(&self, error: &StuckActionError);

    async fn report_sanction(&self, record: &AuditRecord);
}

/// Capability check supplied by the host (staff, bots, trusted identities)
pub trait ExemptionPolicy: Send + Sync {
    fn is_exempt(&self, author: UserId) -> bool;
}

/// Exemptions from a fixed id list, usually `exempt_user_ids` from the config
#[derive(Debug, Clone, Default)]
pub struct StaticExemptions {
    ids: HashSet<UserId>,
}

impl StaticExemptions {
    pub fn new<I: IntoIterator<Item = UserId>>(ids: I) -> Self {
        Self { ids: ids.into_iter().collect() }
    }
}

impl ExemptionPolicy for StaticExemptions {
    fn is_exempt(&self, author: UserId) -> bool {
        self.ids.contains(&author)
    }
}

/// Run a platform call with an upper bound; expiry counts as a failure
pub async fn bounded<T, F>(limit: Duration, call: F) -> ActuatorResult<T>
where
    F: Future<Output = ActuatorResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ActuatorError::TimedOut(limit)),
    }
}
