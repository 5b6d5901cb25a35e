// src/platforms/memory.rs - In-process actuator and notifier for hosts without a live platform

use async_trait::async_trait;
use log::{error, info};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{Actuator, OperatorNotifier};
use crate::types::{
    ActuatorError, ActuatorResult, AuditRecord, ChannelId, EventRef, StuckActionError, UserId,
};

/// Every outward call the actuator received, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    ApplyMute(UserId),
    RemoveMute(UserId),
    ApplyBan(UserId),
    Unban(UserId),
    RemoveSelfMute(UserId),
    ClearStatus,
    Delete(EventRef),
    Redact(EventRef, String),
    Notice(ChannelId, String),
    Direct(UserId, String),
}

#[derive(Debug, Default)]
struct PlatformState {
    muted: HashSet<UserId>,
    banned: HashSet<UserId>,
    self_muted: HashSet<UserId>,
    departed: HashSet<UserId>,
    status: Option<String>,
    calls: Vec<ActuatorCall>,
}

/// Tracks platform state in memory. Failures and delays can be injected.
#[derive(Debug, Default)]
pub struct InMemoryActuator {
    state: RwLock<PlatformState>,
    failure: RwLock<Option<ActuatorError>>,
    delay: RwLock<Option<Duration>>,
}

impl InMemoryActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every mutating call fail with `error` until cleared with `None`
    pub async fn fail_with(&self, error: Option<ActuatorError>) {
        *self.failure.write().await = error;
    }

    /// Stall every call for `delay` before answering
    pub async fn stall_for(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    pub async fn mark_muted(&self, subject: UserId) {
        self.state.write().await.muted.insert(subject);
    }

    pub async fn mark_banned(&self, subject: UserId) {
        self.state.write().await.banned.insert(subject);
    }

    pub async fn mark_self_muted(&self, subject: UserId) {
        self.state.write().await.self_muted.insert(subject);
    }

    /// The subject left the community and can no longer be resolved
    pub async fn mark_departed(&self, subject: UserId) {
        self.state.write().await.departed.insert(subject);
    }

    pub async fn set_status(&self, status: impl Into<String>) {
        self.state.write().await.status = Some(status.into());
    }

    pub async fn status(&self) -> Option<String> {
        self.state.read().await.status.clone()
    }

    pub async fn calls(&self) -> Vec<ActuatorCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn is_muted_now(&self, subject: UserId) -> bool {
        self.state.read().await.muted.contains(&subject)
    }

    async fn gate(&self) -> ActuatorResult<()> {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.read().await.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn resolve(&self, subject: UserId) -> ActuatorResult<()> {
        if self.state.read().await.departed.contains(&subject) {
            Err(ActuatorError::NotFound(format!("user {}", subject)))
        } else {
            Ok(())
        }
    }

    async fn mutate<F>(&self, subject: Option<UserId>, call: ActuatorCall, apply: F) -> ActuatorResult<()>
    where
        F: FnOnce(&mut PlatformState) + Send,
    {
        self.gate().await?;
        if let Some(subject) = subject {
            self.resolve(subject).await?;
        }
        let mut state = self.state.write().await;
        apply(&mut state);
        state.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl Actuator for InMemoryActuator {
    async fn apply_mute(&self, subject: UserId) -> ActuatorResult<()> {
        self.mutate(Some(subject), ActuatorCall::ApplyMute(subject), |s| {
            s.muted.insert(subject);
        })
        .await
    }

    async fn remove_mute(&self, subject: UserId) -> ActuatorResult<()> {
        self.mutate(Some(subject), ActuatorCall::RemoveMute(subject), |s| {
            s.muted.remove(&subject);
        })
        .await
    }

    async fn is_muted(&self, subject: UserId) -> ActuatorResult<bool> {
        self.resolve(subject).await?;
        Ok(self.state.read().await.muted.contains(&subject))
    }

    async fn apply_ban(&self, subject: UserId) -> ActuatorResult<()> {
        self.mutate(Some(subject), ActuatorCall::ApplyBan(subject), |s| {
            s.banned.insert(subject);
        })
        .await
    }

    async fn unban(&self, subject: UserId) -> ActuatorResult<()> {
        // Banned users are not members, so no departure check here
        self.mutate(None, ActuatorCall::Unban(subject), |s| {
            s.banned.remove(&subject);
        })
        .await
    }

    async fn is_banned(&self, subject: UserId) -> ActuatorResult<bool> {
        Ok(self.state.read().await.banned.contains(&subject))
    }

    async fn remove_self_mute(&self, subject: UserId) -> ActuatorResult<()> {
        self.mutate(Some(subject), ActuatorCall::RemoveSelfMute(subject), |s| {
            s.self_muted.remove(&subject);
        })
        .await
    }

    async fn is_self_muted(&self, subject: UserId) -> ActuatorResult<bool> {
        self.resolve(subject).await?;
        Ok(self.state.read().await.self_muted.contains(&subject))
    }

    async fn clear_status(&self) -> ActuatorResult<()> {
        self.mutate(None, ActuatorCall::ClearStatus, |s| s.status = None).await
    }

    async fn delete_message(&self, event: &EventRef) -> ActuatorResult<()> {
        self.mutate(None, ActuatorCall::Delete(*event), |_| {}).await
    }

    async fn redact_message(&self, event: &EventRef, new_text: &str) -> ActuatorResult<()> {
        let call = ActuatorCall::Redact(*event, new_text.to_string());
        self.mutate(None, call, |_| {}).await
    }

    async fn send_notice(&self, channel: ChannelId, text: &str) -> ActuatorResult<()> {
        info!("[notice #{}] {}", channel, text);
        self.mutate(None, ActuatorCall::Notice(channel, text.to_string()), |_| {}).await
    }

    async fn send_direct(&self, subject: UserId, text: &str) -> ActuatorResult<()> {
        info!("[direct @{}] {}", subject, text);
        self.mutate(Some(subject), ActuatorCall::Direct(subject, text.to_string()), |_| {})
            .await
    }
}

/// Logs operator reports and keeps them for inspection
#[derive(Debug, Default)]
pub struct LogNotifier {
    stuck: RwLock<Vec<StuckActionError>>,
    audits: RwLock<Vec<AuditRecord>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stuck_reports(&self) -> Vec<StuckActionError> {
        self.stuck.read().await.clone()
    }

    pub async fn audits(&self) -> Vec<AuditRecord> {
        self.audits.read().await.clone()
    }
}

#[async_trait]
impl OperatorNotifier for LogNotifier {
    async fn report_stuck_action(&self, error: &StuckActionError) {
        error!("Operator attention required: {}", error);
        self.stuck.write().await.push(error.clone());
    }

    async fn report_sanction(&self, record: &AuditRecord) {
        match record.expires_at {
            Some(expires_at) => info!(
                "Audit: user {} muted in channel {} for {} (score {}/{}), expires {}",
                record.subject_id, record.channel_id, record.reason, record.score, record.threshold, expires_at
            ),
            None => info!(
                "Audit: sanction for user {} in channel {} for {} (score {}/{}), applied: {}",
                record.subject_id, record.channel_id, record.reason, record.score, record.threshold, record.applied
            ),
        }
        self.audits.write().await.push(record.clone());
    }
}
