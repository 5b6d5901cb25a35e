// src/bot/reversal.rs - Handlers that undo temporary sanctions when their action comes due

use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::bot::scheduler::ActionExecutor;
use crate::platforms::{bounded, Actuator};
use crate::types::{ActionKind, ActuatorResult, ScheduledAction};

/// Executes scheduled reversals through the platform actuator.
///
/// Each handler reads the current state first and treats "already reversed"
/// as success, since moderators may have undone the sanction by hand.
pub struct ReversalHandlers {
    actuator: Arc<dyn Actuator>,
    call_timeout: Duration,
}

impl ReversalHandlers {
    pub fn new(actuator: Arc<dyn Actuator>, call_timeout: Duration) -> Self {
        Self { actuator, call_timeout }
    }

    async fn unmute(&self, action: &ScheduledAction) -> ActuatorResult<()> {
        let subject = action.subject_id;
        if !bounded(self.call_timeout, self.actuator.is_muted(subject)).await? {
            debug!("User {} is no longer muted, nothing to reverse", subject);
            return Ok(());
        }
        bounded(self.call_timeout, self.actuator.remove_mute(subject)).await?;
        info!("Unmuted user {}", subject);
        Ok(())
    }

    async fn unban(&self, action: &ScheduledAction) -> ActuatorResult<()> {
        let subject = action.subject_id;
        if !bounded(self.call_timeout, self.actuator.is_banned(subject)).await? {
            debug!("User {} is no longer banned, nothing to reverse", subject);
            return Ok(());
        }
        bounded(self.call_timeout, self.actuator.unban(subject)).await?;
        info!("Unbanned user {}", subject);
        Ok(())
    }

    async fn unselfmute(&self, action: &ScheduledAction) -> ActuatorResult<()> {
        let subject = action.subject_id;
        if !bounded(self.call_timeout, self.actuator.is_self_muted(subject)).await? {
            debug!("User {} already lifted their self-mute", subject);
            return Ok(());
        }
        bounded(self.call_timeout, self.actuator.remove_self_mute(subject)).await?;
        info!("Removed self-mute for user {}", subject);
        Ok(())
    }

    async fn revert_status(&self) -> ActuatorResult<()> {
        bounded(self.call_timeout, self.actuator.clear_status()).await?;
        info!("Reverted bot status");
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for ReversalHandlers {
    async fn execute(&self, action: &ScheduledAction) -> ActuatorResult<()> {
        match action.kind {
            ActionKind::Unmute => self.unmute(action).await,
            ActionKind::Unban => self.unban(action).await,
            ActionKind::Unselfmute => self.unselfmute(action).await,
            ActionKind::RevertStatus => self.revert_status().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::scheduler::SELF_SUBJECT;
    use crate::platforms::memory::{ActuatorCall, InMemoryActuator};
    use crate::types::ActuatorError;
    use chrono::Utc;

    fn handlers(actuator: Arc<InMemoryActuator>) -> ReversalHandlers {
        ReversalHandlers::new(actuator, Duration::from_secs(1))
    }

    fn action(kind: ActionKind, subject: u64) -> ScheduledAction {
        ScheduledAction::new(kind, subject, Utc::now(), "test")
    }

    #[tokio::test]
    async fn test_unmute_removes_role() {
        let actuator = Arc::new(InMemoryActuator::new());
        actuator.mark_muted(5).await;

        handlers(actuator.clone()).execute(&action(ActionKind::Unmute, 5)).await.unwrap();
        assert!(!actuator.is_muted_now(5).await);
        assert_eq!(actuator.calls().await, vec![ActuatorCall::RemoveMute(5)]);
    }

    #[tokio::test]
    async fn test_already_reversed_is_success_without_calls() {
        let actuator = Arc::new(InMemoryActuator::new());
        let handlers = handlers(actuator.clone());

        handlers.execute(&action(ActionKind::Unmute, 5)).await.unwrap();
        handlers.execute(&action(ActionKind::Unban, 5)).await.unwrap();
        handlers.execute(&action(ActionKind::Unselfmute, 5)).await.unwrap();
        assert!(actuator.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_unban_and_unselfmute() {
        let actuator = Arc::new(InMemoryActuator::new());
        actuator.mark_banned(8).await;
        actuator.mark_self_muted(9).await;
        let handlers = handlers(actuator.clone());

        handlers.execute(&action(ActionKind::Unban, 8)).await.unwrap();
        handlers.execute(&action(ActionKind::Unselfmute, 9)).await.unwrap();
        assert_eq!(
            actuator.calls().await,
            vec![ActuatorCall::Unban(8), ActuatorCall::RemoveSelfMute(9)]
        );
    }

    #[tokio::test]
    async fn test_status_revert_clears_status() {
        let actuator = Arc::new(InMemoryActuator::new());
        actuator.set_status("Watching the exams").await;

        handlers(actuator.clone())
            .execute(&action(ActionKind::RevertStatus, SELF_SUBJECT))
            .await
            .unwrap();
        assert_eq!(actuator.status().await, None);
    }

    #[tokio::test]
    async fn test_departed_subject_fails() {
        let actuator = Arc::new(InMemoryActuator::new());
        actuator.mark_muted(3).await;
        actuator.mark_departed(3).await;

        let err = handlers(actuator).execute(&action(ActionKind::Unmute, 3)).await.unwrap_err();
        assert!(matches!(err, ActuatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_slow_platform_times_out() {
        let actuator = Arc::new(InMemoryActuator::new());
        actuator.mark_muted(1).await;
        actuator.stall_for(Some(Duration::from_millis(200))).await;

        let handlers = ReversalHandlers::new(actuator, Duration::from_millis(20));
        let err = handlers.execute(&action(ActionKind::Unmute, 1)).await.unwrap_err();
        assert!(matches!(err, ActuatorError::TimedOut(_)));
    }
}
