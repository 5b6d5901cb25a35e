// src/bot/orchestrator.rs - Event pipeline: censor, invite check, abuse detection, pings

use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::bot::moderation::AbuseDetector;
use crate::bot::pattern_matching::PatternSet;
use crate::bot::pings::{compose_alert, PingContext};
use crate::bot::reversal::ReversalHandlers;
use crate::bot::scheduler::{ActionScheduler, PassReport};
use crate::config::ModerationConfig;
use crate::platforms::{bounded, Actuator, ExemptionPolicy, OperatorNotifier};
use crate::storage::Store;
use crate::types::{
    ActionKind, AuditRecord, ChannelId, Event, ModerationResult, PatternEntry, Reason,
    SanctionDecision, ScheduledAction, UserId, Verdict,
};

/// What happened to one event
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Exempt author or nothing to evaluate
    Ignored,
    Censored {
        matched: Vec<PatternEntry>,
        redacted: String,
    },
    InviteRemoved,
    Warned {
        reason: Reason,
        pings_sent: usize,
    },
    Sanctioned {
        decision: SanctionDecision,
        unmute: ScheduledAction,
    },
    Clean {
        pings_sent: usize,
    },
}

#[derive(Debug, Default)]
pub struct StartupReport {
    pub patterns_loaded: usize,
    pub recovery: PassReport,
}

/// State touched by every event; one event holds it at a time
struct HotPath {
    detector: AbuseDetector,
    context: PingContext,
}

pub struct ModerationOrchestrator {
    config: ModerationConfig,
    patterns: Arc<PatternSet>,
    scheduler: Arc<ActionScheduler>,
    actuator: Arc<dyn Actuator>,
    notifier: Arc<dyn OperatorNotifier>,
    exemptions: Arc<dyn ExemptionPolicy>,
    hot_path: Mutex<HotPath>,
}

impl ModerationOrchestrator {
    pub fn new(
        config: ModerationConfig,
        store: Arc<dyn Store>,
        actuator: Arc<dyn Actuator>,
        notifier: Arc<dyn OperatorNotifier>,
        exemptions: Arc<dyn ExemptionPolicy>,
    ) -> Self {
        let patterns = Arc::new(PatternSet::new(&config.invites).with_store(store.clone()));
        let handlers = Arc::new(ReversalHandlers::new(
            actuator.clone(),
            config.sanctions.actuator_timeout(),
        ));
        let scheduler = Arc::new(ActionScheduler::new(
            &config.scheduler,
            store,
            handlers,
            notifier.clone(),
        ));
        let hot_path = HotPath {
            detector: AbuseDetector::new(config.detection.clone(), exemptions.clone()),
            context: PingContext::new(config.pings.context_messages, config.pings.context_max_age()),
        };

        Self {
            config,
            patterns,
            scheduler,
            actuator,
            notifier,
            exemptions,
            hot_path: Mutex::new(hot_path),
        }
    }

    pub fn patterns(&self) -> &Arc<PatternSet> {
        &self.patterns
    }

    pub fn scheduler(&self) -> &Arc<ActionScheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    /// Load patterns from the store, run the scheduler's recovery pass and start its loop
    pub async fn on_startup(&self) -> ModerationResult<StartupReport> {
        let patterns_loaded = self.patterns.load().await?;
        let recovery = self.scheduler.start().await?;
        info!(
            "Moderation core started: {} patterns, {} overdue action(s) completed",
            patterns_loaded,
            recovery.completed.len()
        );
        Ok(StartupReport {
            patterns_loaded,
            recovery,
        })
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    fn call_timeout(&self) -> Duration {
        self.config.sanctions.actuator_timeout()
    }

    fn is_moderated(&self, channel: ChannelId) -> bool {
        !self.config.unmoderated_channel_ids.contains(&channel)
    }

    /// Process one inbound message. Calls are serialised so the activity
    /// window sees messages in arrival order.
    pub async fn on_event(&self, event: &Event) -> ModerationResult<EventOutcome> {
        let mut hot = self.hot_path.lock().await;

        if self.exemptions.is_exempt(event.author_id) || event.content.trim().is_empty() {
            return Ok(EventOutcome::Ignored);
        }
        debug!("Evaluating message {} from user {}: {}", event.event_ref(), event.author_id, event.content);

        let mut warned = None;
        if self.is_moderated(event.channel_id) {
            let matched = self.patterns.match_censor(&event.content).await;
            if !matched.is_empty() {
                return self.censor(event, matched).await;
            }

            if self.patterns.is_invite_link(&event.content) {
                return self.remove_invite(event).await;
            }

            let decision = hot.detector.evaluate(event);
            match decision.verdict {
                Verdict::Sanction => {
                    let threshold = hot.detector.threshold_for(&decision);
                    return self.sanction(event, decision, threshold).await;
                }
                Verdict::Warn => {
                    self.warn(event, decision.reason).await;
                    warned = Some(decision.reason);
                }
                Verdict::Clean => {}
            }
        }

        let pings_sent = self.forward_pings(&mut hot.context, event).await;
        Ok(match warned {
            Some(reason) => EventOutcome::Warned { reason, pings_sent },
            None => EventOutcome::Clean { pings_sent },
        })
    }

    /// Re-check an edited message. Edits only go through the censor and
    /// invite checks; the author is told privately why the message vanished.
    pub async fn on_edit(&self, event: &Event) -> ModerationResult<EventOutcome> {
        let _hot = self.hot_path.lock().await;

        if self.exemptions.is_exempt(event.author_id)
            || event.content.trim().is_empty()
            || !self.is_moderated(event.channel_id)
        {
            return Ok(EventOutcome::Ignored);
        }

        let matched = self.patterns.match_censor(&event.content).await;
        if !matched.is_empty() {
            bounded(self.call_timeout(), self.actuator.delete_message(&event.event_ref())).await?;
            self.direct(
                event.author_id,
                "You recently edited a message, but it **contained a censored word**! \
                 It has been deleted. Please do not edit inappropriate words into your messages.",
            )
            .await;
            let redacted = self.patterns.redact(&event.content).await;
            return Ok(EventOutcome::Censored { matched, redacted });
        }

        if self.patterns.is_invite_link(&event.content) {
            bounded(self.call_timeout(), self.actuator.delete_message(&event.event_ref())).await?;
            self.direct(
                event.author_id,
                "You recently edited a message, but it **contained a link to another Discord server**! \
                 It has been deleted. Please do not edit invite links into your messages.",
            )
            .await;
            return Ok(EventOutcome::InviteRemoved);
        }

        Ok(EventOutcome::Clean { pings_sent: 0 })
    }

    async fn censor(&self, event: &Event, matched: Vec<PatternEntry>) -> ModerationResult<EventOutcome> {
        let redacted = self.patterns.redact(&event.content).await;
        info!(
            "Censoring message {} from user {} ({} pattern(s) matched)",
            event.event_ref(),
            event.author_id,
            matched.len()
        );

        let event_ref = event.event_ref();
        bounded(self.call_timeout(), self.actuator.delete_message(&event_ref)).await?;
        bounded(self.call_timeout(), self.actuator.redact_message(&event_ref, &redacted)).await?;
        Ok(EventOutcome::Censored { matched, redacted })
    }

    async fn remove_invite(&self, event: &Event) -> ModerationResult<EventOutcome> {
        info!("Removing invite link posted by user {} in {}", event.author_id, event.event_ref());
        bounded(self.call_timeout(), self.actuator.delete_message(&event.event_ref())).await?;
        self.notice(
            event.channel_id,
            "*Links to external Discord servers can not be sent here. \
             If you have questions, please ask the staff.*",
        )
        .await;
        Ok(EventOutcome::InviteRemoved)
    }

    async fn sanction(
        &self,
        event: &Event,
        decision: SanctionDecision,
        threshold: usize,
    ) -> ModerationResult<EventOutcome> {
        let subject = event.author_id;
        let mute_duration = self.config.sanctions.mute_duration();
        let mut audit = AuditRecord {
            subject_id: subject,
            channel_id: event.channel_id,
            reason: decision.reason,
            score: decision.score,
            threshold,
            expires_at: None,
            applied: false,
            recorded_at: Utc::now(),
        };

        if let Err(e) = bounded(self.call_timeout(), self.actuator.apply_mute(subject)).await {
            error!("Failed to mute user {} for {}: {}", subject, decision.reason, e);
            self.notice(
                event.channel_id,
                &format!(
                    "The automatic mute of <@{}> for {} could not be completed. Staff have been notified.",
                    subject, decision.reason
                ),
            )
            .await;
            self.notifier.report_sanction(&audit).await;
            return Err(e.into());
        }
        audit.applied = true;

        let due_at = Utc::now() + mute_duration;
        let unmute = match self
            .scheduler
            .schedule(ActionKind::Unmute, subject, due_at, &format!("auto-mute:{:?}", decision.reason))
            .await
        {
            Ok(action) => action,
            Err(e) => {
                error!("User {} was muted but the unmute could not be scheduled: {}", subject, e);
                // No reversal on file means the mute would never end
                match bounded(self.call_timeout(), self.actuator.remove_mute(subject)).await {
                    Ok(()) => {
                        info!("Rolled back mute of user {}", subject);
                        audit.applied = false;
                    }
                    Err(undo) => error!("User {} stays muted with no unmute scheduled: {}", subject, undo),
                }
                self.notice(
                    event.channel_id,
                    &format!(
                        "The automatic mute of <@{}> for {} could not be completed. Staff have been notified.",
                        subject, decision.reason
                    ),
                )
                .await;
                self.notifier.report_sanction(&audit).await;
                return Err(e);
            }
        };
        audit.expires_at = Some(unmute.due_at);

        info!(
            "Muted user {} for {} (score {}/{}), unmute due {}",
            subject, decision.reason, decision.score, threshold, unmute.due_at
        );
        self.notice(
            event.channel_id,
            &format!(
                "Successfully muted <@{}> for {} for {}.",
                subject,
                describe_duration(mute_duration),
                decision.reason
            ),
        )
        .await;
        self.notifier.report_sanction(&audit).await;

        Ok(EventOutcome::Sanctioned { decision, unmute })
    }

    async fn warn(&self, event: &Event, reason: Reason) {
        let advice = match reason {
            Reason::Caps => {
                "please avoid using all caps in your messages. Repeatedly doing so will cause your account to be temporarily muted."
            }
            _ => "please avoid spamming. Additional spam will lead to your account being temporarily muted.",
        };
        info!("Warning user {} for {}", event.author_id, reason);

        let direct = format!("Hi, {}", advice);
        if let Err(e) = bounded(self.call_timeout(), self.actuator.send_direct(event.author_id, &direct)).await {
            warn!("Could not DM warning to user {}: {}, falling back to channel", event.author_id, e);
            self.notice(event.channel_id, &format!("<@{}>, {}", event.author_id, advice))
                .await;
        }
    }

    async fn forward_pings(&self, context: &mut PingContext, event: &Event) -> usize {
        if self.config.pings.excluded_channel_ids.contains(&event.channel_id) {
            return 0;
        }
        context.expire(event.timestamp);
        context.record(event);

        let hits = self
            .patterns
            .match_pings(&event.content, event.author_id, &event.mentions)
            .await;
        if hits.is_empty() {
            return 0;
        }

        let mut per_owner: BTreeMap<UserId, usize> = BTreeMap::new();
        for (owner, _) in &hits {
            *per_owner.entry(*owner).or_default() += 1;
        }

        let lines = context.recent(event.channel_id);
        let mut alerts = Vec::with_capacity(per_owner.len());
        for (owner, count) in per_owner {
            let alert = compose_alert(&self.patterns, owner, count, &lines, self.config.pings.preview_length).await;
            alerts.push((owner, alert));
        }

        // Deliveries are independent; one slow inbox must not hold up the rest
        let deliveries = alerts.iter().map(|(owner, alert)| async move {
            let result = bounded(self.call_timeout(), self.actuator.send_direct(*owner, alert)).await;
            if let Err(e) = &result {
                warn!("Could not deliver ping alert to user {}: {}", owner, e);
            }
            result.is_ok()
        });
        let sent = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();
        debug!("Sent {} ping alert(s) for message {}", sent, event.event_ref());
        sent
    }

    async fn notice(&self, channel: ChannelId, text: &str) {
        if let Err(e) = bounded(self.call_timeout(), self.actuator.send_notice(channel, text)).await {
            warn!("Could not send notice to channel {}: {}", channel, e);
        }
    }

    async fn direct(&self, subject: UserId, text: &str) {
        if let Err(e) = bounded(self.call_timeout(), self.actuator.send_direct(subject, text)).await {
            warn!("Could not send direct message to user {}: {}", subject, e);
        }
    }
}

/// "1 hour", "30 minutes", "2 days"
fn describe_duration(duration: chrono::Duration) -> String {
    let seconds = duration.num_seconds();
    let (count, unit) = if seconds > 0 && seconds % 86_400 == 0 {
        (seconds / 86_400, "day")
    } else if seconds > 0 && seconds % 3_600 == 0 {
        (seconds / 3_600, "hour")
    } else if seconds > 0 && seconds % 60 == 0 {
        (seconds / 60, "minute")
    } else {
        (seconds, "second")
    };
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
