// src/bot/moderation.rs - Repetition and shouting detection over the shared activity window

use log::debug;
use std::sync::Arc;

use crate::bot::activity::{is_shouting, normalize_content, ActivityWindow};
use crate::config::DetectionConfig;
use crate::platforms::ExemptionPolicy;
use crate::types::{ActivityRecord, Event, Reason, SanctionDecision, Verdict};

/// Classifies messages as clean, warn or sanction.
///
/// Every evaluated message is appended to the window first and then scored
/// against it, so the triggering message counts towards its own score.
pub struct AbuseDetector {
    thresholds: DetectionConfig,
    window: ActivityWindow,
    exemptions: Arc<dyn ExemptionPolicy>,
}

impl AbuseDetector {
    pub fn new(thresholds: DetectionConfig, exemptions: Arc<dyn ExemptionPolicy>) -> Self {
        let window = ActivityWindow::new(thresholds.window_capacity);
        Self {
            thresholds,
            window,
            exemptions,
        }
    }

    pub fn evaluate(&mut self, event: &Event) -> SanctionDecision {
        if self.exemptions.is_exempt(event.author_id) {
            return SanctionDecision::clean();
        }

        let normalized = normalize_content(&event.content);
        if normalized.is_empty() {
            return SanctionDecision::clean();
        }

        let shouting = is_shouting(&event.content, self.thresholds.shout_margin);
        self.window.push(ActivityRecord {
            author_id: event.author_id,
            normalized_content: normalized.clone(),
            is_shouting: shouting,
            timestamp: event.timestamp,
        });

        let repetition = self.window.repetition_score(event.author_id, &normalized);
        debug!(
            "User {} repetition score {} (window {}/{})",
            event.author_id,
            repetition,
            self.window.len(),
            self.window.capacity()
        );
        if repetition >= self.thresholds.mute_threshold {
            return SanctionDecision::sanction(Reason::Repetition, repetition);
        }
        if repetition >= self.thresholds.warn_threshold {
            return SanctionDecision::warn(Reason::Repetition, repetition);
        }

        if shouting {
            let shouts = self.window.shout_score(event.author_id);
            debug!("User {} shout score {}", event.author_id, shouts);
            if shouts > self.thresholds.caps_sanction_threshold {
                return SanctionDecision::sanction(Reason::Caps, shouts);
            }
            if shouts > self.thresholds.caps_warn_threshold {
                return SanctionDecision::warn(Reason::Caps, shouts);
            }
        }

        SanctionDecision::clean()
    }

    /// Configured threshold the decision crossed, for audit records
    pub fn threshold_for(&self, decision: &SanctionDecision) -> usize {
        match (decision.reason, decision.verdict) {
            (Reason::Repetition, Verdict::Sanction) => self.thresholds.mute_threshold,
            (Reason::Repetition, _) => self.thresholds.warn_threshold,
            (Reason::Caps, Verdict::Sanction) => self.thresholds.caps_sanction_threshold,
            (Reason::Caps, _) => self.thresholds.caps_warn_threshold,
            _ => 0,
        }
    }

    pub fn window(&self) -> &ActivityWindow {
        &self.window
    }

    pub fn thresholds(&self) -> &DetectionConfig {
        &self.thresholds
    }
}
