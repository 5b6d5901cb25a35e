// src/bot/pings.rs - Channel context and direct-message alerts for ping subscriptions

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::bot::pattern_matching::PatternSet;
use crate::types::{ChannelId, Event, MessageId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub struct ContextLine {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// The last few messages of every channel, shown alongside a ping alert
#[derive(Debug)]
pub struct PingContext {
    channels: HashMap<ChannelId, VecDeque<ContextLine>>,
    per_channel: usize,
    max_age: Duration,
}

impl PingContext {
    pub fn new(per_channel: usize, max_age: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            per_channel: per_channel.max(1),
            max_age,
        }
    }

    pub fn record(&mut self, event: &Event) {
        let lines = self.channels.entry(event.channel_id).or_default();
        lines.push_back(ContextLine {
            message_id: event.message_id,
            author_id: event.author_id,
            content: event.content.clone(),
            timestamp: event.timestamp,
        });
        while lines.len() > self.per_channel {
            lines.pop_front();
        }
    }

    /// Drop lines older than the maximum age, and channels left empty
    pub fn expire(&mut self, now: DateTime<Utc>) {
        let max_age = self.max_age;
        for lines in self.channels.values_mut() {
            lines.retain(|line| now - line.timestamp <= max_age);
        }
        self.channels.retain(|_, lines| !lines.is_empty());
    }

    pub fn recent(&self, channel: ChannelId) -> Vec<ContextLine> {
        self.channels
            .get(&channel)
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Alert text for one subscriber; matched spans are bolded per line
pub async fn compose_alert(
    patterns: &PatternSet,
    owner: UserId,
    matched: usize,
    context: &[ContextLine],
    preview_length: usize,
) -> String {
    let headline = if matched > 1 {
        "**Several of your pings were mentioned by a user!**"
    } else {
        "**One of your pings was mentioned by a user!**"
    };

    let mut lines = Vec::with_capacity(context.len());
    for line in context {
        let preview = patterns.highlight(owner, &line.content, preview_length).await;
        lines.push(format!("<@{}>: {}", line.author_id, preview));
    }

    format!(
        "{}\n\n{}\n\nIf you don't want this ping anymore, remove it from your ping list.",
        headline,
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InviteConfig;

    #[test]
    fn test_context_keeps_last_messages_per_channel() {
        let mut context = PingContext::new(2, Duration::hours(3));
        context.record(&Event::new(1, 10, 100, "first"));
        context.record(&Event::new(2, 11, 100, "second"));
        context.record(&Event::new(3, 12, 100, "third"));
        context.record(&Event::new(4, 13, 200, "elsewhere"));

        let recent: Vec<_> = context.recent(100).into_iter().map(|l| l.content).collect();
        assert_eq!(recent, vec!["second", "third"]);
        assert_eq!(context.recent(200).len(), 1);
        assert!(context.recent(300).is_empty());
    }

    #[test]
    fn test_expire_drops_old_lines() {
        let now = Utc::now();
        let mut context = PingContext::new(5, Duration::hours(3));
        context.record(&Event::new(1, 10, 100, "stale").at(now - Duration::hours(4)));
        context.record(&Event::new(2, 10, 100, "fresh").at(now - Duration::minutes(5)));
        context.record(&Event::new(3, 10, 200, "gone").at(now - Duration::hours(5)));

        context.expire(now);
        let recent: Vec<_> = context.recent(100).into_iter().map(|l| l.content).collect();
        assert_eq!(recent, vec!["fresh"]);
        assert!(context.recent(200).is_empty());
    }

    #[tokio::test]
    async fn test_alert_text_highlights_and_counts() {
        let patterns = PatternSet::new(&InviteConfig::default());
        patterns.add_word(Some(5), "chemistry").await.unwrap();

        let line = ContextLine {
            message_id: 1,
            author_id: 9,
            content: "who likes chemistry?".to_string(),
            timestamp: Utc::now(),
        };
        let single = compose_alert(&patterns, 5, 1, &[line.clone()], 100).await;
        assert!(single.starts_with("**One of your pings"));
        assert!(single.contains("<@9>: who likes **chemistry**?"));

        let several = compose_alert(&patterns, 5, 2, &[line], 100).await;
        assert!(several.starts_with("**Several of your pings"));
    }
}
