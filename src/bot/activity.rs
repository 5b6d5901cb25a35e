// src/bot/activity.rs - Shared ring of recent community activity

use std::collections::VecDeque;
use unicode_normalization::UnicodeNormalization;

use crate::types::{ActivityRecord, UserId};

/// Bounded history of the most recent messages across all authors.
///
/// The capacity is global: once full, the oldest record is evicted no matter
/// who wrote it. Busy channels therefore push a single author's history out
/// faster than a per-author window would.
#[derive(Debug, Clone)]
pub struct ActivityWindow {
    records: VecDeque<ActivityRecord>,
    capacity: usize,
}

impl ActivityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, returning the evicted one when the ring was full
    pub fn push(&mut self, record: ActivityRecord) -> Option<ActivityRecord> {
        let evicted = if self.records.len() >= self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    /// Records by `author` whose normalized content equals `normalized`
    pub fn repetition_score(&self, author: UserId, normalized: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.author_id == author && r.normalized_content == normalized)
            .count()
    }

    /// Shouting records by `author`
    pub fn shout_score(&self, author: UserId) -> usize {
        self.records
            .iter()
            .filter(|r| r.author_id == author && r.is_shouting)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.records.iter()
    }
}

/// Compatibility-normalize, trim and lowercase message text
pub fn normalize_content(text: &str) -> String {
    text.nfkc().collect::<String>().trim().to_lowercase()
}

/// True when uppercase letters outnumber lowercase ones by more than `margin`
pub fn is_shouting(text: &str, margin: usize) -> bool {
    let (upper, lower) = text.chars().fold((0usize, 0usize), |(u, l), c| {
        if c.is_uppercase() {
            (u + 1, l)
        } else if c.is_lowercase() {
            (u, l + 1)
        } else {
            (u, l)
        }
    });
    upper > lower + margin
}
