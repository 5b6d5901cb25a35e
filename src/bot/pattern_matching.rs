// src/bot/pattern_matching.rs - Censor list, invite heuristic and per-user ping expressions

use log::{debug, info, warn};
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::config::InviteConfig;
use crate::storage::{self, Store};
use crate::types::{ModerationResult, PatternEntry, PatternKind, UserId, ValidationError};

/// Replacement for every censored span
pub const REDACTION_PLACEHOLDER: &str = "<censored>";

const COLLECTION: &str = "patterns";

#[derive(Debug, Clone)]
struct CompiledPattern {
    entry: PatternEntry,
    /// Expression as handed to the regex engine
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(entry: PatternEntry) -> Result<Self, ValidationError> {
        let source = match entry.kind {
            PatternKind::Word => word_source(&entry.expression)?,
            PatternKind::Regex => {
                if entry.expression.is_empty() {
                    return Err(invalid(&entry.expression, "expression is empty"));
                }
                format!("({})", entry.expression)
            }
        };

        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| invalid(&entry.expression, &e.to_string()))?;
        if regex.is_match("") {
            return Err(invalid(&entry.expression, "expression matches empty text"));
        }

        Ok(Self { entry, source, regex })
    }

    fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Whether `expr` names this entry, either raw or in its wrapped form
    fn answers_to(&self, expr: &str) -> bool {
        if self.entry.expression == expr || self.source == expr || self.source == format!("({})", expr) {
            return true;
        }
        if self.entry.kind == PatternKind::Word && self.entry.expression.to_lowercase() == expr.to_lowercase() {
            return true;
        }
        word_source(expr).map_or(false, |s| s == self.source)
    }

    fn equivalent(&self, other: &CompiledPattern) -> bool {
        self.source == other.source
            || self.answers_to(&other.entry.expression)
            || other.answers_to(&self.entry.expression)
    }
}

fn invalid(expression: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Boundary-anchored source for a literal. Sides that do not start or end
/// with a word character (emoji, punctuation) are left unanchored since
/// `\b` could never match there.
fn word_source(literal: &str) -> Result<String, ValidationError> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Err(invalid(literal, "word is empty"));
    }
    let lead = if literal.chars().next().map_or(false, is_word_char) { r"\b" } else { "" };
    let tail = if literal.chars().last().map_or(false, is_word_char) { r"\b" } else { "" };
    Ok(format!("{}({}){}", lead, regex::escape(literal), tail))
}

/// Persisted shape of one owner's entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PatternDocument {
    owner_id: Option<UserId>,
    entries: Vec<PatternEntry>,
    #[serde(default)]
    dnd: bool,
}

fn document_id(owner: Option<UserId>) -> String {
    match owner {
        Some(id) => format!("user-{}", id),
        None => "global".to_string(),
    }
}

/// Immutable view of every registered pattern
#[derive(Debug, Clone, Default)]
pub struct PatternBook {
    censor: Vec<CompiledPattern>,
    pings: BTreeMap<UserId, Vec<CompiledPattern>>,
    dnd: HashSet<UserId>,
}

impl PatternBook {
    fn entries(&self, owner: Option<UserId>) -> &[CompiledPattern] {
        match owner {
            None => &self.censor,
            Some(id) => self.pings.get(&id).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    fn entries_mut(&mut self, owner: Option<UserId>) -> &mut Vec<CompiledPattern> {
        match owner {
            None => &mut self.censor,
            Some(id) => self.pings.entry(id).or_default(),
        }
    }

    fn insert(&mut self, compiled: CompiledPattern) -> Result<PatternEntry, ValidationError> {
        let owner = compiled.entry.owner_id;
        if let Some(existing) = self.entries(owner).iter().find(|e| e.equivalent(&compiled)) {
            return Err(ValidationError::AlreadyRegistered {
                expression: existing.entry.expression.clone(),
            });
        }
        let entry = compiled.entry.clone();
        self.entries_mut(owner).push(compiled);
        Ok(entry)
    }

    fn remove(&mut self, owner: Option<UserId>, expr: &str) -> Result<PatternEntry, ValidationError> {
        let entries = self.entries_mut(owner);
        let position = entries.iter().position(|e| e.answers_to(expr));
        let removed = position.map(|idx| entries.remove(idx).entry);
        if let Some(id) = owner {
            if self.pings.get(&id).map_or(false, Vec::is_empty) {
                self.pings.remove(&id);
            }
        }
        removed.ok_or_else(|| ValidationError::NotFound {
            expression: expr.to_string(),
        })
    }

    fn document(&self, owner: Option<UserId>) -> PatternDocument {
        PatternDocument {
            owner_id: owner,
            entries: self.entries(owner).iter().map(|e| e.entry.clone()).collect(),
            dnd: owner.map_or(false, |id| self.dnd.contains(&id)),
        }
    }

    pub fn censor_len(&self) -> usize {
        self.censor.len()
    }

    pub fn ping_owner_count(&self) -> usize {
        self.pings.len()
    }
}

/// Invite-link heuristic. Not user editable beyond the configured lists.
#[derive(Debug, Clone)]
pub struct InviteDetector {
    domains: Vec<String>,
    allowed_codes: HashSet<String>,
}

impl InviteDetector {
    pub fn new(config: &InviteConfig) -> Self {
        Self {
            domains: config.domains.iter().map(|d| d.trim().to_lowercase()).collect(),
            allowed_codes: config.allowed_codes.iter().map(|c| c.trim().to_lowercase()).collect(),
        }
    }

    /// Invite codes found after any known invite domain, lowercased.
    /// A domain with nothing after it yields an empty code.
    pub fn invite_codes(&self, text: &str) -> Vec<String> {
        let mut codes = Vec::new();
        for token in text.split_whitespace() {
            let token = normalize_link(token);
            for domain in &self.domains {
                for (idx, _) in token.match_indices(domain.as_str()) {
                    let rest = token[idx + domain.len()..].trim_start_matches('/');
                    let code: String = rest
                        .chars()
                        .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                        .collect();
                    codes.push(code);
                }
            }
        }
        codes
    }

    pub fn is_invite_link(&self, text: &str) -> bool {
        self.invite_codes(text)
            .iter()
            .any(|code| !self.allowed_codes.contains(code))
    }
}

/// Host and path of a link with the scheme and `www.` dropped, percent-decoded and lowercased
fn normalize_link(token: &str) -> String {
    let flattened = match Url::parse(token) {
        Ok(url) => match url.host_str() {
            Some(host) => format!("{}{}", host.trim_start_matches("www."), url.path()),
            None => token.to_string(),
        },
        Err(_) => token.to_string(),
    };
    let decoded = urlencoding::decode(&flattened)
        .map(|d| d.into_owned())
        .unwrap_or(flattened);
    decoded.to_lowercase()
}

/// Replace matches of `regex` outside existing placeholders
fn redact_once(text: &str, regex: &Regex) -> String {
    text.split(REDACTION_PLACEHOLDER)
        .map(|segment| {
            regex
                .replace_all(segment, |caps: &Captures| {
                    if caps[0].is_empty() {
                        String::new()
                    } else {
                        REDACTION_PLACEHOLDER.to_string()
                    }
                })
                .into_owned()
        })
        .collect::<Vec<_>>()
        .join(REDACTION_PLACEHOLDER)
}

fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Compiled censor, invite and ping patterns.
///
/// Readers work on an `Arc` snapshot; edits clone the book, persist the
/// affected owner's document and only then swap the new book in, so a
/// failed write leaves the in-memory set untouched.
pub struct PatternSet {
    book: RwLock<Arc<PatternBook>>,
    edit_lock: Mutex<()>,
    invites: InviteDetector,
    store: Option<Arc<dyn Store>>,
}

impl PatternSet {
    pub fn new(invites: &InviteConfig) -> Self {
        Self {
            book: RwLock::new(Arc::new(PatternBook::default())),
            edit_lock: Mutex::new(()),
            invites: InviteDetector::new(invites),
            store: None,
        }
    }

    /// Mirror every edit to `store`
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn snapshot(&self) -> Arc<PatternBook> {
        self.book.read().await.clone()
    }

    /// Rebuild the in-memory set from the store, returning the number of entries loaded
    pub async fn load(&self) -> ModerationResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let _guard = self.edit_lock.lock().await;

        let mut book = PatternBook::default();
        let mut loaded = 0;
        for doc in store.scan_all(COLLECTION).await? {
            let stored: PatternDocument = storage::decode(COLLECTION, &doc)?;
            let owner = stored.owner_id;
            if let (Some(id), true) = (owner, stored.dnd) {
                book.dnd.insert(id);
            }
            for mut entry in stored.entries {
                entry.owner_id = owner;
                match CompiledPattern::compile(entry).and_then(|c| book.insert(c)) {
                    Ok(_) => loaded += 1,
                    Err(e) => warn!("Skipping stored pattern in {}: {}", doc.id, e),
                }
            }
        }

        info!(
            "Loaded {} patterns ({} censor entries, {} ping owners)",
            loaded,
            book.censor.len(),
            book.pings.len()
        );
        *self.book.write().await = Arc::new(book);
        Ok(loaded)
    }

    async fn edit<T, F>(&self, owner: Option<UserId>, change: F) -> ModerationResult<T>
    where
        F: FnOnce(&mut PatternBook) -> Result<T, ValidationError> + Send,
        T: Send,
    {
        let _guard = self.edit_lock.lock().await;
        let mut next = PatternBook::clone(&*self.snapshot().await);
        let result = change(&mut next)?;
        self.persist(&next, owner).await?;
        *self.book.write().await = Arc::new(next);
        Ok(result)
    }

    async fn persist(&self, book: &PatternBook, owner: Option<UserId>) -> ModerationResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let doc = book.document(owner);
        let id = document_id(owner);
        if owner.is_some() && doc.entries.is_empty() && !doc.dnd {
            store.delete(COLLECTION, &id).await?;
        } else {
            store.put(COLLECTION, &id, storage::encode(&doc)?).await?;
        }
        Ok(())
    }

    /// Register a literal, matched on word boundaries and case-insensitively
    pub async fn add_word(&self, owner: Option<UserId>, literal: &str) -> ModerationResult<PatternEntry> {
        let compiled = CompiledPattern::compile(PatternEntry::word(owner, literal.trim()))?;
        let entry = self.edit(owner, move |book| book.insert(compiled)).await?;
        info!("Added word pattern '{}' for {}", entry.expression, describe_owner(owner));
        Ok(entry)
    }

    /// Register a user supplied expression as-is
    pub async fn add_regex(&self, owner: Option<UserId>, expr: &str) -> ModerationResult<PatternEntry> {
        let compiled = CompiledPattern::compile(PatternEntry::regex(owner, expr))?;
        let entry = self.edit(owner, move |book| book.insert(compiled)).await?;
        info!("Added regex pattern '{}' for {}", entry.expression, describe_owner(owner));
        Ok(entry)
    }

    /// Check that an entry would compile, without registering it
    pub fn validate(entry: &PatternEntry) -> Result<(), ValidationError> {
        CompiledPattern::compile(entry.clone()).map(|_| ())
    }

    pub async fn add(&self, entry: PatternEntry) -> ModerationResult<PatternEntry> {
        match entry.kind {
            PatternKind::Word => self.add_word(entry.owner_id, &entry.expression).await,
            PatternKind::Regex => self.add_regex(entry.owner_id, &entry.expression).await,
        }
    }

    pub async fn remove(&self, owner: Option<UserId>, expr: &str) -> ModerationResult<PatternEntry> {
        let expr = expr.trim().to_string();
        let removed = self.edit(owner, move |book| book.remove(owner, &expr)).await?;
        info!("Removed pattern '{}' for {}", removed.expression, describe_owner(owner));
        Ok(removed)
    }

    /// Entries registered by `owner` (`None` for the censor list), in registration order
    pub async fn list(&self, owner: Option<UserId>) -> Vec<PatternEntry> {
        self.snapshot()
            .await
            .entries(owner)
            .iter()
            .map(|e| e.entry.clone())
            .collect()
    }

    /// Every global entry matching `text`, in registration order
    pub async fn match_censor(&self, text: &str) -> Vec<PatternEntry> {
        let book = self.snapshot().await;
        let matches: Vec<PatternEntry> = book
            .censor
            .iter()
            .filter(|e| e.is_match(text))
            .map(|e| e.entry.clone())
            .collect();
        if !matches.is_empty() {
            debug!("Censor matched {} entries", matches.len());
        }
        matches
    }

    /// Ping entries matching `text`, skipping the author, mentioned users and
    /// owners in do-not-disturb
    pub async fn match_pings(
        &self,
        text: &str,
        exclude_author: UserId,
        mentions: &HashSet<UserId>,
    ) -> Vec<(UserId, PatternEntry)> {
        let book = self.snapshot().await;
        book.pings
            .iter()
            .filter(|(owner, _)| {
                **owner != exclude_author && !mentions.contains(*owner) && !book.dnd.contains(*owner)
            })
            .flat_map(|(owner, entries)| {
                entries
                    .iter()
                    .filter(|e| e.is_match(text))
                    .map(move |e| (*owner, e.entry.clone()))
            })
            .collect()
    }

    /// Which of `owner`'s expressions match `text`, ignoring mention and DND rules
    pub async fn test_pings(&self, owner: UserId, text: &str) -> Vec<PatternEntry> {
        self.snapshot()
            .await
            .entries(Some(owner))
            .iter()
            .filter(|e| e.is_match(text))
            .map(|e| e.entry.clone())
            .collect()
    }

    /// Bold every span of `text` matched by `owner`'s expressions. The text is
    /// cut to `max_len` characters first; the `**` markup comes on top.
    pub async fn highlight(&self, owner: UserId, text: &str, max_len: usize) -> String {
        let book = self.snapshot().await;
        let mut highlighted = truncate_chars(text, max_len);
        for entry in book.entries(Some(owner)) {
            highlighted = entry
                .regex
                .replace_all(&highlighted, |caps: &Captures| {
                    if caps[0].is_empty() {
                        String::new()
                    } else {
                        format!("**{}**", &caps[0])
                    }
                })
                .into_owned();
        }
        highlighted
    }

    pub fn is_invite_link(&self, text: &str) -> bool {
        self.invites.is_invite_link(text)
    }

    /// Replace every censored span with the placeholder.
    ///
    /// Patterns are applied one after another, each to the whole text, and
    /// placeholders already present are never rewritten. Passes repeat until
    /// nothing changes, so `redact(redact(x)) == redact(x)`.
    pub async fn redact(&self, text: &str) -> String {
        let book = self.snapshot().await;
        let mut current = text.to_string();
        loop {
            let next = book
                .censor
                .iter()
                .fold(current.clone(), |acc, entry| redact_once(&acc, &entry.regex));
            if next == current {
                return next;
            }
            current = next;
        }
    }

    pub async fn set_do_not_disturb(&self, owner: UserId, enabled: bool) -> ModerationResult<()> {
        self.edit(Some(owner), move |book| {
            if enabled {
                book.dnd.insert(owner);
            } else {
                book.dnd.remove(&owner);
            }
            Ok(())
        })
        .await?;
        info!("Do-not-disturb {} for user {}", if enabled { "enabled" } else { "disabled" }, owner);
        Ok(())
    }

    /// Flip the owner's do-not-disturb flag, returning the new state
    pub async fn toggle_do_not_disturb(&self, owner: UserId) -> ModerationResult<bool> {
        let enabled = self
            .edit(Some(owner), move |book| {
                if book.dnd.remove(&owner) {
                    Ok(false)
                } else {
                    book.dnd.insert(owner);
                    Ok(true)
                }
            })
            .await?;
        info!("Do-not-disturb {} for user {}", if enabled { "enabled" } else { "disabled" }, owner);
        Ok(enabled)
    }

    pub async fn is_do_not_disturb(&self, owner: UserId) -> bool {
        self.snapshot().await.dnd.contains(&owner)
    }
}

fn describe_owner(owner: Option<UserId>) -> String {
    match owner {
        Some(id) => format!("user {}", id),
        None => "censor list".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::ModerationError;

    fn pattern_set() -> PatternSet {
        PatternSet::new(&InviteConfig::default())
    }

    #[tokio::test]
    async fn test_censor_scenario() {
        let patterns = pattern_set();
        patterns.add_word(None, "badword").await.unwrap();

        let text = "this is a badword test";
        let matched = patterns.match_censor(text).await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].expression, "badword");

        let redacted = patterns.redact(text).await;
        assert_eq!(redacted, "this is a <censored> test");
        assert!(!redacted.replace(REDACTION_PLACEHOLDER, "").contains("badword"));
    }

    #[tokio::test]
    async fn test_word_matches_on_boundaries_only() {
        let patterns = pattern_set();
        patterns.add_word(None, "ass").await.unwrap();

        assert_eq!(patterns.match_censor("what an ASS").await.len(), 1);
        assert!(patterns.match_censor("classic passage").await.is_empty());
    }

    #[tokio::test]
    async fn test_emoji_words_match_without_boundaries() {
        let patterns = pattern_set();
        patterns.add_word(None, "🖕").await.unwrap();
        assert_eq!(patterns.match_censor("hey🖕you").await.len(), 1);
        assert_eq!(patterns.redact("hey🖕you").await, "hey<censored>you");
    }

    #[tokio::test]
    async fn test_add_then_remove_restores_matching() {
        let patterns = pattern_set();
        patterns.add_word(None, "keep").await.unwrap();
        let text = "keep the toast warm";
        let before = patterns.match_censor(text).await;

        patterns.add_word(None, "toast").await.unwrap();
        assert_eq!(patterns.match_censor(text).await.len(), 2);

        patterns.remove(None, "toast").await.unwrap();
        assert_eq!(patterns.match_censor(text).await, before);
        assert_eq!(patterns.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_are_rejected_per_owner() {
        let patterns = pattern_set();
        patterns.add_word(Some(1), "rust").await.unwrap();

        let err = patterns.add_word(Some(1), "RUST").await.unwrap_err();
        assert!(matches!(
            err,
            ModerationError::Validation(ValidationError::AlreadyRegistered { .. })
        ));
        let err = patterns.add_regex(Some(1), "rust").await.unwrap_err();
        assert!(matches!(
            err,
            ModerationError::Validation(ValidationError::AlreadyRegistered { .. })
        ));

        // Another owner may register the same expression
        assert!(patterns.add_word(Some(2), "rust").await.is_ok());
        // Distinct raw regexes stay distinct
        patterns.add_regex(Some(1), "cargo|crate").await.unwrap();
        assert!(patterns.add_regex(Some(1), "Cargo|crate").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_regex_is_rejected_without_change() {
        let patterns = pattern_set();
        let err = patterns.add_regex(Some(1), "(unclosed").await.unwrap_err();
        assert!(matches!(
            err,
            ModerationError::Validation(ValidationError::InvalidExpression { .. })
        ));
        let err = patterns.add_regex(None, "a*").await.unwrap_err();
        assert!(matches!(
            err,
            ModerationError::Validation(ValidationError::InvalidExpression { .. })
        ));
        assert!(patterns.list(Some(1)).await.is_empty());
        assert!(patterns.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_accepts_wrapped_forms() {
        let patterns = pattern_set();
        patterns.add_regex(Some(3), "colou?r").await.unwrap();
        patterns.add_word(Some(3), "grey").await.unwrap();

        assert!(patterns.remove(Some(3), "(colou?r)").await.is_ok());
        assert!(patterns.remove(Some(3), r"\b(grey)\b").await.is_ok());
        let err = patterns.remove(Some(3), "grey").await.unwrap_err();
        assert!(matches!(err, ModerationError::Validation(ValidationError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_redact_is_idempotent_with_overlaps() {
        let patterns = pattern_set();
        patterns.add_regex(None, "bad(word)?").await.unwrap();
        patterns.add_word(None, "word").await.unwrap();
        patterns.add_regex(None, "cens").await.unwrap();

        for text in [
            "badword word badwordword",
            "a badbad word, censored words",
            "nothing to see",
            "<censored> already",
        ] {
            let once = patterns.redact(text).await;
            let twice = patterns.redact(&once).await;
            assert_eq!(once, twice, "redaction not idempotent for {:?}", text);
        }
        assert_eq!(patterns.redact("bad word").await, "<censored> <censored>");
        assert_eq!(patterns.redact("<censored> already").await, "<censored> already");
    }

    #[tokio::test]
    async fn test_invite_links_and_allow_list() {
        let patterns = PatternSet::new(&InviteConfig {
            allowed_codes: vec!["ourserver".to_string()],
            ..InviteConfig::default()
        });

        assert!(patterns.is_invite_link("join discord.gg/abc123 now"));
        assert!(patterns.is_invite_link("https://www.discord.com/invite/xyz"));
        assert!(patterns.is_invite_link("https://discord%2Egg/sneaky"));
        assert!(!patterns.is_invite_link("come to https://discord.gg/ourserver"));
        assert!(patterns.is_invite_link("discord.gg/ourserver and discord.gg/other"));
        assert!(!patterns.is_invite_link("discord is great"));
    }

    #[tokio::test]
    async fn test_pings_skip_author_mentions_and_dnd() {
        let patterns = pattern_set();
        patterns.add_word(Some(1), "rust").await.unwrap();
        patterns.add_word(Some(2), "rust").await.unwrap();
        patterns.add_regex(Some(3), "ru+st").await.unwrap();
        patterns.add_word(Some(4), "rust").await.unwrap();
        patterns.set_do_not_disturb(4, true).await.unwrap();

        let mentions: HashSet<UserId> = [2].into_iter().collect();
        let hits = patterns.match_pings("Rust is fun", 1, &mentions).await;
        let owners: Vec<UserId> = hits.iter().map(|(owner, _)| *owner).collect();
        assert_eq!(owners, vec![3]);

        assert!(!patterns.toggle_do_not_disturb(4).await.unwrap());
        let hits = patterns.match_pings("Rust is fun", 1, &HashSet::new()).await;
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_ping_tools() {
        let patterns = pattern_set();
        patterns.add_word(Some(8), "tokio").await.unwrap();
        patterns.add_regex(Some(8), "as+ync").await.unwrap();

        assert_eq!(patterns.test_pings(8, "tokio and asssync").await.len(), 2);
        assert_eq!(
            patterns.highlight(8, "tokio runs async code", 100).await,
            "**tokio** runs **async** code"
        );
        assert_eq!(patterns.highlight(8, "tokio runs async code", 10).await, "**tokio** r...");
    }

    #[tokio::test]
    async fn test_highlight_markup_does_not_shorten_preview() {
        let patterns = pattern_set();
        patterns.add_word(Some(8), "rust").await.unwrap();

        let text = format!("rust {}", "a".repeat(200));
        let preview = patterns.highlight(8, &text, 20).await;
        assert!(preview.starts_with("**rust** "));
        assert_eq!(preview.replace("**", "").chars().count(), 20);
    }

    #[tokio::test]
    async fn test_state_survives_reload_from_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let patterns = pattern_set().with_store(store.clone());
        patterns.add_word(None, "badword").await.unwrap();
        patterns.add_regex(Some(5), "ping+").await.unwrap();
        patterns.set_do_not_disturb(6, true).await.unwrap();

        let reloaded = pattern_set().with_store(store.clone());
        assert_eq!(reloaded.load().await.unwrap(), 2);
        assert_eq!(reloaded.list(None).await, patterns.list(None).await);
        assert_eq!(reloaded.list(Some(5)).await[0].owner_id, Some(5));
        assert!(reloaded.is_do_not_disturb(6).await);

        patterns.remove(Some(5), "ping+").await.unwrap();
        assert!(store.get("patterns", "user-5").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_leaves_set_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let patterns = pattern_set().with_store(store.clone());
        store.set_unavailable(true);

        let err = patterns.add_word(None, "badword").await.unwrap_err();
        assert!(matches!(err, ModerationError::Store(_)));
        assert!(patterns.match_censor("badword").await.is_empty());
    }
}
