//! # Chatwarden
//!
//! Moderation core for a single chat community. It watches a stream of
//! messages, detects abuse (repeated messages, shouting, censored words,
//! invite links), applies sanctions through a platform actuator and keeps
//! the deferred reversals ("unmute in one hour") in a durable store so they
//! survive restarts.
//!
//! ## Features
//!
//! - **Abuse detection**: repetition and caps scoring over a shared window of recent activity
//! - **Pattern matching**: censor list with redaction, invite-link heuristic, per-user ping expressions
//! - **Deferred actions**: persisted schedule with exactly-once dispatch and operator escalation
//! - **Pluggable platform**: the host supplies the `Actuator`, `Store` and `OperatorNotifier`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatwarden::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ModerationConfig::default();
//!     let exemptions = Arc::new(StaticExemptions::new(config.exempt_user_ids.clone()));
//!     let orchestrator = ModerationOrchestrator::new(
//!         config,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(InMemoryActuator::new()),
//!         Arc::new(LogNotifier::new()),
//!         exemptions,
//!     );
//!
//!     orchestrator.on_startup().await?;
//!     orchestrator.patterns().add_word(None, "badword").await?;
//!     orchestrator.on_event(&Event::new(1, 42, 7, "hello there")).await?;
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::{
        AbuseDetector, ActionExecutor, ActionScheduler, ActivityWindow, EventOutcome,
        ModerationOrchestrator, PatternSet, ReversalHandlers,
    };
    pub use crate::config::ModerationConfig;
    pub use crate::platforms::{
        memory::{InMemoryActuator, LogNotifier},
        Actuator, ExemptionPolicy, OperatorNotifier, StaticExemptions,
    };
    pub use crate::storage::{JsonFileStore, MemoryStore, Store};
    pub use crate::types::{
        ActionKind, Event, ModerationError, ModerationResult, PatternEntry, Reason,
        SanctionDecision, ScheduledAction, Verdict,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
