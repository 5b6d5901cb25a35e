// src/bot/mod.rs - Moderation engine: detection, patterns, deferred actions and the event pipeline

pub mod activity;
pub mod censor_import_export;
pub mod moderation;
pub mod orchestrator;
pub mod pattern_matching;
pub mod pings;
pub mod reversal;
pub mod scheduler;

pub use activity::ActivityWindow;
pub use moderation::AbuseDetector;
pub use orchestrator::{EventOutcome, ModerationOrchestrator, StartupReport};
pub use pattern_matching::{PatternSet, REDACTION_PLACEHOLDER};
pub use reversal::ReversalHandlers;
pub use scheduler::{due_actions, ActionExecutor, ActionScheduler, DispatchOutcome, PassReport};
