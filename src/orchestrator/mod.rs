//! Motion event orchestration
//!
//! Turns motion events into notifications:
//!
//! ```text
//!   MotionEngine ──► EventOrchestrator::handle_event()
//!                          │ (one task per event)
//!                          ▼
//!        Classifier ─► ScreenshotSet ─► Analyzer
//!                                          │
//!                         ┌────────────────┴───────────────┐
//!                         ▼                                ▼
//!               RateLimiter("broker")           RateLimiter("notifier")
//!               BrokerManager::publish_state    Notifier::send_alert
//! ```
//!
//! Collaborators are traits so any classifier, analyzer or chat service can
//! be plugged in.

pub mod collaborators;
pub mod config;
pub mod pipeline;
pub mod rate_limit;

pub use collaborators::{AnalysisResult, Analyzer, Classifier, Detection, Notifier, ThreatLevel};
pub use config::OrchestratorConfig;
pub use pipeline::{EventOrchestrator, EventOutcome, EventSummary, OrchestratorBuilder};
pub use rate_limit::RateLimiter;
