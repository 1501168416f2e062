//! External collaborators
//!
//! The orchestrator talks to the object classifier, the vision analyzer and
//! the chat notifier only through these traits. Implementations live
//! outside this crate.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::frame::Frame;
use crate::screenshot::ScreenshotSet;

/// One object found by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// Bounding box `[x, y, width, height]` in frame coordinates
    pub bbox: [u32; 4],
}

/// Assessed threat of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::None => "none",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analyzer verdict for a screenshot set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub is_real_motion: bool,
    /// 0.0 to 1.0
    pub confidence: f32,
    pub object_labels: Vec<String>,
    pub threat_level: ThreatLevel,
    pub recommended_action: String,
    pub narrative: String,
    #[serde(default = "Utc::now")]
    pub analyzed_at: DateTime<Utc>,
}

/// Object classifier run on the event frame
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, CollaboratorError>;
}

/// Vision analysis of a screenshot set
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, set: &ScreenshotSet) -> Result<AnalysisResult, CollaboratorError>;
}

/// Chat notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether the channel can currently deliver
    fn is_available(&self) -> bool;

    async fn send_alert(
        &self,
        set: &ScreenshotSet,
        analysis: &AnalysisResult,
    ) -> Result<(), CollaboratorError>;
}
