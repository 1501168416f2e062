//! Statistics for capture, motion, buffering, sync and orchestration

pub mod metrics;

pub use metrics::{
    BufferStats, CaptureCounters, CaptureStats, MotionCounters, MotionStats,
    OrchestratorCounters, OrchestratorStats, SyncCounters, SyncStats,
};
