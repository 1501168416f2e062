//! Armed/disarmed switch
//!
//! Shared by the motion engines (no event is emitted while disarmed) and the
//! orchestrator (events that arrive while disarmed are dropped).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the armed flag
#[derive(Debug, Clone)]
pub struct ArmState {
    armed: Arc<AtomicBool>,
}

impl ArmState {
    /// Create a handle with the given initial state
    pub fn new(armed: bool) -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(armed)),
        }
    }

    /// Whether motion events are currently acted upon
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Start acting on motion events
    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::AcqRel) {
            tracing::info!("System armed");
        }
    }

    /// Stop acting on motion events
    pub fn disarm(&self) {
        if self.armed.swap(false, Ordering::AcqRel) {
            tracing::info!("System disarmed");
        }
    }
}

impl Default for ArmState {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let a = ArmState::new(false);
        let b = a.clone();

        a.arm();
        assert!(b.is_armed());

        b.disarm();
        assert!(!a.is_armed());
    }
}
