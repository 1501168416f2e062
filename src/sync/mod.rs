//! Color/thermal stream pairing

pub mod config;
pub mod synchronizer;

pub use config::SyncConfig;
pub use synchronizer::{classify, DualStreamSynchronizer, SyncPair, SyncStatus};
