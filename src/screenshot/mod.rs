//! Screenshot history and evidence
//!
//! A [`ScreenshotBuffer`] per stream keeps recent frames; the orchestrator
//! pulls a [`ScreenshotSet`] out of it for each motion event and can persist
//! sets through an [`EvidenceStore`].

pub mod ring;
pub mod set;
pub mod store;

pub use ring::{RingEntry, ScreenshotBuffer};
pub use set::ScreenshotSet;
pub use store::EvidenceStore;
