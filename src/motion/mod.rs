//! Motion detection
//!
//! A [`MotionEngine`] per stream runs a [`Detector`] over incoming frames and
//! hands [`MotionEvent`]s to its handlers, subject to arming, cooldown and
//! load shedding.

pub mod background;
pub mod config;
pub mod detector;
pub mod engine;
pub mod event;
pub mod load;

pub use background::BackgroundModel;
pub use config::{MotionConfig, Sensitivity};
pub use detector::{Detector, MotionDetector};
pub use engine::{
    spawn_handler, EngineState, Evaluation, HandlerError, MotionEngine, MotionHandler,
    SpawnHandler,
};
pub use event::{MotionEvent, Region};
pub use load::{LoadProbe, LoadShedder, SkipReason, SystemLoad};
