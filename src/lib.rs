//! Camera motion monitoring
//!
//! Watches camera streams for motion, keeps a short frame history per
//! stream, and turns motion events into analysis results published to an
//! MQTT broker and a chat notifier.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐   latest frame   ┌──────────────────┐
//!   │CaptureService├─────(watch)────┬─►ScreenshotBuffer  │
//!   └──────────────┘                │ └────────▲─────────┘
//!      reconnect +                  │          │ before / after
//!      backoff                      ▼          │
//!                            ┌─────────────┐   │   ┌──────────────────┐
//!                            │MotionEngine ├───┴───►EventOrchestrator │
//!                            └─────────────┘ event └───┬──────────┬───┘
//!                          cooldown, load shedding     │          │
//!                                                      ▼          ▼
//!                                            BrokerManager    Notifier
//! ```
//!
//! A [`sync::DualStreamSynchronizer`] pairs a color and a thermal stream by
//! capture time. [`health::HealthReport`] summarizes component status.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use watchpost::capture::{CaptureConfig, CaptureService};
//! use watchpost::control::ArmState;
//! use watchpost::motion::{MotionConfig, MotionEngine};
//! use watchpost::orchestrator::{EventOrchestrator, OrchestratorConfig};
//! use watchpost::pipeline::StreamPipeline;
//! use watchpost::screenshot::ScreenshotBuffer;
//!
//! #[tokio::main]
//! async fn main() -> watchpost::Result<()> {
//!     let arm = ArmState::default();
//!     let capture = CaptureConfig::new("front").url("rtsp://camera.local/stream");
//!     let buffer = Arc::new(ScreenshotBuffer::with_window(capture.fps, Duration::from_secs(10)));
//!
//!     let orchestrator = EventOrchestrator::builder(OrchestratorConfig::default(), arm.clone())
//!         .screenshot_buffer(capture.stream.clone(), Arc::clone(&buffer))
//!         .build();
//!
//!     let engine = MotionEngine::new(capture.stream.clone(), MotionConfig::default(), arm)
//!         .with_queue_gauge(orchestrator.in_flight_gauge())
//!         .on_motion(orchestrator.motion_handler());
//!
//!     let mut pipeline = StreamPipeline::new(CaptureService::new(capture), buffer, engine)?;
//!     pipeline
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     orchestrator.stop();
//!     orchestrator.drain(Duration::from_secs(30)).await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod capture;
pub mod control;
pub mod error;
pub mod frame;
pub mod health;
pub mod motion;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod screenshot;
pub mod stats;
pub mod sync;

pub use error::{Error, Result};
pub use frame::{Frame, StreamId};
