//! Motion pipeline demo
//!
//! Run with: cargo run --example synthetic_pipeline [CAMERA_URL]
//!
//! Without a URL the camera is synthetic: a moving block over a gradient,
//! so motion fires as soon as the background model has settled.
//!
//! Examples:
//!   cargo run --example synthetic_pipeline
//!   cargo run --example synthetic_pipeline rtsp://192.168.1.20:554/stream1
//!
//! ## MQTT
//!
//! Set `WATCHPOST_MQTT_HOST` (and optionally `WATCHPOST_MQTT_PORT`,
//! `WATCHPOST_MQTT_USER`, `WATCHPOST_MQTT_PASSWORD`) to publish availability,
//! discovery configs and motion state:
//!
//!   mosquitto_sub -v -t 'watchpost/#' -t 'homeassistant/#'
//!
//! ## Evidence
//!
//! Set `WATCHPOST_EVIDENCE_DIR` to keep the before/now/after JPEGs of the
//! last 50 events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use watchpost::broker::{BrokerConfig, BrokerManager};
use watchpost::capture::{CaptureConfig, CaptureService};
use watchpost::control::ArmState;
use watchpost::error::CollaboratorError;
use watchpost::health::HealthReport;
use watchpost::motion::{MotionConfig, MotionEngine};
use watchpost::orchestrator::{
    AnalysisResult, Analyzer, EventOrchestrator, Notifier, OrchestratorConfig, ThreatLevel,
};
use watchpost::pipeline::StreamPipeline;
use watchpost::screenshot::{EvidenceStore, ScreenshotBuffer, ScreenshotSet};

/// Stand-in analyzer: scores the event by how much the frames differ
struct FrameDiffAnalyzer;

#[async_trait]
impl Analyzer for FrameDiffAnalyzer {
    async fn analyze(&self, set: &ScreenshotSet) -> Result<AnalysisResult, CollaboratorError> {
        let changed = set
            .before
            .data
            .iter()
            .zip(set.now.data.iter())
            .filter(|(a, b)| a.abs_diff(**b) > 32)
            .count();
        let ratio = changed as f32 / set.now.data.len().max(1) as f32;

        let threat_level = match ratio {
            r if r > 0.25 => ThreatLevel::Medium,
            r if r > 0.05 => ThreatLevel::Low,
            _ => ThreatLevel::None,
        };

        Ok(AnalysisResult {
            is_real_motion: ratio > 0.01,
            confidence: (ratio * 4.0).min(1.0),
            object_labels: vec!["block".into()],
            threat_level,
            recommended_action: "none".into(),
            narrative: format!("{:.1}% of pixels changed", ratio * 100.0),
            analyzed_at: Utc::now(),
        })
    }
}

/// Notifier that prints alerts
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn is_available(&self) -> bool {
        true
    }

    async fn send_alert(
        &self,
        set: &ScreenshotSet,
        analysis: &AnalysisResult,
    ) -> Result<(), CollaboratorError> {
        println!(
            "[{}] {} threat={} confidence={:.2} frames={}",
            set.captured_wall.format("%H:%M:%S"),
            set.stream,
            analysis.threat_level,
            analysis.confidence,
            set.frames().count(),
        );
        println!("    {}", analysis.narrative);
        Ok(())
    }
}

fn broker_config() -> Option<BrokerConfig> {
    let host = std::env::var("WATCHPOST_MQTT_HOST").ok()?;
    let mut config = BrokerConfig::new(host);

    if let Some(port) = std::env::var("WATCHPOST_MQTT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
    {
        config = config.port(port);
    }
    if let (Ok(user), Ok(password)) = (
        std::env::var("WATCHPOST_MQTT_USER"),
        std::env::var("WATCHPOST_MQTT_PASSWORD"),
    ) {
        config = config.credentials(user, password);
    }
    Some(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("watchpost=debug".parse()?)
                .add_directive("synthetic_pipeline=debug".parse()?),
        )
        .init();

    let mut capture = CaptureConfig::new("demo").resolution(320, 240).fps(5);
    capture = match std::env::args().nth(1) {
        Some(url) => capture.url(url),
        None => capture.synthetic_fallback(true),
    };

    let arm = ArmState::default();
    let buffer = Arc::new(ScreenshotBuffer::with_window(capture.fps, Duration::from_secs(10)));

    let broker = match broker_config() {
        Some(config) => {
            let broker = Arc::new(BrokerManager::mqtt(config)?);
            broker.start().await;
            Some(broker)
        }
        None => None,
    };

    let mut builder = EventOrchestrator::builder(OrchestratorConfig::default(), arm.clone())
        .analyzer(Arc::new(FrameDiffAnalyzer))
        .notifier(Arc::new(ConsoleNotifier))
        .screenshot_buffer(capture.stream.clone(), Arc::clone(&buffer));
    if let Some(broker) = &broker {
        builder = builder.broker(Arc::clone(broker));
    }
    if let Ok(dir) = std::env::var("WATCHPOST_EVIDENCE_DIR") {
        builder = builder.evidence_store(EvidenceStore::new(dir, 50));
    }
    let orchestrator = builder.build();

    let motion = MotionConfig::default()
        .sensitivity(6)?
        .cooldown(Duration::from_secs(10));
    let engine = MotionEngine::new(capture.stream.clone(), motion, arm)
        .with_queue_gauge(orchestrator.in_flight_gauge())
        .on_motion(orchestrator.motion_handler());

    let mut pipeline = StreamPipeline::new(CaptureService::new(capture), buffer, engine)?;
    pipeline.start().await?;

    println!("Watching {} (Ctrl+C to stop)", pipeline.stream());

    let mut report_interval = tokio::time::interval(Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = report_interval.tick() => {
                let report = HealthReport::collect(
                    Some(pipeline.camera_status()),
                    broker.as_deref(),
                    &orchestrator,
                )
                .await;
                println!(
                    "Health: {:?} ready={} motion={:?}",
                    report.status,
                    report.is_ready(),
                    pipeline.motion_stats(),
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    pipeline.stop().await;
    orchestrator.stop();
    if !orchestrator.drain(Duration::from_secs(30)).await {
        eprintln!("{} events still in flight", orchestrator.in_flight());
    }
    if let Some(broker) = broker {
        broker.disconnect().await;
    }

    println!("Orchestrator: {:?}", orchestrator.stats());
    Ok(())
}
