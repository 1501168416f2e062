//! End-to-end pipeline tests with a synthetic camera and in-memory
//! collaborators

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use watchpost::broker::{BrokerConfig, BrokerManager, BrokerTransport, LastWill, Message};
use watchpost::capture::{CaptureConfig, CaptureService};
use watchpost::control::ArmState;
use watchpost::error::{BrokerError, CollaboratorError};
use watchpost::health::{ComponentStatus, HealthReport};
use watchpost::motion::{LoadProbe, MotionConfig, MotionEngine};
use watchpost::orchestrator::{
    AnalysisResult, Analyzer, EventOrchestrator, EventOutcome, Notifier, OrchestratorConfig,
    ThreatLevel,
};
use watchpost::pipeline::StreamPipeline;
use watchpost::screenshot::{ScreenshotBuffer, ScreenshotSet};
use watchpost::sync::{DualStreamSynchronizer, SyncConfig};

struct Idle;

impl LoadProbe for Idle {
    fn cpu_usage(&mut self) -> f32 {
        0.0
    }
}

struct MemoryTransport {
    messages: Mutex<Vec<Message>>,
    link: watch::Sender<bool>,
}

impl MemoryTransport {
    fn new() -> Self {
        let (link, _) = watch::channel(false);
        Self {
            messages: Mutex::new(Vec::new()),
            link,
        }
    }

    fn payloads(&self, topic: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn connect(&self, _will: &LastWill) -> Result<(), BrokerError> {
        self.link.send_replace(true);
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), BrokerError> {
        if !*self.link.borrow() {
            return Err(BrokerError::NotConnected);
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }

    async fn disconnect(&self) {
        self.link.send_replace(false);
    }

    fn link(&self) -> watch::Receiver<bool> {
        self.link.subscribe()
    }
}

struct PersonAnalyzer;

#[async_trait]
impl Analyzer for PersonAnalyzer {
    async fn analyze(&self, _set: &ScreenshotSet) -> Result<AnalysisResult, CollaboratorError> {
        Ok(AnalysisResult {
            is_real_motion: true,
            confidence: 0.75,
            object_labels: vec!["person".into()],
            threat_level: ThreatLevel::Medium,
            recommended_action: "check camera".into(),
            narrative: "A person walks past".into(),
            analyzed_at: Utc::now(),
        })
    }
}

#[derive(Default)]
struct CountingNotifier {
    alerts: AtomicU32,
    with_history: AtomicU32,
}

#[async_trait]
impl Notifier for CountingNotifier {
    fn is_available(&self) -> bool {
        true
    }

    async fn send_alert(
        &self,
        set: &ScreenshotSet,
        _analysis: &AnalysisResult,
    ) -> Result<(), CollaboratorError> {
        self.alerts.fetch_add(1, Ordering::SeqCst);
        if set.has_history() {
            self.with_history.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn camera(name: &str) -> CaptureConfig {
    CaptureConfig::new(name)
        .synthetic_fallback(true)
        .resolution(160, 120)
        .fps(5)
}

#[tokio::test(start_paused = true)]
async fn motion_flows_to_broker_and_notifier() {
    let arm = ArmState::default();
    let capture = camera("yard");
    let buffer = Arc::new(ScreenshotBuffer::with_window(capture.fps, Duration::from_secs(10)));

    let transport = Arc::new(MemoryTransport::new());
    let broker = Arc::new(
        BrokerManager::new(BrokerConfig::new("mqtt.test"), transport.clone()).unwrap(),
    );
    broker.connect().await.unwrap();

    let notifier = Arc::new(CountingNotifier::default());
    let orchestrator = EventOrchestrator::builder(
        OrchestratorConfig::default()
            .after_wait(Duration::from_secs(1))
            .notifier_interval(Duration::from_secs(1)),
        arm.clone(),
    )
    .analyzer(Arc::new(PersonAnalyzer))
    .notifier(notifier.clone())
    .broker(Arc::clone(&broker))
    .screenshot_buffer(capture.stream.clone(), Arc::clone(&buffer))
    .build();

    let motion = MotionConfig::default()
        .sensitivity(10)
        .unwrap()
        .cooldown(Duration::from_secs(3));
    let engine = MotionEngine::new(capture.stream.clone(), motion, arm.clone())
        .with_load_probe(Box::new(Idle))
        .with_queue_gauge(orchestrator.in_flight_gauge())
        .on_motion(orchestrator.motion_handler());

    let mut pipeline =
        StreamPipeline::new(CaptureService::new(capture), buffer, engine).unwrap();
    pipeline.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let report = HealthReport::collect(
        Some(pipeline.camera_status()),
        Some(&broker),
        &orchestrator,
    )
    .await;
    assert!(report.is_ready());
    assert_eq!(report.components.broker, ComponentStatus::Ok);

    // nothing new reaches the collaborators once disarmed
    arm.disarm();
    assert!(orchestrator.drain(Duration::from_secs(10)).await);
    let alerts_when_disarmed = notifier.alerts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;

    pipeline.stop().await;
    orchestrator.stop();
    assert!(orchestrator.drain(Duration::from_secs(10)).await);

    let alerts = notifier.alerts.load(Ordering::SeqCst);
    assert!(alerts >= 1);
    assert_eq!(alerts, alerts_when_disarmed);
    assert!(notifier.with_history.load(Ordering::SeqCst) >= 1);

    let stats = orchestrator.stats();
    assert!(stats.events_notified >= 1);
    assert_eq!(stats.analysis_failures, 0);

    let events = orchestrator.recent_events().await;
    assert!(events.iter().any(|e| e.outcome == EventOutcome::Notified));

    let config = broker.config().clone();
    assert_eq!(transport.payloads(&config.availability_topic()), vec!["online"]);
    assert!(transport
        .payloads(&config.state_topic("motion"))
        .contains(&"ON".to_string()));
    assert!(transport
        .payloads(&config.state_topic("threat_level"))
        .contains(&"medium".to_string()));

    broker.disconnect().await;
    assert_eq!(
        transport.payloads(&config.availability_topic()),
        vec!["online", "offline"]
    );
    assert_eq!(
        broker.publish_state(true, None).await,
        Err(BrokerError::NotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn synchronizer_pairs_two_cameras() {
    let mut color = CaptureService::new(camera("color"));
    let mut thermal = CaptureService::new(camera("thermal"));
    color.connect().await.unwrap();
    thermal.connect().await.unwrap();

    let synchronizer = DualStreamSynchronizer::new(
        color.slot().clone(),
        thermal.slot().clone(),
        SyncConfig::default(),
    )
    .unwrap();
    let counters = synchronizer.counters();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (pairs, task) = synchronizer.spawn(shutdown_rx);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let pair = pairs.borrow().clone().expect("pair after two seconds");
    assert_eq!(pair.color.stream.as_str(), "color");
    assert_eq!(pair.thermal.stream.as_str(), "thermal");
    assert!(pair.delta <= Duration::from_millis(100));
    assert!(counters.snapshot().pairs_ok > 0);

    let _ = shutdown.send(true);
    task.await.unwrap();
    color.disconnect().await;
    thermal.disconnect().await;
}
