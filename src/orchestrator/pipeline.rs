//! Event orchestration
//!
//! Every accepted motion event runs as its own task:
//!
//! ```text
//! classify ──► before/now ──► wait ──► after ──► analyze ──┬──► broker   (rate limited)
//!  (optional)   from ring buffer                           └──► notifier (rate limited)
//! ```
//!
//! A classifier failure only loses the labels. An analyzer failure ends the
//! event. Broker and notifier run concurrently and fail independently. The
//! number of running event tasks is exposed as a gauge the motion engines
//! read as queue depth.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::broker::BrokerManager;
use crate::control::ArmState;
use crate::error::CollaboratorError;
use crate::frame::StreamId;
use crate::motion::{HandlerError, MotionEvent, MotionHandler};
use crate::screenshot::{EvidenceStore, ScreenshotBuffer, ScreenshotSet};
use crate::stats::{OrchestratorCounters, OrchestratorStats};

use super::collaborators::{AnalysisResult, Analyzer, Classifier, Notifier, ThreatLevel};
use super::config::OrchestratorConfig;
use super::rate_limit::RateLimiter;

/// How an event ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// At least one output channel delivered
    Notified,
    /// Every attempted output channel failed
    DeliveryFailed,
    /// Analyzed, but no output channel was available
    NoOutput,
    /// No analyzer configured; only the motion state was published
    Unanalyzed,
    /// The analyzer failed
    AnalysisFailed,
}

/// Record of one processed event for the health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub stream: String,
    pub detected_at: DateTime<Utc>,
    pub regions: usize,
    /// Labels from the classifier (empty when it failed or is not configured)
    pub labels: Vec<String>,
    pub threat_level: Option<ThreatLevel>,
    pub confidence: Option<f32>,
    pub has_after: bool,
    pub outcome: EventOutcome,
}

struct Inner {
    config: OrchestratorConfig,
    arm: ArmState,
    classifier: Option<Arc<dyn Classifier>>,
    analyzer: Option<Arc<dyn Analyzer>>,
    notifier: Option<Arc<dyn Notifier>>,
    broker: Option<Arc<BrokerManager>>,
    buffers: HashMap<StreamId, Arc<ScreenshotBuffer>>,
    store: Option<EvidenceStore>,
    broker_limiter: RateLimiter,
    notifier_limiter: RateLimiter,
    in_flight: Arc<AtomicUsize>,
    accepting: AtomicBool,
    idle: Notify,
    history: Mutex<VecDeque<EventSummary>>,
    counters: OrchestratorCounters,
}

/// Builds an [`EventOrchestrator`]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    arm: ArmState,
    classifier: Option<Arc<dyn Classifier>>,
    analyzer: Option<Arc<dyn Analyzer>>,
    notifier: Option<Arc<dyn Notifier>>,
    broker: Option<Arc<BrokerManager>>,
    buffers: HashMap<StreamId, Arc<ScreenshotBuffer>>,
    store: Option<EvidenceStore>,
}

impl OrchestratorBuilder {
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn broker(mut self, broker: Arc<BrokerManager>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Use `buffer` for the evidence frames of `stream`
    pub fn screenshot_buffer(mut self, stream: StreamId, buffer: Arc<ScreenshotBuffer>) -> Self {
        self.buffers.insert(stream, buffer);
        self
    }

    /// Persist every screenshot set
    pub fn evidence_store(mut self, store: EvidenceStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> EventOrchestrator {
        let max_wait = self.config.rate_limit_max_wait;
        let broker_limiter =
            RateLimiter::new("broker", self.config.broker_interval).with_max_wait(max_wait);
        let notifier_limiter =
            RateLimiter::new("notifier", self.config.notifier_interval).with_max_wait(max_wait);
        let history = VecDeque::with_capacity(self.config.history_size);

        EventOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                arm: self.arm,
                classifier: self.classifier,
                analyzer: self.analyzer,
                notifier: self.notifier,
                broker: self.broker,
                buffers: self.buffers,
                store: self.store,
                broker_limiter,
                notifier_limiter,
                in_flight: Arc::new(AtomicUsize::new(0)),
                accepting: AtomicBool::new(true),
                idle: Notify::new(),
                history: Mutex::new(history),
                counters: OrchestratorCounters::new(),
            }),
        }
    }
}

/// Sequences classification, evidence, analysis and notification per event
#[derive(Clone)]
pub struct EventOrchestrator {
    inner: Arc<Inner>,
}

/// Decrements the in-flight gauge when an event task ends, however it ends
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(CollaboratorError::Timeout(timeout)))
}

impl EventOrchestrator {
    pub fn builder(config: OrchestratorConfig, arm: ArmState) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            arm,
            classifier: None,
            analyzer: None,
            notifier: None,
            broker: None,
            buffers: HashMap::new(),
            store: None,
        }
    }

    /// Events currently being processed
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Shared in-flight gauge, for motion engine load shedding
    pub fn in_flight_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inner.in_flight)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.inner.counters.snapshot()
    }

    /// Most recent event summaries, newest last
    pub async fn recent_events(&self) -> Vec<EventSummary> {
        self.inner.history.lock().await.iter().cloned().collect()
    }

    pub fn notifier(&self) -> Option<&Arc<dyn Notifier>> {
        self.inner.notifier.as_ref()
    }

    pub fn broker(&self) -> Option<&Arc<BrokerManager>> {
        self.inner.broker.as_ref()
    }

    /// Accept a motion event and process it in the background
    ///
    /// Returns `false` if the event was dropped (disarmed, stopped, or no
    /// runtime to run it on).
    pub fn handle_event(&self, event: MotionEvent) -> bool {
        if !self.is_accepting() {
            tracing::debug!(stream = %event.stream, "Orchestrator stopped, event dropped");
            return false;
        }

        self.inner.counters.record_received();
        if !self.inner.arm.is_armed() {
            self.inner.counters.record_dropped();
            tracing::info!(stream = %event.stream, "System disarmed, event dropped");
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(stream = %event.stream, error = %e, "No runtime for event task");
                return false;
            }
        };

        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
        };
        let inner = Arc::clone(&self.inner);

        runtime.spawn(async move {
            let _guard = guard;
            let summary = inner.process(event).await;
            inner.remember(summary).await;
        });
        true
    }

    /// A motion handler that feeds this orchestrator
    pub fn motion_handler(&self) -> impl MotionHandler + 'static {
        let orchestrator = self.clone();
        move |event: &MotionEvent| -> Result<(), HandlerError> {
            orchestrator.handle_event(event.clone());
            Ok(())
        }
    }

    /// Refuse new events; in-flight events keep running
    pub fn stop(&self) {
        if self.inner.accepting.swap(false, Ordering::AcqRel) {
            tracing::info!(in_flight = self.in_flight(), "Orchestrator stopping");
        }
    }

    /// Wait up to `timeout` for in-flight events to finish
    ///
    /// Returns `true` if none are left.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.inner.idle.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                let left = self.in_flight();
                if left > 0 {
                    tracing::warn!(in_flight = left, "Orchestrator drain timed out");
                }
                return left == 0;
            }
        }
    }
}

impl Inner {
    async fn process(&self, event: MotionEvent) -> EventSummary {
        let stream = event.stream.clone();
        tracing::debug!(stream = %stream, seq = event.frame.seq, "Processing motion event");

        let labels = self.classify(&event).await;
        let set = self.screenshot_set(&event).await;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&set).await {
                tracing::warn!(stream = %stream, error = %e, "Failed to save evidence");
            }
        }

        let mut summary = EventSummary {
            stream: stream.to_string(),
            detected_at: event.detected_wall,
            regions: event.regions.len(),
            labels,
            threat_level: None,
            confidence: None,
            has_after: set.after.is_some(),
            outcome: EventOutcome::Unanalyzed,
        };

        let Some(analyzer) = &self.analyzer else {
            if let Some(Err(e)) = self.publish_state(None).await {
                self.counters.record_channel_failure();
                tracing::warn!(stream = %stream, error = %e, "Broker publish failed");
            }
            return summary;
        };

        let analysis = match bounded(self.config.collaborator_timeout, analyzer.analyze(&set)).await {
            Ok(analysis) => analysis,
            Err(e) => {
                self.counters.record_analysis_failure();
                tracing::error!(stream = %stream, error = %e, "Analysis failed, event not notified");
                summary.outcome = EventOutcome::AnalysisFailed;
                return summary;
            }
        };

        summary.threat_level = Some(analysis.threat_level);
        summary.confidence = Some(analysis.confidence);

        let (broker, notifier) = tokio::join!(
            self.publish_state(Some(&analysis)),
            self.send_alert(&set, &analysis)
        );

        let mut delivered = 0;
        let mut failed = 0;
        for (channel, result) in [("broker", broker), ("notifier", notifier)] {
            match result {
                Some(Ok(())) => delivered += 1,
                Some(Err(e)) => {
                    failed += 1;
                    self.counters.record_channel_failure();
                    tracing::warn!(stream = %stream, channel, error = %e, "Delivery failed");
                }
                None => {}
            }
        }

        summary.outcome = match (delivered, failed) {
            (0, 0) => EventOutcome::NoOutput,
            (0, _) => EventOutcome::DeliveryFailed,
            _ => EventOutcome::Notified,
        };
        if delivered > 0 {
            self.counters.record_notified();
        }

        tracing::info!(
            stream = %stream,
            threat = %analysis.threat_level,
            confidence = analysis.confidence,
            real = analysis.is_real_motion,
            delivered,
            failed,
            "Motion event handled"
        );
        summary
    }

    async fn classify(&self, event: &MotionEvent) -> Vec<String> {
        let Some(classifier) = &self.classifier else {
            return Vec::new();
        };

        match bounded(self.config.collaborator_timeout, classifier.detect(&event.frame)).await {
            Ok(detections) => {
                tracing::debug!(stream = %event.stream, count = detections.len(), "Classified");
                detections.into_iter().map(|d| d.label).collect()
            }
            Err(e) => {
                tracing::warn!(stream = %event.stream, error = %e, "Classification failed");
                Vec::new()
            }
        }
    }

    async fn screenshot_set(&self, event: &MotionEvent) -> ScreenshotSet {
        let reference = event.frame.captured_at;
        let buffer = self.buffers.get(&event.stream);

        let before = match buffer {
            Some(buffer) => buffer.frame_before(reference, self.config.before_offset).await,
            None => None,
        };

        tokio::time::sleep(self.config.after_wait).await;

        let after = match buffer {
            Some(buffer) => match buffer.frame_after(reference, self.config.after_wait).await {
                Some(frame) => Some(frame),
                None => buffer.latest().await.filter(|f| f.seq > event.frame.seq),
            },
            None => None,
        };

        ScreenshotSet::new(
            event.stream.clone(),
            before.unwrap_or_else(|| event.frame.clone()),
            event.frame.clone(),
            after,
        )
    }

    /// `None` when there is no connected broker
    async fn publish_state(
        &self,
        analysis: Option<&AnalysisResult>,
    ) -> Option<Result<(), CollaboratorError>> {
        let broker = self.broker.as_ref().filter(|b| b.is_connected())?;
        let detected = analysis.map_or(true, |a| a.is_real_motion);

        let result = async {
            self.broker_limiter.acquire().await?;
            bounded(self.config.collaborator_timeout, async {
                broker
                    .publish_state(detected, analysis)
                    .await
                    .map_err(CollaboratorError::from)
            })
            .await
        }
        .await;
        Some(result)
    }

    /// `None` when there is no available notifier
    async fn send_alert(
        &self,
        set: &ScreenshotSet,
        analysis: &AnalysisResult,
    ) -> Option<Result<(), CollaboratorError>> {
        let notifier = self.notifier.as_ref().filter(|n| n.is_available())?;

        let result = async {
            self.notifier_limiter.acquire().await?;
            bounded(self.config.collaborator_timeout, notifier.send_alert(set, analysis)).await
        }
        .await;
        Some(result)
    }

    async fn remember(&self, summary: EventSummary) {
        let mut history = self.history.lock().await;
        while history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(summary);
    }
}
