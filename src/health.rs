//! Health and readiness reporting
//!
//! [`HealthReport`] is a serializable snapshot of the pipeline for an
//! external status endpoint.

use serde::Serialize;

use crate::broker::{BrokerManager, ConnectionState};
use crate::capture::CaptureStatus;
use crate::orchestrator::{EventOrchestrator, EventSummary, Notifier};

/// Status of one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Ok,
    /// Running but not fully functional (reconnecting)
    Degraded,
    Error,
    /// Required configuration is absent
    Missing,
    /// Not configured, and not required
    Disabled,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Ok => "ok",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Error => "error",
            ComponentStatus::Missing => "missing",
            ComponentStatus::Disabled => "disabled",
        }
    }

    /// Camera status; `None` means no camera could be configured
    pub fn camera(status: Option<CaptureStatus>) -> Self {
        match status {
            None => ComponentStatus::Missing,
            Some(CaptureStatus::Streaming) => ComponentStatus::Ok,
            Some(CaptureStatus::Connecting | CaptureStatus::Reconnecting) => {
                ComponentStatus::Degraded
            }
            Some(CaptureStatus::Idle | CaptureStatus::Stopped) => ComponentStatus::Error,
        }
    }

    /// Broker status; `None` means no broker is configured
    pub fn broker(state: Option<ConnectionState>) -> Self {
        match state {
            None => ComponentStatus::Disabled,
            Some(ConnectionState::Connected) => ComponentStatus::Ok,
            Some(ConnectionState::Connecting) => ComponentStatus::Degraded,
            Some(ConnectionState::Disconnected) => ComponentStatus::Error,
        }
    }

    /// Notification channel status; `None` means no notifier is configured
    pub fn notifier(notifier: Option<&dyn Notifier>) -> Self {
        match notifier {
            None => ComponentStatus::Disabled,
            Some(n) if n.is_available() => ComponentStatus::Ok,
            Some(_) => ComponentStatus::Error,
        }
    }

    fn is_usable(&self) -> bool {
        matches!(self, ComponentStatus::Ok | ComponentStatus::Disabled)
    }
}

/// Overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Whether the orchestrator accepts events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Components {
    pub camera: ComponentStatus,
    pub broker: ComponentStatus,
    pub notification_channel: ComponentStatus,
}

impl Components {
    /// Camera ok, broker and notifications ok or disabled
    pub fn is_ready(&self) -> bool {
        self.camera == ComponentStatus::Ok
            && self.broker.is_usable()
            && self.notification_channel.is_usable()
    }
}

/// Health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Components,
    pub pipeline_status: PipelineStatus,
    pub recent_events: Vec<EventSummary>,
}

impl HealthReport {
    pub fn new(
        components: Components,
        pipeline_status: PipelineStatus,
        recent_events: Vec<EventSummary>,
    ) -> Self {
        let status = if components.is_ready() && pipeline_status == PipelineStatus::Running {
            HealthStatus::Healthy
        } else if matches!(
            components.camera,
            ComponentStatus::Missing | ComponentStatus::Error
        ) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            components,
            pipeline_status,
            recent_events,
        }
    }

    /// Assess the running pipeline
    pub async fn collect(
        camera: Option<CaptureStatus>,
        broker: Option<&BrokerManager>,
        orchestrator: &EventOrchestrator,
    ) -> Self {
        let components = Components {
            camera: ComponentStatus::camera(camera),
            broker: ComponentStatus::broker(broker.map(BrokerManager::state)),
            notification_channel: ComponentStatus::notifier(
                orchestrator.notifier().map(|n| n.as_ref()),
            ),
        };
        let pipeline_status = if orchestrator.is_accepting() {
            PipelineStatus::Running
        } else {
            PipelineStatus::Stopped
        };

        Self::new(components, pipeline_status, orchestrator.recent_events().await)
    }

    pub fn is_ready(&self) -> bool {
        self.components.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ArmState;
    use crate::orchestrator::OrchestratorConfig;

    fn components(camera: ComponentStatus, broker: ComponentStatus) -> Components {
        Components {
            camera,
            broker,
            notification_channel: ComponentStatus::Disabled,
        }
    }

    #[test]
    fn test_readiness() {
        assert!(components(ComponentStatus::Ok, ComponentStatus::Ok).is_ready());
        assert!(components(ComponentStatus::Ok, ComponentStatus::Disabled).is_ready());
        assert!(!components(ComponentStatus::Ok, ComponentStatus::Degraded).is_ready());
        assert!(!components(ComponentStatus::Missing, ComponentStatus::Ok).is_ready());
    }

    #[test]
    fn test_overall_status() {
        let report = HealthReport::new(
            components(ComponentStatus::Ok, ComponentStatus::Ok),
            PipelineStatus::Running,
            Vec::new(),
        );
        assert_eq!(report.status, HealthStatus::Healthy);

        let report = HealthReport::new(
            components(ComponentStatus::Ok, ComponentStatus::Error),
            PipelineStatus::Running,
            Vec::new(),
        );
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = HealthReport::new(
            components(ComponentStatus::Missing, ComponentStatus::Ok),
            PipelineStatus::Running,
            Vec::new(),
        );
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_component_mapping() {
        assert_eq!(
            ComponentStatus::camera(Some(CaptureStatus::Reconnecting)),
            ComponentStatus::Degraded
        );
        assert_eq!(ComponentStatus::camera(None), ComponentStatus::Missing);
        assert_eq!(ComponentStatus::broker(None), ComponentStatus::Disabled);
        assert_eq!(
            ComponentStatus::broker(Some(ConnectionState::Disconnected)),
            ComponentStatus::Error
        );
    }

    #[tokio::test]
    async fn test_collect_serializes() {
        let orchestrator =
            EventOrchestrator::builder(OrchestratorConfig::default(), ArmState::default()).build();
        orchestrator.stop();

        let report =
            HealthReport::collect(Some(CaptureStatus::Streaming), None, &orchestrator).await;
        assert!(report.is_ready());
        assert_eq!(report.status, HealthStatus::Degraded);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["components"]["camera"], "ok");
        assert_eq!(json["components"]["notification_channel"], "disabled");
        assert_eq!(json["pipeline_status"], "stopped");
    }
}
