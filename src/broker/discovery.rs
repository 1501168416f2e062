//! Capability discovery and state payloads
//!
//! Each capability is advertised with one retained config message under the
//! discovery prefix so the home-automation host creates a matching entity.
//! State messages go to `{base_topic}/{key}/state`.

use serde::Serialize;

use crate::orchestrator::AnalysisResult;

use super::config::{BrokerConfig, DeviceInfo};
use super::transport::Message;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";
pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

/// Entity kind on the home-automation side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    BinarySensor,
    Sensor,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::BinarySensor => "binary_sensor",
            Component::Sensor => "sensor",
        }
    }
}

/// One advertised entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub key: &'static str,
    pub component: Component,
    pub name: &'static str,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub icon: Option<&'static str>,
}

pub const MOTION: Capability = Capability {
    key: "motion",
    component: Component::BinarySensor,
    name: "Motion",
    device_class: Some("motion"),
    unit: None,
    icon: None,
};

pub const CONFIDENCE: Capability = Capability {
    key: "confidence",
    component: Component::Sensor,
    name: "Motion confidence",
    device_class: None,
    unit: Some("%"),
    icon: Some("mdi:percent"),
};

pub const THREAT_LEVEL: Capability = Capability {
    key: "threat_level",
    component: Component::Sensor,
    name: "Threat level",
    device_class: None,
    unit: None,
    icon: Some("mdi:shield-alert"),
};

pub const LAST_ANALYSIS: Capability = Capability {
    key: "last_analysis",
    component: Component::Sensor,
    name: "Last analysis",
    device_class: Some("timestamp"),
    unit: None,
    icon: None,
};

pub const OBJECT_LABELS: Capability = Capability {
    key: "object_labels",
    component: Component::Sensor,
    name: "Detected objects",
    device_class: None,
    unit: None,
    icon: Some("mdi:tag-multiple"),
};

/// Every advertised capability
pub const CAPABILITIES: [Capability; 5] = [MOTION, CONFIDENCE, THREAT_LEVEL, LAST_ANALYSIS, OBJECT_LABELS];

#[derive(Debug, Serialize)]
struct DiscoveryPayload<'a> {
    name: &'a str,
    unique_id: String,
    object_id: String,
    state_topic: String,
    availability_topic: String,
    payload_available: &'a str,
    payload_not_available: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_on: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_off: Option<&'a str>,
    device: &'a DeviceInfo,
}

fn node_id(config: &BrokerConfig) -> String {
    config
        .client_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Discovery config topic for a capability
pub fn discovery_topic(config: &BrokerConfig, capability: &Capability) -> String {
    format!(
        "{}/{}/{}/{}/config",
        config.discovery_prefix,
        capability.component.as_str(),
        node_id(config),
        capability.key
    )
}

/// Retained discovery message for a capability
pub fn discovery_message(
    config: &BrokerConfig,
    capability: &Capability,
) -> Result<Message, serde_json::Error> {
    let node = node_id(config);
    let binary = capability.component == Component::BinarySensor;

    let payload = DiscoveryPayload {
        name: capability.name,
        unique_id: format!("{}_{}", node, capability.key),
        object_id: format!("{}_{}", node, capability.key),
        state_topic: config.state_topic(capability.key),
        availability_topic: config.availability_topic(),
        payload_available: PAYLOAD_ONLINE,
        payload_not_available: PAYLOAD_OFFLINE,
        device_class: capability.device_class,
        unit_of_measurement: capability.unit,
        icon: capability.icon,
        payload_on: binary.then_some(PAYLOAD_ON),
        payload_off: binary.then_some(PAYLOAD_OFF),
        device: &config.device,
    };

    Ok(Message::new(
        discovery_topic(config, capability),
        serde_json::to_string(&payload)?,
        config.qos,
        true,
    ))
}

/// Confidence as a rounded percentage string
pub fn confidence_percent(confidence: f32) -> String {
    let pct = (confidence.clamp(0.0, 1.0) * 100.0).round() as u32;
    pct.to_string()
}

/// State messages for a detection update
///
/// Without an analysis only the motion topic is updated.
pub fn state_messages(
    config: &BrokerConfig,
    detected: bool,
    analysis: Option<&AnalysisResult>,
) -> Vec<Message> {
    let state = |cap: &Capability, payload: String| Message::new(config.state_topic(cap.key), payload, config.qos, false);

    let mut messages = vec![state(
        &MOTION,
        if detected { PAYLOAD_ON } else { PAYLOAD_OFF }.to_string(),
    )];

    if let Some(analysis) = analysis {
        messages.push(state(&CONFIDENCE, confidence_percent(analysis.confidence)));
        messages.push(state(&THREAT_LEVEL, analysis.threat_level.as_str().to_string()));
        messages.push(state(&LAST_ANALYSIS, analysis.analyzed_at.to_rfc3339()));
        messages.push(state(&OBJECT_LABELS, analysis.object_labels.join(",")));
    }

    messages
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::orchestrator::ThreatLevel;

    fn config() -> BrokerConfig {
        BrokerConfig::new("mqtt.local").client_id("watch post").base_topic("wp")
    }

    #[test]
    fn test_discovery_topics() {
        let config = config();
        assert_eq!(
            discovery_topic(&config, &MOTION),
            "homeassistant/binary_sensor/watch_post/motion/config"
        );
        assert_eq!(
            discovery_topic(&config, &CONFIDENCE),
            "homeassistant/sensor/watch_post/confidence/config"
        );
    }

    #[test]
    fn test_discovery_payload() {
        let config = config();
        let message = discovery_message(&config, &MOTION).unwrap();
        let json: serde_json::Value = serde_json::from_str(&message.payload).unwrap();

        assert!(message.retain);
        assert_eq!(json["unique_id"], "watch_post_motion");
        assert_eq!(json["state_topic"], "wp/motion/state");
        assert_eq!(json["availability_topic"], "wp/availability");
        assert_eq!(json["device_class"], "motion");
        assert_eq!(json["payload_on"], "ON");
        assert_eq!(json["device"]["identifiers"][0], "watchpost");
        assert!(json.get("unit_of_measurement").is_none());

        let message = discovery_message(&config, &CONFIDENCE).unwrap();
        let json: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(json["unit_of_measurement"], "%");
        assert!(json.get("payload_on").is_none());
    }

    #[test]
    fn test_unique_ids_are_distinct() {
        let config = config();
        let mut ids: Vec<String> = CAPABILITIES
            .iter()
            .map(|cap| discovery_message(&config, cap).unwrap())
            .map(|m| serde_json::from_str::<serde_json::Value>(&m.payload).unwrap()["unique_id"].to_string())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), CAPABILITIES.len());
    }

    #[test]
    fn test_confidence_rounding() {
        assert_eq!(confidence_percent(0.874), "87");
        assert_eq!(confidence_percent(0.875), "88");
        assert_eq!(confidence_percent(1.7), "100");
        assert_eq!(confidence_percent(-0.2), "0");
    }

    #[test]
    fn test_state_without_analysis() {
        let messages = state_messages(&config(), false, None);
        assert_eq!(messages, vec![Message::new("wp/motion/state", "OFF", 1, false)]);
    }

    #[test]
    fn test_state_with_analysis() {
        let analysis = AnalysisResult {
            is_real_motion: true,
            confidence: 0.91,
            object_labels: vec!["person".into(), "dog".into()],
            threat_level: ThreatLevel::Medium,
            recommended_action: "check camera".into(),
            narrative: "A person walks a dog".into(),
            analyzed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        };

        let messages = state_messages(&config(), true, Some(&analysis));
        let payloads: Vec<(&str, &str)> = messages
            .iter()
            .map(|m| (m.topic.as_str(), m.payload.as_str()))
            .collect();

        assert_eq!(
            payloads,
            vec![
                ("wp/motion/state", "ON"),
                ("wp/confidence/state", "91"),
                ("wp/threat_level/state", "medium"),
                ("wp/last_analysis/state", "2024-05-01T12:30:00+00:00"),
                ("wp/object_labels/state", "person,dog"),
            ]
        );
    }
}
