//! Message broker integration
//!
//! [`BrokerManager`] owns the connection, availability flag and discovery
//! configs; [`BrokerTransport`] abstracts the wire, with [`MqttTransport`]
//! as the production implementation.

pub mod config;
pub mod discovery;
pub mod manager;
pub mod transport;

pub use config::{BrokerConfig, DeviceInfo};
pub use discovery::{Capability, Component, CAPABILITIES};
pub use manager::{hook_fn, BrokerManager, ConnectionHook, ConnectionState, FnHook, HookError};
pub use transport::{BrokerTransport, LastWill, Message, MqttTransport};
