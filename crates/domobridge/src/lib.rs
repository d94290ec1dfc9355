//! Bridge between a Domoticz MQTT bus and local device listeners.
//!
//! The [`Bridge`] keeps the bus session alive across network and broker
//! outages, decodes Domoticz device messages into [`DeviceRecord`]s and fans
//! them out to listeners registered per device. The transport is abstracted
//! behind [`Bus`] and [`ReconnectTimer`]; the `mqtt` feature provides the
//! rumqttc/tokio implementation.

mod bridge;
mod bus;
pub mod codec;
pub mod config;
mod device;
mod registry;
mod supervisor;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use bridge::Bridge;
pub use bridge::BridgeConfig;
pub use bridge::BridgeError;
pub use bus::Bus;
pub use bus::BusError;
pub use bus::Qos;
pub use bus::ReconnectTimer;
pub use codec::CodecError;
pub use codec::Command;
pub use codec::MessageCodec;
pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use device::DeviceId;
pub use device::DeviceRecord;
pub use registry::Category;
pub use registry::Listener;
pub use registry::ListenerRegistry;
pub use registry::RegistryError;
pub use registry::Target;
pub use supervisor::ConnectionState;
pub use supervisor::ConnectionSupervisor;
pub use supervisor::LinkEvent;
pub use supervisor::SupervisorConfig;
