use tracing::debug;

use crate::bus::Bus;
use crate::bus::BusError;
use crate::bus::Qos;
use crate::bus::ReconnectTimer;
use crate::codec::CodecError;
use crate::codec::Command;
use crate::codec::MessageCodec;
use crate::codec::format_value;
use crate::codec::format_values;
use crate::device::DeviceId;
use crate::registry::Category;
use crate::registry::Listener;
use crate::registry::ListenerRegistry;
use crate::registry::RegistryError;
use crate::registry::Target;
use crate::supervisor::ConnectionState;
use crate::supervisor::ConnectionSupervisor;
use crate::supervisor::LinkEvent;
use crate::supervisor::SupervisorConfig;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to publish command: {0}")]
    Bus(#[from] BusError),
}

/// Settings for a [`Bridge`]
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub supervisor: SupervisorConfig,

    /// Topic commands are published to
    pub publish_topic: String,
    pub publish_qos: Qos,
    pub retain: bool,

    /// Maximum number of listeners; `None` for no limit
    pub max_listeners: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            publish_topic: "domoticz/in".to_string(),
            publish_qos: Qos::AtLeastOnce,
            retain: false,
            max_listeners: Some(16),
        }
    }
}

/// Domoticz bridge
///
/// Owns the connection supervisor, the listener registry and the codec, and
/// routes transport signals and inbound messages between them. All methods
/// run to completion without blocking; the owner feeds signals in the order
/// they were delivered.
pub struct Bridge<B: Bus, T: ReconnectTimer> {
    supervisor: ConnectionSupervisor,
    registry: ListenerRegistry,
    codec: MessageCodec,
    bus: B,
    timer: T,
    publish_topic: String,
    publish_qos: Qos,
    retain: bool,
}

impl<B: Bus, T: ReconnectTimer> Bridge<B, T> {
    pub fn new(config: BridgeConfig, bus: B, timer: T) -> Self {
        let registry = match config.max_listeners {
            Some(max) => ListenerRegistry::with_capacity_limit(max),
            None => ListenerRegistry::new(),
        };
        Self {
            supervisor: ConnectionSupervisor::new(config.supervisor),
            registry,
            codec: MessageCodec::new(),
            bus,
            timer,
            publish_topic: config.publish_topic,
            publish_qos: config.publish_qos,
            retain: config.retain,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn add_listener(
        &mut self,
        target: Target,
        category: Category,
        listener: impl Listener + 'static,
    ) -> Result<(), RegistryError> {
        self.registry.register(target, category, listener)
    }

    /// Listen for state updates of one device
    pub fn add_device_listener(
        &mut self,
        idx: DeviceId,
        listener: impl Listener + 'static,
    ) -> Result<(), RegistryError> {
        self.add_listener(Target::Device(idx), Category::DeviceUpdate, listener)
    }

    pub fn add_connected_listener(
        &mut self,
        listener: impl Listener + 'static,
    ) -> Result<(), RegistryError> {
        self.add_listener(Target::Broadcast, Category::Connected, listener)
    }

    pub fn add_disconnected_listener(
        &mut self,
        listener: impl Listener + 'static,
    ) -> Result<(), RegistryError> {
        self.add_listener(Target::Broadcast, Category::Disconnected, listener)
    }

    pub fn on_network_available(&mut self) {
        self.supervisor
            .on_network_available(&mut self.bus, &mut self.timer);
    }

    pub fn on_network_lost(&mut self) {
        let event = self.supervisor.on_network_lost(&mut self.timer);
        self.raise(event);
    }

    pub fn on_bus_connected(&mut self, session_present: bool) {
        let event = self
            .supervisor
            .on_bus_connected(session_present, &mut self.bus, &mut self.timer);
        self.raise(event);
    }

    pub fn on_subscribed(&mut self) {
        let event = self.supervisor.on_subscribed(&mut self.timer);
        self.raise(event);
    }

    pub fn on_bus_lost(&mut self, reason: &str) {
        let event = self.supervisor.on_bus_lost(reason, &mut self.timer);
        self.raise(Some(event));
    }

    pub fn on_reconnect_timer(&mut self) {
        self.supervisor.on_timer_expired(&mut self.bus);
    }

    /// Decode an inbound message and dispatch it to the device's listeners.
    ///
    /// Returns the number of listeners invoked; undecodable messages are
    /// dropped and invoke none.
    pub fn on_message(&mut self, payload: &[u8]) -> usize {
        let Some(record) = self.codec.decode(payload) else {
            return 0;
        };
        let invoked = self.registry.dispatch_device(&record);
        debug!("Device {} update delivered to {} listener(s)", record.idx, invoked);
        invoked
    }

    pub fn send_temperature(&mut self, idx: DeviceId, temperature: f64) -> Result<(), BridgeError> {
        self.update_device(idx, format_value(temperature))
    }

    pub fn send_temperature_and_humidity(
        &mut self,
        idx: DeviceId,
        temperature: f64,
        humidity: f64,
    ) -> Result<(), BridgeError> {
        self.update_device(idx, format_values(&[temperature, humidity]))
    }

    /// Push a raw `svalue` for a device
    pub fn update_device(
        &mut self,
        idx: DeviceId,
        svalue: impl Into<String>,
    ) -> Result<(), BridgeError> {
        self.send_command(&Command::update(idx, svalue))
    }

    /// Ask Domoticz to publish the current state of a device
    pub fn request_device_data(&mut self, idx: DeviceId) -> Result<(), BridgeError> {
        self.send_command(&Command::request_data(idx))
    }

    /// Encode and publish a command to the outbound topic
    pub fn send_command(&mut self, command: &Command) -> Result<(), BridgeError> {
        let payload = self.codec.encode(command)?;
        debug!(
            "Sending command for device {}: {}",
            command.idx(),
            String::from_utf8_lossy(&payload)
        );
        self.bus
            .publish(&self.publish_topic, self.publish_qos, self.retain, payload)?;
        Ok(())
    }

    fn raise(&mut self, event: Option<LinkEvent>) {
        let category = match event {
            Some(LinkEvent::Connected) => Category::Connected,
            Some(LinkEvent::Disconnected) => Category::Disconnected,
            None => return,
        };
        let invoked = self.registry.broadcast(category);
        debug!("Broadcast {} to {} listener(s)", category, invoked);
    }
}

impl<B: Bus, T: ReconnectTimer> std::fmt::Debug for Bridge<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("supervisor", &self.supervisor)
            .field("registry", &self.registry)
            .field("publish_topic", &self.publish_topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;
    use crate::bus::MockBus;
    use crate::bus::MockTimer;
    use crate::device::DeviceRecord;

    type TestBridge = Bridge<MockBus, MockTimer>;

    fn bridge() -> TestBridge {
        Bridge::new(
            BridgeConfig::default(),
            MockBus::default(),
            MockTimer::default(),
        )
    }

    fn counter(bridge: &mut TestBridge, category: Category) -> Arc<Mutex<usize>> {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let listener = move |_: Category, _: &DeviceRecord| *sink.lock().unwrap() += 1;
        match category {
            Category::Connected => bridge.add_connected_listener(listener).unwrap(),
            Category::Disconnected => bridge.add_disconnected_listener(listener).unwrap(),
            Category::DeviceUpdate => unreachable!(),
        }
        count
    }

    #[test]
    fn test_connected_broadcast_once() {
        let mut bridge = bridge();
        let connected = counter(&mut bridge, Category::Connected);

        bridge.on_network_available();
        bridge.on_bus_connected(false);
        assert_eq!(bridge.state(), ConnectionState::Subscribing);
        assert_eq!(bridge.bus().subscriptions.len(), 1);
        assert_eq!(*connected.lock().unwrap(), 0);

        bridge.on_bus_connected(true);
        bridge.on_subscribed();
        assert_eq!(bridge.state(), ConnectionState::Active);
        assert_eq!(*connected.lock().unwrap(), 1);
    }

    #[test]
    fn test_bus_lost_broadcasts_disconnected() {
        let mut bridge = bridge();
        let disconnected = counter(&mut bridge, Category::Disconnected);

        bridge.on_network_available();
        bridge.on_bus_lost("connection refused");
        assert_eq!(bridge.state(), ConnectionState::Backoff);
        assert_eq!(*disconnected.lock().unwrap(), 1);
        assert_eq!(bridge.timer().arm_count, 1);

        bridge.on_reconnect_timer();
        assert_eq!(bridge.state(), ConnectionState::ConnectingToBus);
        assert_eq!(bridge.bus().connects, 2);
    }

    #[test]
    fn test_network_lost_while_active() {
        let mut bridge = bridge();
        let connected = counter(&mut bridge, Category::Connected);
        let disconnected = counter(&mut bridge, Category::Disconnected);
        bridge.on_network_available();
        bridge.on_bus_connected(false);
        bridge.on_subscribed();

        bridge.on_network_lost();
        assert_eq!(bridge.state(), ConnectionState::WaitingForNetwork);
        assert_eq!(bridge.timer().armed, None);
        assert_eq!(*disconnected.lock().unwrap(), 1);

        // Every Connected after the first is preceded by a Disconnected
        bridge.on_network_available();
        bridge.on_bus_connected(false);
        bridge.on_subscribed();
        assert_eq!(*connected.lock().unwrap(), 2);
        assert_eq!(*disconnected.lock().unwrap(), 1);
    }

    #[test]
    fn test_rejected_subscribe_broadcasts_disconnected() {
        let mut bridge = bridge();
        let connected = counter(&mut bridge, Category::Connected);
        let disconnected = counter(&mut bridge, Category::Disconnected);
        bridge.bus_mut().reject_subscribe = true;

        bridge.on_network_available();
        bridge.on_bus_connected(false);
        assert_eq!(bridge.state(), ConnectionState::Backoff);
        assert!(bridge.timer().armed.is_some());
        assert_eq!(*connected.lock().unwrap(), 0);
        assert_eq!(*disconnected.lock().unwrap(), 1);
    }

    #[test]
    fn test_on_message_dispatches_to_device() {
        let mut bridge = bridge();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for idx in [5, 6] {
            let sink = seen.clone();
            bridge
                .add_device_listener(idx, move |_: Category, record: &DeviceRecord| {
                    sink.lock().unwrap().push(*record);
                })
                .unwrap();
        }

        assert_eq!(bridge.on_message(br#"{"idx": 5, "svalue1": "19.25"}"#), 1);
        assert_eq!(bridge.on_message(b"not json"), 0);
        assert_eq!(bridge.on_message(br#"{"idx": 0}"#), 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].idx, 5);
        assert_eq!(seen[0].svalue1, 19.25);
    }

    #[test]
    fn test_dropped_message_leaves_state_alone() {
        let mut bridge = bridge();
        bridge.on_network_available();
        bridge.on_message(b"{");
        assert_eq!(bridge.state(), ConnectionState::ConnectingToBus);
        assert_eq!(bridge.bus().connects, 1);
    }

    #[test]
    fn test_send_commands() {
        let mut bridge = bridge();
        bridge.send_temperature_and_humidity(3, 21.5, 55.2).unwrap();
        bridge.send_temperature(4, 18.0).unwrap();
        bridge.request_device_data(9).unwrap();

        assert_eq!(
            bridge.bus().payloads(),
            vec![
                r#"{"idx":3,"nvalue":0,"svalue":"21.50;55.20;0"}"#,
                r#"{"idx":4,"nvalue":0,"svalue":"18.00"}"#,
                r#"{"idx":9,"command":"getdeviceinfo"}"#,
            ]
        );
        let (topic, qos, retain, _) = &bridge.bus().published[0];
        assert_eq!(topic, "domoticz/in");
        assert_eq!(*qos, Qos::AtLeastOnce);
        assert!(!retain);
    }

    #[test]
    fn test_send_errors_propagate() {
        let mut bridge = bridge();
        bridge.bus_mut().reject_publish = true;
        assert!(matches!(
            bridge.request_device_data(1),
            Err(BridgeError::Bus(BusError::Rejected(_)))
        ));

        bridge.bus_mut().reject_publish = false;
        assert!(matches!(
            bridge.update_device(1, "9".repeat(500)),
            Err(BridgeError::Codec(CodecError::PayloadTooLarge { .. }))
        ));
        assert!(bridge.bus().published.is_empty());
    }

    #[test]
    fn test_listener_capacity_from_config() {
        let config = BridgeConfig {
            max_listeners: Some(1),
            ..Default::default()
        };
        let mut bridge = Bridge::new(config, MockBus::default(), MockTimer::default());
        bridge
            .add_connected_listener(|_: Category, _: &DeviceRecord| {})
            .unwrap();
        assert_eq!(
            bridge.add_device_listener(1, |_: Category, _: &DeviceRecord| {}),
            Err(RegistryError::CapacityExceeded(1))
        );
    }
}
