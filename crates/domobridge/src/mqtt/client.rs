use std::time::Duration;

use rumqttc::AsyncClient;
use rumqttc::EventLoop;
use rumqttc::MqttOptions;
use rumqttc::QoS;

use crate::bus::Bus;
use crate::bus::BusError;
use crate::bus::Qos;
use crate::config::MqttConfig;

/// Capacity of the request channel between a client and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
            Qos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// [`Bus`] implementation using rumqttc
///
/// Every connect request opens a fresh session: a new `AsyncClient` and
/// `EventLoop` pair. The runtime picks up the event loop with
/// [`RumqttcBus::start_session`] and polls it until it fails.
pub struct RumqttcBus {
    /// MQTT connection options (cloned for every session)
    mqtt_options: MqttOptions,

    /// Client of the current session
    client: Option<AsyncClient>,

    /// Set by `connect()`, consumed by `start_session()`
    connect_requested: bool,
}

impl RumqttcBus {
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        Self {
            mqtt_options,
            client: None,
            connect_requested: false,
        }
    }

    pub fn connect_requested(&self) -> bool {
        self.connect_requested
    }

    pub fn has_session(&self) -> bool {
        self.client.is_some()
    }

    /// Open the session requested by the last `connect()`, if any.
    ///
    /// The previous session's client is dropped.
    pub fn start_session(&mut self) -> Option<EventLoop> {
        if !std::mem::take(&mut self.connect_requested) {
            return None;
        }
        let (client, event_loop) =
            AsyncClient::new(self.mqtt_options.clone(), REQUEST_CHANNEL_CAPACITY);
        self.client = Some(client);
        Some(event_loop)
    }

    /// Forget the current session after its event loop ended
    pub fn end_session(&mut self) {
        self.client = None;
    }

    fn client(&self) -> Result<&AsyncClient, BusError> {
        self.client.as_ref().ok_or(BusError::NotConnected)
    }
}

impl Bus for RumqttcBus {
    fn connect(&mut self) {
        self.connect_requested = true;
    }

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), BusError> {
        self.client()?
            .try_subscribe(topic, qos.into())
            .map_err(|e| BusError::Rejected(e.to_string()))
    }

    fn publish(
        &mut self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        self.client()?
            .try_publish(topic, qos.into(), retain, payload)
            .map_err(|e| BusError::Rejected(e.to_string()))
    }
}

impl std::fmt::Debug for RumqttcBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RumqttcBus")
            .field("broker", &self.mqtt_options.broker_address())
            .field("has_session", &self.client.is_some())
            .field("connect_requested", &self.connect_requested)
            .finish()
    }
}
