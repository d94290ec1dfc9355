//! Collaborator interface between the bridge core and the transport.
//!
//! Everything here is synchronous and non-blocking. Outcomes of a request
//! (connection acknowledged, connection lost, subscription acknowledged) come
//! back later as signals fed into [`crate::Bridge`].

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;

/// MQTT delivery-assurance level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no bus session is open")]
    NotConnected,

    #[error("bus rejected request: {0}")]
    Rejected(String),
}

/// Commands the core issues to the publish/subscribe transport.
pub trait Bus {
    /// Request a new session with the broker.
    ///
    /// Success is reported through `Bridge::on_bus_connected`, failure
    /// through `Bridge::on_bus_lost`.
    fn connect(&mut self);

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), BusError>;

    fn publish(
        &mut self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BusError>;
}

/// One-shot timer used for reconnect backoff.
///
/// Expiry is reported through `Bridge::on_reconnect_timer`.
pub trait ReconnectTimer {
    /// Arm the timer, replacing any pending deadline
    fn arm_once(&mut self, delay: Duration);

    /// Cancel the pending deadline, if any
    fn disarm(&mut self);
}

/// Mock bus for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockBus {
    pub connects: usize,
    pub subscriptions: Vec<(String, Qos)>,
    pub published: Vec<(String, Qos, bool, Vec<u8>)>,
    pub reject_publish: bool,
    pub reject_subscribe: bool,
}

#[cfg(test)]
impl Bus for MockBus {
    fn connect(&mut self) {
        self.connects += 1;
    }

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), BusError> {
        if self.reject_subscribe {
            return Err(BusError::Rejected("queue full".to_string()));
        }
        self.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        if self.reject_publish {
            return Err(BusError::Rejected("queue full".to_string()));
        }
        self.published.push((topic.to_string(), qos, retain, payload));
        Ok(())
    }
}

#[cfg(test)]
impl MockBus {
    /// Payloads published so far, as strings
    pub fn payloads(&self) -> Vec<String> {
        self.published
            .iter()
            .map(|(_, _, _, payload)| String::from_utf8(payload.clone()).unwrap())
            .collect()
    }
}

/// Mock timer for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTimer {
    pub armed: Option<Duration>,
    pub arm_count: usize,
    pub disarm_count: usize,
}

#[cfg(test)]
impl ReconnectTimer for MockTimer {
    fn arm_once(&mut self, delay: Duration) {
        self.armed = Some(delay);
        self.arm_count += 1;
    }

    fn disarm(&mut self) {
        self.armed = None;
        self.disarm_count += 1;
    }
}
