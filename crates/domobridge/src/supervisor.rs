use std::time::Duration;

use strum::Display;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bus::Bus;
use crate::bus::Qos;
use crate::bus::ReconnectTimer;

/// Delay before retrying a lost bus session
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Lifecycle of the bus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    WaitingForNetwork,
    ConnectingToBus,
    Subscribing,
    Active,
    Backoff,
}

impl ConnectionState {
    /// A bus session is open or being opened
    pub fn holds_session(self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectingToBus | ConnectionState::Subscribing | ConnectionState::Active
        )
    }
}

/// Connection event the owner should broadcast to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

/// Settings for the supervisor's subscription and retry policy
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub subscribe_topic: String,
    pub subscribe_qos: Qos,
    pub reconnect_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            subscribe_topic: "domoticz/out".to_string(),
            subscribe_qos: Qos::ExactlyOnce,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// State machine keeping the bus session alive.
///
/// Network and bus availability are tracked separately: a bus connect is
/// only ever requested while the network is known to be up, and only one
/// connect attempt is outstanding at a time. The reconnect timer is armed
/// only in [`ConnectionState::Backoff`].
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    network_up: bool,
    timer_armed: bool,
    config: SupervisorConfig,
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            network_up: false,
            timer_armed: false,
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn network_up(&self) -> bool {
        self.network_up
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn on_network_available(&mut self, bus: &mut impl Bus, timer: &mut impl ReconnectTimer) {
        self.network_up = true;
        match self.state {
            ConnectionState::Idle
            | ConnectionState::WaitingForNetwork
            | ConnectionState::Backoff => {
                self.disarm(timer);
                self.connect(bus);
            }
            ConnectionState::ConnectingToBus
            | ConnectionState::Subscribing
            | ConnectionState::Active => {
                debug!("Network available while {}, nothing to do", self.state);
            }
        }
    }

    /// The network went away. Any bus session goes with it, so leaving a
    /// connecting or connected state reports a disconnect.
    pub fn on_network_lost(&mut self, timer: &mut impl ReconnectTimer) -> Option<LinkEvent> {
        self.network_up = false;
        self.disarm(timer);
        let had_session = self.state.holds_session();
        self.transition(ConnectionState::WaitingForNetwork);
        had_session.then_some(LinkEvent::Disconnected)
    }

    pub fn on_bus_connected(
        &mut self,
        session_present: bool,
        bus: &mut impl Bus,
        timer: &mut impl ReconnectTimer,
    ) -> Option<LinkEvent> {
        match self.state {
            ConnectionState::ConnectingToBus => {
                debug!("Bus session established (session present: {})", session_present);
                if let Err(e) = bus.subscribe(&self.config.subscribe_topic, self.config.subscribe_qos)
                {
                    warn!(
                        "Failed to subscribe to {}: {}",
                        self.config.subscribe_topic, e
                    );
                    return Some(self.on_bus_lost(&format!("subscribe failed: {}", e), timer));
                }
                self.transition(ConnectionState::Subscribing);
                None
            }
            ConnectionState::Subscribing => self.activate(timer),
            ConnectionState::Active => None,
            state => {
                debug!("Ignoring bus connection while {}", state);
                None
            }
        }
    }

    /// The broker acknowledged the subscription
    pub fn on_subscribed(&mut self, timer: &mut impl ReconnectTimer) -> Option<LinkEvent> {
        match self.state {
            ConnectionState::Subscribing => self.activate(timer),
            _ => None,
        }
    }

    pub fn on_bus_lost(&mut self, reason: &str, timer: &mut impl ReconnectTimer) -> LinkEvent {
        match self.state {
            state if state.holds_session() => {
                info!("Bus connection lost: {}", reason);
                if self.network_up {
                    timer.arm_once(self.config.reconnect_delay);
                    self.timer_armed = true;
                    self.transition(ConnectionState::Backoff);
                } else {
                    self.transition(ConnectionState::WaitingForNetwork);
                }
            }
            state => {
                debug!("Bus connection lost while {}: {}", state, reason);
            }
        }
        LinkEvent::Disconnected
    }

    pub fn on_timer_expired(&mut self, bus: &mut impl Bus) {
        if self.state != ConnectionState::Backoff {
            debug!("Ignoring stale reconnect timer while {}", self.state);
            return;
        }
        self.timer_armed = false;
        self.connect(bus);
    }

    fn activate(&mut self, timer: &mut impl ReconnectTimer) -> Option<LinkEvent> {
        self.disarm(timer);
        self.transition(ConnectionState::Active);
        Some(LinkEvent::Connected)
    }

    fn connect(&mut self, bus: &mut impl Bus) {
        debug_assert!(self.network_up, "bus connect requested without network");
        debug_assert!(!self.timer_armed, "bus connect requested while backing off");
        info!("Connecting to bus");
        bus.connect();
        self.transition(ConnectionState::ConnectingToBus);
    }

    fn disarm(&mut self, timer: &mut impl ReconnectTimer) {
        if self.timer_armed {
            timer.disarm();
            self.timer_armed = false;
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("Connection state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
