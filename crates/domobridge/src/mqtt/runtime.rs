use std::future::Future;

use rumqttc::ConnectionError;
use rumqttc::Event;
use rumqttc::EventLoop;
use rumqttc::Packet;
use rumqttc::SubscribeReasonCode;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::MqttBridge;
use super::timer::sleep_until;
use crate::codec::Command;

/// Network-layer availability reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Available,
    Lost,
}

/// Drive a bridge until `shutdown` completes.
///
/// This task is the bridge's only owner: network events, commands, the
/// reconnect deadline and the MQTT session are all handled here one at a
/// time, in the order they arrive.
pub async fn run(
    bridge: &mut MqttBridge,
    mut network: mpsc::Receiver<NetworkEvent>,
    mut commands: mpsc::Receiver<Command>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    let mut session: Option<EventLoop> = None;
    let mut network_open = true;
    let mut commands_open = true;

    loop {
        if let Some(event_loop) = bridge.bus_mut().start_session() {
            info!("Starting MQTT session");
            session = Some(event_loop);
        }
        let deadline = bridge.timer().deadline();

        tokio::select! {
            _ = &mut shutdown => {
                info!("Bridge runtime shutting down");
                break;
            }
            event = network.recv(), if network_open => match event {
                Some(NetworkEvent::Available) => bridge.on_network_available(),
                Some(NetworkEvent::Lost) => bridge.on_network_lost(),
                None => {
                    debug!("Network event source closed");
                    network_open = false;
                }
            },
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    if let Err(e) = bridge.send_command(&command) {
                        warn!("Failed to send command for device {}: {}", command.idx(), e);
                    }
                }
                None => commands_open = false,
            },
            _ = sleep_until(deadline) => {
                if bridge.timer_mut().fire() {
                    bridge.on_reconnect_timer();
                }
            }
            event = poll(&mut session) => match event {
                Ok(event) => handle_event(bridge, event),
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    session = None;
                    bridge.bus_mut().end_session();
                    bridge.on_bus_lost(&e.to_string());
                }
            },
        }

        retire_session(bridge, &mut session);
    }
}

/// Drop the session once the bridge has given up on it
fn retire_session(bridge: &mut MqttBridge, session: &mut Option<EventLoop>) {
    if session.is_some() && !bridge.state().holds_session() {
        debug!("Closing MQTT session while {}", bridge.state());
        *session = None;
        bridge.bus_mut().end_session();
    }
}

async fn poll(session: &mut Option<EventLoop>) -> Result<Event, ConnectionError> {
    match session {
        Some(event_loop) => event_loop.poll().await,
        None => std::future::pending().await,
    }
}

fn handle_event(bridge: &mut MqttBridge, event: Event) {
    let Event::Incoming(packet) = event else {
        return;
    };
    match packet {
        Packet::ConnAck(ack) => bridge.on_bus_connected(ack.session_present),
        Packet::SubAck(ack) => {
            if ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                warn!("Broker rejected subscription (packet {})", ack.pkid);
                bridge.on_bus_lost("subscription rejected by broker");
            } else {
                debug!("Subscribe acknowledged (packet {})", ack.pkid);
                bridge.on_subscribed();
            }
        }
        Packet::Publish(publish) => {
            debug!("Received message on topic: {}", publish.topic);
            bridge.on_message(&publish.payload);
        }
        Packet::PubAck(ack) => debug!("Publish acknowledged (packet {})", ack.pkid),
        Packet::PubComp(ack) => debug!("Publish completed (packet {})", ack.pkid),
        _ => {}
    }
}
