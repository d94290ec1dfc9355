mod client;
mod runtime;
mod timer;

pub use client::RumqttcBus;
pub use runtime::NetworkEvent;
pub use runtime::run;
pub use timer::TokioTimer;

/// Bridge driven by the rumqttc transport
pub type MqttBridge = crate::Bridge<RumqttcBus, TokioTimer>;
