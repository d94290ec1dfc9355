use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::device::DeviceId;
use crate::device::DeviceRecord;

/// Upper bound on an encoded command, in bytes
pub const MAX_PAYLOAD_LEN: usize = 200;

/// Command name Domoticz answers with a full device state message
pub const DEVICE_INFO_COMMAND: &str = "getdeviceinfo";

/// Separator between sensor channels in a multi-value `svalue`
const SVALUE_SEPARATOR: &str = ";";

/// Trailing status field appended to multi-value `svalue` strings
const SVALUE_STATUS_PLACEHOLDER: &str = "0";

/// Outbound command for the Domoticz `domoticz/in` topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Push a new value for a device
    UpdateDevice {
        idx: DeviceId,
        nvalue: i64,
        svalue: String,
    },

    /// Ask Domoticz to publish the current state of a device
    RequestData {
        idx: DeviceId,
        command: &'static str,
    },
}

impl Command {
    pub fn update(idx: DeviceId, svalue: impl Into<String>) -> Self {
        Self::UpdateDevice {
            idx,
            nvalue: 0,
            svalue: svalue.into(),
        }
    }

    pub fn request_data(idx: DeviceId) -> Self {
        Self::RequestData {
            idx,
            command: DEVICE_INFO_COMMAND,
        }
    }

    pub fn idx(&self) -> DeviceId {
        match self {
            Self::UpdateDevice { idx, .. } | Self::RequestData { idx, .. } => *idx,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoded command is {len} bytes, limit is {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("failed to serialize command: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Format a single sensor value the way Domoticz expects it
pub fn format_value(value: f64) -> String {
    format!("{:.2}", value)
}

/// Format several sensor channels into one `svalue`, e.g. `21.50;55.20;0`
pub fn format_values(values: &[f64]) -> String {
    let mut parts: Vec<String> = values.iter().copied().map(format_value).collect();
    parts.push(SVALUE_STATUS_PLACEHOLDER.to_string());
    parts.join(SVALUE_SEPARATOR)
}

/// Translates between raw bus payloads and device records / commands.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_payload_len: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }

    /// Decode an inbound device-state message.
    ///
    /// Returns `None` for anything that is not a JSON object with a positive
    /// `idx`. Missing numeric fields decode to zero.
    pub fn decode(&self, payload: &[u8]) -> Option<DeviceRecord> {
        let doc: Value = match serde_json::from_slice(payload) {
            Ok(doc) => doc,
            Err(e) => {
                debug!("Dropping malformed payload: {}", e);
                return None;
            }
        };

        let Some(idx) = doc
            .get("idx")
            .and_then(integer)
            .filter(|idx| *idx > 0)
            .and_then(|idx| DeviceId::try_from(idx).ok())
        else {
            debug!("Dropping payload without a valid idx");
            return None;
        };

        Some(DeviceRecord {
            idx,
            svalue1: float(doc.get("svalue1")),
            svalue2: float(doc.get("svalue2")),
            svalue3: float(doc.get("svalue3")),
            svalue4: float(doc.get("svalue4")),
            nvalue: doc.get("nvalue").and_then(integer).unwrap_or_default(),
            battery: doc.get("Battery").and_then(integer).unwrap_or_default(),
            rssi: doc.get("RSSI").and_then(integer).unwrap_or_default(),
        })
    }

    /// Encode an outbound command, enforcing the payload bound
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>, CodecError> {
        let payload = serde_json::to_vec(command)?;
        if payload.len() > self.max_payload_len {
            return Err(CodecError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload_len,
            });
        }
        Ok(payload)
    }
}

/// Read an integer field. Domoticz sends some numbers as strings; floats
/// are truncated.
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn float(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}
