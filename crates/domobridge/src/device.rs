/// Domoticz device index (`idx`). Valid devices are always positive.
pub type DeviceId = u32;

/// Decoded snapshot of one device as published by Domoticz.
///
/// Records are only built by [`crate::MessageCodec`] and handed to listeners
/// by reference; listeners copy whatever they want to keep.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceRecord {
    pub idx: DeviceId,

    /// Sensor channels (`svalue1` .. `svalue4`)
    pub svalue1: f64,
    pub svalue2: f64,
    pub svalue3: f64,
    pub svalue4: f64,

    /// Discrete state (`nvalue`)
    pub nvalue: i64,

    /// Battery level as reported by Domoticz (255 when mains powered)
    pub battery: i64,

    /// Signal strength indicator
    pub rssi: i64,
}

impl DeviceRecord {
    /// The sensor channels in order.
    pub fn svalues(&self) -> [f64; 4] {
        [self.svalue1, self.svalue2, self.svalue3, self.svalue4]
    }
}
