//! The fixed event structure delivered to the caller.

use crate::catalog::SensorKind;

/// Capacity of the per-event data array, fixed by the surrounding platform.
pub const EVENT_DATA_FIELDS: usize = 16;

/// Layout revision of [`SensorEvent`].
pub const EVENT_VERSION: u32 = 1;

/// One shaped sensor sample.
///
/// The core fills `version`, `sensor`, `kind`, `timestamp_ns` and
/// `data[0..field_count)`; the remaining data slots stay zero. The
/// per-sensor `finalize` hook may rewrite any field before delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub version: u32,
    /// Slot index of the originating logical sensor.
    pub sensor: u32,
    pub kind: SensorKind,
    /// Monotonic timestamp, nanoseconds.
    pub timestamp_ns: i64,
    pub data: [f32; EVENT_DATA_FIELDS],
}

impl Default for SensorEvent {
    fn default() -> Self {
        Self {
            version: 0,
            sensor: 0,
            kind: SensorKind::Unknown,
            timestamp_ns: 0,
            data: [0.0; EVENT_DATA_FIELDS],
        }
    }
}
