//! Logical sensor slots and the per-sensor capability hooks.

use std::fmt;
use std::sync::Arc;

use crate::event::SensorEvent;
use crate::typespec::TypeSpec;

/// Upper bound on backing IIO devices.
pub const MAX_DEVICES: usize = 8;
/// Upper bound on logical sensor slots.
pub const MAX_SENSORS: usize = 12;
/// Upper bound on channels per logical sensor.
pub const MAX_CHANNELS: usize = 4;
/// Capacity of a per-sensor raw report buffer, bytes.
pub const MAX_SENSOR_REPORT_SIZE: usize = 32;

/// Per-sensor transform hooks, injected at enumeration time.
///
/// One implementation is attached to each sensor slot. The hooks are invoked
/// by the poll thread with the controller lock held, so they must not call
/// back into the [`Controller`](crate::controller::Controller).
pub trait SensorOps: Send + Sync {
    /// Convert one channel's raw bytes from a trigger-mode report into an
    /// SI-unit field value. `raw` starts at this channel's bytes within the
    /// sensor's report buffer.
    fn transform(&self, channel: usize, raw: &[u8]) -> f32 {
        let _ = (channel, raw);
        0.0
    }

    /// Read one field of a poll-mode sensor directly from sysfs.
    fn acquire_immediate_value(&self, channel: usize) -> f32 {
        let _ = channel;
        0.0
    }

    /// Post-process a shaped event (calibration, quaternion completion).
    fn finalize(&self, event: &mut SensorEvent) {
        let _ = event;
    }
}

/// Byte layout of one channel within its device report, recomputed by the
/// layout planner on every trigger-mode activation change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelLayout {
    /// Storage size in bytes; 0 means the channel is absent from the report.
    pub size: usize,
    /// Byte offset within the device report.
    pub offset: usize,
    /// Decoded `_type` descriptor, if the last refresh could read it.
    pub type_spec: Option<TypeSpec>,
}

/// Description of a sensor slot, provided by the external enumerator.
#[derive(Clone)]
pub struct SensorConfig {
    /// Backing IIO device (0..MAX_DEVICES).
    pub dev_num: u32,
    /// Index into the catalog for channel paths, tag and kind.
    pub catalog_index: usize,
    /// 0 for poll-mode sensors, otherwise the trigger-mode channel count.
    pub num_channels: usize,
    pub ops: Arc<dyn SensorOps>,
}

/// One logical sensor slot.
pub(crate) struct Sensor {
    pub(crate) dev_num: u32,
    pub(crate) catalog_index: usize,
    pub(crate) num_channels: usize,
    pub(crate) channels: [ChannelLayout; MAX_CHANNELS],
    pub(crate) enable_count: u32,
    /// Sampling rate in Hz. Drives poll-mode deadlines.
    pub(crate) sampling_rate: u32,
    /// Monotonic timestamp of the last shaped event, nanoseconds.
    pub(crate) last_integration_ts: i64,
    /// Most recent raw sample, channels packed contiguously.
    pub(crate) report_buffer: [u8; MAX_SENSOR_REPORT_SIZE],
    pub(crate) report_pending: bool,
    pub(crate) ops: Arc<dyn SensorOps>,
}

impl Sensor {
    pub(crate) fn new(config: SensorConfig) -> Self {
        Self {
            dev_num: config.dev_num,
            catalog_index: config.catalog_index,
            num_channels: config.num_channels,
            channels: [ChannelLayout::default(); MAX_CHANNELS],
            enable_count: 0,
            sampling_rate: 0,
            last_integration_ts: 0,
            report_buffer: [0; MAX_SENSOR_REPORT_SIZE],
            report_pending: false,
            ops: config.ops,
        }
    }

    /// Poll-mode sensors have no report channels; their values are read on
    /// demand through sysfs.
    pub(crate) fn is_poll_mode(&self) -> bool {
        self.num_channels == 0
    }
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("dev_num", &self.dev_num)
            .field("catalog_index", &self.catalog_index)
            .field("num_channels", &self.num_channels)
            .field("enable_count", &self.enable_count)
            .field("sampling_rate", &self.sampling_rate)
            .field("report_pending", &self.report_pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopOps;
    impl SensorOps for NoopOps {}

    #[test]
    fn new_slot_starts_inert() {
        let sensor = Sensor::new(SensorConfig {
            dev_num: 0,
            catalog_index: 0,
            num_channels: 3,
            ops: Arc::new(NoopOps),
        });
        assert_eq!(sensor.enable_count, 0);
        assert!(!sensor.report_pending);
        assert!(!sensor.is_poll_mode());
        assert!(sensor.channels.iter().all(|c| c.size == 0));
    }

    #[test]
    fn zero_channels_means_poll_mode() {
        let sensor = Sensor::new(SensorConfig {
            dev_num: 1,
            catalog_index: 0,
            num_channels: 0,
            ops: Arc::new(NoopOps),
        });
        assert!(sensor.is_poll_mode());
    }

    #[test]
    fn default_ops_are_inert() {
        let ops = NoopOps;
        assert_eq!(ops.transform(0, &[1, 2]), 0.0);
        assert_eq!(ops.acquire_immediate_value(0), 0.0);
        let mut ev = SensorEvent::default();
        ops.finalize(&mut ev);
        assert_eq!(ev, SensorEvent::default());
    }
}
