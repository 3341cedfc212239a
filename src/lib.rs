//! # IIO sensor multiplexer core
//!
//! Activation, scheduling and report demultiplexing for Linux Industrial
//! I/O sensor devices. One physical IIO device is often shared by several
//! logical sensors; each logical sensor is either *poll-mode* (values read
//! on demand through sysfs) or *trigger-mode* (packed reports arriving
//! through `/dev/iio:deviceN`). This crate decides which kernel channels
//! are on, rebuilds the per-device report layout when membership changes,
//! schedules timed wakeups for poll-mode sensors, waits on every active
//! device at once, and delivers one event at a time through a blocking
//! poll interface.
//!
//! ## Crate structure
//!
//! - **`catalog`**: sensor kinds and the per-kind channel attribute names,
//!   populated by the external enumerator.
//! - **`clock`**: the monotonic nanosecond clock behind every timestamp.
//! - **`controller`**: the [`Controller`]: activation refcounting, rate
//!   control, and the wait/dispatch loop.
//! - **`error`**: the [`MuxError`] enum and crate-wide [`Result`] alias.
//! - **`event`**: the fixed [`SensorEvent`] structure handed to callers.
//! - **`layout`**: the report-layout planner consulting `scan_elements/`.
//! - **`poller`**: epoll waiter plus the self-pipe wakeup pair.
//! - **`sensor`**: logical sensor slots and the [`SensorOps`] hooks.
//! - **`sysfs`**: attribute-file I/O and the [`IioPaths`] root config.
//! - **`typespec`**: `_type` descriptor decoding (`le:s16/32>>0`).
//!
//! ## Threading
//!
//! One externally owned thread drives [`Controller::poll_once`] in a loop;
//! [`Controller::activate`] and [`Controller::set_sampling_interval`] may
//! be called from any other thread. Control-plane calls finish by poking
//! the wakeup pair, so an in-flight wait always picks up a new timeout,
//! fd set or channel layout.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use iio_mux::{
//!     Catalog, CatalogEntry, ChannelSpec, Controller, IioPaths, SensorConfig,
//!     SensorKind, SensorOps,
//! };
//!
//! struct RawAccel;
//! impl SensorOps for RawAccel {
//!     fn transform(&self, _channel: usize, raw: &[u8]) -> f32 {
//!         i16::from_le_bytes([raw[0], raw[1]]) as f32
//!     }
//! }
//!
//! # fn main() -> iio_mux::Result<()> {
//! let mut catalog = Catalog::new();
//! let accel = catalog.push(CatalogEntry {
//!     tag: "in_accel".into(),
//!     internal_name: "accel".into(),
//!     kind: SensorKind::Accelerometer,
//!     channels: vec![
//!         ChannelSpec::from_stem("in_accel_x"),
//!         ChannelSpec::from_stem("in_accel_y"),
//!         ChannelSpec::from_stem("in_accel_z"),
//!     ],
//! });
//!
//! let controller = Controller::new(catalog, IioPaths::default())?;
//! let sensor = controller.add_sensor(SensorConfig {
//!     dev_num: 0,
//!     catalog_index: accel,
//!     num_channels: 3,
//!     ops: Arc::new(RawAccel),
//! })?;
//!
//! controller.activate(sensor, true)?;
//! let event = controller.poll_once();
//! println!("accel: {:?}", &event.data[..3]);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod clock;
pub mod controller;
pub mod error;
pub mod event;
mod layout;
pub mod poller;
pub mod sensor;
pub mod sysfs;
pub mod typespec;

pub use catalog::{Catalog, CatalogEntry, ChannelSpec, SensorKind};
pub use controller::{Controller, DeviceStatus, SensorStatus, POLL_MIN_INTERVAL};
pub use error::{MuxError, Result};
pub use event::{SensorEvent, EVENT_DATA_FIELDS, EVENT_VERSION};
pub use poller::INVALID_DEV_NUM;
pub use sensor::{
    ChannelLayout, SensorConfig, SensorOps, MAX_CHANNELS, MAX_DEVICES, MAX_SENSORS,
    MAX_SENSOR_REPORT_SIZE,
};
pub use sysfs::IioPaths;
pub use typespec::{decode_type_spec, Endianness, TypeSpec};
