//! Activation, scheduling and dispatch.
//!
//! [`Controller`] owns the sensor table, the per-device state and the
//! waiter. Control-plane calls ([`Controller::activate`],
//! [`Controller::set_sampling_interval`]) may come from any thread; the
//! poll thread drives [`Controller::poll_once`] in a loop. A single lock
//! serializes the two sides, and every control-plane call finishes by
//! writing one byte to the wakeup pair so an in-flight wait re-evaluates
//! its timeout and fd set. The lock is dropped for the duration of the
//! blocking wait, which is what keeps the control plane responsive while
//! the poll thread is parked.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::catalog::{Catalog, SensorKind};
use crate::clock::monotonic_ns;
use crate::error::{MuxError, Result};
use crate::event::{SensorEvent, EVENT_DATA_FIELDS, EVENT_VERSION};
use crate::layout::refresh_report_layout;
use crate::poller::{Poller, WaitEvent, INVALID_DEV_NUM};
use crate::sensor::{
    Sensor, SensorConfig, MAX_CHANNELS, MAX_DEVICES, MAX_SENSORS, MAX_SENSOR_REPORT_SIZE,
};
use crate::sysfs::{self, IioPaths};

/// Floor between two wait operations, countering runaway polls from a
/// misbehaving device that reports readable forever.
pub const POLL_MIN_INTERVAL: Duration = Duration::from_micros(10_000);

/// Per-device bookkeeping.
#[derive(Debug, Default)]
struct DeviceState {
    /// Open handle on `/dev/iio:deviceN`, present while any sensor on the
    /// device is enabled.
    fd: Option<File>,
    /// Enabled poll-mode sensors on this device.
    poll_refcount: u32,
    /// Enabled trigger-mode sensors on this device.
    trig_refcount: u32,
}

/// Mutable state shared between the control plane and the poll thread.
struct MuxState {
    sensors: Vec<Sensor>,
    devices: [DeviceState; MAX_DEVICES],
    /// Enabled poll-mode sensors across all devices; zero means the wait
    /// has no timer.
    active_poll_sensors: u32,
    /// Monotonic timestamp of the last wait return.
    last_poll_exit_ts: i64,
}

impl MuxState {
    fn new() -> Self {
        Self {
            sensors: Vec::new(),
            devices: std::array::from_fn(|_| DeviceState::default()),
            active_poll_sensors: 0,
            last_poll_exit_ts: 0,
        }
    }
}

/// Outcome of the refcount step of an activation change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// The sensor was, and remains, in use (or unused); nothing to do.
    NoOp,
    /// The sensor toggled between unused and in use.
    Toggled,
}

impl MuxState {
    /// Refcount step of `activate`. On an edge transition the per-device
    /// counters and the global poll-sensor count are updated, and a
    /// disabled sensor's pending data is cleared.
    fn adjust_counters(&mut self, s: usize, enabled: bool) -> Result<Edge> {
        let sensor = &mut self.sensors[s];
        if enabled {
            info!(sensor = s, dev_num = sensor.dev_num, "enabling sensor");
            sensor.enable_count += 1;
            if sensor.enable_count != 1 {
                return Ok(Edge::NoOp);
            }
        } else {
            if sensor.enable_count == 0 {
                return Err(MuxError::InvalidState(format!(
                    "sensor {s} is not enabled"
                )));
            }
            info!(sensor = s, dev_num = sensor.dev_num, "disabling sensor");
            sensor.enable_count -= 1;
            if sensor.enable_count > 0 {
                return Ok(Edge::NoOp);
            }
            sensor.report_pending = false;
            sensor.report_buffer = [0; MAX_SENSOR_REPORT_SIZE];
        }

        let dev = sensor.dev_num as usize;
        let trigger_mode = sensor.num_channels > 0;
        if trigger_mode {
            if enabled {
                self.devices[dev].trig_refcount += 1;
            } else {
                self.devices[dev].trig_refcount -= 1;
            }
        } else if enabled {
            self.active_poll_sensors += 1;
            self.devices[dev].poll_refcount += 1;
        } else {
            self.active_poll_sensors -= 1;
            self.devices[dev].poll_refcount -= 1;
        }
        Ok(Edge::Toggled)
    }
}

/// Milliseconds-resolution deadline for the next poll-mode delivery.
/// `None` means wait forever.
fn next_timeout(state: &MuxState, now: i64) -> Option<Duration> {
    if state.active_poll_sensors == 0 {
        return None;
    }
    let mut lowest: Option<i64> = None;
    for sensor in &state.sensors {
        if sensor.enable_count > 0 && sensor.sampling_rate > 0 && sensor.is_poll_mode() {
            let target =
                sensor.last_integration_ts + 1_000_000_000 / i64::from(sensor.sampling_rate);
            lowest = Some(lowest.map_or(target, |l| l.min(target)));
        }
    }
    let remaining = (lowest? - now).max(0);
    Some(Duration::from_nanos(remaining as u64))
}

/// Read one device report and fan it out into the report buffers of every
/// sensor bound to the device. Failed or truncated reads discard the pass;
/// the next wait resumes.
fn integrate_device_report(state: &mut MuxState, dev_num: u32) {
    let dev = dev_num as usize;
    if dev >= MAX_DEVICES || state.devices[dev].trig_refcount == 0 {
        error!(dev_num, "report on unexpected iio device");
        return;
    }

    let expected_size: usize = state
        .sensors
        .iter()
        .filter(|s| s.dev_num == dev_num)
        .flat_map(|s| s.channels[..s.num_channels].iter())
        .map(|c| c.size)
        .sum();

    let mut scratch = [0u8; MAX_SENSOR_REPORT_SIZE * MAX_SENSORS];
    if expected_size > scratch.len() {
        error!(dev_num, expected_size, "device report exceeds scratch capacity");
        return;
    }

    let len = {
        let Some(file) = state.devices[dev].fd.as_ref() else {
            error!(dev_num, "no open fd for reported device");
            return;
        };
        let mut reader: &File = file;
        reader.read(&mut scratch[..expected_size])
    };
    match len {
        Err(e) => {
            error!(dev_num, error = %e, "could not read report from iio device");
            return;
        }
        // A short read would misalign every channel that follows.
        Ok(n) if n != expected_size => {
            error!(dev_num, read = n, expected = expected_size, "truncated device report");
            return;
        }
        Ok(n) => trace!(dev_num, bytes = n, "read device report"),
    }

    for sensor in state.sensors.iter_mut().filter(|s| s.dev_num == dev_num) {
        let mut sr_offset = 0;
        for c in 0..sensor.num_channels {
            let size = sensor.channels[c].size;
            let offset = sensor.channels[c].offset;
            if sr_offset + size > sensor.report_buffer.len() {
                error!(size, "sensor report exceeds buffer capacity");
                break;
            }
            sensor.report_buffer[sr_offset..sr_offset + size]
                .copy_from_slice(&scratch[offset..offset + size]);
            sr_offset += size;
        }
        if sensor.enable_count > 0 {
            trace!(bytes = sr_offset, "sensor report available");
            sensor.report_pending = true;
        }
    }
}

/// Enablement snapshot of one sensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorStatus {
    pub dev_num: u32,
    pub enable_count: u32,
    pub sampling_rate: u32,
    pub report_pending: bool,
    pub poll_mode: bool,
}

/// Enablement snapshot of one device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub fd_open: bool,
    pub poll_refcount: u32,
    pub trig_refcount: u32,
}

/// The multiplexer core: activation manager, rate controller and
/// wait/dispatch loop over one set of IIO devices.
pub struct Controller {
    state: Mutex<MuxState>,
    poller: Poller,
    catalog: Catalog,
    paths: IioPaths,
}

impl Controller {
    /// Create a controller over the given catalog, with the waiter and
    /// wakeup pair ready. Sensor slots are registered afterwards with
    /// [`Controller::add_sensor`], before any activation.
    pub fn new(catalog: Catalog, paths: IioPaths) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(MuxState::new()),
            poller: Poller::new()?,
            catalog,
            paths,
        })
    }

    /// Register one logical sensor slot, returning its handle.
    pub fn add_sensor(&self, config: SensorConfig) -> Result<usize> {
        if config.dev_num as usize >= MAX_DEVICES {
            return Err(MuxError::Invalid(format!(
                "device number {} out of range",
                config.dev_num
            )));
        }
        if config.num_channels > MAX_CHANNELS {
            return Err(MuxError::Invalid(format!(
                "{} channels exceed the per-sensor limit",
                config.num_channels
            )));
        }
        let entry = self
            .catalog
            .get(config.catalog_index)
            .ok_or_else(|| MuxError::Invalid(format!(
                "catalog index {} does not exist",
                config.catalog_index
            )))?;
        if config.num_channels > entry.channels.len() {
            return Err(MuxError::Invalid(format!(
                "catalog entry '{}' describes {} channels, sensor wants {}",
                entry.tag,
                entry.channels.len(),
                config.num_channels
            )));
        }

        let mut state = self.state.lock();
        if state.sensors.len() >= MAX_SENSORS {
            return Err(MuxError::Invalid("sensor table is full".to_string()));
        }
        state.sensors.push(Sensor::new(config));
        Ok(state.sensors.len() - 1)
    }

    pub fn sensor_count(&self) -> usize {
        self.state.lock().sensors.len()
    }

    pub fn sensor_status(&self, s: usize) -> Option<SensorStatus> {
        let state = self.state.lock();
        state.sensors.get(s).map(|sensor| SensorStatus {
            dev_num: sensor.dev_num,
            enable_count: sensor.enable_count,
            sampling_rate: sensor.sampling_rate,
            report_pending: sensor.report_pending,
            poll_mode: sensor.is_poll_mode(),
        })
    }

    pub fn device_status(&self, dev_num: u32) -> Option<DeviceStatus> {
        let state = self.state.lock();
        state
            .devices
            .get(dev_num as usize)
            .map(|device| DeviceStatus {
                fd_open: device.fd.is_some(),
                poll_refcount: device.poll_refcount,
                trig_refcount: device.trig_refcount,
            })
    }

    /// Enable or disable one sensor. Enable calls stack; only the matching
    /// number of disable calls releases the sensor. On the edge transitions
    /// the kernel-side channel enablement, trigger, buffer state and device
    /// fd are brought in line with the new membership.
    pub fn activate(&self, s: usize, on: bool) -> Result<()> {
        let mut state = self.state.lock();
        if s >= state.sensors.len() {
            return Err(MuxError::Invalid(format!("unknown sensor {s}")));
        }
        if state.adjust_counters(s, on)? == Edge::NoOp {
            return Ok(());
        }

        let dev_num = state.sensors[s].dev_num;
        let dev = dev_num as usize;
        let is_poll = state.sensors[s].is_poll_mode();
        let catalog_index = state.sensors[s].catalog_index;

        if !is_poll {
            // Trigger and channel changes only apply while the buffer is off.
            let _ = sysfs::write_int(&self.paths.buffer_enable(dev_num), 0);

            match state.devices[dev].trig_refcount {
                0 => {
                    let _ = sysfs::write_str(&self.paths.current_trigger(dev_num), "none");
                }
                1 => {
                    if let Some(entry) = self.catalog.get(catalog_index) {
                        let trigger = format!("{}-dev{}", entry.internal_name, dev_num);
                        let _ =
                            sysfs::write_str(&self.paths.current_trigger(dev_num), &trigger);
                    }
                }
                // The trigger is already set.
                _ => {}
            }

            if let Some(entry) = self.catalog.get(catalog_index) {
                for c in 0..state.sensors[s].num_channels {
                    if let Some(chan) = entry.channels.get(c) {
                        let _ = sysfs::write_int(
                            &self.paths.scan_element(dev_num, &chan.en_path),
                            i64::from(on),
                        );
                    }
                }
            }

            if state.devices[dev].trig_refcount > 0 {
                refresh_report_layout(&mut state.sensors, &self.catalog, &self.paths, dev_num);
                let _ = sysfs::write_int(&self.paths.buffer_enable(dev_num), 1);
            }
        }

        if !on {
            let device = &mut state.devices[dev];
            if device.poll_refcount == 0 && device.trig_refcount == 0 {
                if let Some(file) = device.fd.take() {
                    self.poller.remove(file.as_raw_fd());
                    debug!(dev_num, "closed device node");
                }
            } else if !is_poll && device.trig_refcount == 0 {
                // Poll-mode users keep the node open, but nothing on this
                // device produces reports anymore.
                if let Some(file) = &device.fd {
                    self.poller.remove(file.as_raw_fd());
                }
            }
            self.poller.wake();
            return Ok(());
        }

        if state.devices[dev].fd.is_none() {
            // First enabled sensor on this device. Holding the fd keeps the
            // underlying hardware block powered.
            let node = self.paths.device_node(dev_num);
            match OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&node)
            {
                Ok(file) => {
                    debug!(dev_num, fd = file.as_raw_fd(), "opened device node");
                    state.devices[dev].fd = Some(file);
                }
                Err(e) => {
                    error!(path = %node.display(), error = %e, "could not open device node");
                    let _ = state.adjust_counters(s, false);
                    return Err(MuxError::Io(e));
                }
            }
        }

        if !is_poll && state.devices[dev].trig_refcount == 1 {
            if let Some(file) = &state.devices[dev].fd {
                if let Err(e) = self.poller.add(file.as_raw_fd(), dev_num) {
                    error!(dev_num, error = %e, "failed to add device fd to wait set");
                    return Err(MuxError::Io(e));
                }
            }
        }

        self.poller.wake();
        Ok(())
    }

    /// Set the delivery period of one sensor, in nanoseconds. The rate is
    /// floored at 1 Hz; the sysfs write is bracketed by a buffer cycle when
    /// the device has active trigger-mode sensors.
    pub fn set_sampling_interval(&self, s: usize, ns: i64) -> Result<()> {
        if ns <= 0 {
            return Err(MuxError::Invalid(format!(
                "zero delay requested on sensor {s}"
            )));
        }

        let mut state = self.state.lock();
        if s >= state.sensors.len() {
            return Err(MuxError::Invalid(format!("unknown sensor {s}")));
        }
        let dev_num = state.sensors[s].dev_num;
        let catalog_index = state.sensors[s].catalog_index;
        let entry = self
            .catalog
            .get(catalog_index)
            .ok_or_else(|| MuxError::Invalid(format!(
                "sensor {s} references unknown catalog entry"
            )))?;

        let mut new_rate = (1_000_000_000 / ns) as u32;
        if new_rate == 0 {
            info!(sensor = s, "sub-Hz sampling rate requested");
            new_rate = 1;
        }

        let path = self.paths.sampling_frequency(dev_num, &entry.tag);
        if let Ok(current) = sysfs::read_int(&path) {
            if current != i64::from(new_rate) {
                info!(sensor = s, rate = new_rate, "sampling rate set");
                let cycling = state.devices[dev_num as usize].trig_refcount > 0;
                if cycling {
                    let _ = sysfs::write_int(&self.paths.buffer_enable(dev_num), 0);
                }
                let _ = sysfs::write_int(&path, i64::from(new_rate));
                if cycling {
                    let _ = sysfs::write_int(&self.paths.buffer_enable(dev_num), 1);
                }
            }
        }

        state.sensors[s].sampling_rate = new_rate;
        drop(state);

        // Release the poll loop so the updated timeout gets used.
        self.poller.wake();
        Ok(())
    }

    /// Block until one sensor event is available and return it.
    ///
    /// Pending reports are delivered in sensor-index order. Wait failures
    /// are logged and retried; a failed device read discards the pass. The
    /// call only returns with an event.
    pub fn poll_once(&self) -> SensorEvent {
        let mut events: Vec<WaitEvent> = Vec::with_capacity(MAX_DEVICES + 1);
        loop {
            let pause = {
                let mut state = self.state.lock();
                if let Some(s) = (0..state.sensors.len()).find(|&s| state.sensors[s].report_pending)
                {
                    let event = self.shape_event(&mut state, s);
                    state.sensors[s].report_pending = false;
                    debug!(sensor = s, "delivering report");
                    return event;
                }
                let since_last_wait = Duration::from_nanos(
                    (monotonic_ns() - state.last_poll_exit_ts).max(0) as u64,
                );
                POLL_MIN_INTERVAL.checked_sub(since_last_wait)
            };
            if let Some(pause) = pause {
                thread::sleep(pause);
            }

            let timeout = {
                let state = self.state.lock();
                next_timeout(&state, monotonic_ns())
            };
            trace!(?timeout, "awaiting sensor data");
            let waited = self.poller.wait(&mut events, timeout);

            let mut state = self.state.lock();
            state.last_poll_exit_ts = monotonic_ns();
            if let Err(e) = waited {
                warn!(error = %e, "wait failed, retrying");
                continue;
            }
            trace!(count = events.len(), "fds signalled");

            let mut woke = false;
            for event in events.drain(..) {
                if event.dev_num == INVALID_DEV_NUM {
                    self.poller.drain_wakeup();
                    woke = true;
                } else {
                    integrate_device_report(&mut state, event.dev_num);
                }
            }
            if woke {
                // Control-plane wakeup: re-evaluate the fd set and timeout
                // before considering timer deliveries.
                continue;
            }

            // The wait ran its full course; schedule every enabled
            // poll-mode sensor for delivery on the next drain.
            if state.active_poll_sensors > 0 {
                for sensor in state.sensors.iter_mut() {
                    if sensor.enable_count > 0 && sensor.is_poll_mode() {
                        sensor.report_pending = true;
                    }
                }
            }
        }
    }

    /// Materialize one output event from a sensor's pending state.
    fn shape_event(&self, state: &mut MuxState, s: usize) -> SensorEvent {
        let now = monotonic_ns();
        let sensor = &state.sensors[s];
        let kind = self
            .catalog
            .get(sensor.catalog_index)
            .map(|e| e.kind)
            .unwrap_or(SensorKind::Unknown);
        let num_fields = kind.field_count();
        if num_fields == 0 {
            error!(sensor = s, ?kind, "sensor kind carries no fields");
        }

        let ops = Arc::clone(&sensor.ops);
        let mut event = SensorEvent {
            version: EVENT_VERSION,
            sensor: s as u32,
            kind,
            timestamp_ns: now,
            data: [0.0; EVENT_DATA_FIELDS],
        };

        if sensor.is_poll_mode() {
            for c in 0..num_fields {
                event.data[c] = ops.acquire_immediate_value(c);
                trace!(field = c, value = event.data[c], "immediate value");
            }
        } else {
            let mut at = 0;
            for c in 0..num_fields {
                event.data[c] = ops.transform(c, &sensor.report_buffer[at..]);
                trace!(field = c, value = event.data[c], "transformed value");
                at += sensor.channels.get(c).map_or(0, |ch| ch.size);
            }
        }

        state.sensors[s].last_integration_ts = now;
        ops.finalize(&mut event);
        event
    }
}
