//! Report-layout planner.
//!
//! Rebuilds the per-device report layout from the kernel's current channel
//! metadata. After a refresh, the concatenation of `{size @ offset}` over
//! the enabled channels of every sensor on the device exactly matches the
//! binary report the kernel emits once the buffer is re-enabled.

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::sensor::{ChannelLayout, Sensor, MAX_CHANNELS, MAX_SENSORS};
use crate::sysfs::{self, IioPaths};
use crate::typespec::{decode_type_spec, TypeSpec};

/// One scan-index slot claimed during a refresh pass.
#[derive(Clone, Copy)]
struct Claim {
    sensor: usize,
    channel: usize,
    size: usize,
    spec: TypeSpec,
}

/// Recompute channel sizes and offsets for every sensor bound to `dev_num`.
///
/// Channels whose `_en` flag reads 0, or whose metadata is unreadable, are
/// treated as absent (size 0). Offsets are assigned in scan-index order,
/// starting at 0, with no gaps. Several sensors sharing one scan index is
/// unsupported; the first claimant wins and the others are dropped with a
/// diagnostic.
pub(crate) fn refresh_report_layout(
    sensors: &mut [Sensor],
    catalog: &Catalog,
    paths: &IioPaths,
    dev_num: u32,
) {
    const SLOTS: usize = MAX_SENSORS * MAX_CHANNELS;
    let mut slots: [Option<Claim>; SLOTS] = [None; SLOTS];
    let mut active_channels = 0;

    for (s, sensor) in sensors.iter_mut().enumerate() {
        if sensor.dev_num != dev_num {
            continue;
        }

        // Stale offsets from the previous membership must not survive a
        // refresh; anything still present re-claims a slot below.
        sensor.channels = [ChannelLayout::default(); MAX_CHANNELS];

        let Some(entry) = catalog.get(sensor.catalog_index) else {
            warn!(sensor = s, index = sensor.catalog_index, "sensor references unknown catalog entry");
            continue;
        };

        for c in 0..sensor.num_channels {
            let Some(chan) = entry.channels.get(c) else {
                warn!(sensor = s, channel = c, tag = %entry.tag, "catalog entry has no spec for channel");
                continue;
            };

            let en_path = paths.scan_element(dev_num, &chan.en_path);
            let enabled = match sysfs::read_int(&en_path) {
                Ok(v) => v != 0,
                Err(_) => {
                    warn!(path = %en_path.display(), "failed to read _en flag");
                    continue;
                }
            };
            if !enabled {
                debug!(sensor = s, channel = c, "channel not in scan, size 0");
                continue;
            }

            let type_path = paths.scan_element(dev_num, &chan.type_path);
            let raw_spec = match sysfs::read_str(&type_path) {
                Ok(v) => v,
                Err(_) => {
                    warn!(path = %type_path.display(), "failed to read type");
                    continue;
                }
            };
            let spec = match decode_type_spec(&raw_spec) {
                Ok(v) => v,
                Err(_) => {
                    warn!(path = %type_path.display(), spec = %raw_spec, "undecodable type");
                    continue;
                }
            };

            let index_path = paths.scan_element(dev_num, &chan.index_path);
            let index = match sysfs::read_int(&index_path) {
                Ok(v) => v,
                Err(_) => {
                    warn!(path = %index_path.display(), "failed to read index");
                    continue;
                }
            };
            if index < 0 || index as usize >= SLOTS {
                warn!(path = %index_path.display(), index, "scan index out of bounds");
                continue;
            }

            let slot = &mut slots[index as usize];
            if let Some(prev) = slot {
                // Bit-packed shared indices are unsupported.
                warn!(
                    index,
                    winner = prev.sensor,
                    loser = s,
                    "several channels claim one scan index; keeping the first"
                );
                continue;
            }
            *slot = Some(Claim {
                sensor: s,
                channel: c,
                size: spec.size(),
                spec,
            });
            active_channels += 1;
        }
    }

    info!(dev_num, active_channels, "refreshed report layout");

    let mut offset = 0;
    for claim in slots.iter().flatten() {
        debug!(
            sensor = claim.sensor,
            channel = claim.channel,
            offset,
            size = claim.size,
            "channel placed in device report"
        );
        sensors[claim.sensor].channels[claim.channel] = ChannelLayout {
            size: claim.size,
            offset,
            type_spec: Some(claim.spec),
        };
        offset += claim.size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, ChannelSpec, SensorKind};
    use crate::sensor::SensorConfig;
    use crate::sensor::SensorOps;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct NoopOps;
    impl SensorOps for NoopOps {}

    fn scratch_paths() -> (TempDir, IioPaths) {
        let dir = TempDir::new().unwrap();
        let paths = IioPaths {
            sysfs_root: dir.path().join("sys"),
            dev_root: dir.path().join("dev"),
        };
        (dir, paths)
    }

    fn write_channel(paths: &IioPaths, dev: u32, stem: &str, en: i64, spec: &str, index: i64) {
        let dir = paths.device_dir(dev).join("scan_elements");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{stem}_en")), en.to_string()).unwrap();
        fs::write(dir.join(format!("{stem}_type")), spec).unwrap();
        fs::write(dir.join(format!("{stem}_index")), index.to_string()).unwrap();
    }

    fn accel_entry() -> CatalogEntry {
        CatalogEntry {
            tag: "in_accel".into(),
            internal_name: "accel".into(),
            kind: SensorKind::Accelerometer,
            channels: vec![
                ChannelSpec::from_stem("in_accel_x"),
                ChannelSpec::from_stem("in_accel_y"),
                ChannelSpec::from_stem("in_accel_z"),
            ],
        }
    }

    fn sensor(dev_num: u32, catalog_index: usize, num_channels: usize) -> Sensor {
        Sensor::new(SensorConfig {
            dev_num,
            catalog_index,
            num_channels,
            ops: Arc::new(NoopOps),
        })
    }

    #[test]
    fn three_axis_accel_layout() {
        let (_dir, paths) = scratch_paths();
        for (i, stem) in ["in_accel_x", "in_accel_y", "in_accel_z"].iter().enumerate() {
            write_channel(&paths, 0, stem, 1, "le:s16/32>>0", i as i64);
        }
        let mut catalog = Catalog::new();
        catalog.push(accel_entry());
        let mut sensors = vec![sensor(0, 0, 3)];

        refresh_report_layout(&mut sensors, &catalog, &paths, 0);

        let offsets: Vec<_> = sensors[0].channels[..3].iter().map(|c| c.offset).collect();
        let sizes: Vec<_> = sensors[0].channels[..3].iter().map(|c| c.size).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(sizes, vec![2, 2, 2]);
        assert_eq!(sensors[0].channels[0].type_spec.unwrap().storage_bits, 16);
    }

    #[test]
    fn scan_index_order_wins_over_catalog_order() {
        let (_dir, paths) = scratch_paths();
        // z first in the scan, then x, then y, with mixed sizes.
        write_channel(&paths, 0, "in_accel_x", 1, "le:s16/32>>0", 1);
        write_channel(&paths, 0, "in_accel_y", 1, "le:s32/32>>0", 2);
        write_channel(&paths, 0, "in_accel_z", 1, "le:s16/32>>0", 0);
        let mut catalog = Catalog::new();
        catalog.push(accel_entry());
        let mut sensors = vec![sensor(0, 0, 3)];

        refresh_report_layout(&mut sensors, &catalog, &paths, 0);

        assert_eq!(sensors[0].channels[2].offset, 0); // z
        assert_eq!(sensors[0].channels[0].offset, 2); // x
        assert_eq!(sensors[0].channels[1].offset, 4); // y
        assert_eq!(sensors[0].channels[1].size, 4);
    }

    #[test]
    fn disabled_and_unreadable_channels_are_absent() {
        let (_dir, paths) = scratch_paths();
        write_channel(&paths, 0, "in_accel_x", 1, "le:s16/32>>0", 0);
        write_channel(&paths, 0, "in_accel_y", 0, "le:s16/32>>0", 1);
        // z has no sysfs files at all.
        let mut catalog = Catalog::new();
        catalog.push(accel_entry());
        let mut sensors = vec![sensor(0, 0, 3)];

        refresh_report_layout(&mut sensors, &catalog, &paths, 0);

        assert_eq!(sensors[0].channels[0].size, 2);
        assert_eq!(sensors[0].channels[1].size, 0);
        assert_eq!(sensors[0].channels[2].size, 0);
        let total: usize = sensors[0].channels.iter().map(|c| c.size).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn two_sensors_interleave_by_scan_index() {
        let (_dir, paths) = scratch_paths();
        for (i, stem) in ["in_anglvel_x", "in_anglvel_y", "in_anglvel_z"]
            .iter()
            .enumerate()
        {
            write_channel(&paths, 1, stem, 1, "le:s16/32>>0", i as i64);
        }
        write_channel(&paths, 1, "in_temp", 1, "le:s16/32>>0", 3);

        let mut catalog = Catalog::new();
        catalog.push(CatalogEntry {
            tag: "in_anglvel".into(),
            internal_name: "gyro".into(),
            kind: SensorKind::Gyroscope,
            channels: vec![
                ChannelSpec::from_stem("in_anglvel_x"),
                ChannelSpec::from_stem("in_anglvel_y"),
                ChannelSpec::from_stem("in_anglvel_z"),
            ],
        });
        catalog.push(CatalogEntry {
            tag: "in_temp".into(),
            internal_name: "temp".into(),
            kind: SensorKind::Temperature,
            channels: vec![ChannelSpec::from_stem("in_temp")],
        });
        let mut sensors = vec![sensor(1, 0, 3), sensor(1, 1, 1)];

        refresh_report_layout(&mut sensors, &catalog, &paths, 1);

        let gyro_total: usize = sensors[0].channels.iter().map(|c| c.size).sum();
        let temp_total: usize = sensors[1].channels.iter().map(|c| c.size).sum();
        assert_eq!(gyro_total, 6);
        assert_eq!(temp_total, 2);
        assert_eq!(sensors[1].channels[0].offset, 6);
    }

    #[test]
    fn shared_index_keeps_first_claimant() {
        let (_dir, paths) = scratch_paths();
        write_channel(&paths, 0, "in_accel_x", 1, "le:s16/32>>0", 0);
        write_channel(&paths, 0, "in_temp", 1, "le:s16/32>>0", 0);

        let mut catalog = Catalog::new();
        catalog.push(CatalogEntry {
            tag: "in_accel".into(),
            internal_name: "accel".into(),
            kind: SensorKind::Accelerometer,
            channels: vec![ChannelSpec::from_stem("in_accel_x")],
        });
        catalog.push(CatalogEntry {
            tag: "in_temp".into(),
            internal_name: "temp".into(),
            kind: SensorKind::Temperature,
            channels: vec![ChannelSpec::from_stem("in_temp")],
        });
        let mut sensors = vec![sensor(0, 0, 1), sensor(0, 1, 1)];

        refresh_report_layout(&mut sensors, &catalog, &paths, 0);

        assert_eq!(sensors[0].channels[0].size, 2);
        assert_eq!(sensors[1].channels[0].size, 0);
    }

    #[test]
    fn out_of_bounds_index_is_skipped() {
        let (_dir, paths) = scratch_paths();
        write_channel(
            &paths,
            0,
            "in_accel_x",
            1,
            "le:s16/32>>0",
            (MAX_SENSORS * MAX_CHANNELS) as i64,
        );
        let mut catalog = Catalog::new();
        catalog.push(CatalogEntry {
            tag: "in_accel".into(),
            internal_name: "accel".into(),
            kind: SensorKind::Accelerometer,
            channels: vec![ChannelSpec::from_stem("in_accel_x")],
        });
        let mut sensors = vec![sensor(0, 0, 1)];

        refresh_report_layout(&mut sensors, &catalog, &paths, 0);

        assert_eq!(sensors[0].channels[0].size, 0);
    }

    #[test]
    fn refresh_clears_stale_layout_of_other_device_members() {
        let (_dir, paths) = scratch_paths();
        write_channel(&paths, 0, "in_accel_x", 1, "le:s16/32>>0", 0);
        let mut catalog = Catalog::new();
        catalog.push(CatalogEntry {
            tag: "in_accel".into(),
            internal_name: "accel".into(),
            kind: SensorKind::Accelerometer,
            channels: vec![ChannelSpec::from_stem("in_accel_x")],
        });
        let mut sensors = vec![sensor(0, 0, 1)];

        refresh_report_layout(&mut sensors, &catalog, &paths, 0);
        assert_eq!(sensors[0].channels[0].size, 2);

        // The channel drops out of the scan; a refresh must zero it.
        fs::write(
            paths.device_dir(0).join("scan_elements").join("in_accel_x_en"),
            "0",
        )
        .unwrap();
        refresh_report_layout(&mut sensors, &catalog, &paths, 0);
        assert_eq!(sensors[0].channels[0].size, 0);
    }
}
