//! Sensor catalog types.
//!
//! The catalog is populated by the external enumerator before any activation
//! and read-only afterwards. Each entry names the sysfs attributes of the
//! channels a sensor kind exposes, the tag used for its sampling-frequency
//! attribute, and the internal name its kernel trigger derives from.

use serde::{Deserialize, Serialize};

/// Kind of a logical sensor, as exposed to the upper API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    MagneticField,
    Orientation,
    Gyroscope,
    Light,
    AmbientTemperature,
    Temperature,
    Proximity,
    Pressure,
    RelativeHumidity,
    RotationVector,
    /// Not mapped to an upper-API type; events carry zero fields.
    Unknown,
}

impl SensorKind {
    /// Number of `data` fields the event shaper fills for this kind.
    pub fn field_count(self) -> usize {
        match self {
            SensorKind::Accelerometer
            | SensorKind::MagneticField
            | SensorKind::Orientation
            | SensorKind::Gyroscope => 3,
            SensorKind::Light
            | SensorKind::AmbientTemperature
            | SensorKind::Temperature
            | SensorKind::Proximity
            | SensorKind::Pressure
            | SensorKind::RelativeHumidity => 1,
            SensorKind::RotationVector => 4,
            SensorKind::Unknown => 0,
        }
    }
}

/// Sysfs attribute names of one channel, relative to `scan_elements/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Enable flag, e.g. `in_accel_x_en`.
    pub en_path: String,
    /// Type descriptor, e.g. `in_accel_x_type`.
    pub type_path: String,
    /// Scan index, e.g. `in_accel_x_index`.
    pub index_path: String,
}

impl ChannelSpec {
    /// Derive the three attribute names from a channel stem such as
    /// `in_accel_x`.
    pub fn from_stem(stem: &str) -> Self {
        Self {
            en_path: format!("{stem}_en"),
            type_path: format!("{stem}_type"),
            index_path: format!("{stem}_index"),
        }
    }
}

/// One catalog entry, shared by every logical sensor of the same kind on a
/// device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Prefix of the sampling-frequency attribute, e.g. `in_accel`.
    pub tag: String,
    /// Stem of the kernel trigger name; the device trigger is
    /// `<internal_name>-dev<N>`.
    pub internal_name: String,
    pub kind: SensorKind,
    /// Channel attributes in field order. Empty for poll-mode kinds.
    pub channels: Vec<ChannelSpec>,
}

/// Indexable list of catalog entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its catalog index.
    pub fn push(&mut self, entry: CatalogEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_counts_per_kind() {
        assert_eq!(SensorKind::Accelerometer.field_count(), 3);
        assert_eq!(SensorKind::Gyroscope.field_count(), 3);
        assert_eq!(SensorKind::Light.field_count(), 1);
        assert_eq!(SensorKind::Pressure.field_count(), 1);
        assert_eq!(SensorKind::RotationVector.field_count(), 4);
        assert_eq!(SensorKind::Unknown.field_count(), 0);
    }

    #[test]
    fn channel_spec_from_stem() {
        let spec = ChannelSpec::from_stem("in_accel_x");
        assert_eq!(spec.en_path, "in_accel_x_en");
        assert_eq!(spec.type_path, "in_accel_x_type");
        assert_eq!(spec.index_path, "in_accel_x_index");
    }

    #[test]
    fn catalog_indexing() {
        let mut catalog = Catalog::new();
        assert!(catalog.is_empty());
        let i = catalog.push(CatalogEntry {
            tag: "in_accel".into(),
            internal_name: "accel".into(),
            kind: SensorKind::Accelerometer,
            channels: vec![
                ChannelSpec::from_stem("in_accel_x"),
                ChannelSpec::from_stem("in_accel_y"),
                ChannelSpec::from_stem("in_accel_z"),
            ],
        });
        assert_eq!(i, 0);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(0).unwrap().kind, SensorKind::Accelerometer);
        assert!(catalog.get(1).is_none());
    }
}
