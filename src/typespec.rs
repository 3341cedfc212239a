//! Scan-element type descriptors.
//!
//! The kernel describes each channel's wire format through the `_type`
//! attribute, e.g. `le:s16/32>>0`. The grammar is
//! `<endian>:<sign><storagebits>/<realbits>>><shift>`. The layout planner
//! only consumes the storage size in bytes; real bits and shift travel with
//! the channel so transform callbacks can mask and scale raw samples.

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};

/// Byte order of a channel within the device report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Big,
    Little,
}

/// Decoded `_type` descriptor for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub endianness: Endianness,
    pub signed: bool,
    pub storage_bits: u8,
    pub real_bits: u8,
    pub shift: u8,
}

impl TypeSpec {
    /// Storage footprint of one sample, in bytes.
    pub fn size(&self) -> usize {
        usize::from(self.storage_bits) / 8
    }
}

/// Parse a `_type` descriptor such as `le:s16/32>>0` or `be:u10/16>>2`.
pub fn decode_type_spec(spec: &str) -> Result<TypeSpec> {
    let malformed = || MuxError::Invalid(format!("malformed type descriptor '{spec}'"));

    let (endian, rest) = spec.split_once(':').ok_or_else(malformed)?;
    let endianness = match endian {
        "be" => Endianness::Big,
        "le" => Endianness::Little,
        _ => return Err(malformed()),
    };

    let mut chars = rest.chars();
    let signed = match chars.next() {
        Some('s') => true,
        Some('u') => false,
        _ => return Err(malformed()),
    };

    let rest = chars.as_str();
    let (storage, rest) = rest.split_once('/').ok_or_else(malformed)?;
    let (real, shift) = rest.split_once(">>").ok_or_else(malformed)?;

    let storage_bits: u8 = storage.parse().map_err(|_| malformed())?;
    let real_bits: u8 = real.parse().map_err(|_| malformed())?;
    let shift: u8 = shift.parse().map_err(|_| malformed())?;

    if storage_bits == 0 || storage_bits % 8 != 0 {
        return Err(malformed());
    }

    Ok(TypeSpec {
        endianness,
        signed,
        storage_bits,
        real_bits,
        shift,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_signed() {
        let spec = decode_type_spec("le:s16/32>>0").unwrap();
        assert_eq!(spec.endianness, Endianness::Little);
        assert!(spec.signed);
        assert_eq!(spec.storage_bits, 16);
        assert_eq!(spec.real_bits, 32);
        assert_eq!(spec.shift, 0);
        assert_eq!(spec.size(), 2);
    }

    #[test]
    fn decodes_big_endian_unsigned_with_shift() {
        let spec = decode_type_spec("be:u16/10>>2").unwrap();
        assert_eq!(spec.endianness, Endianness::Big);
        assert!(!spec.signed);
        assert_eq!(spec.storage_bits, 16);
        assert_eq!(spec.real_bits, 10);
        assert_eq!(spec.shift, 2);
        assert_eq!(spec.size(), 2);
    }

    #[test]
    fn rejects_storage_that_is_not_whole_bytes() {
        assert!(decode_type_spec("le:s12/16>>0").is_err());
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for bad in [
            "",
            "s16/32>>0",
            "xx:s16/32>>0",
            "le:x16/32>>0",
            "le:s16>>0",
            "le:s16/32",
            "le:s/32>>0",
            "le:s16/32>>z",
            "le:s0/32>>0",
        ] {
            assert!(
                matches!(decode_type_spec(bad), Err(MuxError::Invalid(_))),
                "accepted {bad:?}"
            );
        }
    }
}
