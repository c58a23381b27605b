//! Attributes attached to groups, datasets and committed datatypes.

use serde::{Deserialize, Serialize};

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::object::ObjRef;

/// Attribute payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrData {
    /// Flat little-endian element bytes for fixed-size types.
    Bytes(Vec<u8>),
    /// One string per element, for variable-length strings.
    Strings(Vec<String>),
    /// One record of base-type bytes per element, for variable-length types.
    VarLen(Vec<Vec<u8>>),
    /// Per-axis lists of attached scales (`DIMENSION_LIST`).
    References(Vec<Vec<ObjRef>>),
    /// `(dataset, axis)` back-links from a scale (`REFERENCE_LIST`).
    Backlinks(Vec<(ObjRef, u32)>),
}

impl AttrData {
    /// Number of elements held, given the element size for byte payloads.
    pub fn element_count(&self, element_size: usize) -> usize {
        match self {
            AttrData::Bytes(b) if element_size > 0 => b.len() / element_size,
            AttrData::Bytes(_) => 0,
            AttrData::Strings(s) => s.len(),
            AttrData::VarLen(v) => v.len(),
            AttrData::References(r) => r.len(),
            AttrData::Backlinks(b) => b.len(),
        }
    }
}

/// A named, typed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Element datatype.
    pub datatype: Datatype,
    /// Shape of the attribute value.
    pub space: Dataspace,
    /// Payload.
    pub data: AttrData,
}

impl Attribute {
    /// A fixed-length string attribute.
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::FixedString {
                size: value.len().max(1) as u32,
            },
            space: Dataspace::scalar(),
            data: AttrData::Bytes(value.as_bytes().to_vec()),
        }
    }

    /// A scalar 32-bit signed integer attribute.
    pub fn scalar_i32(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::i32(),
            space: Dataspace::scalar(),
            data: AttrData::Bytes(value.to_le_bytes().to_vec()),
        }
    }

    /// A one-dimensional 32-bit signed integer array attribute.
    pub fn array_i32(name: &str, values: &[i32]) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::i32(),
            space: Dataspace::simple(&[values.len() as u64]),
            data: AttrData::Bytes(values.iter().flat_map(|v| v.to_le_bytes()).collect()),
        }
    }

    /// Interpret a string attribute (fixed or variable length).
    pub fn as_string(&self) -> Option<String> {
        match (&self.datatype, &self.data) {
            (Datatype::FixedString { .. }, AttrData::Bytes(b)) => {
                let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
                String::from_utf8(b[..end].to_vec()).ok()
            }
            (Datatype::VarString, AttrData::Strings(s)) => s.first().cloned(),
            _ => None,
        }
    }

    /// Interpret an integer attribute as a list of `i64`.
    pub fn as_i64_vec(&self) -> Option<Vec<i64>> {
        let (size, signed) = match &self.datatype {
            Datatype::Integer { size, signed, .. } => (*size as usize, *signed),
            _ => return None,
        };
        if size == 0 || size > 8 {
            return None;
        }
        let AttrData::Bytes(bytes) = &self.data else {
            return None;
        };
        let mut out = Vec::with_capacity(bytes.len() / size.max(1));
        for chunk in bytes.chunks_exact(size) {
            let mut buf = [0u8; 8];
            buf[..size].copy_from_slice(chunk);
            if signed && chunk[size - 1] & 0x80 != 0 {
                for b in buf.iter_mut().skip(size) {
                    *b = 0xff;
                }
            }
            out.push(i64::from_le_bytes(buf));
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let a = Attribute::string("CLASS", "DIMENSION_SCALE");
        assert_eq!(a.as_string().as_deref(), Some("DIMENSION_SCALE"));
    }

    #[test]
    fn integer_widening() {
        let a = Attribute::array_i32("_Netcdf4Coordinates", &[0, -1, 7]);
        assert_eq!(a.as_i64_vec(), Some(vec![0, -1, 7]));
        assert_eq!(a.data.element_count(4), 3);
    }

    #[test]
    fn non_integer_is_none() {
        assert!(Attribute::string("x", "y").as_i64_vec().is_none());
    }
}
