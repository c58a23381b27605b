//! Container datatypes.
//!
//! Mirrors the HDF5 datatype classes the binding needs to round-trip every
//! netCDF-4 type, plus the classes (time, bitfield) a netCDF reader has to
//! recognise and refuse.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object::ObjRef;

/// Byte order of an atomic numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Little-endian.
    LittleEndian,
    /// Big-endian.
    BigEndian,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub offset: u64,
    /// Member datatype.
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    /// Symbolic name.
    pub name: String,
    /// Integer value, widened to `i64`.
    pub value: i64,
}

/// A container datatype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datatype {
    /// Fixed-point integer.
    Integer {
        size: u32,
        signed: bool,
        order: ByteOrder,
    },
    /// IEEE floating point.
    Float { size: u32, order: ByteOrder },
    /// Fixed-length character string.
    FixedString { size: u32 },
    /// Variable-length string.
    VarString,
    /// Compound (struct) type.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Variable-length sequence of a base type.
    VarLen { base: Box<Datatype> },
    /// Enumeration over an integer base type.
    Enum {
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Uninterpreted bytes of fixed size.
    Opaque { size: u32, tag: String },
    /// Fixed-size array of a base type (compound members only).
    Array { base: Box<Datatype>, dims: Vec<u32> },
    /// Object reference, used by dimension-scale lists.
    Reference,
    /// Reference to a committed datatype object.
    Named(ObjRef),
    /// Time class. Not representable in netCDF.
    Time { size: u32 },
    /// Bit field class. Not representable in netCDF.
    BitField { size: u32 },
}

impl Datatype {
    pub fn i8() -> Self {
        Self::int(1, true)
    }
    pub fn u8() -> Self {
        Self::int(1, false)
    }
    pub fn i16() -> Self {
        Self::int(2, true)
    }
    pub fn u16() -> Self {
        Self::int(2, false)
    }
    pub fn i32() -> Self {
        Self::int(4, true)
    }
    pub fn u32() -> Self {
        Self::int(4, false)
    }
    pub fn i64() -> Self {
        Self::int(8, true)
    }
    pub fn u64() -> Self {
        Self::int(8, false)
    }
    pub fn f32() -> Self {
        Datatype::Float {
            size: 4,
            order: ByteOrder::LittleEndian,
        }
    }
    pub fn f64() -> Self {
        Datatype::Float {
            size: 8,
            order: ByteOrder::LittleEndian,
        }
    }

    /// Single-character fixed string (netCDF `char`).
    pub fn char() -> Self {
        Datatype::FixedString { size: 1 }
    }

    fn int(size: u32, signed: bool) -> Self {
        Datatype::Integer {
            size,
            signed,
            order: ByteOrder::LittleEndian,
        }
    }

    /// Size in bytes of one element, when it can be computed without
    /// resolving committed types.
    ///
    /// Variable-length types report their in-memory slot size: 8 bytes for a
    /// string pointer, 16 for a length/pointer pair.
    pub fn size(&self) -> Option<u32> {
        match self {
            Datatype::Integer { size, .. }
            | Datatype::Float { size, .. }
            | Datatype::FixedString { size }
            | Datatype::Compound { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Time { size }
            | Datatype::BitField { size } => Some(*size),
            Datatype::VarString => Some(8),
            Datatype::VarLen { .. } => Some(16),
            Datatype::Reference => Some(8),
            Datatype::Enum { base, .. } => base.size(),
            Datatype::Array { base, dims } => {
                let n: u32 = dims.iter().product();
                base.size().map(|s| s * n)
            }
            Datatype::Named(_) => None,
        }
    }

    /// Whether elements of this type occupy a fixed number of bytes and
    /// contain no pointers, i.e. raw data can be stored as flat bytes.
    pub fn is_fixed_size(&self) -> bool {
        match self {
            Datatype::VarString | Datatype::VarLen { .. } | Datatype::Reference => false,
            Datatype::Named(_) => false,
            Datatype::Compound { members, .. } => members.iter().all(|m| m.datatype.is_fixed_size()),
            Datatype::Array { base, .. } | Datatype::Enum { base, .. } => base.is_fixed_size(),
            _ => true,
        }
    }

    /// Byte order of atomic numeric types.
    pub fn byte_order(&self) -> Option<ByteOrder> {
        match self {
            Datatype::Integer { order, .. } | Datatype::Float { order, .. } => Some(*order),
            Datatype::Enum { base, .. } => base.byte_order(),
            _ => None,
        }
    }

    /// Copy of this type with the byte order of atomic numerics replaced.
    pub fn with_order(&self, new_order: ByteOrder) -> Self {
        match self {
            Datatype::Integer { size, signed, .. } => Datatype::Integer {
                size: *size,
                signed: *signed,
                order: new_order,
            },
            Datatype::Float { size, .. } => Datatype::Float {
                size: *size,
                order: new_order,
            },
            other => other.clone(),
        }
    }

    /// HDF5 class name, for diagnostics.
    pub fn class_name(&self) -> &'static str {
        match self {
            Datatype::Integer { .. } => "integer",
            Datatype::Float { .. } => "float",
            Datatype::FixedString { .. } | Datatype::VarString => "string",
            Datatype::Compound { .. } => "compound",
            Datatype::VarLen { .. } => "vlen",
            Datatype::Enum { .. } => "enum",
            Datatype::Opaque { .. } => "opaque",
            Datatype::Array { .. } => "array",
            Datatype::Reference => "reference",
            Datatype::Named(_) => "named",
            Datatype::Time { .. } => "time",
            Datatype::BitField { .. } => "bitfield",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Integer { size, signed, .. } => {
                write!(f, "{}{}", if *signed { "i" } else { "u" }, size * 8)
            }
            Datatype::Float { size, .. } => write!(f, "f{}", size * 8),
            Datatype::FixedString { size } => write!(f, "string[{size}]"),
            Datatype::VarString => write!(f, "vlen_string"),
            Datatype::Compound { members, .. } => {
                write!(f, "compound{{")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", m.name, m.datatype)?;
                }
                write!(f, "}}")
            }
            Datatype::VarLen { base } => write!(f, "vlen<{base}>"),
            Datatype::Enum { base, members } => write!(f, "enum<{base}>[{}]", members.len()),
            Datatype::Opaque { size, .. } => write!(f, "opaque[{size}]"),
            Datatype::Array { base, dims } => write!(f, "array<{base}, {dims:?}>"),
            Datatype::Reference => write!(f, "reference"),
            Datatype::Named(obj) => write!(f, "named({obj})"),
            Datatype::Time { size } => write!(f, "time{}", size * 8),
            Datatype::BitField { size } => write!(f, "bitfield{}", size * 8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(Datatype::f64().size(), Some(8));
        assert_eq!(Datatype::char().size(), Some(1));
        assert_eq!(Datatype::VarString.size(), Some(8));
        let arr = Datatype::Array {
            base: Box::new(Datatype::i16()),
            dims: vec![2, 3],
        };
        assert_eq!(arr.size(), Some(12));
        assert_eq!(Datatype::Named(ObjRef(4)).size(), None);
    }

    #[test]
    fn fixed_size_classification() {
        assert!(Datatype::f32().is_fixed_size());
        assert!(!Datatype::VarString.is_fixed_size());
        let cmp = Datatype::Compound {
            size: 16,
            members: vec![CompoundMember {
                name: "s".into(),
                offset: 0,
                datatype: Datatype::VarString,
            }],
        };
        assert!(!cmp.is_fixed_size());
    }

    #[test]
    fn byte_order_swap_keeps_class() {
        let be = Datatype::i32().with_order(ByteOrder::BigEndian);
        assert_eq!(be.byte_order(), Some(ByteOrder::BigEndian));
        assert_eq!(be.size(), Some(4));
    }
}
