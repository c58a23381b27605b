//! Datatype message encoding (message type 0x0003).
//!
//! Atomic classes use version 1 of the encoding; compound, enum and array
//! types use version 3, which drops the name padding and array permutations.
//! Committed types never appear here: the writer expands them before
//! encoding nested members and refers to them through a shared message at
//! the top level.

use crate::datatype::{ByteOrder, CompoundMember, Datatype, EnumMember};
use crate::error::{ContainerError, Result};
use crate::format::cursor::{offset_width, put_uint, Cursor};

const CLASS_FIXED: u8 = 0;
const CLASS_FLOAT: u8 = 1;
const CLASS_TIME: u8 = 2;
const CLASS_STRING: u8 = 3;
const CLASS_BITFIELD: u8 = 4;
const CLASS_OPAQUE: u8 = 5;
const CLASS_COMPOUND: u8 = 6;
const CLASS_REFERENCE: u8 = 7;
const CLASS_ENUM: u8 = 8;
const CLASS_VLEN: u8 = 9;
const CLASS_ARRAY: u8 = 10;

/// On-disk size of a variable-length element: length, collection, index.
pub(crate) const VLEN_SLOT: u32 = 16;

/// Size of an object reference.
pub(crate) const REF_SIZE: u32 = 8;

const CSET_UTF8: u8 = 1;

fn header(out: &mut Vec<u8>, class: u8, version: u8, bits: [u8; 3], size: u32) {
    out.push(class | (version << 4));
    out.extend_from_slice(&bits);
    out.extend_from_slice(&size.to_le_bytes());
}

fn order_bit(order: ByteOrder) -> u8 {
    match order {
        ByteOrder::LittleEndian => 0,
        ByteOrder::BigEndian => 1,
    }
}

fn order_of(bit: u8) -> ByteOrder {
    if bit & 0x01 != 0 {
        ByteOrder::BigEndian
    } else {
        ByteOrder::LittleEndian
    }
}

fn unencodable(dt: &Datatype, why: &str) -> ContainerError {
    ContainerError::Unencodable(format!("{dt}: {why}"))
}

/// File size of one element of an expanded datatype.
pub(crate) fn stored_size(dt: &Datatype) -> Result<u32> {
    Ok(match dt {
        Datatype::VarString | Datatype::VarLen { .. } => VLEN_SLOT,
        Datatype::Reference => REF_SIZE,
        Datatype::Enum { base, .. } => stored_size(base)?,
        Datatype::Array { base, dims } => stored_size(base)? * dims.iter().product::<u32>(),
        Datatype::Named(_) => return Err(unencodable(dt, "committed type not expanded")),
        other => other.size().unwrap_or(0),
    })
}

/// Append the datatype message body for an expanded datatype.
pub(crate) fn encode(dt: &Datatype, out: &mut Vec<u8>) -> Result<()> {
    match dt {
        Datatype::Integer { size, signed, order } => {
            let bits = order_bit(*order) | if *signed { 0x08 } else { 0 };
            header(out, CLASS_FIXED, 1, [bits, 0, 0], *size);
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&((*size * 8) as u16).to_le_bytes());
        }
        Datatype::Float { size, order } => {
            let (exp_bits, mant_bits, bias): (u8, u8, u32) = match size {
                2 => (5, 10, 15),
                4 => (8, 23, 127),
                8 => (11, 52, 1023),
                _ => return Err(unencodable(dt, "no IEEE layout for this size")),
            };
            // Implied leading mantissa bit, sign in the top bit.
            header(out, CLASS_FLOAT, 1, [0x20 | order_bit(*order), (size * 8 - 1) as u8, 0], *size);
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&((*size * 8) as u16).to_le_bytes());
            out.extend_from_slice(&[mant_bits, exp_bits, 0, mant_bits]);
            out.extend_from_slice(&bias.to_le_bytes());
        }
        Datatype::Time { size } => {
            header(out, CLASS_TIME, 1, [0, 0, 0], *size);
            out.extend_from_slice(&((*size * 8) as u16).to_le_bytes());
        }
        Datatype::FixedString { size } => {
            header(out, CLASS_STRING, 1, [0, 0, 0], *size);
        }
        Datatype::BitField { size } => {
            header(out, CLASS_BITFIELD, 1, [0, 0, 0], *size);
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&((*size * 8) as u16).to_le_bytes());
        }
        Datatype::Opaque { size, tag } => {
            let padded = tag.len().div_ceil(8) * 8;
            if padded > 0xff {
                return Err(unencodable(dt, "opaque tag longer than 255 bytes"));
            }
            header(out, CLASS_OPAQUE, 1, [padded as u8, 0, 0], *size);
            out.extend_from_slice(tag.as_bytes());
            out.resize(out.len() + padded - tag.len(), 0);
        }
        Datatype::Compound { size, members } => {
            let n = u16::try_from(members.len()).map_err(|_| unencodable(dt, "too many members"))?;
            let [lo, hi] = n.to_le_bytes();
            header(out, CLASS_COMPOUND, 3, [lo, hi, 0], *size);
            let width = offset_width(u64::from(*size));
            for m in members {
                out.extend_from_slice(m.name.as_bytes());
                out.push(0);
                put_uint(out, m.offset, width);
                encode(&m.datatype, out)?;
            }
        }
        Datatype::Reference => {
            header(out, CLASS_REFERENCE, 1, [0, 0, 0], REF_SIZE);
        }
        Datatype::Enum { base, members } => {
            let n = u16::try_from(members.len()).map_err(|_| unencodable(dt, "too many members"))?;
            let (base_size, order) = match base.as_ref() {
                Datatype::Integer { size, order, .. } => (*size as usize, *order),
                _ => return Err(unencodable(dt, "enum base must be an integer")),
            };
            let [lo, hi] = n.to_le_bytes();
            header(out, CLASS_ENUM, 3, [lo, hi, 0], base_size as u32);
            encode(base, out)?;
            for m in members {
                out.extend_from_slice(m.name.as_bytes());
                out.push(0);
            }
            for m in members {
                let mut value = m.value.to_le_bytes()[..base_size].to_vec();
                if order == ByteOrder::BigEndian {
                    value.reverse();
                }
                out.extend_from_slice(&value);
            }
        }
        Datatype::VarString => {
            header(out, CLASS_VLEN, 1, [0x01, CSET_UTF8, 0], VLEN_SLOT);
            encode(&Datatype::u8(), out)?;
        }
        Datatype::VarLen { base } => {
            header(out, CLASS_VLEN, 1, [0, 0, 0], VLEN_SLOT);
            encode(base, out)?;
        }
        Datatype::Array { base, dims } => {
            let rank = u8::try_from(dims.len()).map_err(|_| unencodable(dt, "too many dimensions"))?;
            header(out, CLASS_ARRAY, 3, [0, 0, 0], stored_size(dt)?);
            out.push(rank);
            for d in dims {
                out.extend_from_slice(&d.to_le_bytes());
            }
            encode(base, out)?;
        }
        Datatype::Named(_) => return Err(unencodable(dt, "committed type not expanded")),
    }
    Ok(())
}

/// Parse one datatype message body.
pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Datatype> {
    let class_version = cur.u8()?;
    let class = class_version & 0x0f;
    let version = class_version >> 4;
    let bits = cur.take(3)?;
    let (b0, b1) = (bits[0], bits[1]);
    let size = cur.u32()?;
    Ok(match class {
        CLASS_FIXED => {
            cur.skip(4)?;
            Datatype::Integer {
                size,
                signed: b0 & 0x08 != 0,
                order: order_of(b0),
            }
        }
        CLASS_FLOAT => {
            cur.skip(12)?;
            Datatype::Float {
                size,
                order: order_of(b0),
            }
        }
        CLASS_TIME => {
            cur.skip(2)?;
            Datatype::Time { size }
        }
        CLASS_STRING => Datatype::FixedString { size },
        CLASS_BITFIELD => {
            cur.skip(4)?;
            Datatype::BitField { size }
        }
        CLASS_OPAQUE => {
            let tag = cur.take(b0 as usize)?;
            let end = tag.iter().position(|&c| c == 0).unwrap_or(tag.len());
            Datatype::Opaque {
                size,
                tag: String::from_utf8_lossy(&tag[..end]).into_owned(),
            }
        }
        CLASS_COMPOUND => {
            let n = u16::from_le_bytes([b0, b1]) as usize;
            let mut members = Vec::with_capacity(n);
            for _ in 0..n {
                let name = if version >= 3 { cur.cstr()? } else { cur.cstr_padded(8)? };
                let offset = match version {
                    v if v >= 3 => cur.uint(offset_width(u64::from(size)))?,
                    2 => u64::from(cur.u32()?),
                    _ => {
                        let offset = u64::from(cur.u32()?);
                        // Dimensionality, permutation and legacy array dims.
                        cur.skip(28)?;
                        offset
                    }
                };
                members.push(CompoundMember {
                    name,
                    offset,
                    datatype: decode(cur)?,
                });
            }
            Datatype::Compound { size, members }
        }
        CLASS_REFERENCE => Datatype::Reference,
        CLASS_ENUM => {
            let n = u16::from_le_bytes([b0, b1]) as usize;
            let base = decode(cur)?;
            let (base_size, signed, order) = match &base {
                Datatype::Integer { size, signed, order } => (*size as usize, *signed, *order),
                other => return Err(ContainerError::BadImage(format!("enum over {other}"))),
            };
            if base_size == 0 || base_size > 8 {
                return Err(ContainerError::BadImage(format!("enum base of {base_size} bytes")));
            }
            let mut names = Vec::with_capacity(n);
            for _ in 0..n {
                names.push(if version >= 3 { cur.cstr()? } else { cur.cstr_padded(8)? });
            }
            let mut members = Vec::with_capacity(n);
            for name in names {
                let mut raw = cur.take(base_size)?.to_vec();
                if order == ByteOrder::BigEndian {
                    raw.reverse();
                }
                let fill = if signed && raw[base_size - 1] & 0x80 != 0 { 0xff } else { 0 };
                let mut wide = [fill; 8];
                wide[..base_size].copy_from_slice(&raw);
                members.push(EnumMember {
                    name,
                    value: i64::from_le_bytes(wide),
                });
            }
            Datatype::Enum {
                base: Box::new(base),
                members,
            }
        }
        CLASS_VLEN => {
            let base = decode(cur)?;
            if b0 & 0x0f == 1 {
                Datatype::VarString
            } else {
                Datatype::VarLen { base: Box::new(base) }
            }
        }
        CLASS_ARRAY => {
            let rank = cur.u8()? as usize;
            if version < 3 {
                cur.skip(3)?;
            }
            let mut dims = Vec::with_capacity(rank);
            for _ in 0..rank {
                dims.push(cur.u32()?);
            }
            if version < 3 {
                cur.skip(4 * rank)?;
            }
            Datatype::Array {
                base: Box::new(decode(cur)?),
                dims,
            }
        }
        other => return Err(ContainerError::BadImage(format!("unknown datatype class {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(dt: &Datatype) -> Datatype {
        let mut buf = Vec::new();
        encode(dt, &mut buf).unwrap();
        let mut cur = Cursor::new(&buf);
        let back = decode(&mut cur).unwrap();
        assert_eq!(cur.remaining(), 0);
        back
    }

    #[test]
    fn double_matches_library_layout() {
        let mut buf = Vec::new();
        encode(&Datatype::f64(), &mut buf).unwrap();
        assert_eq!(
            buf,
            vec![0x11, 0x20, 0x3f, 0x00, 8, 0, 0, 0, 0, 0, 64, 0, 52, 11, 0, 52, 0xff, 0x03, 0, 0]
        );
    }

    #[test]
    fn big_endian_signed_integer_bits() {
        let mut buf = Vec::new();
        encode(&Datatype::i16().with_order(ByteOrder::BigEndian), &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0x10, 0x09, 0, 0]);
        let be = Datatype::i16().with_order(ByteOrder::BigEndian);
        assert_eq!(round(&be), be);
    }

    #[test]
    fn nested_compound_with_array_member() {
        let dt = Datatype::Compound {
            size: 24,
            members: vec![
                CompoundMember {
                    name: "id".into(),
                    offset: 0,
                    datatype: Datatype::u32(),
                },
                CompoundMember {
                    name: "xy".into(),
                    offset: 8,
                    datatype: Datatype::Array {
                        base: Box::new(Datatype::f64()),
                        dims: vec![2],
                    },
                },
            ],
        };
        assert_eq!(round(&dt), dt);
    }

    #[test]
    fn enum_with_negative_values() {
        let dt = Datatype::Enum {
            base: Box::new(Datatype::i8()),
            members: vec![
                EnumMember {
                    name: "low".into(),
                    value: -3,
                },
                EnumMember {
                    name: "high".into(),
                    value: 5,
                },
            ],
        };
        assert_eq!(round(&dt), dt);
    }

    #[test]
    fn vlen_string_differs_from_sequence() {
        assert_eq!(round(&Datatype::VarString), Datatype::VarString);
        let seq = Datatype::VarLen {
            base: Box::new(Datatype::u8()),
        };
        assert_eq!(round(&seq), seq);
    }

    #[test]
    fn opaque_tag_is_padded() {
        let dt = Datatype::Opaque {
            size: 3,
            tag: "blob_t".into(),
        };
        let mut buf = Vec::new();
        encode(&dt, &mut buf).unwrap();
        assert_eq!(buf.len(), 8 + 8);
        assert_eq!(round(&dt), dt);
    }

    #[test]
    fn named_type_must_be_expanded() {
        let mut buf = Vec::new();
        assert!(matches!(
            encode(&Datatype::Named(crate::object::ObjRef(9)), &mut buf),
            Err(ContainerError::Unencodable(_))
        ));
    }
}
