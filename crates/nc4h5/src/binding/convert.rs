//! Mapping between netCDF types/values and container datatypes/attributes.

use std::collections::HashMap;

use nc4h5_container::{AttrData, Attribute, ByteOrder, CompoundMember, Dataspace, Datatype, EnumMember, ObjRef};

use crate::attr::{Att, AttValue};
use crate::binding::Hdf5Store;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::types::{EnumMember as NcEnumMember, Field, TypeId, UserKind};
use crate::var::Endianness;

fn atomic_datatype(tid: TypeId) -> Option<Datatype> {
    Some(match tid {
        TypeId::BYTE => Datatype::i8(),
        TypeId::CHAR => Datatype::char(),
        TypeId::SHORT => Datatype::i16(),
        TypeId::INT => Datatype::i32(),
        TypeId::FLOAT => Datatype::f32(),
        TypeId::DOUBLE => Datatype::f64(),
        TypeId::UBYTE => Datatype::u8(),
        TypeId::USHORT => Datatype::u16(),
        TypeId::UINT => Datatype::u32(),
        TypeId::INT64 => Datatype::i64(),
        TypeId::UINT64 => Datatype::u64(),
        TypeId::STRING => Datatype::VarString,
        _ => return None,
    })
}

/// Datatype to store values of `tid` with. Committed user types are
/// referenced by their datatype object.
pub(crate) fn datatype_for(model: &Model, store: &Hdf5Store, tid: TypeId) -> Result<Datatype> {
    if let Some(dt) = atomic_datatype(tid) {
        return Ok(dt);
    }
    if let Some(obj) = store.types.get(&tid) {
        return Ok(Datatype::Named(*obj));
    }
    type_structure(model, store, tid)
}

/// Datatype of a variable, with its byte order applied.
pub(crate) fn var_datatype(model: &Model, store: &Hdf5Store, tid: TypeId, endianness: Endianness) -> Result<Datatype> {
    let dt = datatype_for(model, store, tid)?;
    Ok(match endianness {
        Endianness::Big => dt.with_order(ByteOrder::BigEndian),
        Endianness::Little | Endianness::Native => dt,
    })
}

/// Full structure of a user type, as committed to storage.
pub(crate) fn type_structure(model: &Model, store: &Hdf5Store, tid: TypeId) -> Result<Datatype> {
    let ty = model.user_type(tid)?;
    Ok(match &ty.kind {
        UserKind::Compound { fields } => {
            let mut members = Vec::with_capacity(fields.len());
            for f in fields {
                let base = datatype_for(model, store, f.type_id)?;
                let datatype = if f.dims.is_empty() {
                    base
                } else {
                    Datatype::Array {
                        base: Box::new(base),
                        dims: f.dims.clone(),
                    }
                };
                members.push(CompoundMember {
                    name: f.name.clone(),
                    offset: f.offset as u64,
                    datatype,
                });
            }
            Datatype::Compound {
                size: ty.size as u32,
                members,
            }
        }
        UserKind::Vlen { base } => Datatype::VarLen {
            base: Box::new(datatype_for(model, store, *base)?),
        },
        UserKind::Enum { base, members } => Datatype::Enum {
            base: Box::new(datatype_for(model, store, *base)?),
            members: members
                .iter()
                .map(|m| EnumMember {
                    name: m.name.clone(),
                    value: m.value,
                })
                .collect(),
        },
        UserKind::Opaque => Datatype::Opaque {
            size: ty.size as u32,
            tag: ty.name.clone(),
        },
    })
}

fn unsupported(dt: &Datatype) -> Error {
    Error::UnsupportedElementType(dt.to_string())
}

/// netCDF type of a stored datatype. `named` maps committed datatype objects
/// already read to their type ids.
pub(crate) fn nc_type_of(dt: &Datatype, named: &HashMap<ObjRef, TypeId>) -> Result<(TypeId, Endianness)> {
    let endianness = match dt.byte_order() {
        Some(ByteOrder::BigEndian) => Endianness::Big,
        _ => Endianness::Native,
    };
    let tid = match dt {
        Datatype::Integer { size, signed, .. } => match (size, signed) {
            (1, true) => TypeId::BYTE,
            (1, false) => TypeId::UBYTE,
            (2, true) => TypeId::SHORT,
            (2, false) => TypeId::USHORT,
            (4, true) => TypeId::INT,
            (4, false) => TypeId::UINT,
            (8, true) => TypeId::INT64,
            (8, false) => TypeId::UINT64,
            _ => return Err(unsupported(dt)),
        },
        Datatype::Float { size: 4, .. } => TypeId::FLOAT,
        Datatype::Float { size: 8, .. } => TypeId::DOUBLE,
        Datatype::FixedString { size: 1 } => TypeId::CHAR,
        Datatype::VarString => TypeId::STRING,
        Datatype::Named(obj) => *named.get(obj).ok_or_else(|| unsupported(dt))?,
        _ => return Err(unsupported(dt)),
    };
    Ok((tid, endianness))
}

/// Size and structure of a committed datatype read from storage.
pub(crate) fn user_kind_of(dt: &Datatype, named: &HashMap<ObjRef, TypeId>) -> Result<(usize, UserKind)> {
    Ok(match dt {
        Datatype::Compound { size, members } => {
            let mut fields = Vec::with_capacity(members.len());
            for m in members {
                let (base, dims) = match &m.datatype {
                    Datatype::Array { base, dims } => (base.as_ref(), dims.clone()),
                    other => (other, Vec::new()),
                };
                fields.push(Field {
                    name: m.name.clone(),
                    offset: m.offset as usize,
                    type_id: nc_type_of(base, named)?.0,
                    dims,
                });
            }
            (*size as usize, UserKind::Compound { fields })
        }
        Datatype::VarLen { base } => (
            crate::types::VLEN_SLOT_SIZE,
            UserKind::Vlen {
                base: nc_type_of(base, named)?.0,
            },
        ),
        Datatype::Enum { base, members } => {
            let (base_id, _) = nc_type_of(base, named)?;
            if !base_id.is_integer() {
                return Err(unsupported(dt));
            }
            let size = base.size().ok_or_else(|| unsupported(dt))? as usize;
            (
                size,
                UserKind::Enum {
                    base: base_id,
                    members: members
                        .iter()
                        .map(|m| NcEnumMember {
                            name: m.name.clone(),
                            value: m.value,
                        })
                        .collect(),
                },
            )
        }
        Datatype::Opaque { size, .. } => (*size as usize, UserKind::Opaque),
        _ => return Err(unsupported(dt)),
    })
}

/// Container attribute for a netCDF attribute.
pub(crate) fn to_attribute(model: &Model, store: &Hdf5Store, att: &Att) -> Result<Attribute> {
    let (datatype, space) = if att.type_id == TypeId::CHAR {
        // Text is one fixed-length string; empty text is a zero-length array.
        if att.len == 0 {
            (Datatype::char(), Dataspace::simple(&[0]))
        } else {
            (Datatype::FixedString { size: att.len as u32 }, Dataspace::scalar())
        }
    } else {
        (datatype_for(model, store, att.type_id)?, Dataspace::simple(&[att.len as u64]))
    };
    let data = match &att.value {
        AttValue::Bytes(b) => AttrData::Bytes(b.clone()),
        AttValue::Strings(s) => AttrData::Strings(s.clone()),
        AttValue::Vlen(v) => AttrData::VarLen(v.clone()),
    };
    Ok(Attribute {
        name: att.name.clone(),
        datatype,
        space,
        data,
    })
}

/// netCDF attribute for a container attribute at position `id`.
pub(crate) fn from_attribute(model: &Model, attr: &Attribute, named: &HashMap<ObjRef, TypeId>, id: usize) -> Result<Att> {
    let (type_id, len) = match &attr.datatype {
        Datatype::FixedString { size } if attr.space.is_scalar() => (TypeId::CHAR, *size as usize),
        Datatype::FixedString { size: 1 } => (TypeId::CHAR, attr.space.num_elements() as usize),
        other => (nc_type_of(other, named)?.0, attr.space.num_elements() as usize),
    };
    let value = match &attr.data {
        AttrData::Bytes(b) => {
            let size = model.type_size(type_id)?;
            if b.len() != size * len {
                return Err(Error::UnsupportedElementType(format!(
                    "attribute {} holds {} bytes for {len} values",
                    attr.name,
                    b.len()
                )));
            }
            AttValue::Bytes(b.clone())
        }
        AttrData::Strings(s) => AttValue::Strings(s.clone()),
        AttrData::VarLen(v) => AttValue::Vlen(v.clone()),
        AttrData::References(_) | AttrData::Backlinks(_) => {
            return Err(Error::UnsupportedElementType(format!("reference attribute {}", attr.name)))
        }
    };
    Ok(Att {
        id,
        name: attr.name.clone(),
        type_id,
        len,
        value,
        dirty: false,
        created: true,
    })
}
