//! The netCDF type catalog.
//!
//! Atomic types have fixed ids (1..=12) and are resolvable without any
//! group. User-defined types (compound, vlen, enum, opaque) receive
//! file-wide ids starting at [`TypeId::FIRST_USER`] and live in the type
//! index of the group that defined them. Once the binding commits a user
//! type to storage its structure is frozen.

use std::fmt;

use crate::error::{Error, Result};
use crate::file::File;
use crate::group::GroupId;
use crate::index::{check_name, Indexed};

/// A netCDF type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub i32);

impl TypeId {
    pub const BYTE: TypeId = TypeId(1);
    pub const CHAR: TypeId = TypeId(2);
    pub const SHORT: TypeId = TypeId(3);
    pub const INT: TypeId = TypeId(4);
    pub const FLOAT: TypeId = TypeId(5);
    pub const DOUBLE: TypeId = TypeId(6);
    pub const UBYTE: TypeId = TypeId(7);
    pub const USHORT: TypeId = TypeId(8);
    pub const UINT: TypeId = TypeId(9);
    pub const INT64: TypeId = TypeId(10);
    pub const UINT64: TypeId = TypeId(11);
    pub const STRING: TypeId = TypeId(12);

    /// First id handed out to a user-defined type.
    pub const FIRST_USER: i32 = 32;

    pub fn is_atomic(self) -> bool {
        (1..=12).contains(&self.0)
    }

    pub fn is_user(self) -> bool {
        self.0 >= Self::FIRST_USER
    }

    /// Types allowed by the classic data model.
    pub fn is_classic(self) -> bool {
        (1..=6).contains(&self.0)
    }

    /// Integer atomic types, the valid enum base types.
    pub fn is_integer(self) -> bool {
        matches!(self.0, 1 | 3 | 4 | 7 | 8 | 9 | 10 | 11)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match atomic(*self) {
            Some(a) => f.write_str(a.name),
            None => write!(f, "type#{}", self.0),
        }
    }
}

/// An entry of the atomic type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicType {
    pub id: TypeId,
    pub name: &'static str,
    /// In-memory element size; 8 for a string pointer.
    pub size: usize,
}

const ATOMIC_TYPES: [AtomicType; 12] = [
    AtomicType { id: TypeId::BYTE, name: "byte", size: 1 },
    AtomicType { id: TypeId::CHAR, name: "char", size: 1 },
    AtomicType { id: TypeId::SHORT, name: "short", size: 2 },
    AtomicType { id: TypeId::INT, name: "int", size: 4 },
    AtomicType { id: TypeId::FLOAT, name: "float", size: 4 },
    AtomicType { id: TypeId::DOUBLE, name: "double", size: 8 },
    AtomicType { id: TypeId::UBYTE, name: "ubyte", size: 1 },
    AtomicType { id: TypeId::USHORT, name: "ushort", size: 2 },
    AtomicType { id: TypeId::UINT, name: "uint", size: 4 },
    AtomicType { id: TypeId::INT64, name: "int64", size: 8 },
    AtomicType { id: TypeId::UINT64, name: "uint64", size: 8 },
    AtomicType { id: TypeId::STRING, name: "string", size: 8 },
];

/// Look up an atomic type by id.
pub fn atomic(id: TypeId) -> Option<&'static AtomicType> {
    if id.is_atomic() {
        Some(&ATOMIC_TYPES[(id.0 - 1) as usize])
    } else {
        None
    }
}

/// Look up an atomic type by its CDL name.
pub fn atomic_by_name(name: &str) -> Option<&'static AtomicType> {
    ATOMIC_TYPES.iter().find(|a| a.name == name)
}

/// Little-endian bytes of the default fill value of an atomic type.
///
/// `None` for `string`, whose default fill is the empty string.
pub fn default_fill(id: TypeId) -> Option<Vec<u8>> {
    Some(match id {
        TypeId::BYTE => (-127i8).to_le_bytes().to_vec(),
        TypeId::CHAR => vec![0],
        TypeId::SHORT => (-32767i16).to_le_bytes().to_vec(),
        TypeId::INT => (-2147483647i32).to_le_bytes().to_vec(),
        TypeId::FLOAT => 9.969_209_968_386_869e36_f32.to_le_bytes().to_vec(),
        TypeId::DOUBLE => 9.969_209_968_386_869e36_f64.to_le_bytes().to_vec(),
        TypeId::UBYTE => 255u8.to_le_bytes().to_vec(),
        TypeId::USHORT => 65535u16.to_le_bytes().to_vec(),
        TypeId::UINT => 4294967295u32.to_le_bytes().to_vec(),
        TypeId::INT64 => (-9223372036854775806i64).to_le_bytes().to_vec(),
        TypeId::UINT64 => 18446744073709551614u64.to_le_bytes().to_vec(),
        _ => return None,
    })
}

/// Classification of a type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// Fixed-size numeric or `char`.
    Atomic,
    /// Variable-length string.
    String,
    Compound,
    Vlen,
    Enum,
    Opaque,
}

/// A field of a compound type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    /// Byte offset within the compound.
    pub offset: usize,
    pub type_id: TypeId,
    /// Fixed-size array extents; empty for a scalar field.
    pub dims: Vec<u32>,
}

/// A member of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

/// Structure of a user-defined type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserKind {
    Compound { fields: Vec<Field> },
    Vlen { base: TypeId },
    Enum { base: TypeId, members: Vec<EnumMember> },
    Opaque,
}

/// A user-defined type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserType {
    pub id: TypeId,
    pub name: String,
    /// Element size in bytes; 16 (length + pointer) for vlen types.
    pub size: usize,
    /// Bound to storage; no more fields or members may be added.
    pub committed: bool,
    pub kind: UserKind,
    /// Group the type was defined in.
    pub group: GroupId,
}

impl UserType {
    pub fn class(&self) -> TypeClass {
        match self.kind {
            UserKind::Compound { .. } => TypeClass::Compound,
            UserKind::Vlen { .. } => TypeClass::Vlen,
            UserKind::Enum { .. } => TypeClass::Enum,
            UserKind::Opaque => TypeClass::Opaque,
        }
    }
}

impl Indexed for UserType {
    type Id = TypeId;

    fn id(&self) -> TypeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

/// Slot size of a variable-length element (length + pointer).
pub const VLEN_SLOT_SIZE: usize = 16;

// ---------------------------------------------------------------------------
// Catalog operations
// ---------------------------------------------------------------------------

impl File {
    /// Define an empty compound type of `size` bytes.
    pub fn def_compound(&mut self, group: GroupId, name: &str, size: usize) -> Result<TypeId> {
        if size == 0 {
            return Err(Error::InvalidArgument("compound size must be positive".into()));
        }
        self.define_type(group, name, size, UserKind::Compound { fields: Vec::new() })
    }

    /// Add a scalar field to a compound type.
    pub fn insert_compound(&mut self, type_id: TypeId, name: &str, offset: usize, field_type: TypeId) -> Result<()> {
        self.insert_array_compound(type_id, name, offset, field_type, &[])
    }

    /// Add a fixed-size array field to a compound type.
    pub fn insert_array_compound(
        &mut self,
        type_id: TypeId,
        name: &str,
        offset: usize,
        field_type: TypeId,
        dims: &[u32],
    ) -> Result<()> {
        check_name(name)?;
        self.check_writable()?;
        let field_size = self.model.type_size(field_type)?;
        if dims.iter().any(|&d| d == 0) {
            return Err(Error::InvalidArgument(format!("zero extent in array field {name}")));
        }
        let extent: usize = dims.iter().map(|&d| d as usize).product();
        let ty = self.model.user_type_mut(type_id)?;
        if ty.committed {
            return Err(Error::TypeAlreadyDefined(ty.name.clone()));
        }
        let size = ty.size;
        let type_name = ty.name.clone();
        let UserKind::Compound { fields } = &mut ty.kind else {
            return Err(Error::BadType(format!("{type_name} is not a compound type")));
        };
        if fields.iter().any(|f| f.name == name) {
            return Err(Error::NameInUse(name.to_string()));
        }
        if offset + field_size * extent > size {
            return Err(Error::InvalidArgument(format!(
                "field {name} at offset {offset} does not fit in {size}-byte compound {type_name}"
            )));
        }
        fields.push(Field {
            name: name.to_string(),
            offset,
            type_id: field_type,
            dims: dims.to_vec(),
        });
        Ok(())
    }

    /// Define a variable-length type over `base`.
    pub fn def_vlen(&mut self, group: GroupId, name: &str, base: TypeId) -> Result<TypeId> {
        self.model.type_size(base)?;
        self.define_type(group, name, VLEN_SLOT_SIZE, UserKind::Vlen { base })
    }

    /// Define an empty enum type over an integer base type.
    pub fn def_enum(&mut self, group: GroupId, name: &str, base: TypeId) -> Result<TypeId> {
        if !base.is_integer() {
            return Err(Error::BadType(format!("enum base {base} is not an integer type")));
        }
        let size = self.model.type_size(base)?;
        self.define_type(
            group,
            name,
            size,
            UserKind::Enum {
                base,
                members: Vec::new(),
            },
        )
    }

    /// Add a member to an enum type.
    pub fn insert_enum(&mut self, type_id: TypeId, name: &str, value: i64) -> Result<()> {
        check_name(name)?;
        self.check_writable()?;
        let ty = self.model.user_type_mut(type_id)?;
        if ty.committed {
            return Err(Error::TypeAlreadyDefined(ty.name.clone()));
        }
        let type_name = ty.name.clone();
        let UserKind::Enum { base, members } = &mut ty.kind else {
            return Err(Error::BadType(format!("{type_name} is not an enum type")));
        };
        if !value_fits(*base, value) {
            return Err(Error::InvalidArgument(format!(
                "enum value {value} does not fit base type {base}"
            )));
        }
        if members.iter().any(|m| m.name == name) {
            return Err(Error::NameInUse(name.to_string()));
        }
        if members.iter().any(|m| m.value == value) {
            return Err(Error::InvalidArgument(format!(
                "enum value {value} already used in {type_name}"
            )));
        }
        members.push(EnumMember {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    /// Define an opaque type of `size` bytes.
    pub fn def_opaque(&mut self, group: GroupId, name: &str, size: usize) -> Result<TypeId> {
        if size == 0 {
            return Err(Error::InvalidArgument("opaque size must be positive".into()));
        }
        self.define_type(group, name, size, UserKind::Opaque)
    }

    /// Find a type by name: atomic names first, then `group` and its
    /// ancestors. An absolute path (`/g/t`) names the defining group.
    pub fn inq_typeid(&self, group: GroupId, name: &str) -> Result<TypeId> {
        if let Some(a) = atomic_by_name(name) {
            return Ok(a.id);
        }
        if let Some((path, base)) = name.rsplit_once('/') {
            let gid = self.inq_grp_full_ncid(if path.is_empty() { "/" } else { path })?;
            return self
                .model
                .group(gid)?
                .types
                .get_by_name(base)
                .map(|t| t.id)
                .ok_or_else(|| Error::NotFound(name.to_string()));
        }
        for gid in self.model.ancestors(group)? {
            if let Some(t) = self.model.group(gid)?.types.get_by_name(name) {
                return Ok(t.id);
            }
        }
        Err(Error::NotFound(format!("type {name}")))
    }

    /// Name and size of a type.
    pub fn inq_type(&self, type_id: TypeId) -> Result<(String, usize)> {
        if let Some(a) = atomic(type_id) {
            return Ok((a.name.to_string(), a.size));
        }
        let t = self.model.user_type(type_id)?;
        Ok((t.name.clone(), t.size))
    }

    pub fn type_class(&self, type_id: TypeId) -> Result<TypeClass> {
        self.model.type_class(type_id)
    }

    pub fn size_of(&self, type_id: TypeId) -> Result<usize> {
        self.model.type_size(type_id)
    }

    /// Full description of a user-defined type.
    pub fn inq_user_type(&self, type_id: TypeId) -> Result<&UserType> {
        self.model.user_type(type_id)
    }

    /// User types defined in `group`, in definition order.
    pub fn inq_typeids(&self, group: GroupId) -> Result<Vec<TypeId>> {
        Ok(self.model.group(group)?.types.ids())
    }

    fn define_type(&mut self, group: GroupId, name: &str, size: usize, kind: UserKind) -> Result<TypeId> {
        check_name(name)?;
        self.enter_define()?;
        if self.state.classic {
            return Err(Error::StrictClassicModel("user-defined types".into()));
        }
        self.model.check_type_name_free(group, name)?;
        let id = TypeId(self.model.next_typeid);
        self.model.next_typeid += 1;
        self.model.group_mut(group)?.types.insert(UserType {
            id,
            name: name.to_string(),
            size,
            committed: false,
            kind,
            group,
        })?;
        self.model.type_group.insert(id, group);
        Ok(id)
    }
}

fn value_fits(base: TypeId, value: i64) -> bool {
    match base {
        TypeId::BYTE => i8::try_from(value).is_ok(),
        TypeId::UBYTE => u8::try_from(value).is_ok(),
        TypeId::SHORT => i16::try_from(value).is_ok(),
        TypeId::USHORT => u16::try_from(value).is_ok(),
        TypeId::INT => i32::try_from(value).is_ok(),
        TypeId::UINT => u32::try_from(value).is_ok(),
        TypeId::INT64 => true,
        TypeId::UINT64 => value >= 0,
        _ => false,
    }
}
