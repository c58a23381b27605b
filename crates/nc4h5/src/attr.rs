//! Attributes of groups and variables.
//!
//! Attribute ids are positions: deleting an attribute renumbers every later
//! attribute of the same owner. Owners are addressed by `(group, VarId)`,
//! where [`VarId::GLOBAL`] names the group itself. Values are stored
//! little-endian.

use crate::error::{Error, Result};
use crate::file::File;
use crate::group::GroupId;
use crate::index::{check_name, Indexed, NameIndex, Positional};
use crate::model::Model;
use crate::types::{TypeClass, TypeId};
use crate::var::VarId;

/// Name of the fill-value attribute.
pub const FILL_VALUE: &str = "_FillValue";

/// Names only the storage binding may write.
pub const RESERVED_NAMES: &[&str] = &[
    "_Netcdf4Dimid",
    "_Netcdf4Coordinates",
    "_nc3_strict",
    "_NCProperties",
    "CLASS",
    "NAME",
    "DIMENSION_LIST",
    "REFERENCE_LIST",
    "_IsNetcdf4",
    "_SuperblockVersion",
    "_Format",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Attribute payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AttValue {
    /// Flat element bytes of a fixed-size type.
    Bytes(Vec<u8>),
    /// One string per element (`string` type).
    Strings(Vec<String>),
    /// One record of base elements per element (vlen types).
    Vlen(Vec<Vec<u8>>),
}

/// An attribute record.
#[derive(Debug, Clone, PartialEq)]
pub struct Att {
    /// Position within the owner.
    pub id: usize,
    pub name: String,
    pub type_id: TypeId,
    /// Number of elements.
    pub len: usize,
    pub value: AttValue,
    /// Needs writing at the next flush.
    pub dirty: bool,
    /// Exists in the container.
    pub created: bool,
}

impl Att {
    /// Text value of a `char` attribute, with trailing NULs dropped.
    pub fn as_text(&self) -> Option<String> {
        match (&self.value, self.type_id) {
            (AttValue::Bytes(b), TypeId::CHAR) => {
                let end = b.iter().rposition(|&c| c != 0).map_or(0, |p| p + 1);
                String::from_utf8(b[..end].to_vec()).ok()
            }
            _ => None,
        }
    }

    /// Strings of a `string` attribute.
    pub fn as_strings(&self) -> Option<&[String]> {
        match &self.value {
            AttValue::Strings(s) => Some(s),
            _ => None,
        }
    }

    /// Typed values of a numeric attribute.
    pub fn values<T: AttPrimitive>(&self) -> Result<Vec<T>> {
        if self.type_id != T::TYPE {
            return Err(Error::BadType(format!(
                "attribute {} has type {}, not {}",
                self.name,
                self.type_id,
                T::TYPE
            )));
        }
        let AttValue::Bytes(bytes) = &self.value else {
            return Err(Error::BadType(format!("attribute {} is not numeric", self.name)));
        };
        Ok(bytes.chunks_exact(T::SIZE).map(T::from_le).collect())
    }
}

impl Indexed for Att {
    type Id = usize;

    fn id(&self) -> usize {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

impl Positional for Att {
    fn set_position(&mut self, position: usize) {
        self.id = position;
    }
}

/// Numeric element types with a netCDF atomic counterpart.
pub trait AttPrimitive: Copy {
    const TYPE: TypeId;
    const SIZE: usize;
    fn to_le(self, out: &mut Vec<u8>);
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! att_primitive {
    ($($t:ty => $id:expr),* $(,)?) => {
        $(
            impl AttPrimitive for $t {
                const TYPE: TypeId = $id;
                const SIZE: usize = std::mem::size_of::<$t>();

                fn to_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn from_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

att_primitive! {
    i8 => TypeId::BYTE,
    u8 => TypeId::UBYTE,
    i16 => TypeId::SHORT,
    u16 => TypeId::USHORT,
    i32 => TypeId::INT,
    u32 => TypeId::UINT,
    i64 => TypeId::INT64,
    u64 => TypeId::UINT64,
    f32 => TypeId::FLOAT,
    f64 => TypeId::DOUBLE,
}

impl Model {
    pub(crate) fn atts(&self, gid: GroupId, owner: VarId) -> Result<&NameIndex<Att>> {
        if owner == VarId::GLOBAL {
            Ok(&self.group(gid)?.atts)
        } else {
            Ok(&self.var(gid, owner)?.atts)
        }
    }

    /// Attribute index of an owner plus its tombstone list.
    pub(crate) fn atts_mut(&mut self, gid: GroupId, owner: VarId) -> Result<(&mut NameIndex<Att>, &mut Vec<String>)> {
        if owner == VarId::GLOBAL {
            let g = self.group_mut(gid)?;
            Ok((&mut g.atts, &mut g.att_tombstones))
        } else {
            let v = self.var_mut(gid, owner)?;
            v.flags.attr_dirty = true;
            Ok((&mut v.atts, &mut v.att_tombstones))
        }
    }
}

impl File {
    /// Create or replace an attribute.
    pub fn put_att(&mut self, group: GroupId, owner: VarId, name: &str, type_id: TypeId, value: AttValue) -> Result<()> {
        check_name(name)?;
        self.check_writable()?;
        if is_reserved(name) {
            return Err(Error::NameInUse(format!("{name} is reserved")));
        }
        if !self.model.type_visible(group, type_id)? {
            return Err(Error::BadType(format!("type {} is not defined here", type_id.0)));
        }
        if self.state.classic && !type_id.is_classic() {
            return Err(Error::StrictClassicModel(format!("attribute type {type_id}")));
        }
        let len = self.value_len(type_id, &value)?;

        let existing = self
            .model
            .atts(group, owner)?
            .get_by_name(name)
            .map(|a| (a.type_id, a.len));
        if let Some((old_type, old_len)) = existing {
            if (old_type == TypeId::CHAR) != (type_id == TypeId::CHAR) {
                return Err(Error::CharacterTypeMismatch(name.to_string()));
            }
            if self.state.classic && !self.state.define_mode && len > old_len {
                return Err(Error::NotInDefineMode);
            }
        } else if self.state.classic && !self.state.define_mode {
            return Err(Error::NotInDefineMode);
        }

        if owner != VarId::GLOBAL && name == FILL_VALUE {
            let var = self.model.var(group, owner)?;
            if type_id != var.type_id {
                return Err(Error::BadType(format!(
                    "{FILL_VALUE} of {} must have type {}",
                    var.name, var.type_id
                )));
            }
            if len != 1 {
                return Err(Error::InvalidArgument(format!(
                    "{FILL_VALUE} of {} must hold exactly one value",
                    var.name
                )));
            }
            if var.flags.written {
                return Err(Error::LateFillValueChange(var.name.clone()));
            }
            let var = self.model.var_mut(group, owner)?;
            var.fill_value = match &value {
                AttValue::Bytes(b) => Some(b.clone()),
                _ => None,
            };
            if var.flags.created {
                var.flags.fill_changed = true;
            }
        }

        let (atts, _) = self.model.atts_mut(group, owner)?;
        if let Some(att) = atts.get_mut_by_name(name) {
            att.type_id = type_id;
            att.len = len;
            att.value = value;
            att.dirty = true;
        } else {
            let id = atts.len();
            atts.insert(Att {
                id,
                name: name.to_string(),
                type_id,
                len,
                value,
                dirty: true,
                created: false,
            })?;
        }
        Ok(())
    }

    /// Write a `char` attribute.
    pub fn put_att_text(&mut self, group: GroupId, owner: VarId, name: &str, text: &str) -> Result<()> {
        self.put_att(group, owner, name, TypeId::CHAR, AttValue::Bytes(text.as_bytes().to_vec()))
    }

    /// Write a numeric attribute.
    pub fn put_att_values<T: AttPrimitive>(&mut self, group: GroupId, owner: VarId, name: &str, values: &[T]) -> Result<()> {
        let mut bytes = Vec::with_capacity(values.len() * T::SIZE);
        for v in values {
            v.to_le(&mut bytes);
        }
        self.put_att(group, owner, name, T::TYPE, AttValue::Bytes(bytes))
    }

    /// Write a `string` attribute.
    pub fn put_att_strings(&mut self, group: GroupId, owner: VarId, name: &str, values: &[&str]) -> Result<()> {
        self.put_att(
            group,
            owner,
            name,
            TypeId::STRING,
            AttValue::Strings(values.iter().map(|s| s.to_string()).collect()),
        )
    }

    /// An attribute by name.
    pub fn get_att(&self, group: GroupId, owner: VarId, name: &str) -> Result<&Att> {
        self.model
            .atts(group, owner)?
            .get_by_name(name)
            .ok_or_else(|| Error::NotFound(format!("attribute {name}")))
    }

    /// Type and length of an attribute.
    pub fn inq_att(&self, group: GroupId, owner: VarId, name: &str) -> Result<(TypeId, usize)> {
        let a = self.get_att(group, owner, name)?;
        Ok((a.type_id, a.len))
    }

    /// Id (position) of an attribute.
    pub fn inq_attid(&self, group: GroupId, owner: VarId, name: &str) -> Result<usize> {
        Ok(self.get_att(group, owner, name)?.id)
    }

    /// Name of the attribute at position `num`.
    pub fn inq_attname(&self, group: GroupId, owner: VarId, num: usize) -> Result<&str> {
        self.model
            .atts(group, owner)?
            .get_at(num)
            .map(|a| a.name.as_str())
            .ok_or_else(|| Error::NotFound(format!("attribute number {num}")))
    }

    /// Number of attributes of an owner.
    pub fn inq_natts(&self, group: GroupId, owner: VarId) -> Result<usize> {
        Ok(self.model.atts(group, owner)?.len())
    }

    pub fn rename_att(&mut self, group: GroupId, owner: VarId, old_name: &str, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        self.check_writable()?;
        if is_reserved(new_name) {
            return Err(Error::NameInUse(format!("{new_name} is reserved")));
        }
        let atts = self.model.atts(group, owner)?;
        let id = atts
            .get_by_name(old_name)
            .map(|a| a.id)
            .ok_or_else(|| Error::NotFound(format!("attribute {old_name}")))?;
        if atts.contains_name(new_name) {
            return Err(Error::NameInUse(new_name.to_string()));
        }
        if self.state.classic && !self.state.define_mode && new_name.len() > old_name.len() {
            return Err(Error::NotInDefineMode);
        }
        let (atts, tombstones) = self.model.atts_mut(group, owner)?;
        atts.rename(id, new_name)?;
        if let Some(att) = atts.get_mut_by_id(id) {
            att.dirty = true;
            att.created = false;
        }
        tombstones.push(old_name.to_string());
        Ok(())
    }

    /// Delete an attribute; later attributes of the owner are renumbered.
    pub fn del_att(&mut self, group: GroupId, owner: VarId, name: &str) -> Result<()> {
        self.check_writable()?;
        if self.state.classic && !self.state.define_mode {
            return Err(Error::NotInDefineMode);
        }
        let id = self.get_att(group, owner, name)?.id;
        if owner != VarId::GLOBAL && name == FILL_VALUE {
            let var = self.model.var_mut(group, owner)?;
            if var.flags.written {
                return Err(Error::LateFillValueChange(var.name.clone()));
            }
            var.fill_value = None;
            if var.flags.created {
                var.flags.fill_changed = true;
            }
        }
        let (atts, tombstones) = self.model.atts_mut(group, owner)?;
        let removed = atts.remove_renumbering(id);
        if removed.is_some_and(|a| a.created) {
            tombstones.push(name.to_string());
        }
        Ok(())
    }

    fn value_len(&self, type_id: TypeId, value: &AttValue) -> Result<usize> {
        let class = self.model.type_class(type_id)?;
        match (class, value) {
            (TypeClass::String, AttValue::Strings(s)) => Ok(s.len()),
            (TypeClass::Vlen, AttValue::Vlen(v)) => Ok(v.len()),
            (TypeClass::String | TypeClass::Vlen, _) => Err(Error::BadType(format!(
                "type {type_id} needs a variable-length value"
            ))),
            (_, AttValue::Bytes(b)) => {
                if !self.model.is_fixed_size(type_id)? {
                    return Err(Error::UnsupportedElementType(format!("attribute of type {type_id}")));
                }
                let size = self.model.type_size(type_id)?;
                if b.len() % size != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "{} bytes is not a whole number of {size}-byte values",
                        b.len()
                    )));
                }
                Ok(b.len() / size)
            }
            _ => Err(Error::BadType(format!("type {type_id} needs a fixed-size value"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::CreateOptions;

    fn file() -> File {
        File::create_in_memory(CreateOptions::default()).unwrap()
    }

    #[test]
    fn positions_renumber_on_delete() {
        let mut f = file();
        let root = f.root();
        for name in ["a", "b", "c"] {
            f.put_att_values(root, VarId::GLOBAL, name, &[1i32]).unwrap();
        }
        f.del_att(root, VarId::GLOBAL, "a").unwrap();
        assert_eq!(f.inq_attname(root, VarId::GLOBAL, 0).unwrap(), "b");
        assert_eq!(f.inq_attid(root, VarId::GLOBAL, "c").unwrap(), 1);
        assert_eq!(f.inq_natts(root, VarId::GLOBAL).unwrap(), 2);
    }

    #[test]
    fn replace_keeps_position() {
        let mut f = file();
        let root = f.root();
        f.put_att_text(root, VarId::GLOBAL, "title", "first").unwrap();
        f.put_att_text(root, VarId::GLOBAL, "history", "x").unwrap();
        f.put_att_text(root, VarId::GLOBAL, "title", "second").unwrap();
        let a = f.get_att(root, VarId::GLOBAL, "title").unwrap();
        assert_eq!(a.id, 0);
        assert_eq!(a.as_text().as_deref(), Some("second"));
        assert_eq!(a.len, 6);
    }

    #[test]
    fn text_and_numbers_do_not_mix() {
        let mut f = file();
        let root = f.root();
        f.put_att_text(root, VarId::GLOBAL, "units", "m").unwrap();
        assert!(matches!(
            f.put_att_values(root, VarId::GLOBAL, "units", &[1.0f64]),
            Err(Error::CharacterTypeMismatch(_))
        ));
    }

    #[test]
    fn reserved_names_rejected() {
        let mut f = file();
        let root = f.root();
        for name in ["_Netcdf4Dimid", "CLASS", "DIMENSION_LIST", "_NCProperties"] {
            assert!(matches!(
                f.put_att_values(root, VarId::GLOBAL, name, &[0i32]),
                Err(Error::NameInUse(_))
            ));
        }
    }

    #[test]
    fn fill_value_rules() {
        let mut f = file();
        let root = f.root();
        let x = f.def_dim(root, "x", 2).unwrap();
        let v = f.def_var(root, "v", TypeId::INT, &[x]).unwrap();
        assert!(matches!(
            f.put_att_values(root, v, FILL_VALUE, &[1.0f32]),
            Err(Error::BadType(_))
        ));
        assert!(matches!(
            f.put_att_values(root, v, FILL_VALUE, &[1i32, 2]),
            Err(Error::InvalidArgument(_))
        ));
        f.put_att_values(root, v, FILL_VALUE, &[-1i32]).unwrap();
        assert_eq!(f.var(root, v).unwrap().fill_value, Some((-1i32).to_le_bytes().to_vec()));
        f.put_vara(root, v, &[0], &[1], &5i32.to_le_bytes()).unwrap();
        assert!(matches!(
            f.put_att_values(root, v, FILL_VALUE, &[-2i32]),
            Err(Error::LateFillValueChange(_))
        ));
        assert!(matches!(f.del_att(root, v, FILL_VALUE), Err(Error::LateFillValueChange(_))));
    }

    #[test]
    fn typed_read_back() {
        let mut f = file();
        let root = f.root();
        f.put_att_values(root, VarId::GLOBAL, "range", &[-3i16, 7]).unwrap();
        let a = f.get_att(root, VarId::GLOBAL, "range").unwrap();
        assert_eq!(a.values::<i16>().unwrap(), vec![-3, 7]);
        assert!(a.values::<i32>().is_err());
        f.put_att_strings(root, VarId::GLOBAL, "tags", &["a", "bc"]).unwrap();
        let t = f.get_att(root, VarId::GLOBAL, "tags").unwrap();
        assert_eq!(t.as_strings().unwrap(), ["a".to_string(), "bc".to_string()]);
    }
}
