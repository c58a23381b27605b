//! Variables.
//!
//! Variable ids are per group and assigned in definition order. Besides its
//! shape and type a variable carries its storage parameters (layout, filters,
//! fill value, endianness, chunk cache) and the lifecycle flags the flush
//! step uses to decide between creating, updating and replacing the dataset.

use tracing::debug;

use crate::attr::Att;
use crate::chunking::{self, ChunkCache};
use crate::coord;
use crate::dim::DimId;
use crate::error::{Error, Result};
use crate::file::File;
use crate::filter::Filter;
use crate::group::GroupId;
use crate::index::{check_name, Indexed, NameIndex};
use crate::types::{default_fill, TypeId};

/// Per-group variable id. [`VarId::GLOBAL`] addresses group attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub i32);

impl VarId {
    /// Owner id of a group's own (global) attributes.
    pub const GLOBAL: VarId = VarId(-1);
}

/// Storage layout of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    Contiguous,
    /// Per-axis chunk sizes.
    Chunked(Vec<u64>),
    Compact,
}

/// Byte order of stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Native,
    Little,
    Big,
}

/// Lifecycle flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarFlags {
    /// Defined in this session.
    pub is_new: bool,
    /// The dataset exists in the container.
    pub created: bool,
    /// Data was written in this session.
    pub written: bool,
    /// `_FillValue` changed after the dataset was created.
    pub fill_changed: bool,
    /// Became a coordinate variable through a rename.
    pub became_coord: bool,
    /// Stopped being a coordinate variable through a rename.
    pub was_coord: bool,
    /// Some attribute needs writing.
    pub attr_dirty: bool,
    /// Defined after the file re-entered define mode.
    pub defined_after_redef: bool,
}

/// A variable record.
#[derive(Debug, Clone)]
pub struct Var {
    pub id: VarId,
    pub name: String,
    pub type_id: TypeId,
    pub dimids: Vec<DimId>,
    /// Current extent along each axis.
    pub shape: Vec<u64>,
    pub storage: Storage,
    pub filters: Vec<Filter>,
    pub no_fill: bool,
    /// Explicit fill value, one element of `type_id`.
    pub fill_value: Option<Vec<u8>>,
    pub atts: NameIndex<Att>,
    pub endianness: Endianness,
    pub chunk_cache: ChunkCache,
    /// Coordinate variable of its first dimension.
    pub is_coord: bool,
    pub flags: VarFlags,
    /// Names of attributes deleted or renamed since the last flush.
    pub(crate) att_tombstones: Vec<String>,
}

impl Var {
    pub fn ndims(&self) -> usize {
        self.dimids.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dimids.is_empty()
    }

    pub fn chunk_sizes(&self) -> Option<&[u64]> {
        match &self.storage {
            Storage::Chunked(c) => Some(c),
            _ => None,
        }
    }
}

impl Indexed for Var {
    type Id = VarId;

    fn id(&self) -> VarId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

impl File {
    /// Define a variable over `dimids` (empty for a scalar).
    pub fn def_var(&mut self, group: GroupId, name: &str, type_id: TypeId, dimids: &[DimId]) -> Result<VarId> {
        check_name(name)?;
        self.enter_define()?;
        self.model.check_var_name_free(group, name)?;
        if !self.model.type_visible(group, type_id)? {
            return Err(Error::BadType(format!("type {} is not defined here", type_id.0)));
        }
        if self.state.classic && !type_id.is_classic() {
            return Err(Error::StrictClassicModel(format!("variable type {type_id}")));
        }
        let mut shape = Vec::with_capacity(dimids.len());
        let mut any_unlimited = false;
        for &d in dimids {
            if !self.model.dim_visible(group, d)? {
                return Err(Error::NotFound(format!("dimension {} not visible from group", d.0)));
            }
            let dim = self.model.dim(d)?;
            any_unlimited |= dim.unlimited;
            shape.push(if dim.unlimited { 0 } else { dim.len });
        }
        if self.state.classic && dimids.iter().skip(1).any(|&d| self.model.dim(d).map(|x| x.unlimited).unwrap_or(false)) {
            return Err(Error::StrictClassicModel("unlimited dimension must be the first".into()));
        }

        let group_ref = self.model.group(group)?;
        let id = VarId(group_ref.vars.len() as i32);
        let mut var = Var {
            id,
            name: name.to_string(),
            type_id,
            dimids: dimids.to_vec(),
            shape,
            storage: Storage::Contiguous,
            filters: Vec::new(),
            no_fill: false,
            fill_value: None,
            atts: NameIndex::new(),
            endianness: Endianness::Native,
            chunk_cache: self.config.chunk_cache,
            is_coord: false,
            flags: VarFlags {
                is_new: true,
                defined_after_redef: self.state.redef,
                ..VarFlags::default()
            },
            att_tombstones: Vec::new(),
        };
        if any_unlimited {
            var.storage = Storage::Chunked(chunking::default_chunk_sizes(&self.model, &var, &self.config)?);
            chunking::adjust_cache(&self.model, &mut var, &self.config)?;
        }
        self.model.group_mut(group)?.vars.insert(var)?;
        coord::link_on_define(&mut self.model, group, id)?;
        debug!(group = group.0, var = name, id = id.0, "defined variable");
        Ok(id)
    }

    /// Rename a variable, breaking or forming coordinate relationships.
    pub fn rename_var(&mut self, group: GroupId, var: VarId, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        self.check_writable()?;
        let old_name = self.model.var(group, var)?.name.clone();
        if old_name == new_name {
            return Ok(());
        }
        self.model.check_var_name_free(group, new_name)?;
        if self.state.classic && !self.state.define_mode && new_name.len() > old_name.len() {
            return Err(Error::NotInDefineMode);
        }
        self.model.group_mut(group)?.vars.rename(var, new_name)?;
        coord::after_var_rename(&mut self.model, group, var)?;
        Ok(())
    }

    /// Set the storage layout.
    pub fn def_var_chunking(&mut self, group: GroupId, var: VarId, storage: Storage) -> Result<()> {
        self.enter_define()?;
        let v = self.model.var(group, var)?;
        if v.flags.created {
            return Err(Error::LateDefinition(v.name.clone()));
        }
        let mut next = v.clone();
        match &storage {
            Storage::Chunked(sizes) => {
                if v.is_scalar() {
                    return Err(Error::InvalidForScalar);
                }
                if sizes.len() != v.ndims() {
                    return Err(Error::InvalidArgument(format!(
                        "{} chunk sizes for {} dimensions",
                        sizes.len(),
                        v.ndims()
                    )));
                }
                for (axis, (&c, &d)) in sizes.iter().zip(&v.dimids).enumerate() {
                    let dim = self.model.dim(d)?;
                    if c == 0 || (!dim.unlimited && c > dim.len) {
                        return Err(Error::InvalidArgument(format!(
                            "chunk size {c} on axis {axis} does not fit dimension {}",
                            dim.name
                        )));
                    }
                }
                chunking::check_chunk_bytes(self.model.type_size(v.type_id)?, sizes)?;
            }
            Storage::Contiguous | Storage::Compact => {
                if !v.filters.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "{} has filters and needs chunked storage",
                        v.name
                    )));
                }
                for &d in &v.dimids {
                    if self.model.dim(d)?.unlimited {
                        return Err(Error::InvalidArgument(format!(
                            "{} uses an unlimited dimension and needs chunked storage",
                            v.name
                        )));
                    }
                }
                if storage == Storage::Compact {
                    let bytes = self.model.type_size(v.type_id)? as u64 * v.shape.iter().product::<u64>();
                    if bytes > chunking::MAX_COMPACT_SIZE {
                        return Err(Error::InvalidArgument(format!(
                            "{bytes} bytes is too large for compact storage"
                        )));
                    }
                }
            }
        }
        next.storage = storage;
        chunking::adjust_cache(&self.model, &mut next, &self.config)?;
        let cache_changed = next.chunk_cache != v.chunk_cache;
        *self.model.var_mut(group, var)? = next;
        if cache_changed {
            self.store.reopen_dataset(&self.model, group, var)?;
        }
        Ok(())
    }

    /// Set the fill mode and, optionally, the fill value.
    pub fn def_var_fill(&mut self, group: GroupId, var: VarId, no_fill: bool, value: Option<&[u8]>) -> Result<()> {
        self.enter_define()?;
        let v = self.model.var(group, var)?;
        if v.flags.created {
            return Err(Error::LateDefinition(v.name.clone()));
        }
        let type_id = v.type_id;
        if let Some(value) = value {
            let size = self.model.type_size(type_id)?;
            if value.len() != size {
                return Err(Error::InvalidArgument(format!(
                    "fill value of {} bytes for {size}-byte type",
                    value.len()
                )));
            }
            self.put_att(group, var, crate::attr::FILL_VALUE, type_id, crate::attr::AttValue::Bytes(value.to_vec()))?;
        }
        self.model.var_mut(group, var)?.no_fill = no_fill;
        Ok(())
    }

    /// Fill mode and effective fill value (explicit, else the type default).
    pub fn inq_var_fill(&self, group: GroupId, var: VarId) -> Result<(bool, Option<Vec<u8>>)> {
        let v = self.model.var(group, var)?;
        Ok((v.no_fill, self.effective_fill(v)?))
    }

    /// Set the byte order of stored values.
    pub fn def_var_endian(&mut self, group: GroupId, var: VarId, endianness: Endianness) -> Result<()> {
        self.enter_define()?;
        let v = self.model.var_mut(group, var)?;
        if v.flags.created {
            return Err(Error::LateDefinition(v.name.clone()));
        }
        if v.type_id.is_user() || v.type_id == TypeId::STRING || v.type_id == TypeId::CHAR {
            return Err(Error::InvalidArgument(format!("endianness does not apply to {}", v.type_id)));
        }
        v.endianness = endianness;
        Ok(())
    }

    /// Find a variable by name.
    pub fn inq_varid(&self, group: GroupId, name: &str) -> Result<VarId> {
        self.model
            .group(group)?
            .vars
            .get_by_name(name)
            .map(|v| v.id)
            .ok_or_else(|| Error::NotFound(format!("variable {name}")))
    }

    /// Variable ids of a group in definition order.
    pub fn inq_varids(&self, group: GroupId) -> Result<Vec<VarId>> {
        Ok(self.model.group(group)?.vars.ids())
    }

    /// The variable record.
    pub fn var(&self, group: GroupId, var: VarId) -> Result<&Var> {
        self.model.var(group, var)
    }

    pub(crate) fn effective_fill(&self, v: &Var) -> Result<Option<Vec<u8>>> {
        if let Some(f) = &v.fill_value {
            return Ok(Some(f.clone()));
        }
        if v.type_id.is_atomic() {
            return Ok(default_fill(v.type_id));
        }
        if self.model.is_fixed_size(v.type_id)? {
            return Ok(Some(vec![0u8; self.model.type_size(v.type_id)?]));
        }
        Ok(None)
    }
}
