//! Dimensions.
//!
//! Dimension ids are file-wide and assigned in definition order. A dimension
//! may have a coordinate variable: the variable of the same name, in the
//! same group, whose first axis is the dimension.

use crate::coord;
use crate::error::{Error, Result};
use crate::file::File;
use crate::group::GroupId;
use crate::index::{check_name, Indexed};
use crate::var::VarId;

/// Length passed to [`File::def_dim`] to define an unlimited dimension.
pub const UNLIMITED: u64 = 0;

/// File-wide dimension id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DimId(pub i32);

/// A dimension record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dim {
    pub id: DimId,
    pub name: String,
    /// Fixed length; unused for unlimited dimensions, whose length is
    /// computed from the variables that use them.
    pub len: u64,
    pub unlimited: bool,
    /// Coordinate variable in the same group, if any.
    pub coord_var: Option<VarId>,
    /// Invented while reading because no scale described the axis.
    pub phony: bool,
}

impl Dim {
    pub fn new(id: DimId, name: String, len: u64, unlimited: bool) -> Self {
        Self {
            id,
            name,
            len,
            unlimited,
            coord_var: None,
            phony: false,
        }
    }
}

impl Indexed for Dim {
    type Id = DimId;

    fn id(&self) -> DimId {
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
    /// Define a dimension. A `len` of [`UNLIMITED`] makes it unlimited.
    pub fn def_dim(&mut self, group: GroupId, name: &str, len: u64) -> Result<DimId> {
        check_name(name)?;
        self.enter_define()?;
        self.model.check_dim_name_free(group, name)?;
        let unlimited = len == UNLIMITED;
        if unlimited && self.state.classic && self.model.group(group)?.dims.iter().any(|d| d.unlimited) {
            return Err(Error::StrictClassicModel("more than one unlimited dimension".into()));
        }
        if !unlimited && len > u32::MAX as u64 && self.state.classic {
            return Err(Error::StrictClassicModel(format!("dimension length {len}")));
        }
        self.model.add_dim(group, name, len, unlimited)
    }

    /// Rename a dimension, breaking or forming coordinate relationships as
    /// the new name dictates.
    pub fn rename_dim(&mut self, dim: DimId, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        self.check_writable()?;
        let group = self.model.dim_owner(dim)?;
        let old_name = self.model.dim(dim)?.name.clone();
        if old_name == new_name {
            return Ok(());
        }
        if self.state.classic && !self.state.define_mode && new_name.len() > old_name.len() {
            return Err(Error::NotInDefineMode);
        }
        self.model.check_dim_name_free(group, new_name)?;
        self.model.group_mut(group)?.dims.rename(dim, new_name)?;
        coord::after_dim_rename(&mut self.model, group, dim)?;
        Ok(())
    }

    /// Current length of a dimension.
    pub fn dim_len(&self, dim: DimId) -> Result<u64> {
        self.model.dim_len(dim)
    }

    /// Name, current length and unlimited flag.
    pub fn inq_dim(&self, dim: DimId) -> Result<(String, u64, bool)> {
        let d = self.model.dim(dim)?;
        Ok((d.name.clone(), self.model.dim_len(dim)?, d.unlimited))
    }

    /// The dimension record itself.
    pub fn dim(&self, dim: DimId) -> Result<&Dim> {
        self.model.dim(dim)
    }

    /// Find a dimension by name in `group` or its ancestors.
    pub fn inq_dimid(&self, group: GroupId, name: &str) -> Result<DimId> {
        for gid in self.model.ancestors(group)? {
            if let Some(d) = self.model.group(gid)?.dims.get_by_name(name) {
                return Ok(d.id);
            }
        }
        Err(Error::NotFound(format!("dimension {name}")))
    }

    /// Dimension ids of `group` (and its ancestors if asked), sorted.
    pub fn inq_dimids(&self, group: GroupId, include_parents: bool) -> Result<Vec<DimId>> {
        let groups = if include_parents {
            self.model.ancestors(group)?
        } else {
            vec![group]
        };
        let mut ids = Vec::new();
        for gid in groups {
            ids.extend(self.model.group(gid)?.dims.ids());
        }
        ids.sort();
        Ok(ids)
    }

    /// Unlimited dimensions defined in `group`.
    pub fn inq_unlimdims(&self, group: GroupId) -> Result<Vec<DimId>> {
        Ok(self
            .model
            .group(group)?
            .dims
            .iter()
            .filter(|d| d.unlimited)
            .map(|d| d.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::CreateOptions;
    use crate::types::TypeId;

    fn file() -> File {
        File::create_in_memory(CreateOptions::default()).unwrap()
    }

    #[test]
    fn ids_are_file_wide() {
        let mut f = file();
        let root = f.root();
        let g = f.def_grp(root, "g").unwrap();
        let a = f.def_dim(root, "a", 3).unwrap();
        let b = f.def_dim(g, "b", 4).unwrap();
        let c = f.def_dim(root, "c", UNLIMITED).unwrap();
        assert_eq!((a, b, c), (DimId(0), DimId(1), DimId(2)));
        assert_eq!(f.inq_dimids(g, true).unwrap(), vec![a, b, c]);
        assert_eq!(f.inq_dimids(g, false).unwrap(), vec![b]);
        assert_eq!(f.inq_dimid(g, "a").unwrap(), a);
        assert_eq!(f.inq_unlimdims(root).unwrap(), vec![c]);
    }

    #[test]
    fn unlimited_len_is_max_over_vars() {
        let mut f = file();
        let root = f.root();
        let t = f.def_dim(root, "t", UNLIMITED).unwrap();
        assert_eq!(f.dim_len(t).unwrap(), 0);
        let g = f.def_grp(root, "sub").unwrap();
        let a = f.def_var(root, "a", TypeId::INT, &[t]).unwrap();
        let b = f.def_var(g, "b", TypeId::INT, &[t]).unwrap();
        f.put_vara(root, a, &[0], &[2], &[0u8; 8]).unwrap();
        f.put_vara(g, b, &[0], &[5], &[0u8; 20]).unwrap();
        assert_eq!(f.dim_len(t).unwrap(), 5);
        assert_eq!(f.inq_dim(t).unwrap(), ("t".to_string(), 5, true));
    }

    #[test]
    fn dim_names_collide_with_types_and_groups() {
        let mut f = file();
        let root = f.root();
        f.def_dim(root, "x", 2).unwrap();
        f.def_grp(root, "g").unwrap();
        f.def_opaque(root, "blob", 4).unwrap();
        for name in ["x", "g", "blob"] {
            assert!(matches!(f.def_dim(root, name, 1), Err(Error::NameInUse(_))), "{name}");
        }
    }

    #[test]
    fn dim_rename_checks_collisions() {
        let mut f = file();
        let root = f.root();
        let x = f.def_dim(root, "x", 2).unwrap();
        f.def_dim(root, "y", 2).unwrap();
        assert!(matches!(f.rename_dim(x, "y"), Err(Error::NameInUse(_))));
        f.rename_dim(x, "lon").unwrap();
        assert_eq!(f.inq_dimid(root, "lon").unwrap(), x);
    }
}
