//! The in-memory object model of one open file.
//!
//! Groups live in an arena indexed by [`GroupId`]; every other entity lives
//! in a [`NameIndex`](crate::index::NameIndex) of its group. Back-references
//! (parent group, coordinate variable, defining group of a dimension or type)
//! are plain ids into these collections.

use std::collections::HashMap;

use crate::dim::{Dim, DimId};
use crate::error::{Error, Result};
use crate::group::{Group, GroupId};
use crate::types::{atomic, TypeClass, TypeId, UserKind, UserType};
use crate::var::{Var, VarId};

#[derive(Debug, Clone)]
pub(crate) struct Model {
    pub groups: Vec<Group>,
    pub next_dimid: i32,
    pub next_typeid: i32,
    pub dim_group: HashMap<DimId, GroupId>,
    pub type_group: HashMap<TypeId, GroupId>,
}

impl Model {
    pub fn new() -> Self {
        Self {
            groups: vec![Group::new(GroupId::ROOT, "/".to_string(), None)],
            next_dimid: 0,
            next_typeid: TypeId::FIRST_USER,
            dim_group: HashMap::new(),
            type_group: HashMap::new(),
        }
    }

    // ---- groups ----

    pub fn group(&self, gid: GroupId) -> Result<&Group> {
        self.groups
            .get(gid.0)
            .ok_or_else(|| Error::NotFound(format!("group {}", gid.0)))
    }

    pub fn group_mut(&mut self, gid: GroupId) -> Result<&mut Group> {
        self.groups
            .get_mut(gid.0)
            .ok_or_else(|| Error::NotFound(format!("group {}", gid.0)))
    }

    /// `gid` followed by its ancestors up to the root.
    pub fn ancestors(&self, gid: GroupId) -> Result<Vec<GroupId>> {
        let mut out = Vec::new();
        let mut cur = Some(gid);
        while let Some(g) = cur {
            out.push(g);
            cur = self.group(g)?.parent;
        }
        Ok(out)
    }

    /// `gid` and all its descendants in depth-first preorder.
    pub fn subtree(&self, gid: GroupId) -> Result<Vec<GroupId>> {
        let mut out = Vec::new();
        let mut stack = vec![gid];
        while let Some(g) = stack.pop() {
            out.push(g);
            for &c in self.group(g)?.children.iter().rev() {
                stack.push(c);
            }
        }
        Ok(out)
    }

    pub fn child_named(&self, parent: GroupId, name: &str) -> Result<Option<GroupId>> {
        Ok(self
            .group(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.groups[c.0].name == name))
    }

    /// Absolute path of a group (`/` for the root).
    pub fn full_name(&self, gid: GroupId) -> Result<String> {
        let chain = self.ancestors(gid)?;
        if chain.len() == 1 {
            return Ok("/".to_string());
        }
        let mut path = String::new();
        for g in chain.iter().rev().skip(1) {
            path.push('/');
            path.push_str(&self.groups[g.0].name);
        }
        Ok(path)
    }

    // ---- dims ----

    pub fn dim_owner(&self, did: DimId) -> Result<GroupId> {
        self.dim_group
            .get(&did)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("dimension {}", did.0)))
    }

    pub fn dim(&self, did: DimId) -> Result<&Dim> {
        let gid = self.dim_owner(did)?;
        self.group(gid)?
            .dims
            .get_by_id(did)
            .ok_or_else(|| Error::NotFound(format!("dimension {}", did.0)))
    }

    pub fn dim_mut(&mut self, did: DimId) -> Result<&mut Dim> {
        let gid = self.dim_owner(did)?;
        self.group_mut(gid)?
            .dims
            .get_mut_by_id(did)
            .ok_or_else(|| Error::NotFound(format!("dimension {}", did.0)))
    }

    /// Whether `did` is defined in `gid` or one of its ancestors.
    pub fn dim_visible(&self, gid: GroupId, did: DimId) -> Result<bool> {
        let owner = match self.dim_group.get(&did) {
            Some(g) => *g,
            None => return Ok(false),
        };
        Ok(self.ancestors(gid)?.contains(&owner))
    }

    /// Add a dimension to `gid` with the next file-wide id.
    pub fn add_dim(&mut self, gid: GroupId, name: &str, len: u64, unlimited: bool) -> Result<DimId> {
        let id = DimId(self.next_dimid);
        self.insert_dim(gid, Dim::new(id, name.to_string(), len, unlimited))?;
        Ok(id)
    }

    /// Insert a dimension with an explicit id, advancing the id counter past it.
    pub fn insert_dim(&mut self, gid: GroupId, dim: Dim) -> Result<()> {
        let id = dim.id;
        if self.dim_group.contains_key(&id) {
            return Err(Error::NameInUse(format!("dimension id {}", id.0)));
        }
        self.group_mut(gid)?.dims.insert(dim)?;
        self.dim_group.insert(id, gid);
        if id.0 >= self.next_dimid {
            self.next_dimid = id.0 + 1;
        }
        Ok(())
    }

    /// Current length of a dimension. Unlimited dimensions report the largest
    /// extent along them over every variable in the defining group's subtree.
    pub fn dim_len(&self, did: DimId) -> Result<u64> {
        let dim = self.dim(did)?;
        if !dim.unlimited {
            return Ok(dim.len);
        }
        let mut len = 0;
        for gid in self.subtree(self.dim_owner(did)?)? {
            for var in self.group(gid)?.vars.iter() {
                for (axis, d) in var.dimids.iter().enumerate() {
                    if *d == did {
                        len = len.max(var.shape.get(axis).copied().unwrap_or(0));
                    }
                }
            }
        }
        Ok(len)
    }

    // ---- vars ----

    pub fn var(&self, gid: GroupId, vid: VarId) -> Result<&Var> {
        self.group(gid)?
            .vars
            .get_by_id(vid)
            .ok_or_else(|| Error::NotFound(format!("variable {} in group {}", vid.0, gid.0)))
    }

    pub fn var_mut(&mut self, gid: GroupId, vid: VarId) -> Result<&mut Var> {
        self.group_mut(gid)?
            .vars
            .get_mut_by_id(vid)
            .ok_or_else(|| Error::NotFound(format!("variable {} in group {}", vid.0, gid.0)))
    }

    // ---- types ----

    pub fn user_type(&self, tid: TypeId) -> Result<&UserType> {
        let gid = self
            .type_group
            .get(&tid)
            .copied()
            .ok_or_else(|| Error::BadType(format!("unknown type id {}", tid.0)))?;
        self.group(gid)?
            .types
            .get_by_id(tid)
            .ok_or_else(|| Error::BadType(format!("unknown type id {}", tid.0)))
    }

    pub fn user_type_mut(&mut self, tid: TypeId) -> Result<&mut UserType> {
        let gid = self
            .type_group
            .get(&tid)
            .copied()
            .ok_or_else(|| Error::BadType(format!("unknown type id {}", tid.0)))?;
        self.group_mut(gid)?
            .types
            .get_mut_by_id(tid)
            .ok_or_else(|| Error::BadType(format!("unknown type id {}", tid.0)))
    }

    pub fn type_size(&self, tid: TypeId) -> Result<usize> {
        match atomic(tid) {
            Some(a) => Ok(a.size),
            None => Ok(self.user_type(tid)?.size),
        }
    }

    pub fn type_class(&self, tid: TypeId) -> Result<TypeClass> {
        match tid {
            TypeId::STRING => Ok(TypeClass::String),
            t if t.is_atomic() => Ok(TypeClass::Atomic),
            t => Ok(self.user_type(t)?.class()),
        }
    }

    /// Whether values of the type are flat bytes with no embedded pointers.
    pub fn is_fixed_size(&self, tid: TypeId) -> Result<bool> {
        if tid == TypeId::STRING {
            return Ok(false);
        }
        if tid.is_atomic() {
            return Ok(true);
        }
        Ok(match &self.user_type(tid)?.kind {
            UserKind::Vlen { .. } => false,
            UserKind::Enum { .. } | UserKind::Opaque => true,
            UserKind::Compound { fields } => {
                let mut fixed = true;
                for f in fields {
                    fixed &= self.is_fixed_size(f.type_id)?;
                }
                fixed
            }
        })
    }

    /// Whether a type id is atomic or a known user type visible from `gid`.
    pub fn type_visible(&self, gid: GroupId, tid: TypeId) -> Result<bool> {
        if tid.is_atomic() {
            return Ok(true);
        }
        match self.type_group.get(&tid) {
            Some(owner) => Ok(self.ancestors(gid)?.contains(owner)),
            None => Ok(false),
        }
    }

    // ---- name uniqueness ----
    //
    // Dimensions and variables may share a name (that is how a coordinate
    // variable is recognised); every other pairing within a group collides.

    pub fn check_dim_name_free(&self, gid: GroupId, name: &str) -> Result<()> {
        let g = self.group(gid)?;
        if g.dims.contains_name(name) || g.types.contains_name(name) || self.child_named(gid, name)?.is_some() {
            return Err(Error::NameInUse(name.to_string()));
        }
        Ok(())
    }

    pub fn check_var_name_free(&self, gid: GroupId, name: &str) -> Result<()> {
        let g = self.group(gid)?;
        if g.vars.contains_name(name) || g.types.contains_name(name) || self.child_named(gid, name)?.is_some() {
            return Err(Error::NameInUse(name.to_string()));
        }
        Ok(())
    }

    pub fn check_type_name_free(&self, gid: GroupId, name: &str) -> Result<()> {
        let g = self.group(gid)?;
        if g.dims.contains_name(name)
            || g.vars.contains_name(name)
            || g.types.contains_name(name)
            || self.child_named(gid, name)?.is_some()
        {
            return Err(Error::NameInUse(name.to_string()));
        }
        Ok(())
    }

    pub fn check_group_name_free(&self, gid: GroupId, name: &str) -> Result<()> {
        self.check_type_name_free(gid, name)
    }
}
