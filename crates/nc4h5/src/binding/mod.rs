//! The storage binding between the netCDF model and an HDF5-style container.
//!
//! Physical state (object references, open dataset handles, attachment
//! flags, recorded scale identities) lives in side tables keyed by model
//! ids, so the model itself never holds container types.
//!
//! * `read` reconciles an existing container into the model on open.
//! * `write` flushes model changes into the container.
//! * `convert` maps types and attribute values between the two worlds.

pub(crate) mod convert;
pub mod markers;
pub(crate) mod read;
pub(crate) mod write;

use std::collections::HashMap;

use nc4h5_container::{ChunkCacheProps, Container, DatasetAccessProps, DatasetHandle, ObjRef, ObjectId};
use tracing::debug;

use crate::chunking::ChunkCache;
use crate::dim::DimId;
use crate::error::{Error, Result};
use crate::group::GroupId;
use crate::model::Model;
use crate::types::TypeId;
use crate::var::VarId;

/// Physical state of a group.
#[derive(Debug, Clone)]
pub(crate) struct GroupStore {
    pub obj: ObjRef,
    /// Name of the link in the parent.
    pub link_name: String,
}

/// Physical state of a dimension.
#[derive(Debug, Clone, Default)]
pub(crate) struct DimStore {
    /// Dimension-only scale dataset and its link name.
    pub dataset: Option<(ObjRef, String)>,
    /// Identity of the scale the dimension was read from.
    pub scale_id: Option<ObjectId>,
}

/// Physical state of a variable whose dataset exists.
#[derive(Debug)]
pub(crate) struct VarStore {
    pub obj: ObjRef,
    pub link_name: String,
    pub handle: Option<DatasetHandle>,
    /// Per axis: a dimension scale is attached.
    pub attached: Vec<bool>,
}

#[derive(Debug)]
pub(crate) struct Hdf5Store {
    pub container: Box<dyn Container>,
    pub groups: HashMap<GroupId, GroupStore>,
    pub dims: HashMap<DimId, DimStore>,
    pub vars: HashMap<(GroupId, VarId), VarStore>,
    pub types: HashMap<TypeId, ObjRef>,
}

pub(crate) fn access_props(cache: &ChunkCache) -> DatasetAccessProps {
    DatasetAccessProps::with_chunk_cache(ChunkCacheProps {
        nbytes: cache.size,
        nslots: cache.nelems,
        w0: cache.preemption,
    })
}

impl Hdf5Store {
    pub fn new(container: Box<dyn Container>) -> Self {
        let root = container.root();
        let mut groups = HashMap::new();
        groups.insert(
            GroupId::ROOT,
            GroupStore {
                obj: root,
                link_name: "/".to_string(),
            },
        );
        Self {
            container,
            groups,
            dims: HashMap::new(),
            vars: HashMap::new(),
            types: HashMap::new(),
        }
    }

    pub fn group_obj(&self, gid: GroupId) -> Result<ObjRef> {
        self.groups
            .get(&gid)
            .map(|g| g.obj)
            .ok_or_else(|| Error::NotFound(format!("storage for group {}", gid.0)))
    }

    pub fn var_obj(&self, gid: GroupId, vid: VarId) -> Option<ObjRef> {
        self.vars.get(&(gid, vid)).map(|v| v.obj)
    }

    /// The variable stored as `obj`.
    pub fn var_by_obj(&self, obj: ObjRef) -> Option<(GroupId, VarId)> {
        self.vars.iter().find(|(_, v)| v.obj == obj).map(|(k, _)| *k)
    }

    /// Dataset acting as the scale of `did`: its coordinate variable's
    /// dataset, else its dimension-only dataset.
    pub fn scale_for_dim(&self, model: &Model, did: DimId) -> Result<Option<ObjRef>> {
        let dim = model.dim(did)?;
        if let Some(cv) = dim.coord_var {
            return Ok(self.var_obj(model.dim_owner(did)?, cv));
        }
        Ok(self.dims.get(&did).and_then(|d| d.dataset.as_ref()).map(|(o, _)| *o))
    }

    /// Open (or reopen) the handle of a stored variable with its current
    /// chunk cache.
    pub fn open_var(&mut self, model: &Model, gid: GroupId, vid: VarId) -> Result<()> {
        let cache = model.var(gid, vid)?.chunk_cache;
        let Some(vs) = self.vars.get_mut(&(gid, vid)) else {
            return Ok(());
        };
        vs.handle = None;
        vs.handle = Some(self.container.open_dataset(vs.obj, &access_props(&cache))?);
        Ok(())
    }

    /// Reopen the handle of a variable after its cache settings changed.
    /// Variables without a dataset are left alone.
    pub fn reopen_dataset(&mut self, model: &Model, gid: GroupId, vid: VarId) -> Result<()> {
        if self.vars.get(&(gid, vid)).is_some_and(|v| v.handle.is_some()) {
            self.open_var(model, gid, vid)?;
            debug!(group = gid.0, var = vid.0, "reopened dataset with new chunk cache");
        }
        Ok(())
    }

    /// Clear the attachment flag of every `(dataset, axis)` pair.
    pub fn clear_attached(&mut self, pairs: &[(ObjRef, usize)]) {
        for (obj, axis) in pairs {
            if let Some(key) = self.var_by_obj(*obj) {
                if let Some(flag) = self.vars.get_mut(&key).and_then(|v| v.attached.get_mut(*axis)) {
                    *flag = false;
                }
            }
        }
    }

    pub fn release_handles(&mut self) {
        for v in self.vars.values_mut() {
            v.handle = None;
        }
    }
}
