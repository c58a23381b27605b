//! Reconciling an existing container into the model on open.
//!
//! Groups are walked in preorder with an explicit worklist. Scale datasets
//! become dimensions as they are met, so dimension ids follow creation
//! order unless a dataset records its id explicitly. Variables are matched
//! to dimensions only after the whole tree is known.

use std::collections::HashMap;

use nc4h5_container::{dimscale, Container, Dataspace, FillTime, Layout, Link, ObjRef, ObjectKind};
use tracing::{debug, info, warn};

use crate::attr::{self, Att, AttValue, FILL_VALUE};
use crate::binding::markers::{self, NC3_STRICT, NETCDF4_COORDINATES, NETCDF4_DIMID, PHONY_DIM_PREFIX};
use crate::binding::{convert, GroupStore, VarStore};
use crate::chunking;
use crate::dim::{Dim, DimId, UNLIMITED};
use crate::error::{Error, Result};
use crate::file::File;
use crate::filter::{Filter, FilterFlags};
use crate::group::{Group, GroupId};
use crate::index::NameIndex;
use crate::model::Model;
use crate::provenance::{Provenance, NCPROPERTIES};
use crate::types::{TypeId, UserType};
use crate::var::{Storage, Var, VarFlags, VarId};

/// Placeholder for an axis whose dimension is not matched yet.
const UNMATCHED: DimId = DimId(-1);

/// Read state shared across the walk.
#[derive(Default)]
struct Walk {
    /// Committed datatype objects read so far.
    named: HashMap<ObjRef, TypeId>,
    /// Variables waiting for dimension matching, in read order.
    pending: Vec<(GroupId, VarId)>,
}

impl File {
    /// Build the model from the container contents.
    pub(crate) fn reconcile(&mut self) -> Result<()> {
        let mut walk = Walk::default();
        let mut stack = vec![(GroupId::ROOT, self.store.group_obj(GroupId::ROOT)?)];
        while let Some((gid, gobj)) = stack.pop() {
            self.read_group_atts(gid, gobj, &walk)?;
            let mut children = Vec::new();
            for link in self.store.container.links(gobj)? {
                match link.kind {
                    ObjectKind::Group => children.push(self.read_group(gid, &link)?),
                    ObjectKind::Datatype => self.read_type(gid, &link, &mut walk)?,
                    ObjectKind::Dataset => self.read_dataset(gid, &link, &mut walk)?,
                }
            }
            stack.extend(children.into_iter().rev());
        }

        let mut phony_lens = HashMap::new();
        for &(gid, vid) in &walk.pending {
            self.match_dims(gid, vid, &mut phony_lens)?;
            let mut var = self.model.var(gid, vid)?.clone();
            chunking::adjust_cache(&self.model, &mut var, &self.config)?;
            *self.model.var_mut(gid, vid)? = var;
            self.store.open_var(&self.model, gid, vid)?;
        }
        info!(
            groups = self.model.groups.len(),
            dims = self.model.dim_group.len(),
            vars = walk.pending.len(),
            classic = self.state.classic,
            "reconciled file"
        );
        Ok(())
    }

    fn read_group(&mut self, parent: GroupId, link: &Link) -> Result<(GroupId, ObjRef)> {
        let id = GroupId(self.model.groups.len());
        self.model.groups.push(Group::new(id, link.name.clone(), Some(parent)));
        self.model.group_mut(parent)?.children.push(id);
        self.store.groups.insert(
            id,
            GroupStore {
                obj: link.obj,
                link_name: link.name.clone(),
            },
        );
        Ok((id, link.obj))
    }

    fn read_group_atts(&mut self, gid: GroupId, gobj: ObjRef, walk: &Walk) -> Result<()> {
        let c = &*self.store.container;
        if gid == GroupId::ROOT {
            if let Some(text) = c.read_attr(gobj, NCPROPERTIES)?.and_then(|a| a.as_string()) {
                self.state.provenance = Some(Provenance::parse(&text));
            }
            if c.read_attr(gobj, NC3_STRICT)?.is_some() {
                self.state.classic = true;
            }
        }
        let atts = read_atts(c, &self.model, gobj, walk)?;
        self.model.group_mut(gid)?.atts = atts;
        Ok(())
    }

    fn read_type(&mut self, gid: GroupId, link: &Link, walk: &mut Walk) -> Result<()> {
        let datatype = self.store.container.committed_datatype(link.obj)?;
        let (size, kind) = match convert::user_kind_of(&datatype, &walk.named) {
            Ok(k) => k,
            Err(Error::UnsupportedElementType(what)) => {
                warn!(r#type = %link.name, %what, "skipping committed datatype");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let id = TypeId(self.model.next_typeid);
        self.model.next_typeid += 1;
        self.model.group_mut(gid)?.types.insert(UserType {
            id,
            name: link.name.clone(),
            size,
            committed: true,
            kind,
            group: gid,
        })?;
        self.model.type_group.insert(id, gid);
        self.store.types.insert(id, link.obj);
        walk.named.insert(link.obj, id);
        debug!(r#type = %link.name, id = id.0, "read datatype");
        Ok(())
    }

    /// Read a scale dataset as a dimension. Returns the dimension when the
    /// dataset is also a variable (a coordinate variable).
    fn read_scale(&mut self, gid: GroupId, link: &Link, space: &Dataspace) -> Result<Option<DimId>> {
        let c = &*self.store.container;
        let obj = link.obj;
        let scale_name = dimscale::scale_name(c, obj)?.unwrap_or_default();
        let dim_only = markers::is_dim_only(&scale_name);
        let unlimited = space.is_unlimited(0);
        let extent = space.dims[0];
        let len = if unlimited {
            UNLIMITED
        } else if dim_only {
            markers::dim_only_len(&scale_name).unwrap_or(extent)
        } else {
            extent
        };
        let recorded = c
            .read_attr(obj, NETCDF4_DIMID)?
            .and_then(|a| a.as_i64_vec())
            .and_then(|v| v.first().copied());
        let id = match recorded {
            Some(id) if !self.model.dim_group.contains_key(&DimId(id as i32)) => DimId(id as i32),
            Some(id) => {
                let next = DimId(self.model.next_dimid);
                warn!(dim = %link.name, recorded = id, assigned = next.0, "recorded dimension id already in use");
                next
            }
            None => DimId(self.model.next_dimid),
        };
        let name = markers::var_name_from_link(&link.name).to_string();
        self.model.insert_dim(gid, Dim::new(id, name, len, unlimited))?;

        let entry = self.store.dims.entry(id).or_default();
        entry.scale_id = Some(c.object_id(obj)?);
        if dim_only {
            entry.dataset = Some((obj, link.name.clone()));
        }
        debug!(dim = %link.name, id = id.0, len, unlimited, dim_only, "read dimension");
        Ok(if dim_only { None } else { Some(id) })
    }

    fn read_dataset(&mut self, gid: GroupId, link: &Link, walk: &mut Walk) -> Result<()> {
        let obj = link.obj;
        let space = self.store.container.dataset_space(obj)?;
        let coord_dim = if space.rank() > 0 && dimscale::is_scale(&*self.store.container, obj)? {
            match self.read_scale(gid, link, &space)? {
                Some(did) => Some(did),
                None => return Ok(()),
            }
        } else {
            None
        };

        let c = &*self.store.container;
        let (type_id, endianness) = match convert::nc_type_of(&c.dataset_type(obj)?, &walk.named) {
            Ok(t) => t,
            Err(Error::UnsupportedElementType(what)) => {
                warn!(dataset = %link.name, %what, "skipping dataset with unsupported element type");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let dcpl = c.dataset_create_props(obj)?;

        let mut filters = Vec::with_capacity(dcpl.pipeline.len());
        for desc in &dcpl.pipeline.filters {
            let mut f = Filter::new(desc.filter_id, &desc.client_data);
            if desc.is_optional() {
                f.flags.insert(FilterFlags::OPTIONAL);
            }
            if !self.registry.is_registered(desc.filter_id) {
                warn!(dataset = %link.name, filter = desc.filter_id, "filter is not registered");
                f.flags.insert(FilterFlags::UNAVAILABLE);
            }
            filters.push(f);
        }
        let storage = match &dcpl.layout {
            Layout::Contiguous => Storage::Contiguous,
            Layout::Chunked(sizes) => Storage::Chunked(sizes.clone()),
            Layout::Compact => Storage::Compact,
        };

        let atts = read_atts(c, &self.model, obj, walk)?;
        let fill_value = match atts.get_by_name(FILL_VALUE).map(|a| &a.value) {
            Some(AttValue::Bytes(b)) => Some(b.clone()),
            _ => None,
        };

        let rank = space.rank();
        let mut dimids = vec![UNMATCHED; rank];
        if let Some(did) = coord_dim {
            dimids[0] = did;
        }
        let name = markers::var_name_from_link(&link.name).to_string();
        let id = VarId(self.model.group(gid)?.vars.len() as i32);
        let var = Var {
            id,
            name: name.clone(),
            type_id,
            dimids,
            shape: space.dims.clone(),
            storage,
            filters,
            no_fill: dcpl.fill_time == FillTime::Never,
            fill_value,
            atts,
            endianness,
            chunk_cache: self.config.chunk_cache,
            is_coord: coord_dim.is_some(),
            flags: VarFlags {
                created: true,
                ..VarFlags::default()
            },
            att_tombstones: Vec::new(),
        };
        self.model.group_mut(gid)?.vars.insert(var)?;
        if let Some(did) = coord_dim {
            self.model.dim_mut(did)?.coord_var = Some(id);
        }
        self.store.vars.insert(
            (gid, id),
            VarStore {
                obj,
                link_name: link.name.clone(),
                handle: None,
                attached: vec![false; rank],
            },
        );
        walk.pending.push((gid, id));
        debug!(var = %name, id = id.0, rank, "read variable");
        Ok(())
    }

    /// Resolve the dimensions of a variable read from storage.
    fn match_dims(&mut self, gid: GroupId, vid: VarId, phony_lens: &mut HashMap<DimId, u64>) -> Result<()> {
        let var = self.model.var(gid, vid)?;
        let name = var.name.clone();
        let is_coord = var.is_coord;
        let mut dimids = var.dimids.clone();
        let shape = var.shape.clone();
        let rank = dimids.len();
        let Some(obj) = self.store.var_obj(gid, vid) else {
            return Ok(());
        };
        let c = &*self.store.container;
        let space = c.dataset_space(obj)?;
        let mut attached = vec![false; rank];

        if let Some(attr) = c.read_attr(obj, NETCDF4_COORDINATES)? {
            let ids = attr
                .as_i64_vec()
                .ok_or_else(|| Error::BadType(format!("{NETCDF4_COORDINATES} of {name} is not an integer array")))?;
            if ids.len() != rank {
                return Err(Error::DimensionCountMismatch {
                    name,
                    recorded: ids.len(),
                    rank,
                });
            }
            for (axis, id) in ids.into_iter().enumerate() {
                let did = DimId(id as i32);
                if !self.model.dim_group.contains_key(&did) {
                    return Err(Error::NotFound(format!("dimension {id} recorded on {name}")));
                }
                let dim = self.model.dim(did)?;
                if !dim.unlimited && dim.len != space.dims[axis] {
                    return Err(Error::DimensionLengthMismatch {
                        name,
                        axis,
                        dim_len: dim.len,
                        extent: space.dims[axis],
                    });
                }
                dimids[axis] = did;
                attached[axis] = is_coord || !dimscale::attached_scales(c, obj, axis)?.is_empty();
            }
        } else {
            for axis in 0..rank {
                if is_coord && axis == 0 {
                    attached[0] = true;
                    continue;
                }
                if let Some(did) = self.matching_scale(gid, obj, axis)? {
                    dimids[axis] = did;
                    attached[axis] = true;
                    continue;
                }
                let unlimited = space.is_unlimited(axis);
                let len = shape[axis];
                dimids[axis] = self.phony_dim(gid, len, unlimited, &dimids[..axis], phony_lens)?;
            }
        }

        self.model.var_mut(gid, vid)?.dimids = dimids;
        if let Some(vs) = self.store.vars.get_mut(&(gid, vid)) {
            vs.attached = attached;
        }
        Ok(())
    }

    /// The dimension, visible from `gid`, whose recorded scale is the first
    /// scale attached to `axis` of `obj`.
    fn matching_scale(&self, gid: GroupId, obj: ObjRef, axis: usize) -> Result<Option<DimId>> {
        let c = &*self.store.container;
        let Some(&scale) = dimscale::attached_scales(c, obj, axis)?.first() else {
            return Ok(None);
        };
        let Ok(oid) = c.object_id(scale) else {
            warn!(%obj, axis, "attached scale no longer exists");
            return Ok(None);
        };
        for g in self.model.ancestors(gid)? {
            for dim in self.model.group(g)?.dims.iter() {
                if self.store.dims.get(&dim.id).and_then(|d| d.scale_id) == Some(oid) {
                    return Ok(Some(dim.id));
                }
            }
        }
        warn!(%obj, axis, "attached scale matches no visible dimension");
        Ok(None)
    }

    /// A phony dimension for an axis without a scale: an existing one of
    /// the same length and kind not used by an earlier axis, else a new one.
    fn phony_dim(
        &mut self,
        gid: GroupId,
        len: u64,
        unlimited: bool,
        used: &[DimId],
        phony_lens: &mut HashMap<DimId, u64>,
    ) -> Result<DimId> {
        let reuse = self
            .model
            .group(gid)?
            .dims
            .iter()
            .find(|d| {
                d.phony && d.unlimited == unlimited && phony_lens.get(&d.id) == Some(&len) && !used.contains(&d.id)
            })
            .map(|d| d.id);
        if let Some(did) = reuse {
            return Ok(did);
        }
        let id = DimId(self.model.next_dimid);
        let name = format!("{PHONY_DIM_PREFIX}{}", id.0);
        let mut dim = Dim::new(id, name.clone(), if unlimited { UNLIMITED } else { len }, unlimited);
        dim.phony = true;
        self.model.insert_dim(gid, dim)?;
        phony_lens.insert(id, len);
        info!(dim = %name, len, unlimited, "created phony dimension");
        Ok(id)
    }
}

/// Read the user-visible attributes of an object in creation order.
fn read_atts(c: &dyn Container, model: &Model, obj: ObjRef, walk: &Walk) -> Result<NameIndex<Att>> {
    let mut atts = NameIndex::new();
    for name in c.attr_names(obj)? {
        if attr::is_reserved(&name) {
            continue;
        }
        let Some(raw) = c.read_attr(obj, &name)? else {
            continue;
        };
        match convert::from_attribute(model, &raw, &walk.named, atts.len()) {
            Ok(att) => {
                atts.insert(att)?;
            }
            Err(Error::UnsupportedElementType(what)) => {
                warn!(%obj, attribute = %name, %what, "skipping attribute");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(atts)
}
