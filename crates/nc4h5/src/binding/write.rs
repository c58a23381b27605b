//! Flushing the model into the container.
//!
//! A flush runs in two sweeps over the groups in preorder. The first
//! brings the link structure up to date (removing stale dimension-only
//! datasets, applying renames, creating groups, committing types). The
//! second writes attributes, dimensions and variables, then attaches
//! dimension scales.

use std::collections::HashMap;

use nc4h5_container::filter_pipeline::FLAG_OPTIONAL;
use nc4h5_container::{
    dimscale, Attribute, Container, Dataspace, DatasetCreateProps, Datatype, FillTime, FilterDescription, FilterPipeline,
    ObjRef, UNLIMITED,
};
use tracing::{debug, trace};

use crate::binding::convert;
use crate::binding::markers::{self, NC3_STRICT, NETCDF4_COORDINATES, NETCDF4_DIMID, NON_COORD_PREFIX};
use crate::binding::{GroupStore, VarStore};
use crate::data::convert_order;
use crate::dim::DimId;
use crate::error::{Error, Result};
use crate::file::File;
use crate::filter::FilterFlags;
use crate::group::GroupId;
use crate::model::Model;
use crate::provenance::NCPROPERTIES;
use crate::var::{Storage, Var, VarId};

/// Link name a variable is stored under. A variable sharing its name with a
/// dimension it does not coordinate is stored under a prefixed name so the
/// dimension can keep its own dataset.
pub(crate) fn var_link_name(model: &Model, gid: GroupId, var: &Var) -> Result<String> {
    if !var.is_coord && model.group(gid)?.dims.contains_name(&var.name) {
        Ok(format!("{NON_COORD_PREFIX}{}", var.name))
    } else {
        Ok(var.name.clone())
    }
}

/// Whether a flush replaces the existing dataset of a variable.
fn recreates(var: &Var) -> bool {
    var.flags.created && (var.flags.fill_changed || var.flags.became_coord || var.flags.was_coord)
}

/// One step of writing a group's dimensions and variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
    Dim(DimId),
    Var(VarId),
}

/// Rename links in `group` without collisions between the old and new
/// names, by moving every link through a temporary name first.
fn move_links(c: &mut dyn Container, group: ObjRef, moves: &[(String, String)]) -> Result<()> {
    for (i, (from, _)) in moves.iter().enumerate() {
        c.move_link(group, from, &format!("_nc4h5_rename_{i}"))?;
    }
    for (i, (_, to)) in moves.iter().enumerate() {
        c.move_link(group, &format!("_nc4h5_rename_{i}"), to)?;
    }
    Ok(())
}

impl File {
    /// Write every pending model change into the container.
    pub(crate) fn flush_metadata(&mut self) -> Result<()> {
        if !self.state.writable {
            return Ok(());
        }
        let order = self.model.subtree(GroupId::ROOT)?;
        for &gid in &order {
            self.sync_links(gid)?;
            self.commit_types(gid)?;
        }
        self.write_root_markers()?;

        let bad_order = self.bad_coord_order()?;
        if bad_order {
            debug!("coordinate variables out of creation order; recording dimension ids");
        }
        for &gid in &order {
            self.write_atts(gid, VarId::GLOBAL)?;
            self.emit_group(gid, bad_order)?;
            self.attach_dimscales(gid)?;
        }
        trace!(groups = order.len(), "flushed metadata");
        Ok(())
    }

    /// Whether dimension ids must be recorded explicitly because a reader
    /// inferring them from creation order would get them wrong.
    fn bad_coord_order(&self) -> Result<bool> {
        let order = self.model.subtree(GroupId::ROOT)?;
        for &gid in &order {
            let mut last_dimid = 0;
            for var in self.model.group(gid)?.vars.iter() {
                if !var.is_coord || var.is_scalar() {
                    continue;
                }
                let dimid = var.dimids[0].0;
                if dimid < last_dimid
                    || var.ndims() > 1
                    || (self.state.redef && (!var.flags.created || var.flags.became_coord))
                {
                    return Ok(true);
                }
                last_dimid = dimid;
            }
        }
        // Readers number scales 0, 1, 2, ... in link order, group by group
        // in preorder.
        let mut next = 0;
        for &gid in &order {
            for did in self.scale_link_order(gid)? {
                if did.0 != next {
                    trace!(group = gid.0, dim = did.0, expected = next, "scale out of dimension order");
                    return Ok(true);
                }
                next += 1;
            }
        }
        Ok(false)
    }

    /// Dimensions of the scale datasets of `gid` in the link order this
    /// flush leaves behind. Scales that stay keep their place; new and
    /// recreated ones are appended in emit order.
    fn scale_link_order(&self, gid: GroupId) -> Result<Vec<DimId>> {
        let gobj = self.store.group_obj(gid)?;
        let dim_only: HashMap<ObjRef, DimId> = self
            .store
            .dims
            .iter()
            .filter_map(|(did, d)| d.dataset.as_ref().map(|(obj, _)| (*obj, *did)))
            .collect();
        let mut out = Vec::new();
        for link in self.store.container.links(gobj)? {
            if let Some(&did) = dim_only.get(&link.obj) {
                out.push(did);
            } else if let Some((g, vid)) = self.store.var_by_obj(link.obj) {
                let var = self.model.var(g, vid)?;
                if var.is_coord && !var.is_scalar() && !recreates(var) {
                    out.push(var.dimids[0]);
                }
            }
        }
        for step in self.emit_order(gid)? {
            match step {
                Emit::Dim(did) => {
                    if self.store.dims.get(&did).and_then(|d| d.dataset.as_ref()).is_none() {
                        out.push(did);
                    }
                }
                Emit::Var(vid) => {
                    let var = self.model.var(gid, vid)?;
                    if var.is_coord && !var.is_scalar() && (!var.flags.created || recreates(var)) {
                        out.push(var.dimids[0]);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Bring the links of `gid` in line with the model.
    fn sync_links(&mut self, gid: GroupId) -> Result<()> {
        let gobj = self.store.group_obj(gid)?;

        // Dimension-only datasets that gained a coordinate variable go away
        // and attached variables reattach later. Renamed ones move in place
        // so they keep their position in link order.
        let dims: Vec<(DimId, String, bool)> = self
            .model
            .group(gid)?
            .dims
            .iter()
            .map(|d| (d.id, d.name.clone(), d.coord_var.is_some()))
            .collect();
        let mut dim_moves = Vec::new();
        for (did, name, has_coord) in dims {
            let Some((obj, link)) = self.store.dims.get(&did).and_then(|d| d.dataset.clone()) else {
                continue;
            };
            if !has_coord {
                if link != name {
                    dim_moves.push((did, obj, link, name));
                }
                continue;
            }
            let pairs = dimscale::detach_all(&mut *self.store.container, obj)?;
            self.store.clear_attached(&pairs);
            self.store.container.unlink(gobj, &link)?;
            if let Some(d) = self.store.dims.get_mut(&did) {
                d.dataset = None;
            }
            debug!(dim = %name, old = %link, "removed dimension-only dataset");
        }

        let mut moves: Vec<(String, String)> = dim_moves
            .iter()
            .map(|(_, _, from, to)| (from.clone(), to.clone()))
            .collect();
        let mut var_moves = Vec::new();
        for var in self.model.group(gid)?.vars.iter() {
            if let Some(vs) = self.store.vars.get(&(gid, var.id)) {
                let link = var_link_name(&self.model, gid, var)?;
                if vs.link_name != link {
                    moves.push((vs.link_name.clone(), link.clone()));
                    var_moves.push((var.id, link));
                }
            }
        }
        let mut group_moves = Vec::new();
        for &child in &self.model.group(gid)?.children {
            if let Some(gs) = self.store.groups.get(&child) {
                let name = &self.model.group(child)?.name;
                if &gs.link_name != name {
                    moves.push((gs.link_name.clone(), name.clone()));
                    group_moves.push((child, name.clone()));
                }
            }
        }
        if !moves.is_empty() {
            move_links(&mut *self.store.container, gobj, &moves)?;
            for (from, to) in &moves {
                debug!(%from, %to, "moved link");
            }
        }
        for (did, obj, _, name) in dim_moves {
            if let Some(d) = self.store.dims.get_mut(&did) {
                d.dataset = Some((obj, name));
            }
        }
        for (vid, link) in var_moves {
            if let Some(vs) = self.store.vars.get_mut(&(gid, vid)) {
                vs.link_name = link;
            }
        }
        for (child, name) in group_moves {
            if let Some(gs) = self.store.groups.get_mut(&child) {
                gs.link_name = name;
            }
        }

        let children = self.model.group(gid)?.children.clone();
        for child in children {
            if self.store.groups.contains_key(&child) {
                continue;
            }
            let name = self.model.group(child)?.name.clone();
            let obj = self.store.container.create_group(gobj, &name)?;
            self.store.groups.insert(child, GroupStore { obj, link_name: name });
            debug!(group = child.0, "created group");
        }
        Ok(())
    }

    fn commit_types(&mut self, gid: GroupId) -> Result<()> {
        let gobj = self.store.group_obj(gid)?;
        let pending: Vec<_> = self
            .model
            .group(gid)?
            .types
            .iter()
            .filter(|t| !self.store.types.contains_key(&t.id))
            .map(|t| (t.id, t.name.clone()))
            .collect();
        for (tid, name) in pending {
            let datatype = convert::type_structure(&self.model, &self.store, tid)?;
            let obj = self.store.container.commit_datatype(gobj, &name, &datatype)?;
            self.store.types.insert(tid, obj);
            self.model.user_type_mut(tid)?.committed = true;
            debug!(r#type = %name, "committed datatype");
        }
        Ok(())
    }

    fn write_root_markers(&mut self) -> Result<()> {
        let root = self.store.group_obj(GroupId::ROOT)?;
        let c = &mut self.store.container;
        if self.state.classic && c.read_attr(root, NC3_STRICT)?.is_none() {
            c.write_attr(root, Attribute::scalar_i32(NC3_STRICT, 1))?;
        }
        if let Some(p) = &self.state.provenance {
            if c.read_attr(root, NCPROPERTIES)?.is_none() {
                c.write_attr(root, Attribute::string(NCPROPERTIES, &p.to_string()))?;
            }
        }
        Ok(())
    }

    /// Apply pending deletions and write dirty attributes of one owner.
    fn write_atts(&mut self, gid: GroupId, owner: VarId) -> Result<()> {
        let obj = if owner == VarId::GLOBAL {
            self.store.group_obj(gid)?
        } else {
            self.store
                .var_obj(gid, owner)
                .ok_or_else(|| Error::NotFound(format!("dataset of variable {}", owner.0)))?
        };
        let dirty = {
            let atts = self.model.atts(gid, owner)?;
            let tombstones = if owner == VarId::GLOBAL {
                &self.model.group(gid)?.att_tombstones
            } else {
                &self.model.var(gid, owner)?.att_tombstones
            };
            !tombstones.is_empty() || atts.iter().any(|a| a.dirty)
        };
        if !dirty {
            return Ok(());
        }

        let tombstones = std::mem::take(self.model.atts_mut(gid, owner)?.1);
        for name in &tombstones {
            self.store.container.delete_attr(obj, name)?;
        }
        let pending = self
            .model
            .atts(gid, owner)?
            .iter()
            .filter(|a| a.dirty)
            .map(|a| convert::to_attribute(&self.model, &self.store, a))
            .collect::<Result<Vec<_>>>()?;
        for attr in pending {
            trace!(owner = owner.0, name = %attr.name, "writing attribute");
            self.store.container.write_attr(obj, attr)?;
        }
        for att in self.model.atts_mut(gid, owner)?.0.iter_mut() {
            att.dirty = false;
            att.created = true;
        }
        if owner != VarId::GLOBAL {
            self.model.var_mut(gid, owner)?.flags.attr_dirty = false;
        }
        Ok(())
    }

    /// Emit dimensions and variables so that each coordinate variable lands
    /// where a creation-order reader expects its dimension.
    fn emit_group(&mut self, gid: GroupId, bad_order: bool) -> Result<()> {
        for step in self.emit_order(gid)? {
            match step {
                Emit::Dim(did) => self.write_dim(gid, did, bad_order)?,
                Emit::Var(vid) => self.write_var(gid, vid, bad_order)?,
            }
        }
        Ok(())
    }

    /// Dimensions in id order, each coordinate variable preceded by the
    /// variables defined before it.
    fn emit_order(&self, gid: GroupId) -> Result<Vec<Emit>> {
        let group = self.model.group(gid)?;
        let mut dims: Vec<DimId> = group.dims.ids();
        dims.sort();
        let vars = group.vars.ids();
        let mut out = Vec::with_capacity(dims.len() + vars.len());
        let mut next_var = 0;
        for did in dims {
            match self.model.dim(did)?.coord_var {
                None => out.push(Emit::Dim(did)),
                Some(cv) => {
                    if vars[..next_var].contains(&cv) {
                        continue;
                    }
                    while next_var < vars.len() {
                        let vid = vars[next_var];
                        next_var += 1;
                        out.push(Emit::Var(vid));
                        if vid == cv {
                            break;
                        }
                    }
                }
            }
        }
        out.extend(vars[next_var..].iter().map(|&vid| Emit::Var(vid)));
        Ok(out)
    }

    /// Create or update the dimension-only dataset of a dimension without a
    /// coordinate variable.
    fn write_dim(&mut self, gid: GroupId, did: DimId, bad_order: bool) -> Result<()> {
        let dim = self.model.dim(did)?.clone();
        if dim.coord_var.is_some() {
            return Ok(());
        }
        let len = self.model.dim_len(did)?;
        let existing = self.store.dims.get(&did).and_then(|d| d.dataset.clone());
        let obj = match existing {
            Some((obj, _)) => {
                if dim.unlimited && self.store.container.dataset_space(obj)?.dims != [len] {
                    self.store.container.set_extent(obj, &[len])?;
                }
                obj
            }
            None => {
                let gobj = self.store.group_obj(gid)?;
                let mut dcpl = DatasetCreateProps::new().fill_time(FillTime::Never);
                let space = if dim.unlimited {
                    dcpl = dcpl.chunk(&[1]);
                    Dataspace::with_max(&[len], &[UNLIMITED])?
                } else {
                    Dataspace::simple(&[dim.len])
                };
                let c = &mut *self.store.container;
                let obj = c.create_dataset(gobj, &dim.name, Datatype::f32(), space, dcpl)?;
                dimscale::set_scale(c, obj, Some(&markers::dim_only_name(dim.len)))?;
                self.store.dims.entry(did).or_default().dataset = Some((obj, dim.name.clone()));
                debug!(dim = %dim.name, id = did.0, len, "created dimension-only dataset");
                obj
            }
        };
        if bad_order {
            self.ensure_dimid_marker(obj, did)?;
        }
        Ok(())
    }

    fn ensure_dimid_marker(&mut self, obj: ObjRef, did: DimId) -> Result<()> {
        let c = &mut self.store.container;
        if c.read_attr(obj, NETCDF4_DIMID)?.is_none() {
            c.write_attr(obj, Attribute::scalar_i32(NETCDF4_DIMID, did.0))?;
        }
        Ok(())
    }

    fn write_var(&mut self, gid: GroupId, vid: VarId, bad_order: bool) -> Result<()> {
        let var = self.model.var(gid, vid)?.clone();
        let flags = var.flags;
        let replace = recreates(&var);
        if flags.created && !replace {
            if bad_order && var.is_coord {
                if let Some(obj) = self.store.var_obj(gid, vid) {
                    self.ensure_dimid_marker(obj, var.dimids[0])?;
                }
            }
            return self.write_atts(gid, vid);
        }

        let saved = if replace { self.remove_dataset(gid, &var)? } else { None };
        let obj = self.create_dataset(gid, &var)?;
        if let Some((dims, data)) = saved {
            if !data.is_empty() {
                let start = vec![0; dims.len()];
                self.store.container.write_slab(obj, &start, &dims, &data)?;
            }
        }

        let c = &mut *self.store.container;
        if var.is_coord {
            dimscale::set_scale(c, obj, Some(&var.name))?;
        }
        if var.ndims() > 1 {
            let ids: Vec<i32> = var.dimids.iter().map(|d| d.0).collect();
            c.write_attr(obj, Attribute::array_i32(NETCDF4_COORDINATES, &ids))?;
        }
        if bad_order && var.is_coord {
            self.ensure_dimid_marker(obj, var.dimids[0])?;
        }

        self.store.vars.insert(
            (gid, vid),
            VarStore {
                obj,
                link_name: var_link_name(&self.model, gid, &var)?,
                handle: None,
                attached: vec![false; var.ndims()],
            },
        );
        self.store.open_var(&self.model, gid, vid)?;

        let v = self.model.var_mut(gid, vid)?;
        v.flags.created = true;
        v.flags.was_coord = false;
        v.flags.became_coord = false;
        v.flags.fill_changed = false;
        if replace {
            for att in v.atts.iter_mut() {
                att.dirty = true;
            }
            if var.is_coord {
                self.clear_attached_for_dim(var.dimids[0])?;
            }
            debug!(var = %var.name, "recreated dataset");
        } else {
            debug!(var = %var.name, "created dataset");
        }
        self.write_atts(gid, vid)
    }

    /// Create the dataset of a variable from its current definition.
    fn create_dataset(&mut self, gid: GroupId, var: &Var) -> Result<ObjRef> {
        let datatype = convert::var_datatype(&self.model, &self.store, var.type_id, var.endianness)?;
        let space = if var.is_scalar() {
            Dataspace::scalar()
        } else {
            let mut max = Vec::with_capacity(var.ndims());
            let mut extensible = false;
            for (&did, &extent) in var.dimids.iter().zip(&var.shape) {
                if self.model.dim(did)?.unlimited {
                    max.push(UNLIMITED);
                    extensible = true;
                } else {
                    max.push(extent);
                }
            }
            if extensible {
                Dataspace::with_max(&var.shape, &max)?
            } else {
                Dataspace::simple(&var.shape)
            }
        };

        let mut dcpl = match &var.storage {
            Storage::Chunked(sizes) => DatasetCreateProps::new().chunk(sizes),
            Storage::Compact => DatasetCreateProps::new().compact(),
            Storage::Contiguous => DatasetCreateProps::new(),
        };
        if !var.filters.is_empty() {
            let mut pipeline = FilterPipeline::new();
            for f in &var.filters {
                let mut desc = FilterDescription::new(f.id, &f.params);
                if f.flags.contains(FilterFlags::OPTIONAL) {
                    desc.flags |= FLAG_OPTIONAL;
                }
                pipeline.push(desc);
            }
            dcpl = dcpl.pipeline(pipeline);
        }
        dcpl = if !self.model.is_fixed_size(var.type_id)? || var.no_fill {
            dcpl.fill_time(FillTime::Never)
        } else {
            match self.effective_fill(var)? {
                Some(mut fill) => {
                    convert_order(&mut fill, self.model.type_size(var.type_id)?, var.endianness);
                    dcpl.fill_value(&fill).fill_time(FillTime::IfSet)
                }
                None => dcpl.fill_time(FillTime::IfSet),
            }
        };

        let gobj = self.store.group_obj(gid)?;
        let link = var_link_name(&self.model, gid, var)?;
        Ok(self.store.container.create_dataset(gobj, &link, datatype, space, dcpl)?)
    }

    /// Unlink the dataset of a variable that must be recreated, detaching it
    /// from every scale relationship. Returns its extent and raw data when
    /// the element type allows reading it back.
    fn remove_dataset(&mut self, gid: GroupId, var: &Var) -> Result<Option<(Vec<u64>, Vec<u8>)>> {
        let Some(vs) = self.store.vars.remove(&(gid, var.id)) else {
            return Ok(None);
        };
        drop(vs.handle);
        let obj = vs.obj;
        let c = &mut *self.store.container;
        let pairs = if dimscale::is_scale(c, obj)? {
            dimscale::detach_all(c, obj)?
        } else {
            for axis in 0..var.ndims() {
                for scale in dimscale::attached_scales(c, obj, axis)? {
                    dimscale::detach_scale(c, obj, scale, axis)?;
                }
            }
            Vec::new()
        };
        let saved = if self.model.is_fixed_size(var.type_id)? {
            let dims = c.dataset_space(obj)?.dims;
            Some((dims, c.read_all(obj)?))
        } else {
            None
        };
        let gobj = self.store.group_obj(gid)?;
        self.store.container.unlink(gobj, &vs.link_name)?;
        self.store.clear_attached(&pairs);
        trace!(var = %var.name, detached = pairs.len(), "removed dataset for recreation");
        Ok(saved)
    }

    /// Force every variable using `did` to reattach its scale.
    fn clear_attached_for_dim(&mut self, did: DimId) -> Result<()> {
        for gid in self.model.subtree(self.model.dim_owner(did)?)? {
            for var in self.model.group(gid)?.vars.iter() {
                let Some(vs) = self.store.vars.get_mut(&(gid, var.id)) else {
                    continue;
                };
                for (axis, d) in var.dimids.iter().enumerate() {
                    if *d == did {
                        if let Some(flag) = vs.attached.get_mut(axis) {
                            *flag = false;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Attach the scale of every axis not yet attached. Coordinate variables
    /// are scales themselves and carry no attachments.
    fn attach_dimscales(&mut self, gid: GroupId) -> Result<()> {
        let vars: Vec<(VarId, Vec<DimId>)> = self
            .model
            .group(gid)?
            .vars
            .iter()
            .filter(|v| !v.is_coord)
            .map(|v| (v.id, v.dimids.clone()))
            .collect();
        for (vid, dimids) in vars {
            for (axis, did) in dimids.into_iter().enumerate() {
                let (obj, attached) = match self.store.vars.get(&(gid, vid)) {
                    Some(vs) => (vs.obj, vs.attached.get(axis).copied().unwrap_or(true)),
                    None => continue,
                };
                if attached {
                    continue;
                }
                let Some(scale) = self.store.scale_for_dim(&self.model, did)? else {
                    continue;
                };
                dimscale::attach_scale(&mut *self.store.container, obj, scale, axis)?;
                if let Some(flag) = self.store.vars.get_mut(&(gid, vid)).and_then(|v| v.attached.get_mut(axis)) {
                    *flag = true;
                }
            }
        }
        Ok(())
    }
}
