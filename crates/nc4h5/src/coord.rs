//! The coordinate-variable state machine.
//!
//! A (dimension, variable) pair is `Coordinate` when the variable has the
//! dimension's name, lives in the same group, and has the dimension as its
//! first axis. Renames move pairs between states and leave transition flags
//! (`was_coord`, `became_coord`) on the variable; only the flush step reads
//! those flags.

use tracing::trace;

use crate::dim::DimId;
use crate::error::Result;
use crate::file::File;
use crate::group::GroupId;
use crate::model::Model;
use crate::var::VarId;

/// State of a variable with respect to its first dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordState {
    Independent,
    Coordinate,
}

/// Current state of a variable.
pub(crate) fn state(model: &Model, gid: GroupId, vid: VarId) -> Result<CoordState> {
    Ok(if model.var(gid, vid)?.is_coord {
        CoordState::Coordinate
    } else {
        CoordState::Independent
    })
}

/// The same-group dimension `vid` would be the coordinate variable of.
fn matching_dim(model: &Model, gid: GroupId, vid: VarId) -> Result<Option<DimId>> {
    let var = model.var(gid, vid)?;
    let Some(&first) = var.dimids.first() else {
        return Ok(None);
    };
    let g = model.group(gid)?;
    Ok(g.dims
        .get_by_name(&var.name)
        .filter(|d| d.id == first && d.coord_var.is_none())
        .map(|d| d.id))
}

/// Link a freshly defined variable to its dimension if it is a coordinate
/// variable. New variables carry no transition flag.
pub(crate) fn link_on_define(model: &mut Model, gid: GroupId, vid: VarId) -> Result<()> {
    if let Some(did) = matching_dim(model, gid, vid)? {
        model.dim_mut(did)?.coord_var = Some(vid);
        model.var_mut(gid, vid)?.is_coord = true;
    }
    Ok(())
}

/// Update coordinate state after variable `vid` was renamed.
pub(crate) fn after_var_rename(model: &mut Model, gid: GroupId, vid: VarId) -> Result<()> {
    let var = model.var(gid, vid)?;
    if var.is_coord {
        let first = var.dimids[0];
        if model.dim(first)?.name != var.name {
            break_coord(model, gid, first, vid)?;
        }
        return Ok(());
    }
    if let Some(did) = matching_dim(model, gid, vid)? {
        reform_coord(model, gid, did, vid)?;
    }
    Ok(())
}

/// Update coordinate state after dimension `did` of group `gid` was renamed.
pub(crate) fn after_dim_rename(model: &mut Model, gid: GroupId, did: DimId) -> Result<()> {
    let dim = model.dim(did)?;
    if let Some(cv) = dim.coord_var {
        if model.var(gid, cv)?.name != dim.name {
            break_coord(model, gid, did, cv)?;
        }
    }
    let dim = model.dim(did)?;
    if dim.coord_var.is_none() {
        let candidate = model
            .group(gid)?
            .vars
            .get_by_name(&dim.name)
            .filter(|v| v.dimids.first() == Some(&did))
            .map(|v| v.id);
        if let Some(vid) = candidate {
            reform_coord(model, gid, did, vid)?;
        }
    }
    Ok(())
}

/// `Coordinate -> Independent`.
fn break_coord(model: &mut Model, gid: GroupId, did: DimId, vid: VarId) -> Result<()> {
    model.dim_mut(did)?.coord_var = None;
    let var = model.var_mut(gid, vid)?;
    var.is_coord = false;
    var.flags.was_coord = true;
    var.flags.became_coord = false;
    trace!(var = %var.name, dim = did.0, "coordinate relationship broken");
    Ok(())
}

/// `Independent -> Coordinate`. Undoing an earlier break in the same session
/// just clears `was_coord`.
fn reform_coord(model: &mut Model, gid: GroupId, did: DimId, vid: VarId) -> Result<()> {
    model.dim_mut(did)?.coord_var = Some(vid);
    let var = model.var_mut(gid, vid)?;
    var.is_coord = true;
    if var.flags.was_coord {
        var.flags.was_coord = false;
    } else {
        var.flags.became_coord = true;
    }
    trace!(var = %var.name, dim = did.0, "coordinate relationship formed");
    Ok(())
}

impl File {
    /// Coordinate state of a variable.
    pub fn coord_state(&self, group: GroupId, var: VarId) -> Result<CoordState> {
        state(&self.model, group, var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::CreateOptions;
    use crate::types::TypeId;

    #[test]
    fn define_links_only_on_first_axis() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let x = f.def_dim(root, "x", 4).unwrap();
        let y = f.def_dim(root, "y", 3).unwrap();
        let vx = f.def_var(root, "x", TypeId::FLOAT, &[x]).unwrap();
        let vy = f.def_var(root, "y", TypeId::FLOAT, &[x, y]).unwrap();
        assert_eq!(state(&f.model, root, vx).unwrap(), CoordState::Coordinate);
        assert_eq!(state(&f.model, root, vy).unwrap(), CoordState::Independent);
        assert_eq!(f.dim(x).unwrap().coord_var, Some(vx));
        assert_eq!(f.dim(y).unwrap().coord_var, None);
        assert!(!f.model.var(root, vx).unwrap().flags.became_coord);
    }

    #[test]
    fn rename_round_trip_clears_flags() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let x = f.def_dim(root, "x", 4).unwrap();
        let vx = f.def_var(root, "x", TypeId::FLOAT, &[x]).unwrap();
        f.rename_var(root, vx, "xx").unwrap();
        let v = f.model.var(root, vx).unwrap();
        assert!(v.flags.was_coord && !v.is_coord);
        f.rename_var(root, vx, "x").unwrap();
        let v = f.model.var(root, vx).unwrap();
        assert!(v.is_coord && !v.flags.was_coord && !v.flags.became_coord);
    }

    #[test]
    fn dim_rename_hands_coordinate_to_other_var() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let x = f.def_dim(root, "x", 4).unwrap();
        let vx = f.def_var(root, "x", TypeId::FLOAT, &[x]).unwrap();
        let other = f.def_var(root, "lon", TypeId::FLOAT, &[x]).unwrap();
        f.rename_dim(x, "lon").unwrap();
        assert_eq!(f.dim(x).unwrap().coord_var, Some(other));
        assert!(f.model.var(root, vx).unwrap().flags.was_coord);
        assert!(f.model.var(root, other).unwrap().flags.became_coord);
    }
}
