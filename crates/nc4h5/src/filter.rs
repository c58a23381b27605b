//! Per-variable filter lists.
//!
//! Filters are applied in list order when data is stored. Any filter needs
//! chunked storage, so adding one to a contiguous variable switches it to
//! chunked storage with default chunk sizes.

use nc4h5_container::filter_pipeline::{FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE, FILTER_SZIP};
use tracing::debug;

use crate::chunking;
use crate::error::{Error, Result};
use crate::file::File;
use crate::group::GroupId;
use crate::var::{Storage, VarId};

/// Highest deflate level.
pub const MAX_DEFLATE_LEVEL: u32 = 9;

/// szip entropy-coding option.
pub const SZIP_EC_OPTION_MASK: u32 = 4;
/// szip nearest-neighbour option.
pub const SZIP_NN_OPTION_MASK: u32 = 32;
/// Largest szip block.
pub const SZIP_MAX_PIXELS_PER_BLOCK: u32 = 32;

/// Flags carried by a filter entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FilterFlags(u32);

impl FilterFlags {
    pub const NONE: FilterFlags = FilterFlags(0);
    /// The filter may be skipped when it cannot run.
    pub const OPTIONAL: FilterFlags = FilterFlags(0x1);
    /// Read from storage but not present in the filter registry.
    pub const UNAVAILABLE: FilterFlags = FilterFlags(0x2);

    pub fn contains(self, other: FilterFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FilterFlags) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// One entry of a variable's filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u32,
    pub params: Vec<u32>,
    pub flags: FilterFlags,
}

impl Filter {
    pub fn new(id: u32, params: &[u32]) -> Self {
        Self {
            id,
            params: params.to_vec(),
            flags: FilterFlags::NONE,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.flags.contains(FilterFlags::UNAVAILABLE)
    }
}

fn check_params(id: u32, params: &[u32]) -> Result<()> {
    match id {
        FILTER_DEFLATE => match params {
            [level] if *level <= MAX_DEFLATE_LEVEL => Ok(()),
            _ => Err(Error::InvalidArgument(format!(
                "deflate takes one level in 0..={MAX_DEFLATE_LEVEL}, got {params:?}"
            ))),
        },
        FILTER_SZIP => match params {
            [mask, ppb] => {
                if *mask != SZIP_EC_OPTION_MASK && *mask != SZIP_NN_OPTION_MASK {
                    return Err(Error::InvalidArgument(format!("szip options mask {mask}")));
                }
                if *ppb == 0 || ppb % 2 != 0 || *ppb > SZIP_MAX_PIXELS_PER_BLOCK {
                    return Err(Error::InvalidArgument(format!("szip pixels per block {ppb}")));
                }
                Ok(())
            }
            _ => Err(Error::InvalidArgument("szip takes an options mask and a block size".into())),
        },
        _ => Ok(()),
    }
}

impl File {
    /// Add a filter to a variable, or replace the parameters of the filter
    /// with the same id already present.
    pub fn def_var_filter(&mut self, group: GroupId, var: VarId, id: u32, params: &[u32]) -> Result<()> {
        self.enter_define()?;
        let v = self.model.var(group, var)?;
        if v.flags.created {
            return Err(Error::LateDefinition(v.name.clone()));
        }
        if v.is_scalar() {
            return Err(Error::RequiresChunking);
        }
        if !self.registry.is_registered(id) {
            return Err(Error::FilterNotRegistered(id));
        }
        let rival = match id {
            FILTER_DEFLATE => Some(FILTER_SZIP),
            FILTER_SZIP => Some(FILTER_DEFLATE),
            _ => None,
        };
        if let Some(existing) = rival.filter(|r| v.filters.iter().any(|f| f.id == *r)) {
            return Err(Error::ConflictingFilter { new: id, existing });
        }
        check_params(id, params)?;

        let mut next = v.clone();
        match next.filters.iter_mut().find(|f| f.id == id) {
            Some(f) => f.params = params.to_vec(),
            None => next.filters.push(Filter::new(id, params)),
        }
        if !matches!(next.storage, Storage::Chunked(_)) {
            next.storage = Storage::Chunked(chunking::default_chunk_sizes(&self.model, &next, &self.config)?);
        }
        chunking::adjust_cache(&self.model, &mut next, &self.config)?;
        debug!(var = %next.name, filter = id, "filter defined");
        *self.model.var_mut(group, var)? = next;
        Ok(())
    }

    /// Remove the last filter with this id.
    pub fn remove_filter(&mut self, group: GroupId, var: VarId, id: u32) -> Result<()> {
        self.enter_define()?;
        let v = self.model.var_mut(group, var)?;
        if v.flags.created {
            return Err(Error::LateDefinition(v.name.clone()));
        }
        let pos = v
            .filters
            .iter()
            .rposition(|f| f.id == id)
            .ok_or_else(|| Error::NotFound(format!("filter {id} on {}", v.name)))?;
        v.filters.remove(pos);
        Ok(())
    }

    /// Filter ids of a variable in application order.
    pub fn inq_var_filter_ids(&self, group: GroupId, var: VarId) -> Result<Vec<u32>> {
        Ok(self.model.var(group, var)?.filters.iter().map(|f| f.id).collect())
    }

    /// Parameters of one filter.
    pub fn inq_var_filter_info(&self, group: GroupId, var: VarId, id: u32) -> Result<&Filter> {
        let v = self.model.var(group, var)?;
        v.filters
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::NotFound(format!("filter {id} on {}", v.name)))
    }

    /// Deflate at `level`, optionally preceded by shuffle.
    pub fn def_var_deflate(&mut self, group: GroupId, var: VarId, shuffle: bool, level: u32) -> Result<()> {
        if shuffle && !self.registry.is_registered(FILTER_SHUFFLE) {
            return Err(Error::FilterNotRegistered(FILTER_SHUFFLE));
        }
        self.def_var_filter(group, var, FILTER_DEFLATE, &[level])?;
        if shuffle {
            let v = self.model.var_mut(group, var)?;
            v.filters.retain(|f| f.id != FILTER_SHUFFLE);
            v.filters.insert(0, Filter::new(FILTER_SHUFFLE, &[]));
        }
        Ok(())
    }

    /// Shuffle flag and deflate level, if deflate is on.
    pub fn inq_var_deflate(&self, group: GroupId, var: VarId) -> Result<(bool, Option<u32>)> {
        let v = self.model.var(group, var)?;
        let shuffle = v.filters.iter().any(|f| f.id == FILTER_SHUFFLE);
        let level = v
            .filters
            .iter()
            .find(|f| f.id == FILTER_DEFLATE)
            .and_then(|f| f.params.first().copied());
        Ok((shuffle, level))
    }

    pub fn def_var_fletcher32(&mut self, group: GroupId, var: VarId) -> Result<()> {
        self.def_var_filter(group, var, FILTER_FLETCHER32, &[])
    }

    pub fn def_var_szip(&mut self, group: GroupId, var: VarId, options_mask: u32, pixels_per_block: u32) -> Result<()> {
        self.def_var_filter(group, var, FILTER_SZIP, &[options_mask, pixels_per_block])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::UNLIMITED;
    use crate::file::CreateOptions;
    use crate::types::TypeId;

    fn file_with_var() -> (File, GroupId, VarId) {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let x = f.def_dim(root, "x", 100).unwrap();
        let v = f.def_var(root, "v", TypeId::FLOAT, &[x]).unwrap();
        (f, root, v)
    }

    #[test]
    fn deflate_switches_to_chunked() {
        let (mut f, root, v) = file_with_var();
        assert_eq!(f.var(root, v).unwrap().storage, Storage::Contiguous);
        f.def_var_deflate(root, v, true, 4).unwrap();
        assert!(matches!(f.var(root, v).unwrap().storage, Storage::Chunked(_)));
        assert_eq!(f.inq_var_filter_ids(root, v).unwrap(), vec![FILTER_SHUFFLE, FILTER_DEFLATE]);
        assert_eq!(f.inq_var_deflate(root, v).unwrap(), (true, Some(4)));
    }

    #[test]
    fn redefining_replaces_params_in_place() {
        let (mut f, root, v) = file_with_var();
        f.def_var_deflate(root, v, false, 1).unwrap();
        f.def_var_fletcher32(root, v).unwrap();
        f.def_var_deflate(root, v, false, 6).unwrap();
        assert_eq!(f.inq_var_filter_ids(root, v).unwrap(), vec![FILTER_DEFLATE, FILTER_FLETCHER32]);
        assert_eq!(f.inq_var_filter_info(root, v, FILTER_DEFLATE).unwrap().params, vec![6]);
    }

    #[test]
    fn deflate_and_szip_conflict() {
        let (mut f, root, v) = file_with_var();
        f.def_var_deflate(root, v, false, 2).unwrap();
        assert!(matches!(
            f.def_var_szip(root, v, SZIP_NN_OPTION_MASK, 16),
            Err(Error::ConflictingFilter {
                new: FILTER_SZIP,
                existing: FILTER_DEFLATE
            })
        ));
    }

    #[test]
    fn parameter_checks() {
        let (mut f, root, v) = file_with_var();
        assert!(f.def_var_deflate(root, v, false, 10).is_err());
        assert!(f.def_var_szip(root, v, 8, 16).is_err());
        assert!(f.def_var_szip(root, v, SZIP_EC_OPTION_MASK, 15).is_err());
        assert!(f.def_var_szip(root, v, SZIP_EC_OPTION_MASK, 64).is_err());
        f.def_var_szip(root, v, SZIP_EC_OPTION_MASK, 32).unwrap();
        assert!(f.inq_var_filter_ids(root, v).unwrap().contains(&FILTER_SZIP));
    }

    #[test]
    fn scalar_and_unregistered() {
        let (mut f, root, v) = file_with_var();
        let s = f.def_var(root, "s", TypeId::INT, &[]).unwrap();
        assert!(matches!(f.def_var_deflate(root, s, false, 1), Err(Error::RequiresChunking)));
        assert!(matches!(
            f.def_var_filter(root, v, 40000, &[]),
            Err(Error::FilterNotRegistered(40000))
        ));
    }

    #[test]
    fn scalar_is_rejected_before_registry_lookup() {
        let (mut f, root, _) = file_with_var();
        let s = f.def_var(root, "s", TypeId::INT, &[]).unwrap();
        assert!(matches!(f.def_var_filter(root, s, 40000, &[]), Err(Error::RequiresChunking)));
        assert!(f.var(root, s).unwrap().filters.is_empty());
    }

    #[test]
    fn remove_takes_last_match() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let t = f.def_dim(root, "t", UNLIMITED).unwrap();
        let v = f.def_var(root, "v", TypeId::INT, &[t]).unwrap();
        f.def_var_fletcher32(root, v).unwrap();
        f.def_var_deflate(root, v, true, 3).unwrap();
        f.remove_filter(root, v, FILTER_SHUFFLE).unwrap();
        assert_eq!(f.inq_var_filter_ids(root, v).unwrap(), vec![FILTER_FLETCHER32, FILTER_DEFLATE]);
        assert!(matches!(f.remove_filter(root, v, FILTER_SHUFFLE), Err(Error::NotFound(_))));
        f.enddef().unwrap();
        f.redef().unwrap();
        assert!(matches!(
            f.def_var_filter(root, v, FILTER_FLETCHER32, &[]),
            Err(Error::LateDefinition(_))
        ));
    }
}
