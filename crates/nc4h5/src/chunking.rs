//! Default chunk sizes and per-variable chunk caches.
//!
//! Every chunked variable carries its own chunk-cache settings, seeded from
//! the file configuration. [`adjust_cache`] grows a cache that is still at
//! the default size when one chunk would not fit in it.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::File;
use crate::group::GroupId;
use crate::model::Model;
use crate::var::{Storage, Var, VarId};

/// Largest compact dataset, in bytes.
pub const MAX_COMPACT_SIZE: u64 = 64 * 1024;

/// Largest chunk, in bytes.
pub const MAX_CHUNK_BYTES: u64 = u32::MAX as u64;

/// Chunk-cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkCache {
    /// Cache size in bytes.
    pub size: usize,
    /// Number of hash slots.
    pub nelems: usize,
    /// Preemption policy in `[0, 1]`.
    pub preemption: f32,
}

impl ChunkCache {
    pub const DEFAULT: ChunkCache = ChunkCache {
        size: 16 * 1024 * 1024,
        nelems: 4133,
        preemption: 0.75,
    };

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.preemption) {
            return Err(Error::InvalidArgument(format!(
                "cache preemption {} outside [0, 1]",
                self.preemption
            )));
        }
        Ok(())
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::DEFAULT
    }
}

static PROCESS_CACHE: Lazy<Mutex<ChunkCache>> = Lazy::new(|| Mutex::new(ChunkCache::DEFAULT));

/// Set the process-wide chunk-cache default used by new configurations.
pub fn set_chunk_cache(cache: ChunkCache) -> Result<()> {
    cache.validate()?;
    *PROCESS_CACHE.lock() = cache;
    Ok(())
}

/// The process-wide chunk-cache default.
pub fn get_chunk_cache() -> ChunkCache {
    *PROCESS_CACHE.lock()
}

/// Reject chunks larger than [`MAX_CHUNK_BYTES`].
pub(crate) fn check_chunk_bytes(type_size: usize, sizes: &[u64]) -> Result<()> {
    let bytes = sizes
        .iter()
        .try_fold(type_size as u64, |acc, &c| acc.checked_mul(c))
        .unwrap_or(u64::MAX);
    if bytes > MAX_CHUNK_BYTES {
        return Err(Error::InvalidArgument(format!("chunk of {bytes} bytes is too large")));
    }
    Ok(())
}

/// Default chunk sizes for `var`.
///
/// Unlimited axes get 1. A one-dimensional unlimited variable gets a chunk of
/// about `default_1d_unlim_size` bytes; a variable whose axes are all
/// unlimited gets equal sizes from the chunk budget. Remaining axes share
/// the budget proportionally to their lengths. Oversized chunks are halved,
/// then each axis is trimmed so its chunks overhang the dimension as little
/// as possible.
pub(crate) fn default_chunk_sizes(model: &Model, var: &Var, config: &Config) -> Result<Vec<u64>> {
    let ndims = var.ndims();
    let type_size = model.type_size(var.type_id)?.max(1) as u64;
    let budget = config.default_chunk_size as u64;

    let mut lens = Vec::with_capacity(ndims);
    let mut unlimited = Vec::with_capacity(ndims);
    for &d in &var.dimids {
        let dim = model.dim(d)?;
        lens.push(dim.len);
        unlimited.push(dim.unlimited);
    }

    let mut chunks = vec![0u64; ndims];
    let mut num_values = 1u64;
    let mut num_unlim = 0usize;
    for axis in 0..ndims {
        if unlimited[axis] {
            num_unlim += 1;
            chunks[axis] = 1;
        } else {
            num_values = num_values.saturating_mul(lens[axis]);
        }
    }

    if ndims == 1 && num_unlim == 1 {
        let per_type = budget / type_size;
        let suggested = if per_type == 0 {
            1
        } else {
            per_type.min(config.default_1d_unlim_size as u64)
        };
        chunks[0] = (suggested / type_size).max(1);
    }

    if ndims > 1 && ndims == num_unlim {
        let suggested = ((budget as f64 / type_size as f64).powf(1.0 / ndims as f64)) as u64;
        chunks.iter_mut().for_each(|c| *c = suggested.max(1));
    }

    let fixed_axes = (ndims - num_unlim) as f64;
    for axis in 0..ndims {
        if chunks[axis] != 0 {
            continue;
        }
        let share = (budget as f64 / (num_values as f64 * type_size as f64)).powf(1.0 / fixed_axes);
        let suggested = (share * lens[axis] as f64 - 0.5).max(0.0) as u64;
        chunks[axis] = suggested.min(lens[axis]).max(1);
    }

    while chunk_bytes(type_size, &chunks) > MAX_CHUNK_BYTES && chunks.iter().any(|&c| c > 1) {
        chunks.iter_mut().for_each(|c| *c = (*c / 2).max(1));
    }

    for axis in 0..ndims {
        if unlimited[axis] {
            continue;
        }
        let c = chunks[axis];
        let nchunks = (lens[axis] + c - 1) / c;
        if nchunks > 0 {
            let overhang = nchunks * c - lens[axis];
            chunks[axis] -= overhang / nchunks;
        }
    }
    Ok(chunks)
}

fn chunk_bytes(type_size: u64, chunks: &[u64]) -> u64 {
    chunks
        .iter()
        .try_fold(type_size, |acc, &c| acc.checked_mul(c))
        .unwrap_or(u64::MAX)
}

/// Grow the chunk cache of `var` when the cache is still at the configured
/// default and one chunk would not fit in it. The new size holds
/// `chunks_in_cache` chunks, capped at `max_default_cache_size`.
///
/// "Default" means `config.chunk_cache`, the file's snapshot taken at create
/// or open. A later [`set_chunk_cache`] changes the default for files opened
/// after it and leaves open files alone.
pub(crate) fn adjust_cache(model: &Model, var: &mut Var, config: &Config) -> Result<()> {
    let Storage::Chunked(chunks) = &var.storage else {
        return Ok(());
    };
    if var.chunk_cache.size != config.chunk_cache.size {
        return Ok(());
    }
    let type_size = model.type_size(var.type_id)? as u64;
    let bytes = chunk_bytes(type_size, chunks);
    if bytes <= var.chunk_cache.size as u64 {
        return Ok(());
    }
    let grown = bytes
        .saturating_mul(config.chunks_in_cache as u64)
        .min(config.max_default_cache_size as u64) as usize;
    debug!(var = %var.name, chunk_bytes = bytes, from = var.chunk_cache.size, to = grown, "chunk cache adjusted");
    var.chunk_cache.size = grown;
    Ok(())
}

impl File {
    /// Set the chunk cache of one variable.
    pub fn set_var_chunk_cache(&mut self, group: GroupId, var: VarId, cache: ChunkCache) -> Result<()> {
        cache.validate()?;
        self.model.var_mut(group, var)?.chunk_cache = cache;
        self.store.reopen_dataset(&self.model, group, var)?;
        Ok(())
    }

    pub fn get_var_chunk_cache(&self, group: GroupId, var: VarId) -> Result<ChunkCache> {
        Ok(self.model.var(group, var)?.chunk_cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::UNLIMITED;
    use crate::file::CreateOptions;
    use crate::types::TypeId;

    fn chunks_for(dims: &[u64], type_id: TypeId) -> Vec<u64> {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let ids: Vec<_> = dims
            .iter()
            .enumerate()
            .map(|(i, &len)| f.def_dim(root, &format!("d{i}"), len).unwrap())
            .collect();
        let v = f.def_var(root, "v", type_id, &ids).unwrap();
        let var = f.model.var(root, v).unwrap();
        default_chunk_sizes(&f.model, var, &f.config).unwrap()
    }

    #[test]
    fn one_dimensional_unlimited() {
        assert_eq!(chunks_for(&[UNLIMITED], TypeId::FLOAT), vec![1024]);
        assert_eq!(chunks_for(&[UNLIMITED], TypeId::DOUBLE), vec![512]);
        assert_eq!(chunks_for(&[UNLIMITED], TypeId::BYTE), vec![4096]);
    }

    #[test]
    fn all_unlimited_share_budget() {
        // (16 MiB / 4)^(1/2) = 2048
        let c = chunks_for(&[UNLIMITED, UNLIMITED], TypeId::INT);
        assert_eq!(c[0], c[1]);
        assert!((2047..=2048).contains(&c[0]), "{c:?}");
    }

    #[test]
    fn small_fixed_dims_fit_whole() {
        assert_eq!(chunks_for(&[UNLIMITED, 10, 20], TypeId::FLOAT), vec![1, 10, 20]);
        assert_eq!(chunks_for(&[100], TypeId::DOUBLE), vec![100]);
    }

    #[test]
    fn large_fixed_dims_are_split_evenly() {
        let c = chunks_for(&[4096, 4096], TypeId::DOUBLE);
        let bytes: u64 = c.iter().product::<u64>() * 8;
        assert!(bytes <= 16 * 1024 * 1024, "{c:?}");
        for &n in &c {
            let nchunks = (4096 + n - 1) / n;
            assert!(nchunks * n - 4096 < nchunks, "{c:?}");
        }
    }

    #[test]
    fn overhang_trimmed() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        f.config.default_chunk_size = 4 * 600;
        let root = f.root();
        let d = f.def_dim(root, "x", 1000).unwrap();
        let v = f.def_var(root, "v", TypeId::INT, &[d]).unwrap();
        let var = f.model.var(root, v).unwrap();
        // 599 would leave two chunks and 198 elements of overhang
        assert_eq!(default_chunk_sizes(&f.model, var, &f.config).unwrap(), vec![500]);
    }

    #[test]
    fn cache_grows_once() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let d = f.def_dim(root, "x", 4096).unwrap();
        let e = f.def_dim(root, "y", 4096).unwrap();
        let v = f.def_var(root, "v", TypeId::DOUBLE, &[d, e]).unwrap();
        f.def_var_chunking(root, v, Storage::Chunked(vec![4096, 1024])).unwrap();
        let grown = f.get_var_chunk_cache(root, v).unwrap();
        assert_eq!(grown.size, 64 * 1024 * 1024);

        let mut var = f.model.var(root, v).unwrap().clone();
        adjust_cache(&f.model, &mut var, &f.config).unwrap();
        assert_eq!(var.chunk_cache, grown);
    }

    #[test]
    fn default_is_the_file_snapshot() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let d = f.def_dim(root, "x", 4096).unwrap();
        let v = f.def_var(root, "v", TypeId::DOUBLE, &[d]).unwrap();
        f.def_var_chunking(root, v, Storage::Chunked(vec![4096])).unwrap();
        let mut config = f.config.clone();
        config.chunk_cache.size = 1024;

        // at the process default but not at this file's default: kept
        let mut var = f.model.var(root, v).unwrap().clone();
        var.chunk_cache.size = ChunkCache::DEFAULT.size;
        adjust_cache(&f.model, &mut var, &config).unwrap();
        assert_eq!(var.chunk_cache.size, ChunkCache::DEFAULT.size);

        // at this file's default and too small for one 32 KiB chunk: grown
        var.chunk_cache.size = 1024;
        adjust_cache(&f.model, &mut var, &config).unwrap();
        assert_eq!(var.chunk_cache.size, 32 * 1024 * config.chunks_in_cache);
    }

    #[test]
    fn explicit_cache_is_kept() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let d = f.def_dim(root, "x", 4096).unwrap();
        let v = f.def_var(root, "v", TypeId::DOUBLE, &[d]).unwrap();
        let small = ChunkCache {
            size: 1024,
            nelems: 7,
            preemption: 0.5,
        };
        f.set_var_chunk_cache(root, v, small).unwrap();
        f.def_var_chunking(root, v, Storage::Chunked(vec![4096])).unwrap();
        assert_eq!(f.get_var_chunk_cache(root, v).unwrap(), small);
        assert!(f
            .set_var_chunk_cache(
                root,
                v,
                ChunkCache {
                    preemption: 1.5,
                    ..small
                }
            )
            .is_err());
    }
}
