//! Property lists for dataset creation and dataset access.
//!
//! Creation properties are fixed for the life of a dataset; changing any of
//! them means deleting and recreating the dataset. Access properties belong
//! to an open handle and take effect when the dataset is (re)opened.

use serde::{Deserialize, Serialize};

use crate::filter_pipeline::FilterPipeline;

/// Raw data storage layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// One contiguous block.
    Contiguous,
    /// Fixed-size chunks with the given per-axis sizes.
    Chunked(Vec<u64>),
    /// Stored inline in the object header.
    Compact,
}

/// When fill values are written into newly allocated storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillTime {
    /// Only when a fill value was set explicitly.
    IfSet,
    /// Always, at allocation time.
    Alloc,
    /// Never; unwritten storage is undefined.
    Never,
}

/// Dataset creation properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetCreateProps {
    /// Storage layout.
    pub layout: Layout,
    /// Filters applied to stored chunks.
    pub pipeline: FilterPipeline,
    /// Fill value bytes (one element), if set.
    pub fill_value: Option<Vec<u8>>,
    /// Fill value write time.
    pub fill_time: FillTime,
    /// Track attribute creation order.
    pub track_attr_order: bool,
}

impl Default for DatasetCreateProps {
    fn default() -> Self {
        Self {
            layout: Layout::Contiguous,
            pipeline: FilterPipeline::new(),
            fill_value: None,
            fill_time: FillTime::IfSet,
            track_attr_order: true,
        }
    }
}

impl DatasetCreateProps {
    /// Create default dataset creation properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk dimensions (enables chunked storage).
    pub fn chunk(mut self, dims: &[u64]) -> Self {
        self.layout = Layout::Chunked(dims.to_vec());
        self
    }

    /// Use compact storage.
    pub fn compact(mut self) -> Self {
        self.layout = Layout::Compact;
        self
    }

    /// Set the filter pipeline.
    pub fn pipeline(mut self, pipeline: FilterPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Set the fill value for one element.
    pub fn fill_value(mut self, bytes: &[u8]) -> Self {
        self.fill_value = Some(bytes.to_vec());
        self
    }

    /// Set fill time policy.
    pub fn fill_time(mut self, ft: FillTime) -> Self {
        self.fill_time = ft;
        self
    }

    /// Chunk dimensions, if chunked.
    pub fn chunk_dims(&self) -> Option<&[u64]> {
        match &self.layout {
            Layout::Chunked(dims) => Some(dims),
            _ => None,
        }
    }
}

/// Raw-data chunk cache settings of an open dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkCacheProps {
    /// Total cache size in bytes.
    pub nbytes: usize,
    /// Number of hash slots.
    pub nslots: usize,
    /// Preemption policy in `[0, 1]`.
    pub w0: f32,
}

impl Default for ChunkCacheProps {
    fn default() -> Self {
        Self {
            nbytes: 1024 * 1024,
            nslots: 521,
            w0: 0.75,
        }
    }
}

/// Dataset access properties.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DatasetAccessProps {
    /// Chunk cache configuration.
    pub chunk_cache: ChunkCacheProps,
}

impl DatasetAccessProps {
    /// Access properties with a specific chunk cache.
    pub fn with_chunk_cache(chunk_cache: ChunkCacheProps) -> Self {
        Self { chunk_cache }
    }
}
