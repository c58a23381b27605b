//! HDF5-style container primitives for the nc4h5 storage binding.
//!
//! The netCDF-4 layer in `nc4h5` never talks to bytes on disk directly. It
//! drives a [`Container`]: a tree of groups, datasets and committed datatypes
//! with attributes, creation-ordered links, chunked or contiguous storage,
//! filter pipelines and dimension-scale relationships, all addressed by
//! stable object references.
//!
//! [`MemContainer`] is the concrete container: the whole object tree lives in
//! memory and is persisted as an HDF5 file (see [`format`]) either to a path
//! or to a caller-owned byte buffer.
//!
//! # Example
//!
//! ```
//! use nc4h5_container::{Container, Dataspace, DatasetCreateProps, Datatype, MemContainer};
//!
//! let mut c = MemContainer::new();
//! let root = c.root();
//! let ds = c
//!     .create_dataset(root, "x", Datatype::f32(), Dataspace::simple(&[4]), DatasetCreateProps::new())
//!     .unwrap();
//! c.write_slab(ds, &[0], &[4], &[0u8; 16]).unwrap();
//! assert_eq!(c.dataset_space(ds).unwrap().dims, vec![4]);
//! ```

/// Version of this crate, recorded in file provenance.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod attribute;
pub mod codec;
pub mod container;
pub mod dataspace;
pub mod datatype;
pub mod dimscale;
pub mod error;
pub mod filter_pipeline;
pub mod format;
pub mod mem;
pub mod object;
pub mod property_list;

pub use attribute::{AttrData, Attribute};
pub use container::{Container, DatasetHandle, Link};
pub use dataspace::{Dataspace, UNLIMITED};
pub use datatype::{ByteOrder, CompoundMember, Datatype, EnumMember};
pub use error::{ContainerError, Result};
pub use filter_pipeline::{FilterDescription, FilterPipeline};
pub use mem::MemContainer;
pub use object::{ObjRef, ObjectId, ObjectKind};
pub use property_list::{ChunkCacheProps, DatasetAccessProps, DatasetCreateProps, FillTime, Layout};
