//! netCDF-4 data model over an HDF5-style container.
//!
//! A [`File`] holds the in-memory model of one netCDF-4 file: a hierarchy of
//! groups, each with dimensions, variables, user-defined types and
//! attributes. Define operations only change the model. The storage binding
//! writes it into the container on [`File::enddef`], [`File::sync`],
//! [`File::close`] and before every data access. It maps dimensions onto
//! dimension-scale datasets and keeps dimension ids stable across reopen.
//!
//! Opening a file runs the reverse mapping. Every scale becomes a dimension
//! and every other dataset becomes a variable whose axes are matched to
//! dimensions. Axes without a scale get invented `phony_dim_<n>` dimensions.
//!
//! # Example
//!
//! ```
//! use nc4h5::{CreateOptions, File, OpenOptions, TypeId, VarId, UNLIMITED};
//!
//! let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
//! let root = f.root();
//! let time = f.def_dim(root, "time", UNLIMITED).unwrap();
//! let t = f.def_var(root, "time", TypeId::DOUBLE, &[time]).unwrap();
//! f.put_att_text(root, t, "units", "days since 2000-01-01").unwrap();
//! f.put_vara(root, t, &[0], &[2], &[0u8; 16]).unwrap();
//! let image = f.close().unwrap().unwrap();
//!
//! let g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
//! let time = g.inq_dimid(g.root(), "time").unwrap();
//! assert_eq!(g.dim_len(time).unwrap(), 2);
//! assert_eq!(g.get_att(g.root(), VarId(0), "units").unwrap().as_text().as_deref(), Some("days since 2000-01-01"));
//! ```

pub mod attr;
pub mod binding;
pub mod chunking;
pub mod config;
pub mod coord;
pub mod data;
pub mod dim;
pub mod error;
pub mod file;
pub mod filter;
pub mod filter_spec;
pub mod group;
pub mod index;
pub mod logging;
pub(crate) mod model;
pub mod provenance;
pub mod registry;
pub mod types;
pub mod var;

pub use attr::{Att, AttPrimitive, AttValue, FILL_VALUE};
pub use chunking::{get_chunk_cache, set_chunk_cache, ChunkCache};
pub use config::Config;
pub use coord::CoordState;
pub use dim::{Dim, DimId, UNLIMITED};
pub use error::{Error, Result};
pub use file::{CreateOptions, File, Format, OpenOptions};
pub use filter::{Filter, FilterFlags};
pub use filter_spec::{parse_filter_spec, parse_filter_spec_list, FilterSpec};
pub use group::{Group, GroupId};
pub use index::NameIndex;
pub use provenance::Provenance;
pub use registry::{FilterDescriptor, FilterRegistry, PluginPaths};
pub use types::{TypeClass, TypeId, UserKind, UserType};
pub use var::{Endianness, Storage, Var, VarFlags, VarId};
