//! Error types for container operations.

use thiserror::Error;

/// Errors raised by a [`Container`](crate::Container) implementation.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// I/O error while reading or writing the persistent image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No object is stored under this reference.
    #[error("object {0} not found")]
    ObjectNotFound(u64),

    /// No link of this name exists in the group.
    #[error("link not found: {0}")]
    LinkNotFound(String),

    /// A link of this name already exists in the group.
    #[error("link already exists: {0}")]
    LinkExists(String),

    /// The object exists but has a different kind.
    #[error("object {obj} is not a {expected}")]
    WrongKind {
        /// Object number.
        obj: u64,
        /// Expected kind name.
        expected: &'static str,
    },

    /// Selection or extent rank disagrees with the dataspace rank.
    #[error("rank mismatch: dataspace has {expected} dimensions, got {got}")]
    RankMismatch {
        /// Rank of the dataspace.
        expected: usize,
        /// Rank supplied by the caller.
        got: usize,
    },

    /// A hyperslab selection exceeds the current extent.
    #[error("selection out of bounds on axis {axis}: {end} > {extent}")]
    OutOfBounds {
        /// Offending axis.
        axis: usize,
        /// End of the requested selection.
        end: u64,
        /// Current extent of the axis.
        extent: u64,
    },

    /// A new extent exceeds the maximum dimensions of the dataspace.
    #[error("extent {requested} exceeds maximum {max} on axis {axis}")]
    ExtentExceedsMax {
        /// Offending axis.
        axis: usize,
        /// Requested extent.
        requested: u64,
        /// Maximum extent.
        max: u64,
    },

    /// Buffer length does not match the selection size.
    #[error("data length mismatch: expected {expected} bytes, got {got}")]
    DataLength {
        /// Expected number of bytes.
        expected: usize,
        /// Supplied number of bytes.
        got: usize,
    },

    /// Raw data access is not possible for this element type.
    #[error("unsupported datatype for raw data access: {0}")]
    UnsupportedDatatype(String),

    /// Mutation attempted on a container opened read-only.
    #[error("container is read-only")]
    ReadOnly,

    /// The bytes are not a readable HDF5 file.
    #[error("bad HDF5 file: {0}")]
    BadImage(String),

    /// Part of the object tree has no HDF5 encoding.
    #[error("cannot encode: {0}")]
    Unencodable(String),

    /// A filter codec failed while encoding or decoding stored data.
    #[error("codec error: {0}")]
    Codec(String),

    /// A dimension-scale operation was rejected.
    #[error("dimension scale error: {0}")]
    DimScale(String),
}

/// Convenience alias for container results.
pub type Result<T> = std::result::Result<T, ContainerError>;
