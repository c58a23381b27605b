//! Error taxonomy of the netCDF-4 layer.
//!
//! Container failures are wrapped into [`Error::Container`] at the binding
//! boundary; nothing above the binding matches on container error values.

use nc4h5_container::ContainerError;
use thiserror::Error;

/// Errors returned by netCDF-4 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A name or id lookup missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A define or rename collides with an existing name in the group.
    #[error("name in use: {0}")]
    NameInUse(String),

    /// Fields or members cannot be added to a committed type.
    #[error("type {0} is already committed to storage")]
    TypeAlreadyDefined(String),

    /// The operation requires define mode.
    #[error("operation requires define mode")]
    NotInDefineMode,

    /// The operation is not allowed in define mode.
    #[error("operation not allowed in define mode")]
    InDefineMode,

    /// Mutation attempted on a file opened read-only.
    #[error("file is read-only")]
    ReadOnly,

    /// Recorded dimension ids disagree with the dataset's rank.
    #[error("dimension count mismatch for {name}: {recorded} recorded, dataset has {rank}")]
    DimensionCountMismatch {
        /// Variable name.
        name: String,
        /// Number of recorded dimension ids.
        recorded: usize,
        /// Rank of the dataset.
        rank: usize,
    },

    /// A recorded fixed dimension is not as long as the dataset axis.
    #[error("dimension length mismatch for {name} axis {axis}: dimension has {dim_len}, dataset has {extent}")]
    DimensionLengthMismatch {
        /// Variable name.
        name: String,
        /// Axis of the dataset.
        axis: usize,
        /// Length of the recorded dimension.
        dim_len: u64,
        /// Extent of the dataset along the axis.
        extent: u64,
    },

    /// The element type of a stored object has no netCDF equivalent.
    #[error("unsupported element type: {0}")]
    UnsupportedElementType(String),

    /// Failure of the underlying container.
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    /// Two mutually exclusive compressors on one variable.
    #[error("filter {new} conflicts with filter {existing} already on the variable")]
    ConflictingFilter {
        /// Filter being added.
        new: u32,
        /// Filter already present.
        existing: u32,
    },

    /// Filters need chunked storage, which a scalar cannot have.
    #[error("filters require chunked storage, which needs at least one dimension")]
    RequiresChunking,

    /// Chunked storage requested for a scalar variable.
    #[error("chunked storage is invalid for a scalar variable")]
    InvalidForScalar,

    /// `_FillValue` changed after data was written.
    #[error("fill value cannot change after data was written to {0}")]
    LateFillValueChange(String),

    /// Storage parameters changed after the dataset was created.
    #[error("storage of {0} cannot change after it was created")]
    LateDefinition(String),

    /// A filter spec string did not parse.
    #[error("filter spec syntax error: {0}")]
    FilterSpecSyntax(String),

    /// An argument is out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Text and non-text values mixed under one attribute name.
    #[error("attribute {0} mixes text and non-text values")]
    CharacterTypeMismatch(String),

    /// A type id is unknown or unsuitable for the operation.
    #[error("bad type: {0}")]
    BadType(String),

    /// A name is empty, too long or contains forbidden characters.
    #[error("bad name: {0:?}")]
    BadName(String),

    /// The filter id is not in the filter registry.
    #[error("filter {0} is not registered")]
    FilterNotRegistered(u32),

    /// The operation is not allowed in a strict classic-model file.
    #[error("not allowed in a classic-model file: {0}")]
    StrictClassicModel(String),

    /// A data selection reaches past a fixed dimension.
    #[error("selection out of bounds on axis {axis}: {end} > {len}")]
    OutOfBounds {
        /// Offending axis.
        axis: usize,
        /// End of the selection.
        end: u64,
        /// Length of the dimension.
        len: u64,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error outside the container.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_errors_wrap() {
        let e: Error = ContainerError::ReadOnly.into();
        assert!(matches!(e, Error::Container(ContainerError::ReadOnly)));
        assert!(e.to_string().contains("read-only"));
    }

    #[test]
    fn display_names_the_variable() {
        let e = Error::DimensionCountMismatch {
            name: "temp".into(),
            recorded: 3,
            rank: 2,
        };
        assert_eq!(
            e.to_string(),
            "dimension count mismatch for temp: 3 recorded, dataset has 2"
        );
    }
}
