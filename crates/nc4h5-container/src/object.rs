//! Object references and identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference to an object stored in a container.
///
/// A container read from a file numbers each object by its object header
/// address. Numbers stay fixed while the container is open, but writing the
/// file lays headers out afresh, so the same object may carry a different
/// number after a reopen. Look objects up by name across files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjRef(pub u64);

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of an object across handles: `{file-number, object-number}`.
///
/// The file number is assigned each time a container is opened, so two
/// identities compare equal only when they name the same object of the same
/// open container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Number of the open container.
    pub fileno: u64,
    /// Object number within the open container.
    pub objno: u64,
}

/// The three kinds of linkable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A group holding further links.
    Group,
    /// A dataset with a datatype, dataspace and raw data.
    Dataset,
    /// A committed (named) datatype.
    Datatype,
}

impl ObjectKind {
    /// Lowercase kind name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Group => "group",
            ObjectKind::Dataset => "dataset",
            ObjectKind::Datatype => "datatype",
        }
    }
}
