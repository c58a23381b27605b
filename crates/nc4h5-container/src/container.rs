//! The container interface the storage binding is written against.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::attribute::Attribute;
use crate::dataspace::Dataspace;
use crate::datatype::{CompoundMember, Datatype};
use crate::error::Result;
use crate::object::{ObjRef, ObjectId, ObjectKind};
use crate::property_list::{DatasetAccessProps, DatasetCreateProps};

/// A named link from a group to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Link name within the group.
    pub name: String,
    /// Target object.
    pub obj: ObjRef,
    /// Kind of the target object.
    pub kind: ObjectKind,
}

/// An open dataset with its access properties.
///
/// The owning container counts live handles; dropping the handle releases
/// it, so a handle held in a local is released on every exit path.
#[derive(Debug)]
pub struct DatasetHandle {
    obj: ObjRef,
    access: DatasetAccessProps,
    live: Arc<AtomicUsize>,
}

impl DatasetHandle {
    /// Register a new open handle against `live`.
    pub fn new(obj: ObjRef, access: DatasetAccessProps, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self { obj, access, live }
    }

    /// The dataset this handle refers to.
    pub fn obj(&self) -> ObjRef {
        self.obj
    }

    /// Access properties the dataset was opened with.
    pub fn access(&self) -> &DatasetAccessProps {
        &self.access
    }
}

impl Drop for DatasetHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An HDF5-style object container.
///
/// Links are iterated in creation order, attributes likewise. Every
/// mutation fails with [`ContainerError::ReadOnly`](crate::ContainerError::ReadOnly)
/// on a read-only container.
pub trait Container: fmt::Debug + Send {
    /// Number identifying this open container.
    fn fileno(&self) -> u64;

    /// The root group.
    fn root(&self) -> ObjRef;

    /// Whether mutations are rejected.
    fn is_read_only(&self) -> bool;

    /// Kind of an object.
    fn kind(&self, obj: ObjRef) -> Result<ObjectKind>;

    /// Stable `{fileno, objno}` identity of an object.
    fn object_id(&self, obj: ObjRef) -> Result<ObjectId> {
        self.kind(obj)?;
        Ok(ObjectId {
            fileno: self.fileno(),
            objno: obj.0,
        })
    }

    // ---- links ----

    /// Links of a group in creation order.
    fn links(&self, group: ObjRef) -> Result<Vec<Link>>;

    /// Resolve a link name within a group.
    fn lookup(&self, group: ObjRef, name: &str) -> Result<Option<ObjRef>>;

    /// Create a child group.
    fn create_group(&mut self, parent: ObjRef, name: &str) -> Result<ObjRef>;

    /// Rename a link within one group, keeping its creation-order position.
    fn move_link(&mut self, group: ObjRef, from: &str, to: &str) -> Result<()>;

    /// Remove a link and delete the object it pointed to.
    fn unlink(&mut self, group: ObjRef, name: &str) -> Result<()>;

    // ---- committed datatypes ----

    /// Commit a named datatype into a group.
    fn commit_datatype(&mut self, group: ObjRef, name: &str, datatype: &Datatype) -> Result<ObjRef>;

    /// The datatype stored in a committed datatype object.
    fn committed_datatype(&self, obj: ObjRef) -> Result<Datatype>;

    /// Replace every [`Datatype::Named`] reference with the committed type.
    fn resolve(&self, datatype: &Datatype) -> Result<Datatype> {
        Ok(match datatype {
            Datatype::Named(obj) => self.resolve(&self.committed_datatype(*obj)?)?,
            Datatype::Compound { size, members } => {
                let mut resolved = Vec::with_capacity(members.len());
                for m in members {
                    resolved.push(CompoundMember {
                        name: m.name.clone(),
                        offset: m.offset,
                        datatype: self.resolve(&m.datatype)?,
                    });
                }
                Datatype::Compound {
                    size: *size,
                    members: resolved,
                }
            }
            Datatype::VarLen { base } => Datatype::VarLen {
                base: Box::new(self.resolve(base)?),
            },
            Datatype::Array { base, dims } => Datatype::Array {
                base: Box::new(self.resolve(base)?),
                dims: dims.clone(),
            },
            Datatype::Enum { base, members } => Datatype::Enum {
                base: Box::new(self.resolve(base)?),
                members: members.clone(),
            },
            other => other.clone(),
        })
    }

    // ---- datasets ----

    /// Create a dataset.
    fn create_dataset(
        &mut self,
        group: ObjRef,
        name: &str,
        datatype: Datatype,
        space: Dataspace,
        dcpl: DatasetCreateProps,
    ) -> Result<ObjRef>;

    /// Element datatype of a dataset, unresolved.
    fn dataset_type(&self, ds: ObjRef) -> Result<Datatype>;

    /// Current dataspace of a dataset.
    fn dataset_space(&self, ds: ObjRef) -> Result<Dataspace>;

    /// Creation properties of a dataset.
    fn dataset_create_props(&self, ds: ObjRef) -> Result<DatasetCreateProps>;

    /// Open a dataset with the given access properties.
    fn open_dataset(&self, ds: ObjRef, dapl: &DatasetAccessProps) -> Result<DatasetHandle>;

    /// Number of dataset handles currently open.
    fn open_handles(&self) -> usize;

    /// Change the current extent, within the maximum dimensions.
    fn set_extent(&mut self, ds: ObjRef, dims: &[u64]) -> Result<()>;

    /// Write raw element bytes into a hyperslab.
    fn write_slab(&mut self, ds: ObjRef, start: &[u64], count: &[u64], data: &[u8]) -> Result<()>;

    /// Read raw element bytes from a hyperslab.
    fn read_slab(&self, ds: ObjRef, start: &[u64], count: &[u64]) -> Result<Vec<u8>>;

    /// Read the whole current extent.
    fn read_all(&self, ds: ObjRef) -> Result<Vec<u8>> {
        let space = self.dataset_space(ds)?;
        let start = vec![0; space.rank()];
        self.read_slab(ds, &start, &space.dims)
    }

    // ---- attributes ----

    /// Attribute names of an object in creation order.
    fn attr_names(&self, obj: ObjRef) -> Result<Vec<String>>;

    /// Read an attribute, if present.
    fn read_attr(&self, obj: ObjRef, name: &str) -> Result<Option<Attribute>>;

    /// Create an attribute, or replace the one of the same name in place.
    fn write_attr(&mut self, obj: ObjRef, attr: Attribute) -> Result<()>;

    /// Delete an attribute. Returns whether it existed.
    fn delete_attr(&mut self, obj: ObjRef, name: &str) -> Result<bool>;

    // ---- persistence ----

    /// Persist pending changes to the backing store, if any.
    fn flush(&mut self) -> Result<()>;

    /// Encode the whole container as the bytes of an HDF5 file.
    fn image(&self) -> Result<Vec<u8>>;
}
