//! In-memory container persisted as an HDF5 file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::attribute::Attribute;
use crate::container::{Container, DatasetHandle, Link};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{ContainerError, Result};
use crate::format;
use crate::object::{ObjRef, ObjectKind};
use crate::property_list::{DatasetAccessProps, DatasetCreateProps};

static NEXT_FILENO: AtomicU64 = AtomicU64::new(1);

fn next_fileno() -> u64 {
    NEXT_FILENO.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Stored objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct GroupObj {
    pub links: Vec<(String, u64)>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub(crate) struct DatasetObj {
    pub datatype: Datatype,
    pub space: Dataspace,
    pub dcpl: DatasetCreateProps,
    pub attrs: Vec<Attribute>,
    /// Resolved element size; 0 when raw access is unsupported.
    pub element_size: usize,
    /// Row-major element bytes for the current extent.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct TypeObj {
    pub datatype: Datatype,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub(crate) enum Object {
    Group(GroupObj),
    Dataset(DatasetObj),
    Datatype(TypeObj),
}

impl Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::Group(_) => ObjectKind::Group,
            Object::Dataset(_) => ObjectKind::Dataset,
            Object::Datatype(_) => ObjectKind::Datatype,
        }
    }

    fn attrs(&self) -> &Vec<Attribute> {
        match self {
            Object::Group(g) => &g.attrs,
            Object::Dataset(d) => &d.attrs,
            Object::Datatype(t) => &t.attrs,
        }
    }

    fn attrs_mut(&mut self) -> &mut Vec<Attribute> {
        match self {
            Object::Group(g) => &mut g.attrs,
            Object::Dataset(d) => &mut d.attrs,
            Object::Datatype(t) => &mut t.attrs,
        }
    }
}

/// The object tree, keyed by object number.
#[derive(Debug, Clone)]
pub(crate) struct Store {
    pub next_objno: u64,
    pub root: u64,
    pub objects: BTreeMap<u64, Object>,
}

impl Store {
    fn new() -> Self {
        let mut objects = BTreeMap::new();
        objects.insert(
            1,
            Object::Group(GroupObj {
                links: Vec::new(),
                attrs: Vec::new(),
            }),
        );
        Self {
            next_objno: 2,
            root: 1,
            objects,
        }
    }
}

// ---------------------------------------------------------------------------
// MemContainer
// ---------------------------------------------------------------------------

/// A container whose object tree lives in memory.
///
/// A container created or opened from a path writes an HDF5 file back to that
/// path on [`flush`](Container::flush); a container built with
/// [`new`](MemContainer::new) or [`from_image`](MemContainer::from_image)
/// is purely in memory and hands its bytes out through
/// [`image`](Container::image).
#[derive(Debug)]
pub struct MemContainer {
    store: Store,
    fileno: u64,
    read_only: bool,
    path: Option<PathBuf>,
    live_handles: Arc<AtomicUsize>,
}

impl Default for MemContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemContainer {
    /// A new, empty, writable in-memory container.
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            fileno: next_fileno(),
            read_only: false,
            path: None,
            live_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a container backed by `path`. Fails if the file exists and
    /// `overwrite` is false.
    pub fn create_file<P: AsRef<Path>>(path: P, overwrite: bool) -> Result<Self> {
        let path = path.as_ref();
        if !overwrite && path.exists() {
            return Err(ContainerError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        let mut c = Self::new();
        c.path = Some(path.to_path_buf());
        c.flush()?;
        debug!(path = %path.display(), fileno = c.fileno, "created container file");
        Ok(c)
    }

    /// Open the HDF5 file stored at `path`.
    pub fn open_file<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut c = Self::from_image(&bytes, read_only)?;
        c.path = Some(path.to_path_buf());
        debug!(path = %path.display(), fileno = c.fileno, read_only, "opened container file");
        Ok(c)
    }

    /// Load a container from the bytes of an HDF5 file.
    pub fn from_image(bytes: &[u8], read_only: bool) -> Result<Self> {
        let store = format::decode(bytes)?;
        Ok(Self {
            store,
            fileno: next_fileno(),
            read_only,
            path: None,
            live_handles: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Backing path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(ContainerError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn object(&self, obj: ObjRef) -> Result<&Object> {
        self.store
            .objects
            .get(&obj.0)
            .ok_or(ContainerError::ObjectNotFound(obj.0))
    }

    fn object_mut(&mut self, obj: ObjRef) -> Result<&mut Object> {
        self.store
            .objects
            .get_mut(&obj.0)
            .ok_or(ContainerError::ObjectNotFound(obj.0))
    }

    fn group(&self, obj: ObjRef) -> Result<&GroupObj> {
        match self.object(obj)? {
            Object::Group(g) => Ok(g),
            _ => Err(ContainerError::WrongKind {
                obj: obj.0,
                expected: "group",
            }),
        }
    }

    fn group_mut(&mut self, obj: ObjRef) -> Result<&mut GroupObj> {
        match self.object_mut(obj)? {
            Object::Group(g) => Ok(g),
            _ => Err(ContainerError::WrongKind {
                obj: obj.0,
                expected: "group",
            }),
        }
    }

    fn dataset(&self, obj: ObjRef) -> Result<&DatasetObj> {
        match self.object(obj)? {
            Object::Dataset(d) => Ok(d),
            _ => Err(ContainerError::WrongKind {
                obj: obj.0,
                expected: "dataset",
            }),
        }
    }

    fn dataset_mut(&mut self, obj: ObjRef) -> Result<&mut DatasetObj> {
        match self.object_mut(obj)? {
            Object::Dataset(d) => Ok(d),
            _ => Err(ContainerError::WrongKind {
                obj: obj.0,
                expected: "dataset",
            }),
        }
    }

    /// Insert a new object under a fresh link.
    fn link_new(&mut self, parent: ObjRef, name: &str, object: Object) -> Result<ObjRef> {
        self.check_writable()?;
        let group = self.group(parent)?;
        if group.links.iter().any(|(n, _)| n == name) {
            return Err(ContainerError::LinkExists(name.to_string()));
        }
        let objno = self.store.next_objno;
        self.store.next_objno += 1;
        self.store.objects.insert(objno, object);
        self.group_mut(parent)?.links.push((name.to_string(), objno));
        Ok(ObjRef(objno))
    }

    /// Delete an object and, for groups, everything below it.
    fn delete_tree(&mut self, objno: u64) {
        if let Some(Object::Group(g)) = self.store.objects.remove(&objno) {
            for (_, child) in g.links {
                self.delete_tree(child);
            }
        }
    }

}

/// One element of fill: the fill value if it fits, else zeros.
pub(crate) fn fill_element(dcpl: &DatasetCreateProps, element_size: usize) -> Vec<u8> {
    match &dcpl.fill_value {
        Some(v) if v.len() == element_size => v.clone(),
        _ => vec![0u8; element_size],
    }
}

pub(crate) fn filled_buffer(dcpl: &DatasetCreateProps, element_size: usize, elements: u64) -> Vec<u8> {
    let fill = fill_element(dcpl, element_size);
    let mut buf = Vec::with_capacity(element_size * elements as usize);
    for _ in 0..elements {
        buf.extend_from_slice(&fill);
    }
    buf
}

// ---------------------------------------------------------------------------
// Hyperslab helpers
// ---------------------------------------------------------------------------

/// Contiguous runs `(element offset, length)` covering a hyperslab of a
/// row-major array with extent `dims`, in selection order.
pub fn slab_runs(dims: &[u64], start: &[u64], count: &[u64]) -> Vec<(u64, u64)> {
    if dims.is_empty() {
        return vec![(0, 1)];
    }
    if count.iter().any(|&c| c == 0) {
        return Vec::new();
    }
    let rank = dims.len();
    let mut strides = vec![1u64; rank];
    for i in (0..rank - 1).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    let outer: u64 = count[..rank - 1].iter().product();
    let mut idx = vec![0u64; rank - 1];
    let mut runs = Vec::with_capacity(outer as usize);
    for _ in 0..outer {
        let mut off = start[rank - 1];
        for i in 0..rank - 1 {
            off += (start[i] + idx[i]) * strides[i];
        }
        runs.push((off, count[rank - 1]));
        for i in (0..rank - 1).rev() {
            idx[i] += 1;
            if idx[i] < count[i] {
                break;
            }
            idx[i] = 0;
        }
    }
    runs
}

fn check_selection(space: &Dataspace, start: &[u64], count: &[u64]) -> Result<()> {
    if start.len() != space.rank() || count.len() != space.rank() {
        return Err(ContainerError::RankMismatch {
            expected: space.rank(),
            got: start.len().max(count.len()),
        });
    }
    for axis in 0..space.rank() {
        let end = start[axis] + count[axis];
        if end > space.dims[axis] {
            return Err(ContainerError::OutOfBounds {
                axis,
                end,
                extent: space.dims[axis],
            });
        }
    }
    Ok(())
}

impl Container for MemContainer {
    fn fileno(&self) -> u64 {
        self.fileno
    }

    fn root(&self) -> ObjRef {
        ObjRef(self.store.root)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn kind(&self, obj: ObjRef) -> Result<ObjectKind> {
        Ok(self.object(obj)?.kind())
    }

    fn links(&self, group: ObjRef) -> Result<Vec<Link>> {
        let g = self.group(group)?;
        let mut out = Vec::with_capacity(g.links.len());
        for (name, objno) in &g.links {
            let kind = self.object(ObjRef(*objno))?.kind();
            out.push(Link {
                name: name.clone(),
                obj: ObjRef(*objno),
                kind,
            });
        }
        Ok(out)
    }

    fn lookup(&self, group: ObjRef, name: &str) -> Result<Option<ObjRef>> {
        Ok(self
            .group(group)?
            .links
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| ObjRef(*o)))
    }

    fn create_group(&mut self, parent: ObjRef, name: &str) -> Result<ObjRef> {
        self.link_new(
            parent,
            name,
            Object::Group(GroupObj {
                links: Vec::new(),
                attrs: Vec::new(),
            }),
        )
    }

    fn move_link(&mut self, group: ObjRef, from: &str, to: &str) -> Result<()> {
        self.check_writable()?;
        if from == to {
            return Ok(());
        }
        let g = self.group_mut(group)?;
        if g.links.iter().any(|(n, _)| n == to) {
            return Err(ContainerError::LinkExists(to.to_string()));
        }
        let link = g
            .links
            .iter_mut()
            .find(|(n, _)| n == from)
            .ok_or_else(|| ContainerError::LinkNotFound(from.to_string()))?;
        link.0 = to.to_string();
        Ok(())
    }

    fn unlink(&mut self, group: ObjRef, name: &str) -> Result<()> {
        self.check_writable()?;
        let g = self.group_mut(group)?;
        let pos = g
            .links
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| ContainerError::LinkNotFound(name.to_string()))?;
        let (_, objno) = g.links.remove(pos);
        self.delete_tree(objno);
        Ok(())
    }

    fn commit_datatype(&mut self, group: ObjRef, name: &str, datatype: &Datatype) -> Result<ObjRef> {
        self.link_new(
            group,
            name,
            Object::Datatype(TypeObj {
                datatype: datatype.clone(),
                attrs: Vec::new(),
            }),
        )
    }

    fn committed_datatype(&self, obj: ObjRef) -> Result<Datatype> {
        match self.object(obj)? {
            Object::Datatype(t) => Ok(t.datatype.clone()),
            _ => Err(ContainerError::WrongKind {
                obj: obj.0,
                expected: "datatype",
            }),
        }
    }

    fn create_dataset(
        &mut self,
        group: ObjRef,
        name: &str,
        datatype: Datatype,
        space: Dataspace,
        dcpl: DatasetCreateProps,
    ) -> Result<ObjRef> {
        self.check_writable()?;
        if let Some(chunks) = dcpl.chunk_dims() {
            if chunks.len() != space.rank() {
                return Err(ContainerError::RankMismatch {
                    expected: space.rank(),
                    got: chunks.len(),
                });
            }
        }
        let resolved = self.resolve(&datatype)?;
        let element_size = if resolved.is_fixed_size() {
            resolved.size().unwrap_or(0) as usize
        } else {
            0
        };
        let data = if element_size > 0 {
            filled_buffer(&dcpl, element_size, space.num_elements())
        } else {
            Vec::new()
        };
        self.link_new(
            group,
            name,
            Object::Dataset(DatasetObj {
                datatype,
                space,
                dcpl,
                attrs: Vec::new(),
                element_size,
                data,
            }),
        )
    }

    fn dataset_type(&self, ds: ObjRef) -> Result<Datatype> {
        Ok(self.dataset(ds)?.datatype.clone())
    }

    fn dataset_space(&self, ds: ObjRef) -> Result<Dataspace> {
        Ok(self.dataset(ds)?.space.clone())
    }

    fn dataset_create_props(&self, ds: ObjRef) -> Result<DatasetCreateProps> {
        Ok(self.dataset(ds)?.dcpl.clone())
    }

    fn open_dataset(&self, ds: ObjRef, dapl: &DatasetAccessProps) -> Result<DatasetHandle> {
        self.dataset(ds)?;
        Ok(DatasetHandle::new(ds, *dapl, Arc::clone(&self.live_handles)))
    }

    fn open_handles(&self) -> usize {
        self.live_handles.load(Ordering::Relaxed)
    }

    fn set_extent(&mut self, ds: ObjRef, dims: &[u64]) -> Result<()> {
        self.check_writable()?;
        let d = self.dataset_mut(ds)?;
        d.space.check_extent(dims)?;
        if d.space.dims == dims {
            return Ok(());
        }
        if d.element_size > 0 {
            let es = d.element_size;
            let new_elems: u64 = dims.iter().product();
            let mut buf = filled_buffer(&d.dcpl, es, new_elems);
            let overlap: Vec<u64> = d.space.dims.iter().zip(dims).map(|(a, b)| *a.min(b)).collect();
            let origin = vec![0u64; dims.len()];
            let src_runs = slab_runs(&d.space.dims, &origin, &overlap);
            let dst_runs = slab_runs(dims, &origin, &overlap);
            for ((s, n), (t, _)) in src_runs.into_iter().zip(dst_runs) {
                let (s, t, n) = (s as usize * es, t as usize * es, n as usize * es);
                buf[t..t + n].copy_from_slice(&d.data[s..s + n]);
            }
            d.data = buf;
        }
        d.space.dims = dims.to_vec();
        Ok(())
    }

    fn write_slab(&mut self, ds: ObjRef, start: &[u64], count: &[u64], data: &[u8]) -> Result<()> {
        self.check_writable()?;
        let d = self.dataset_mut(ds)?;
        if d.element_size == 0 {
            return Err(ContainerError::UnsupportedDatatype(d.datatype.to_string()));
        }
        check_selection(&d.space, start, count)?;
        let es = d.element_size;
        let expected = count.iter().product::<u64>() as usize * es;
        if data.len() != expected {
            return Err(ContainerError::DataLength {
                expected,
                got: data.len(),
            });
        }
        let mut pos = 0usize;
        for (off, n) in slab_runs(&d.space.dims, start, count) {
            let (off, n) = (off as usize * es, n as usize * es);
            d.data[off..off + n].copy_from_slice(&data[pos..pos + n]);
            pos += n;
        }
        Ok(())
    }

    fn read_slab(&self, ds: ObjRef, start: &[u64], count: &[u64]) -> Result<Vec<u8>> {
        let d = self.dataset(ds)?;
        if d.element_size == 0 {
            return Err(ContainerError::UnsupportedDatatype(d.datatype.to_string()));
        }
        check_selection(&d.space, start, count)?;
        let es = d.element_size;
        let mut out = Vec::with_capacity(count.iter().product::<u64>() as usize * es);
        for (off, n) in slab_runs(&d.space.dims, start, count) {
            let (off, n) = (off as usize * es, n as usize * es);
            out.extend_from_slice(&d.data[off..off + n]);
        }
        Ok(out)
    }

    fn attr_names(&self, obj: ObjRef) -> Result<Vec<String>> {
        Ok(self.object(obj)?.attrs().iter().map(|a| a.name.clone()).collect())
    }

    fn read_attr(&self, obj: ObjRef, name: &str) -> Result<Option<Attribute>> {
        Ok(self.object(obj)?.attrs().iter().find(|a| a.name == name).cloned())
    }

    fn write_attr(&mut self, obj: ObjRef, attr: Attribute) -> Result<()> {
        self.check_writable()?;
        let attrs = self.object_mut(obj)?.attrs_mut();
        match attrs.iter_mut().find(|a| a.name == attr.name) {
            Some(existing) => *existing = attr,
            None => attrs.push(attr),
        }
        Ok(())
    }

    fn delete_attr(&mut self, obj: ObjRef, name: &str) -> Result<bool> {
        self.check_writable()?;
        let attrs = self.object_mut(obj)?.attrs_mut();
        let before = attrs.len();
        attrs.retain(|a| a.name != name);
        Ok(attrs.len() != before)
    }

    fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        if let Some(path) = &self.path {
            let bytes = format::encode(&self.store)?;
            let tmp = path.with_extension("nc4h5-tmp");
            std::fs::write(&tmp, &bytes)?;
            std::fs::rename(&tmp, path)?;
            debug!(path = %path.display(), bytes = bytes.len(), "wrote container file");
        }
        Ok(())
    }

    fn image(&self) -> Result<Vec<u8>> {
        format::encode(&self.store)
    }
}
