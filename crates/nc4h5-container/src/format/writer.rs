//! Encoding of a container's object tree as an HDF5 file.
//!
//! Address order is: superblock, object headers in preorder from the root,
//! global heap collections, then raw data (contiguous blocks, chunks and the
//! chunk B-trees). No header size depends on an address, so a first pass
//! sizes everything with placeholder addresses and a second pass writes the
//! real ones.

use std::collections::{HashMap, HashSet};

use tracing::{trace, warn};

use crate::attribute::{AttrData, Attribute};
use crate::codec::encode_block;
use crate::datatype::{CompoundMember, Datatype};
use crate::error::{ContainerError, Result};
use crate::format::btree::{self, ChunkEntry};
use crate::format::heap::HeapWriter;
use crate::format::message::{self as msg, HeaderBuilder, StoredLayout};
use crate::format::{types, write_superblock, SUPERBLOCK_LEN, UNDEF};
use crate::mem::{fill_element, slab_runs, DatasetObj, GroupObj, Object, Store, TypeObj};
use crate::object::ObjRef;
use crate::property_list::Layout;

/// Filtered raw data of one dataset, waiting for an address.
enum Storage {
    Contiguous(Vec<u8>),
    Chunked {
        chunk_dims: Vec<u64>,
        chunks: Vec<(Vec<u64>, Vec<u8>)>,
    },
}

/// Address assigned to a dataset's raw data.
#[derive(Debug, Clone, Copy)]
enum Placement {
    Contiguous { addr: u64, size: u64 },
    Chunked { btree: u64 },
}

struct Encoder<'a> {
    store: &'a Store,
    order: Vec<u64>,
    addrs: HashMap<u64, u64>,
    placements: HashMap<u64, Placement>,
}

/// Encode `store` as a complete HDF5 file.
pub(crate) fn encode(store: &Store) -> Result<Vec<u8>> {
    let mut enc = Encoder {
        store,
        order: preorder(store),
        addrs: HashMap::new(),
        placements: HashMap::new(),
    };

    let mut storage = HashMap::new();
    for &objno in &enc.order {
        if let Some(Object::Dataset(d)) = store.objects.get(&objno) {
            if let Some(s) = dataset_storage(d)? {
                storage.insert(objno, s);
            }
        }
    }

    let mut sizing_heap = HeapWriter::new(0);
    let mut sizes = Vec::with_capacity(enc.order.len());
    for &objno in &enc.order {
        sizes.push(enc.header(objno, &mut sizing_heap)?.len());
    }
    let heap_len = sizing_heap.finish().len() as u64;

    let mut addr = SUPERBLOCK_LEN;
    for (&objno, &size) in enc.order.iter().zip(&sizes) {
        enc.addrs.insert(objno, addr);
        addr += size as u64;
    }
    let heap_base = addr;
    let data_base = heap_base + heap_len;

    let mut raw = Vec::new();
    for &objno in &enc.order {
        match storage.remove(&objno) {
            Some(Storage::Contiguous(bytes)) => {
                enc.placements.insert(
                    objno,
                    Placement::Contiguous {
                        addr: data_base + raw.len() as u64,
                        size: bytes.len() as u64,
                    },
                );
                raw.extend_from_slice(&bytes);
            }
            Some(Storage::Chunked { chunk_dims, chunks }) => {
                let mut entries = Vec::with_capacity(chunks.len());
                for (offsets, bytes) in chunks {
                    let size = u32::try_from(bytes.len()).map_err(|_| {
                        ContainerError::Unencodable(format!("chunk of {} bytes", bytes.len()))
                    })?;
                    entries.push(ChunkEntry {
                        size,
                        filter_mask: 0,
                        offsets,
                        addr: data_base + raw.len() as u64,
                    });
                    raw.extend_from_slice(&bytes);
                }
                let (root, nodes) = btree::build(&entries, &chunk_dims, data_base + raw.len() as u64);
                raw.extend_from_slice(&nodes);
                trace!(objno, chunks = entries.len(), "placed chunked dataset");
                enc.placements.insert(objno, Placement::Chunked { btree: root });
            }
            None => {}
        }
    }

    let mut heap = HeapWriter::new(heap_base);
    let mut headers = Vec::with_capacity((heap_base - SUPERBLOCK_LEN) as usize);
    for (&objno, &size) in enc.order.iter().zip(&sizes) {
        let h = enc.header(objno, &mut heap)?;
        if h.len() != size {
            return Err(ContainerError::Unencodable(format!(
                "object {objno} header changed size between passes"
            )));
        }
        headers.extend_from_slice(&h);
    }
    let heap_bytes = heap.finish();
    if heap_bytes.len() as u64 != heap_len {
        return Err(ContainerError::Unencodable("global heap changed size between passes".into()));
    }

    let eof = data_base + raw.len() as u64;
    let mut out = Vec::with_capacity(eof as usize);
    out.extend_from_slice(&write_superblock(eof, enc.addrs[&store.root]));
    out.extend_from_slice(&headers);
    out.extend_from_slice(&heap_bytes);
    out.extend_from_slice(&raw);
    trace!(eof, objects = enc.order.len(), heap = heap_len, "encoded file");
    Ok(out)
}

/// Objects reachable from the root in preorder, then any unlinked ones.
fn preorder(store: &Store) -> Vec<u64> {
    fn visit(store: &Store, objno: u64, seen: &mut HashSet<u64>, order: &mut Vec<u64>) {
        if !seen.insert(objno) {
            return;
        }
        order.push(objno);
        if let Some(Object::Group(g)) = store.objects.get(&objno) {
            for (_, child) in &g.links {
                visit(store, *child, seen, order);
            }
        }
    }
    let mut seen = HashSet::new();
    let mut order = Vec::with_capacity(store.objects.len());
    visit(store, store.root, &mut seen, &mut order);
    for &objno in store.objects.keys() {
        if !seen.contains(&objno) {
            order.push(objno);
        }
    }
    order
}

fn dataset_storage(d: &DatasetObj) -> Result<Option<Storage>> {
    if d.element_size == 0 || d.space.num_elements() == 0 {
        return Ok(None);
    }
    Ok(match &d.dcpl.layout {
        Layout::Compact => None,
        Layout::Chunked(chunk_dims) if !d.space.is_scalar() => Some(Storage::Chunked {
            chunk_dims: chunk_dims.clone(),
            chunks: split_chunks(d, chunk_dims)?,
        }),
        _ => Some(Storage::Contiguous(d.data.clone())),
    })
}

/// Cut the dataset into full-size chunks in row-major order, padding edge
/// chunks with the fill value, and run each through the pipeline.
fn split_chunks(d: &DatasetObj, chunk_dims: &[u64]) -> Result<Vec<(Vec<u64>, Vec<u8>)>> {
    if chunk_dims.iter().any(|&c| c == 0) {
        return Err(ContainerError::Unencodable("zero chunk dimension".into()));
    }
    let es = d.element_size;
    let dims = &d.space.dims;
    let rank = dims.len();
    let grid: Vec<u64> = dims.iter().zip(chunk_dims).map(|(d, c)| d.div_ceil(*c)).collect();
    let chunk_elems: u64 = chunk_dims.iter().product();
    let fill = fill_element(&d.dcpl, es);
    let origin = vec![0u64; rank];

    let mut out = Vec::new();
    let mut idx = vec![0u64; rank];
    loop {
        let start: Vec<u64> = idx.iter().zip(chunk_dims).map(|(i, c)| i * c).collect();
        let overlap: Vec<u64> = (0..rank).map(|a| chunk_dims[a].min(dims[a] - start[a])).collect();
        let mut buf = Vec::with_capacity(chunk_elems as usize * es);
        for _ in 0..chunk_elems {
            buf.extend_from_slice(&fill);
        }
        let src = slab_runs(dims, &start, &overlap);
        let dst = slab_runs(chunk_dims, &origin, &overlap);
        for ((s, n), (t, _)) in src.into_iter().zip(dst) {
            let (s, t, n) = (s as usize * es, t as usize * es, n as usize * es);
            buf[t..t + n].copy_from_slice(&d.data[s..s + n]);
        }
        out.push((start, encode_block(&buf, &d.dcpl.pipeline, es)?));

        let mut axis = rank;
        loop {
            if axis == 0 {
                return Ok(out);
            }
            axis -= 1;
            idx[axis] += 1;
            if idx[axis] < grid[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
}

fn expand(store: &Store, dt: &Datatype) -> Result<Datatype> {
    Ok(match dt {
        Datatype::Named(obj) => match store.objects.get(&obj.0) {
            Some(Object::Datatype(t)) => expand(store, &t.datatype)?,
            _ => return Err(ContainerError::ObjectNotFound(obj.0)),
        },
        Datatype::Compound { size, members } => Datatype::Compound {
            size: *size,
            members: members
                .iter()
                .map(|m| {
                    Ok(CompoundMember {
                        name: m.name.clone(),
                        offset: m.offset,
                        datatype: expand(store, &m.datatype)?,
                    })
                })
                .collect::<Result<_>>()?,
        },
        Datatype::VarLen { base } => Datatype::VarLen {
            base: Box::new(expand(store, base)?),
        },
        Datatype::Array { base, dims } => Datatype::Array {
            base: Box::new(expand(store, base)?),
            dims: dims.clone(),
        },
        Datatype::Enum { base, members } => Datatype::Enum {
            base: Box::new(expand(store, base)?),
            members: members.clone(),
        },
        other => other.clone(),
    })
}

impl Encoder<'_> {
    /// Header address of an object, or UNDEF while sizing.
    fn addr_of(&self, obj: ObjRef) -> u64 {
        match self.addrs.get(&obj.0) {
            Some(&addr) => addr,
            None => {
                if !self.addrs.is_empty() {
                    warn!(%obj, "reference to a missing object written as undefined");
                }
                UNDEF
            }
        }
    }

    fn header(&self, objno: u64, heap: &mut HeapWriter) -> Result<Vec<u8>> {
        match self.store.objects.get(&objno) {
            Some(Object::Group(g)) => self.group_header(g, heap),
            Some(Object::Dataset(d)) => self.dataset_header(objno, d, heap),
            Some(Object::Datatype(t)) => self.type_header(t, heap),
            None => Err(ContainerError::ObjectNotFound(objno)),
        }
    }

    fn group_header(&self, g: &GroupObj, heap: &mut HeapWriter) -> Result<Vec<u8>> {
        let mut h = HeaderBuilder::new(true);
        h.push(msg::MSG_LINK_INFO, 0, msg::encode_link_info(g.links.len() as u64));
        h.push(msg::MSG_GROUP_INFO, 0, msg::encode_group_info());
        for (corder, (name, child)) in g.links.iter().enumerate() {
            h.push(msg::MSG_LINK, 0, msg::encode_link(name, corder as u64, self.addr_of(ObjRef(*child))));
        }
        self.push_attributes(&mut h, &g.attrs, true, heap)?;
        h.finish()
    }

    fn dataset_header(&self, objno: u64, d: &DatasetObj, heap: &mut HeapWriter) -> Result<Vec<u8>> {
        let track = d.dcpl.track_attr_order;
        let mut h = HeaderBuilder::new(track);
        h.push(msg::MSG_DATASPACE, 0, msg::encode_dataspace(&d.space));
        let (shared, body) = self.datatype_body(&d.datatype)?;
        h.push(
            msg::MSG_DATATYPE,
            msg::FLAG_CONSTANT | if shared { msg::FLAG_SHARED } else { 0 },
            body,
        );
        let alloc_time = match d.dcpl.layout {
            Layout::Compact => msg::ALLOC_EARLY,
            Layout::Contiguous => msg::ALLOC_LATE,
            Layout::Chunked(_) => msg::ALLOC_INCREMENTAL,
        };
        h.push(
            msg::MSG_FILL_VALUE,
            msg::FLAG_CONSTANT,
            msg::encode_fill(alloc_time, d.dcpl.fill_time, d.dcpl.fill_value.as_deref()),
        );
        h.push(msg::MSG_LAYOUT, 0, msg::encode_layout(&self.stored_layout(objno, d)?)?);
        if !d.dcpl.pipeline.is_empty() {
            h.push(msg::MSG_FILTER_PIPELINE, msg::FLAG_CONSTANT, msg::encode_pipeline(&d.dcpl.pipeline)?);
        }
        self.push_attributes(&mut h, &d.attrs, track, heap)?;
        h.finish()
    }

    fn type_header(&self, t: &TypeObj, heap: &mut HeapWriter) -> Result<Vec<u8>> {
        let mut h = HeaderBuilder::new(false);
        let mut body = Vec::new();
        types::encode(&expand(self.store, &t.datatype)?, &mut body)?;
        h.push(msg::MSG_DATATYPE, msg::FLAG_CONSTANT, body);
        self.push_attributes(&mut h, &t.attrs, false, heap)?;
        h.finish()
    }

    fn stored_layout(&self, objno: u64, d: &DatasetObj) -> Result<StoredLayout> {
        let placement = self.placements.get(&objno).copied();
        Ok(match &d.dcpl.layout {
            Layout::Compact => StoredLayout::Compact(d.data.clone()),
            Layout::Chunked(chunk_dims) if !d.space.is_scalar() => {
                let mut dims = Vec::with_capacity(chunk_dims.len() + 1);
                for &c in chunk_dims {
                    dims.push(
                        u32::try_from(c)
                            .map_err(|_| ContainerError::Unencodable(format!("chunk dimension {c}")))?,
                    );
                }
                dims.push(types::stored_size(&expand(self.store, &d.datatype)?)?);
                let btree = match placement {
                    Some(Placement::Chunked { btree }) => btree,
                    _ => UNDEF,
                };
                StoredLayout::Chunked { btree, dims }
            }
            _ => match placement {
                Some(Placement::Contiguous { addr, size }) => StoredLayout::Contiguous { addr, size },
                _ => StoredLayout::Contiguous {
                    addr: UNDEF,
                    size: d.space.num_elements()
                        * u64::from(types::stored_size(&expand(self.store, &d.datatype)?)?),
                },
            },
        })
    }

    /// Datatype message body and whether it is a shared reference.
    fn datatype_body(&self, dt: &Datatype) -> Result<(bool, Vec<u8>)> {
        if let Datatype::Named(obj) = dt {
            return Ok((true, msg::encode_shared(self.addr_of(*obj))));
        }
        let mut body = Vec::new();
        types::encode(&expand(self.store, dt)?, &mut body)?;
        Ok((false, body))
    }

    fn push_attributes(&self, h: &mut HeaderBuilder, attrs: &[Attribute], track: bool, heap: &mut HeapWriter) -> Result<()> {
        let count = u16::try_from(attrs.len())
            .map_err(|_| ContainerError::Unencodable(format!("{} attributes on one object", attrs.len())))?;
        if track {
            h.push(msg::MSG_ATTRIBUTE_INFO, 0, msg::encode_attribute_info(count));
        }
        for (corder, attr) in attrs.iter().enumerate() {
            let (shared, dt) = self.datatype_body(&attr.datatype)?;
            let ds = msg::encode_dataspace(&attr.space);
            let raw = self.attribute_raw(attr, heap)?;
            let body = msg::encode_attribute(&attr.name, shared, &dt, &ds, &raw)?;
            if track {
                h.push_ordered(msg::MSG_ATTRIBUTE, corder as u16, body);
            } else {
                h.push(msg::MSG_ATTRIBUTE, 0, body);
            }
        }
        Ok(())
    }

    fn attribute_raw(&self, attr: &Attribute, heap: &mut HeapWriter) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match &attr.data {
            AttrData::Bytes(b) => out.extend_from_slice(b),
            AttrData::Strings(strings) => {
                for s in strings {
                    vlen_slot(&mut out, heap, s.as_bytes(), s.len())?;
                }
            }
            AttrData::VarLen(records) => {
                let base = match expand(self.store, &attr.datatype)? {
                    Datatype::VarLen { base } => types::stored_size(&base)?.max(1) as usize,
                    other => {
                        return Err(ContainerError::Unencodable(format!(
                            "attribute {}: variable-length data with type {other}",
                            attr.name
                        )))
                    }
                };
                for r in records {
                    vlen_slot(&mut out, heap, r, r.len() / base)?;
                }
            }
            AttrData::References(lists) => {
                for list in lists {
                    let payload: Vec<u8> = list.iter().flat_map(|o| self.addr_of(*o).to_le_bytes()).collect();
                    vlen_slot(&mut out, heap, &payload, list.len())?;
                }
            }
            AttrData::Backlinks(links) => {
                for (obj, axis) in links {
                    out.extend_from_slice(&self.addr_of(*obj).to_le_bytes());
                    out.extend_from_slice(&axis.to_le_bytes());
                }
            }
        }
        Ok(out)
    }
}

/// Append one variable-length element. Empty elements take no heap space.
fn vlen_slot(out: &mut Vec<u8>, heap: &mut HeapWriter, payload: &[u8], count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| ContainerError::Unencodable(format!("variable-length element of {count} items")))?;
    out.extend_from_slice(&count.to_le_bytes());
    if count == 0 {
        out.extend_from_slice(&[0u8; 12]);
        return Ok(());
    }
    let (collection, index) = heap.push(payload);
    out.extend_from_slice(&collection.to_le_bytes());
    out.extend_from_slice(&index.to_le_bytes());
    Ok(())
}
