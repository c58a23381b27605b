//! Decoding of an HDF5 file into a container's object tree.
//!
//! Objects are numbered by their object header address, so references read
//! back from attributes name the same objects as the links that reach them.
//! Only compact link and attribute storage is understood.

use std::collections::{BTreeMap, HashMap, HashSet};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace};

use crate::attribute::{AttrData, Attribute};
use crate::codec::decode_block;
use crate::dataspace::Dataspace;
use crate::datatype::{CompoundMember, Datatype};
use crate::error::{ContainerError, Result};
use crate::filter_pipeline::FilterPipeline;
use crate::format::btree;
use crate::format::cursor::Cursor;
use crate::format::heap::read_collection;
use crate::format::message::{self as msg, ObjectHeader, RawMessage, StoredLayout};
use crate::format::{read_superblock, types, UNDEF};
use crate::mem::{filled_buffer, slab_runs, DatasetObj, GroupObj, Object, Store, TypeObj};
use crate::object::ObjRef;
use crate::property_list::{DatasetCreateProps, FillTime, Layout};

fn bad(what: String) -> ContainerError {
    ContainerError::BadImage(what)
}

/// Decode a complete HDF5 file.
pub(crate) fn decode(bytes: &[u8]) -> Result<Store> {
    let root = read_superblock(bytes)?;
    let mut dec = Decoder {
        bytes,
        objects: BTreeMap::new(),
        loading: HashSet::new(),
        heaps: HashMap::new(),
        committed: HashMap::new(),
    };
    dec.load(root)?;
    dec.name_nested_types();
    let next_objno = dec.objects.keys().next_back().map_or(root, |k| *k) + 1;
    debug!(objects = dec.objects.len(), root, "decoded file");
    Ok(Store {
        next_objno,
        root,
        objects: dec.objects,
    })
}

struct Decoder<'a> {
    bytes: &'a [u8],
    objects: BTreeMap<u64, Object>,
    loading: HashSet<u64>,
    heaps: HashMap<u64, HashMap<u16, &'a [u8]>>,
    /// Committed datatypes by address, fully expanded.
    committed: HashMap<u64, Datatype>,
}

fn required<'h, 'a>(header: &'h ObjectHeader<'a>, kind: u8, addr: u64) -> Result<&'h RawMessage<'a>> {
    header
        .find(kind)
        .ok_or_else(|| bad(format!("dataset at {addr} has no message of type {kind:#04x}")))
}

impl<'a> Decoder<'a> {
    fn load(&mut self, addr: u64) -> Result<()> {
        if self.objects.contains_key(&addr) || !self.loading.insert(addr) {
            return Ok(());
        }
        let header = msg::parse_header(self.bytes, addr)?;
        let object = if header.has(msg::MSG_LINK_INFO) || header.has(msg::MSG_LINK) || header.has(msg::MSG_GROUP_INFO)
        {
            Object::Group(self.group(addr, &header)?)
        } else if header.has(msg::MSG_LAYOUT) {
            Object::Dataset(self.dataset(addr, &header)?)
        } else if let Some(m) = header.find(msg::MSG_DATATYPE) {
            let datatype = types::decode(&mut Cursor::new(m.body))?;
            self.committed.insert(addr, datatype.clone());
            Object::Datatype(TypeObj {
                datatype,
                attrs: self.attributes(&header)?,
            })
        } else {
            return Err(bad(format!("object header at {addr} is not a group, dataset or datatype")));
        };
        trace!(addr, kind = %object_kind(&object), "loaded object");
        self.objects.insert(addr, object);
        Ok(())
    }

    fn group(&mut self, addr: u64, header: &ObjectHeader<'a>) -> Result<GroupObj> {
        if let Some(info) = header.find(msg::MSG_LINK_INFO) {
            if msg::link_info_is_dense(info.body)? {
                return Err(bad(format!("group at {addr} uses dense link storage")));
            }
        }
        let mut found = Vec::new();
        for m in header.all(msg::MSG_LINK) {
            match msg::decode_link(m.body)? {
                Some(link) => found.push(link),
                None => debug!(addr, "skipping a soft or external link"),
            }
        }
        found.sort_by_key(|l| l.corder.unwrap_or(u64::MAX));
        let mut links = Vec::with_capacity(found.len());
        for link in found {
            self.load(link.addr)?;
            links.push((link.name, link.addr));
        }
        Ok(GroupObj {
            links,
            attrs: self.attributes(header)?,
        })
    }

    fn dataset(&mut self, addr: u64, header: &ObjectHeader<'a>) -> Result<DatasetObj> {
        let space = msg::decode_dataspace(&mut Cursor::new(required(header, msg::MSG_DATASPACE, addr)?.body))?;
        let dt = required(header, msg::MSG_DATATYPE, addr)?;
        let (datatype, expanded) = self.datatype_field(dt.flags & msg::FLAG_SHARED != 0, dt.body)?;
        let (fill_time, fill_value) = match header.find(msg::MSG_FILL_VALUE) {
            Some(m) => msg::decode_fill(m.body)?,
            None => (FillTime::IfSet, None),
        };
        let pipeline = match header.find(msg::MSG_FILTER_PIPELINE) {
            Some(m) => msg::decode_pipeline(m.body)?,
            None => FilterPipeline::new(),
        };
        let stored = msg::decode_layout(required(header, msg::MSG_LAYOUT, addr)?.body)?;
        let layout = match &stored {
            StoredLayout::Compact(_) => Layout::Compact,
            StoredLayout::Contiguous { .. } => Layout::Contiguous,
            StoredLayout::Chunked { dims, .. } => {
                if dims.len() != space.rank() + 1 {
                    return Err(bad(format!("dataset at {addr}: chunk rank does not match its dataspace")));
                }
                Layout::Chunked(dims[..space.rank()].iter().map(|&d| u64::from(d)).collect())
            }
        };
        let dcpl = DatasetCreateProps {
            layout,
            pipeline,
            fill_value,
            fill_time,
            track_attr_order: header.flags & msg::HDR_ATTR_ORDER_TRACKED != 0,
        };
        let element_size = if expanded.is_fixed_size() {
            expanded.size().unwrap_or(0) as usize
        } else {
            0
        };
        let data = if element_size > 0 {
            self.raw_data(addr, &space, &dcpl, &stored, element_size)?
        } else {
            Vec::new()
        };
        Ok(DatasetObj {
            datatype,
            space,
            attrs: self.attributes(header)?,
            dcpl,
            element_size,
            data,
        })
    }

    fn raw_data(
        &self,
        addr: u64,
        space: &Dataspace,
        dcpl: &DatasetCreateProps,
        stored: &StoredLayout,
        es: usize,
    ) -> Result<Vec<u8>> {
        let elements = space.num_elements();
        let expected = elements as usize * es;
        match stored {
            StoredLayout::Compact(data) if data.is_empty() => Ok(filled_buffer(dcpl, es, elements)),
            StoredLayout::Compact(data) => {
                if data.len() != expected {
                    return Err(ContainerError::DataLength {
                        expected,
                        got: data.len(),
                    });
                }
                Ok(data.clone())
            }
            StoredLayout::Contiguous { addr: data_addr, .. } if *data_addr == UNDEF || elements == 0 => {
                Ok(filled_buffer(dcpl, es, elements))
            }
            StoredLayout::Contiguous { addr: data_addr, size } => {
                if (*size as usize) < expected {
                    return Err(bad(format!("dataset at {addr} stores {size} bytes for {expected}")));
                }
                let mut cur = Cursor::at(self.bytes, *data_addr, "dataset data")?;
                Ok(cur.take(expected)?.to_vec())
            }
            StoredLayout::Chunked { btree, dims } => {
                let mut buf = filled_buffer(dcpl, es, elements);
                if *btree == UNDEF || elements == 0 {
                    return Ok(buf);
                }
                let rank = space.rank();
                let chunk_dims: Vec<u64> = dims[..rank].iter().map(|&d| u64::from(d)).collect();
                let chunk_bytes = chunk_dims.iter().product::<u64>() as usize * es;
                let origin = vec![0u64; rank];
                for entry in btree::collect(self.bytes, *btree, rank)? {
                    if entry.offsets.iter().zip(&space.dims).any(|(o, d)| o >= d) {
                        continue;
                    }
                    let mut cur = Cursor::at(self.bytes, entry.addr, "chunk")?;
                    let stored = cur.take(entry.size as usize)?;
                    let active = FilterPipeline {
                        filters: dcpl
                            .pipeline
                            .filters
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| entry.filter_mask & (1 << i) == 0)
                            .map(|(_, f)| f.clone())
                            .collect(),
                    };
                    let chunk = decode_block(stored, &active, es)?;
                    if chunk.len() != chunk_bytes {
                        return Err(ContainerError::DataLength {
                            expected: chunk_bytes,
                            got: chunk.len(),
                        });
                    }
                    let overlap: Vec<u64> = (0..rank)
                        .map(|a| chunk_dims[a].min(space.dims[a] - entry.offsets[a]))
                        .collect();
                    let src = slab_runs(&chunk_dims, &origin, &overlap);
                    let dst = slab_runs(&space.dims, &entry.offsets, &overlap);
                    for ((s, n), (t, _)) in src.into_iter().zip(dst) {
                        let (s, t, n) = (s as usize * es, t as usize * es, n as usize * es);
                        buf[t..t + n].copy_from_slice(&chunk[s..s + n]);
                    }
                }
                Ok(buf)
            }
        }
    }

    /// The stored datatype and its fully expanded form.
    fn datatype_field(&mut self, shared: bool, body: &'a [u8]) -> Result<(Datatype, Datatype)> {
        if shared {
            let addr = msg::decode_shared(body)?;
            let expanded = self.committed_type(addr)?;
            return Ok((Datatype::Named(ObjRef(addr)), expanded));
        }
        let dt = types::decode(&mut Cursor::new(body))?;
        Ok((dt.clone(), dt))
    }

    fn committed_type(&mut self, addr: u64) -> Result<Datatype> {
        if !self.committed.contains_key(&addr) {
            self.load(addr)?;
        }
        self.committed
            .get(&addr)
            .cloned()
            .ok_or_else(|| bad(format!("shared datatype at {addr} is not a committed datatype")))
    }

    fn attributes(&mut self, header: &ObjectHeader<'a>) -> Result<Vec<Attribute>> {
        if let Some(info) = header.find(msg::MSG_ATTRIBUTE_INFO) {
            if msg::attribute_info_is_dense(info.body)? {
                return Err(bad("dense attribute storage is not supported".into()));
            }
        }
        let mut raw: Vec<&RawMessage<'a>> = header.all(msg::MSG_ATTRIBUTE).collect();
        raw.sort_by_key(|m| m.corder.unwrap_or(u16::MAX));
        let mut out = Vec::with_capacity(raw.len());
        for m in raw {
            out.push(self.attribute(m.body)?);
        }
        Ok(out)
    }

    fn attribute(&mut self, body: &'a [u8]) -> Result<Attribute> {
        let a = msg::decode_attribute(body)?;
        let (datatype, expanded) = self.datatype_field(a.shared_type, a.datatype)?;
        let space = msg::decode_dataspace(&mut Cursor::new(a.dataspace))?;
        let data = self.attribute_data(&a.name, &expanded, &space, a.raw)?;
        Ok(Attribute {
            name: a.name,
            datatype,
            space,
            data,
        })
    }

    fn attribute_data(&mut self, name: &str, dt: &Datatype, space: &Dataspace, raw: &'a [u8]) -> Result<AttrData> {
        let n = space.num_elements() as usize;
        let slots = |width: usize| -> Result<std::slice::ChunksExact<'a, u8>> {
            if raw.len() < n * width {
                return Err(bad(format!("attribute {name}: {} bytes for {n} elements", raw.len())));
            }
            Ok(raw[..n * width].chunks_exact(width))
        };
        Ok(match dt {
            Datatype::VarString => {
                let mut out = Vec::with_capacity(n);
                for slot in slots(types::VLEN_SLOT as usize)? {
                    let bytes = self.vlen_payload(slot, 1)?;
                    out.push(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|_| bad(format!("attribute {name}: string is not UTF-8")))?,
                    );
                }
                AttrData::Strings(out)
            }
            Datatype::VarLen { base } if **base == Datatype::Reference => {
                let mut out = Vec::with_capacity(n);
                for slot in slots(types::VLEN_SLOT as usize)? {
                    let bytes = self.vlen_payload(slot, types::REF_SIZE as usize)?;
                    out.push(bytes.chunks_exact(8).map(|r| ObjRef(LittleEndian::read_u64(r))).collect());
                }
                AttrData::References(out)
            }
            Datatype::VarLen { base } => {
                let width = types::stored_size(base)? as usize;
                let mut out = Vec::with_capacity(n);
                for slot in slots(types::VLEN_SLOT as usize)? {
                    out.push(self.vlen_payload(slot, width)?.to_vec());
                }
                AttrData::VarLen(out)
            }
            Datatype::Compound { size: 12, members } if is_backlink(members) => AttrData::Backlinks(
                slots(12)?
                    .map(|r| (ObjRef(LittleEndian::read_u64(&r[..8])), LittleEndian::read_u32(&r[8..])))
                    .collect(),
            ),
            _ => AttrData::Bytes(raw.to_vec()),
        })
    }

    /// Payload of one variable-length element of `len * width` bytes.
    fn vlen_payload(&mut self, slot: &[u8], width: usize) -> Result<&'a [u8]> {
        let len = LittleEndian::read_u32(&slot[..4]) as usize;
        if len == 0 {
            return Ok(&[]);
        }
        let collection = LittleEndian::read_u64(&slot[4..12]);
        let index = u16::try_from(LittleEndian::read_u32(&slot[12..16]))
            .map_err(|_| bad(format!("heap index out of range in collection {collection}")))?;
        if !self.heaps.contains_key(&collection) {
            let objects = read_collection(self.bytes, collection)?;
            self.heaps.insert(collection, objects);
        }
        let obj = self
            .heaps
            .get(&collection)
            .and_then(|h| h.get(&index))
            .copied()
            .ok_or_else(|| bad(format!("heap object {index} missing from collection {collection}")))?;
        let want = len * width;
        if obj.len() < want {
            return Err(bad(format!("heap object {index} holds {} bytes, need {want}", obj.len())));
        }
        Ok(&obj[..want])
    }

    /// Nested positions cannot hold shared references in the file, so
    /// members equal to a committed type are pointed back at it.
    fn name_nested_types(&mut self) {
        let mut committed: Vec<(u64, Datatype)> = self.committed.iter().map(|(a, d)| (*a, d.clone())).collect();
        if committed.is_empty() {
            return;
        }
        committed.sort_by_key(|(a, _)| *a);
        for object in self.objects.values_mut() {
            let attrs = match object {
                Object::Group(g) => &mut g.attrs,
                Object::Dataset(d) => {
                    d.datatype = name_members(&d.datatype, &committed);
                    &mut d.attrs
                }
                Object::Datatype(t) => {
                    t.datatype = name_members(&t.datatype, &committed);
                    &mut t.attrs
                }
            };
            for attr in attrs {
                attr.datatype = name_members(&attr.datatype, &committed);
            }
        }
    }
}

fn object_kind(object: &Object) -> &'static str {
    match object {
        Object::Group(_) => "group",
        Object::Dataset(_) => "dataset",
        Object::Datatype(_) => "datatype",
    }
}

fn is_backlink(members: &[CompoundMember]) -> bool {
    members.len() == 2
        && members[0].offset == 0
        && members[0].datatype == Datatype::Reference
        && members[1].offset == 8
        && matches!(members[1].datatype, Datatype::Integer { size: 4, .. })
}

fn is_user_class(dt: &Datatype) -> bool {
    matches!(
        dt,
        Datatype::Compound { .. } | Datatype::Enum { .. } | Datatype::Opaque { .. } | Datatype::VarLen { .. }
    )
}

/// A nested type replaced by a reference to the committed type it equals.
fn named_or_nested(dt: &Datatype, committed: &[(u64, Datatype)]) -> Datatype {
    if is_user_class(dt) {
        if let Some((addr, _)) = committed.iter().find(|(_, c)| c == dt) {
            return Datatype::Named(ObjRef(*addr));
        }
    }
    name_members(dt, committed)
}

fn name_members(dt: &Datatype, committed: &[(u64, Datatype)]) -> Datatype {
    match dt {
        Datatype::Compound { size, members } => Datatype::Compound {
            size: *size,
            members: members
                .iter()
                .map(|m| CompoundMember {
                    name: m.name.clone(),
                    offset: m.offset,
                    datatype: named_or_nested(&m.datatype, committed),
                })
                .collect(),
        },
        Datatype::VarLen { base } => Datatype::VarLen {
            base: Box::new(named_or_nested(base, committed)),
        },
        Datatype::Array { base, dims } => Datatype::Array {
            base: Box::new(named_or_nested(base, committed)),
            dims: dims.clone(),
        },
        other => other.clone(),
    }
}
