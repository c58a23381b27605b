//! Version 2 object headers and the header messages the container uses.

use crate::dataspace::Dataspace;
use crate::error::{ContainerError, Result};
use crate::filter_pipeline::{FilterDescription, FilterPipeline};
use crate::format::checksum::lookup3;
use crate::format::cursor::{truncated, Cursor};
use crate::format::UNDEF;
use crate::property_list::FillTime;

pub(crate) const MSG_NIL: u8 = 0x00;
pub(crate) const MSG_DATASPACE: u8 = 0x01;
pub(crate) const MSG_LINK_INFO: u8 = 0x02;
pub(crate) const MSG_DATATYPE: u8 = 0x03;
pub(crate) const MSG_FILL_VALUE: u8 = 0x05;
pub(crate) const MSG_LINK: u8 = 0x06;
pub(crate) const MSG_LAYOUT: u8 = 0x08;
pub(crate) const MSG_GROUP_INFO: u8 = 0x0a;
pub(crate) const MSG_FILTER_PIPELINE: u8 = 0x0b;
pub(crate) const MSG_ATTRIBUTE: u8 = 0x0c;
pub(crate) const MSG_CONTINUATION: u8 = 0x10;
pub(crate) const MSG_ATTRIBUTE_INFO: u8 = 0x15;

/// Message flag: the message content never changes.
pub(crate) const FLAG_CONSTANT: u8 = 0x01;
/// Message flag: the body is a reference to a message in another header.
pub(crate) const FLAG_SHARED: u8 = 0x02;

const OHDR: &[u8; 4] = b"OHDR";
const OCHK: &[u8; 4] = b"OCHK";

/// Header flag: attribute creation order is tracked.
pub(crate) const HDR_ATTR_ORDER_TRACKED: u8 = 0x04;
const HDR_TIMES: u8 = 0x20;
const HDR_PHASE_CHANGE: u8 = 0x10;

const MAX_CONTINUATIONS: usize = 1024;

const SHARED_VERSION: u8 = 3;
const SHARE_SOHM: u8 = 1;
const SHARE_COMMITTED: u8 = 2;

// ---------------------------------------------------------------------------
// Object headers
// ---------------------------------------------------------------------------

/// Accumulates messages for one object header.
#[derive(Debug)]
pub(crate) struct HeaderBuilder {
    track_order: bool,
    messages: Vec<(u8, u8, u16, Vec<u8>)>,
}

impl HeaderBuilder {
    pub fn new(track_order: bool) -> Self {
        Self {
            track_order,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, kind: u8, flags: u8, body: Vec<u8>) {
        self.messages.push((kind, flags, 0, body));
    }

    /// Push an attribute message carrying its creation index.
    pub fn push_ordered(&mut self, kind: u8, corder: u16, body: Vec<u8>) {
        self.messages.push((kind, 0, corder, body));
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let mut chunk = Vec::new();
        for (kind, flags, corder, body) in &self.messages {
            let len = u16::try_from(body.len()).map_err(|_| {
                ContainerError::Unencodable(format!(
                    "header message 0x{kind:02x} of {} bytes exceeds 65535",
                    body.len()
                ))
            })?;
            chunk.push(*kind);
            chunk.extend_from_slice(&len.to_le_bytes());
            chunk.push(*flags);
            if self.track_order {
                chunk.extend_from_slice(&corder.to_le_bytes());
            }
            chunk.extend_from_slice(body);
        }
        let (width_code, width) = match chunk.len() {
            0..=0xff => (0u8, 1usize),
            0x100..=0xffff => (1, 2),
            _ => (2, 4),
        };
        let mut out = Vec::with_capacity(chunk.len() + 16);
        out.extend_from_slice(OHDR);
        out.push(2);
        out.push(width_code | if self.track_order { HDR_ATTR_ORDER_TRACKED } else { 0 });
        out.extend_from_slice(&(chunk.len() as u64).to_le_bytes()[..width]);
        out.extend_from_slice(&chunk);
        let sum = lookup3(&out);
        out.extend_from_slice(&sum.to_le_bytes());
        Ok(out)
    }
}

/// One message read from an object header.
#[derive(Debug, Clone)]
pub(crate) struct RawMessage<'a> {
    pub kind: u8,
    pub flags: u8,
    pub corder: Option<u16>,
    pub body: &'a [u8],
}

/// A parsed object header.
#[derive(Debug)]
pub(crate) struct ObjectHeader<'a> {
    pub flags: u8,
    pub messages: Vec<RawMessage<'a>>,
}

impl<'a> ObjectHeader<'a> {
    pub fn find(&self, kind: u8) -> Option<&RawMessage<'a>> {
        self.messages.iter().find(|m| m.kind == kind)
    }

    pub fn has(&self, kind: u8) -> bool {
        self.find(kind).is_some()
    }

    pub fn all(&self, kind: u8) -> impl Iterator<Item = &RawMessage<'a>> {
        self.messages.iter().filter(move |m| m.kind == kind)
    }
}

fn verify_checksum(bytes: &[u8], start: usize, end: usize, what: &str) -> Result<()> {
    if end.saturating_add(4) > bytes.len() {
        return Err(truncated(what));
    }
    let stored = u32::from_le_bytes([bytes[end], bytes[end + 1], bytes[end + 2], bytes[end + 3]]);
    if lookup3(&bytes[start..end]) != stored {
        return Err(ContainerError::BadImage(format!("{what} checksum mismatch at {start}")));
    }
    Ok(())
}

fn read_messages<'a>(
    cur: &mut Cursor<'a>,
    end: usize,
    track_order: bool,
    out: &mut Vec<RawMessage<'a>>,
    continuations: &mut Vec<(u64, u64)>,
) -> Result<()> {
    let header_len = if track_order { 6 } else { 4 };
    while cur.pos() + header_len <= end {
        let kind = cur.u8()?;
        let len = cur.u16()? as usize;
        let flags = cur.u8()?;
        let corder = if track_order { Some(cur.u16()?) } else { None };
        if cur.pos() + len > end {
            return Err(ContainerError::BadImage("header message overruns its chunk".into()));
        }
        let body = cur.take(len)?;
        match kind {
            MSG_NIL => {}
            MSG_CONTINUATION => {
                let mut c = Cursor::new(body);
                continuations.push((c.u64()?, c.u64()?));
            }
            _ => out.push(RawMessage {
                kind,
                flags,
                corder,
                body,
            }),
        }
    }
    Ok(())
}

/// Parse the version 2 object header at `addr`, following continuation
/// chunks.
pub(crate) fn parse_header(bytes: &[u8], addr: u64) -> Result<ObjectHeader<'_>> {
    let mut cur = Cursor::at(bytes, addr, "object header")?;
    let start = cur.pos();
    if cur.take(4)? != OHDR {
        return Err(ContainerError::BadImage(format!(
            "no version 2 object header at {addr}"
        )));
    }
    let version = cur.u8()?;
    if version != 2 {
        return Err(ContainerError::BadImage(format!("object header version {version}")));
    }
    let flags = cur.u8()?;
    if flags & HDR_TIMES != 0 {
        cur.skip(16)?;
    }
    if flags & HDR_PHASE_CHANGE != 0 {
        cur.skip(4)?;
    }
    let width = 1usize << (flags & 0x03);
    let chunk_len = cur.uint(width)? as usize;
    let end = cur
        .pos()
        .checked_add(chunk_len)
        .ok_or_else(|| truncated("object header"))?;
    verify_checksum(bytes, start, end, "object header")?;
    let track_order = flags & HDR_ATTR_ORDER_TRACKED != 0;

    let mut messages = Vec::new();
    let mut continuations = Vec::new();
    read_messages(&mut cur, end, track_order, &mut messages, &mut continuations)?;
    let mut seen = 0;
    while seen < continuations.len() {
        if seen == MAX_CONTINUATIONS {
            return Err(ContainerError::BadImage(format!("object header at {addr} has too many continuations")));
        }
        let (caddr, clen) = continuations[seen];
        seen += 1;
        let mut c = Cursor::at(bytes, caddr, "header continuation")?;
        let cstart = c.pos();
        if c.take(4)? != OCHK {
            return Err(ContainerError::BadImage(format!("no continuation chunk at {caddr}")));
        }
        let cend = cstart + (clen as usize).saturating_sub(4);
        verify_checksum(bytes, cstart, cend, "continuation chunk")?;
        read_messages(&mut c, cend, track_order, &mut messages, &mut continuations)?;
    }
    Ok(ObjectHeader { flags, messages })
}

// ---------------------------------------------------------------------------
// Shared message references
// ---------------------------------------------------------------------------

/// Body of a shared message pointing at the object header `addr`.
pub(crate) fn encode_shared(addr: u64) -> Vec<u8> {
    let mut out = vec![SHARED_VERSION, SHARE_COMMITTED];
    out.extend_from_slice(&addr.to_le_bytes());
    out
}

/// Object header address named by a shared message body.
pub(crate) fn decode_shared(body: &[u8]) -> Result<u64> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    let kind = cur.u8()?;
    match version {
        1 => {
            cur.skip(6)?;
            cur.u64()
        }
        2 => cur.u64(),
        3 if kind == SHARE_SOHM => Err(ContainerError::BadImage(
            "messages in the shared message heap are not supported".into(),
        )),
        3 => cur.u64(),
        v => Err(ContainerError::BadImage(format!("shared message version {v}"))),
    }
}

// ---------------------------------------------------------------------------
// Dataspace (0x0001)
// ---------------------------------------------------------------------------

pub(crate) fn encode_dataspace(space: &Dataspace) -> Vec<u8> {
    let mut out = vec![
        2,
        space.rank() as u8,
        u8::from(space.max_dims.is_some()),
        u8::from(!space.is_scalar()),
    ];
    for d in &space.dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    if let Some(max) = &space.max_dims {
        for m in max {
            out.extend_from_slice(&m.to_le_bytes());
        }
    }
    out
}

pub(crate) fn decode_dataspace(cur: &mut Cursor<'_>) -> Result<Dataspace> {
    let version = cur.u8()?;
    let rank = cur.u8()? as usize;
    let flags = cur.u8()?;
    let kind = match version {
        1 => {
            cur.skip(5)?;
            if rank == 0 {
                0
            } else {
                1
            }
        }
        2 => cur.u8()?,
        v => return Err(ContainerError::BadImage(format!("dataspace version {v}"))),
    };
    if kind == 2 {
        return Ok(Dataspace::simple(&[0]));
    }
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(cur.u64()?);
    }
    let max_dims = if flags & 0x01 != 0 {
        let mut max = Vec::with_capacity(rank);
        for _ in 0..rank {
            max.push(cur.u64()?);
        }
        Some(max)
    } else {
        None
    };
    Ok(Dataspace { dims, max_dims })
}

// ---------------------------------------------------------------------------
// Fill value (0x0005)
// ---------------------------------------------------------------------------

/// Space allocation times.
pub(crate) const ALLOC_EARLY: u8 = 1;
pub(crate) const ALLOC_LATE: u8 = 2;
pub(crate) const ALLOC_INCREMENTAL: u8 = 3;

pub(crate) fn encode_fill(alloc_time: u8, fill_time: FillTime, value: Option<&[u8]>) -> Vec<u8> {
    let write_time = match fill_time {
        FillTime::Alloc => 0u8,
        FillTime::Never => 1,
        FillTime::IfSet => 2,
    };
    let mut flags = alloc_time | (write_time << 2);
    let mut out = vec![3];
    match value {
        Some(v) => {
            flags |= 0x20;
            out.push(flags);
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v);
        }
        None => out.push(flags),
    }
    out
}

pub(crate) fn decode_fill(body: &[u8]) -> Result<(FillTime, Option<Vec<u8>>)> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    if version != 3 {
        return Err(ContainerError::BadImage(format!("fill value message version {version}")));
    }
    let flags = cur.u8()?;
    let fill_time = match (flags >> 2) & 0x03 {
        0 => FillTime::Alloc,
        1 => FillTime::Never,
        _ => FillTime::IfSet,
    };
    let value = if flags & 0x20 != 0 {
        let len = cur.u32()? as usize;
        Some(cur.take(len)?.to_vec())
    } else {
        None
    };
    Ok((fill_time, value))
}

// ---------------------------------------------------------------------------
// Data layout (0x0008), version 3
// ---------------------------------------------------------------------------

/// Where a dataset's raw data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoredLayout {
    Compact(Vec<u8>),
    Contiguous { addr: u64, size: u64 },
    /// `dims` has one entry per axis plus the element size.
    Chunked { btree: u64, dims: Vec<u32> },
}

pub(crate) fn encode_layout(layout: &StoredLayout) -> Result<Vec<u8>> {
    let mut out = vec![3];
    match layout {
        StoredLayout::Compact(data) => {
            let len = u16::try_from(data.len())
                .map_err(|_| ContainerError::Unencodable("compact data exceeds 65535 bytes".into()))?;
            out.push(0);
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(data);
        }
        StoredLayout::Contiguous { addr, size } => {
            out.push(1);
            out.extend_from_slice(&addr.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        StoredLayout::Chunked { btree, dims } => {
            out.push(2);
            out.push(dims.len() as u8);
            out.extend_from_slice(&btree.to_le_bytes());
            for d in dims {
                out.extend_from_slice(&d.to_le_bytes());
            }
        }
    }
    Ok(out)
}

pub(crate) fn decode_layout(body: &[u8]) -> Result<StoredLayout> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    if version != 3 {
        return Err(ContainerError::BadImage(format!("data layout version {version}")));
    }
    Ok(match cur.u8()? {
        0 => {
            let len = cur.u16()? as usize;
            StoredLayout::Compact(cur.take(len)?.to_vec())
        }
        1 => StoredLayout::Contiguous {
            addr: cur.u64()?,
            size: cur.u64()?,
        },
        2 => {
            let n = cur.u8()? as usize;
            let btree = cur.u64()?;
            let mut dims = Vec::with_capacity(n);
            for _ in 0..n {
                dims.push(cur.u32()?);
            }
            StoredLayout::Chunked { btree, dims }
        }
        other => return Err(ContainerError::BadImage(format!("layout class {other}"))),
    })
}

// ---------------------------------------------------------------------------
// Filter pipeline (0x000B), version 2
// ---------------------------------------------------------------------------

pub(crate) fn encode_pipeline(pipeline: &FilterPipeline) -> Result<Vec<u8>> {
    let mut out = vec![2, pipeline.len() as u8];
    for f in &pipeline.filters {
        let id = u16::try_from(f.filter_id)
            .map_err(|_| ContainerError::Unencodable(format!("filter id {} exceeds 65535", f.filter_id)))?;
        out.extend_from_slice(&id.to_le_bytes());
        let name = match (&f.name, id >= 256) {
            (Some(n), true) => {
                let mut b = n.as_bytes().to_vec();
                b.push(0);
                b
            }
            _ => Vec::new(),
        };
        if id >= 256 {
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        }
        out.extend_from_slice(&f.flags.to_le_bytes());
        out.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
        out.extend_from_slice(&name);
        for v in &f.client_data {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    Ok(out)
}

pub(crate) fn decode_pipeline(body: &[u8]) -> Result<FilterPipeline> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    let n = cur.u8()? as usize;
    if version == 1 {
        cur.skip(6)?;
    } else if version != 2 {
        return Err(ContainerError::BadImage(format!("filter pipeline version {version}")));
    }
    let mut pipeline = FilterPipeline::new();
    for _ in 0..n {
        let id = cur.u16()?;
        let name_len = if version == 1 || id >= 256 { cur.u16()? as usize } else { 0 };
        let flags = cur.u16()?;
        let nvalues = cur.u16()? as usize;
        let name = if name_len > 0 {
            let raw = cur.take(name_len)?;
            if version == 1 {
                cur.skip(name_len.div_ceil(8) * 8 - name_len)?;
            }
            let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
            Some(String::from_utf8_lossy(&raw[..end]).into_owned())
        } else {
            None
        };
        let mut client_data = Vec::with_capacity(nvalues);
        for _ in 0..nvalues {
            client_data.push(cur.u32()?);
        }
        if version == 1 && nvalues % 2 == 1 {
            cur.skip(4)?;
        }
        pipeline.push(FilterDescription {
            filter_id: u32::from(id),
            name,
            flags,
            client_data,
        });
    }
    Ok(pipeline)
}

// ---------------------------------------------------------------------------
// Links (0x0002, 0x0006, 0x000A)
// ---------------------------------------------------------------------------

/// Link info for compact storage with creation order tracked and indexed.
pub(crate) fn encode_link_info(max_corder: u64) -> Vec<u8> {
    let mut out = vec![0, 0x03];
    out.extend_from_slice(&max_corder.to_le_bytes());
    for _ in 0..3 {
        out.extend_from_slice(&UNDEF.to_le_bytes());
    }
    out
}

/// Whether a link info message points at dense (fractal heap) storage.
pub(crate) fn link_info_is_dense(body: &[u8]) -> Result<bool> {
    let mut cur = Cursor::new(body);
    cur.u8()?;
    let flags = cur.u8()?;
    if flags & 0x01 != 0 {
        cur.skip(8)?;
    }
    Ok(cur.u64()? != UNDEF)
}

pub(crate) fn encode_group_info() -> Vec<u8> {
    vec![0, 0]
}

const LINK_CORDER: u8 = 0x04;
const LINK_TYPE: u8 = 0x08;
const LINK_CSET: u8 = 0x10;

/// Hard link message for `name` to the header at `addr`.
pub(crate) fn encode_link(name: &str, corder: u64, addr: u64) -> Vec<u8> {
    let name = name.as_bytes();
    let (code, width) = match name.len() {
        0..=0xff => (0u8, 1usize),
        0x100..=0xffff => (1, 2),
        _ => (2, 4),
    };
    let utf8 = !name.is_ascii();
    let mut out = vec![1, code | LINK_CORDER | if utf8 { LINK_CSET } else { 0 }];
    out.extend_from_slice(&corder.to_le_bytes());
    if utf8 {
        out.push(1);
    }
    out.extend_from_slice(&(name.len() as u64).to_le_bytes()[..width]);
    out.extend_from_slice(name);
    out.extend_from_slice(&addr.to_le_bytes());
    out
}

/// A decoded hard link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HardLink {
    pub name: String,
    pub corder: Option<u64>,
    pub addr: u64,
}

/// Decode a link message. Soft and external links yield `None`.
pub(crate) fn decode_link(body: &[u8]) -> Result<Option<HardLink>> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    if version != 1 {
        return Err(ContainerError::BadImage(format!("link message version {version}")));
    }
    let flags = cur.u8()?;
    let link_type = if flags & LINK_TYPE != 0 { cur.u8()? } else { 0 };
    let corder = if flags & LINK_CORDER != 0 { Some(cur.u64()?) } else { None };
    if flags & LINK_CSET != 0 {
        cur.u8()?;
    }
    let name_len = cur.uint(1 << (flags & 0x03))? as usize;
    let name = String::from_utf8(cur.take(name_len)?.to_vec())
        .map_err(|_| ContainerError::BadImage("link name is not UTF-8".into()))?;
    if link_type != 0 {
        return Ok(None);
    }
    Ok(Some(HardLink {
        name,
        corder,
        addr: cur.u64()?,
    }))
}

// ---------------------------------------------------------------------------
// Attributes (0x000C, 0x0015)
// ---------------------------------------------------------------------------

/// Attribute info for compact storage with creation order tracked.
pub(crate) fn encode_attribute_info(max_corder: u16) -> Vec<u8> {
    let mut out = vec![0, 0x01];
    out.extend_from_slice(&max_corder.to_le_bytes());
    out.extend_from_slice(&UNDEF.to_le_bytes());
    out.extend_from_slice(&UNDEF.to_le_bytes());
    out
}

/// Whether an attribute info message points at dense storage.
pub(crate) fn attribute_info_is_dense(body: &[u8]) -> Result<bool> {
    let mut cur = Cursor::new(body);
    cur.u8()?;
    let flags = cur.u8()?;
    if flags & 0x01 != 0 {
        cur.skip(2)?;
    }
    Ok(cur.u64()? != UNDEF)
}

/// Version 3 attribute message.
pub(crate) fn encode_attribute(name: &str, shared_type: bool, datatype: &[u8], dataspace: &[u8], raw: &[u8]) -> Result<Vec<u8>> {
    let too_big = |what: &str| ContainerError::Unencodable(format!("attribute {name}: {what} too large"));
    let name_len = u16::try_from(name.len() + 1).map_err(|_| too_big("name"))?;
    let dt_len = u16::try_from(datatype.len()).map_err(|_| too_big("datatype"))?;
    let ds_len = u16::try_from(dataspace.len()).map_err(|_| too_big("dataspace"))?;
    let mut out = vec![3, u8::from(shared_type)];
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(&dt_len.to_le_bytes());
    out.extend_from_slice(&ds_len.to_le_bytes());
    out.push(u8::from(!name.is_ascii()));
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.extend_from_slice(datatype);
    out.extend_from_slice(dataspace);
    out.extend_from_slice(raw);
    Ok(out)
}

/// Parts of an attribute message.
#[derive(Debug)]
pub(crate) struct RawAttribute<'a> {
    pub name: String,
    pub shared_type: bool,
    pub datatype: &'a [u8],
    pub dataspace: &'a [u8],
    pub raw: &'a [u8],
}

pub(crate) fn decode_attribute(body: &[u8]) -> Result<RawAttribute<'_>> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    if !(1..=3).contains(&version) {
        return Err(ContainerError::BadImage(format!("attribute message version {version}")));
    }
    let flags = if version == 1 {
        cur.u8()?;
        0
    } else {
        cur.u8()?
    };
    let name_len = cur.u16()? as usize;
    let dt_len = cur.u16()? as usize;
    let ds_len = cur.u16()? as usize;
    if version == 3 {
        cur.u8()?;
    }
    let pad = |n: usize| if version == 1 { n.div_ceil(8) * 8 } else { n };
    let name_raw = cur.take(pad(name_len))?;
    let end = name_raw.iter().position(|&c| c == 0).unwrap_or(name_len.min(name_raw.len()));
    let name = String::from_utf8(name_raw[..end].to_vec())
        .map_err(|_| ContainerError::BadImage("attribute name is not UTF-8".into()))?;
    let datatype = &cur.take(pad(dt_len))?[..dt_len];
    let dataspace = &cur.take(pad(ds_len))?[..ds_len];
    let rest = cur.remaining();
    let raw = cur.take(rest)?;
    Ok(RawAttribute {
        name,
        shared_type: flags & 0x01 != 0,
        datatype,
        dataspace,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataspace::UNLIMITED;

    #[test]
    fn header_checksum_is_verified() {
        let mut h = HeaderBuilder::new(true);
        h.push(MSG_GROUP_INFO, 0, encode_group_info());
        h.push_ordered(MSG_ATTRIBUTE, 7, vec![1, 2, 3]);
        let mut bytes = h.finish().unwrap();
        let parsed = parse_header(&bytes, 0).unwrap();
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[1].corder, Some(7));
        assert_eq!(parsed.messages[1].body, &[1, 2, 3]);

        bytes[8] ^= 0xff;
        assert!(matches!(parse_header(&bytes, 0), Err(ContainerError::BadImage(_))));
    }

    #[test]
    fn unlimited_dataspace_keeps_max() {
        let space = Dataspace::with_max(&[0, 4], &[UNLIMITED, 4]).unwrap();
        let bytes = encode_dataspace(&space);
        assert_eq!(decode_dataspace(&mut Cursor::new(&bytes)).unwrap(), space);
        let scalar = encode_dataspace(&Dataspace::scalar());
        assert_eq!(scalar, vec![2, 0, 0, 0]);
    }

    #[test]
    fn link_flags_follow_library_bits() {
        let body = encode_link("temp", 3, 0x1234);
        assert_eq!(body[1], LINK_CORDER);
        assert_eq!(
            decode_link(&body).unwrap(),
            Some(HardLink {
                name: "temp".into(),
                corder: Some(3),
                addr: 0x1234
            })
        );
    }

    #[test]
    fn plugin_filter_keeps_name_and_values() {
        let mut p = FilterPipeline::new();
        p.push(FilterDescription::new(1, &[5]));
        p.push(FilterDescription {
            filter_id: 32015,
            name: Some("zstd".into()),
            flags: 1,
            client_data: vec![3, 9],
        });
        let body = encode_pipeline(&p).unwrap();
        assert_eq!(decode_pipeline(&body).unwrap(), p);
        let mut wide = FilterPipeline::new();
        wide.push(FilterDescription::new(70_000, &[]));
        assert!(matches!(encode_pipeline(&wide), Err(ContainerError::Unencodable(_))));
    }

    #[test]
    fn fill_without_value_records_time() {
        let body = encode_fill(ALLOC_LATE, FillTime::Never, None);
        assert_eq!(decode_fill(&body).unwrap(), (FillTime::Never, None));
        let body = encode_fill(ALLOC_INCREMENTAL, FillTime::IfSet, Some(&[1, 2]));
        assert_eq!(decode_fill(&body).unwrap(), (FillTime::IfSet, Some(vec![1, 2])));
    }

    #[test]
    fn chunked_layout_roundtrip() {
        let layout = StoredLayout::Chunked {
            btree: 4096,
            dims: vec![1, 16, 4],
        };
        assert_eq!(decode_layout(&encode_layout(&layout).unwrap()).unwrap(), layout);
    }
}
