//! HDF5 file format: how a [`MemContainer`](crate::MemContainer) is stored.
//!
//! Files carry a version 3 superblock with 8-byte offsets and lengths and
//! version 2 object headers. Links and attributes are kept compact, in
//! creation order. Variable-length data lives in global heap collections,
//! and chunked datasets are indexed by version 1 B-trees.
//!
//! ```text
//! superblock   signature | version 3 | sizes 8, 8 | flags | base | ext | eof | root | checksum
//! headers      "OHDR" object headers, root first, then preorder
//! heap         "GCOL" collections
//! raw data     contiguous blocks, chunks, chunk index nodes
//! ```

pub(crate) mod btree;
pub(crate) mod checksum;
pub(crate) mod cursor;
pub(crate) mod heap;
pub(crate) mod message;
mod reader;
pub(crate) mod types;
mod writer;

pub(crate) use reader::decode;
pub(crate) use writer::encode;

use crate::error::{ContainerError, Result};
use checksum::lookup3;
use cursor::Cursor;

/// HDF5 file signature.
pub const SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

/// The undefined address.
pub(crate) const UNDEF: u64 = u64::MAX;

pub(crate) const SUPERBLOCK_LEN: u64 = 48;

/// Whether `bytes` starts with the HDF5 signature.
pub fn is_hdf5(bytes: &[u8]) -> bool {
    bytes.len() >= SIGNATURE.len() && &bytes[..SIGNATURE.len()] == SIGNATURE
}

pub(crate) fn write_superblock(eof: u64, root: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(SUPERBLOCK_LEN as usize);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&[3, 8, 8, 0]);
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&UNDEF.to_le_bytes());
    out.extend_from_slice(&eof.to_le_bytes());
    out.extend_from_slice(&root.to_le_bytes());
    let sum = lookup3(&out);
    out.extend_from_slice(&sum.to_le_bytes());
    out
}

/// Check the superblock and return the root group's header address.
pub(crate) fn read_superblock(bytes: &[u8]) -> Result<u64> {
    if !is_hdf5(bytes) {
        return Err(ContainerError::BadImage("missing HDF5 signature".into()));
    }
    let mut cur = Cursor::new(bytes);
    cur.skip(SIGNATURE.len())?;
    let version = cur.u8()?;
    if !(2..=3).contains(&version) {
        return Err(ContainerError::BadImage(format!("superblock version {version}")));
    }
    let (offsets, lengths) = (cur.u8()?, cur.u8()?);
    if offsets != 8 || lengths != 8 {
        return Err(ContainerError::BadImage(format!("{offsets}-byte offsets and {lengths}-byte lengths")));
    }
    cur.skip(1)?;
    let base = cur.u64()?;
    cur.skip(8)?;
    let eof = cur.u64()?;
    let root = cur.u64()?;
    let stored = cur.u32()?;
    if lookup3(&bytes[..cur.pos() - 4]) != stored {
        return Err(ContainerError::BadImage("superblock checksum mismatch".into()));
    }
    if base != 0 {
        return Err(ContainerError::BadImage(format!("base address {base}")));
    }
    if eof > bytes.len() as u64 {
        return Err(ContainerError::BadImage(format!(
            "file is {} bytes, superblock says {eof}",
            bytes.len()
        )));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::attribute::{AttrData, Attribute};
    use crate::container::Container;
    use crate::dataspace::{Dataspace, UNLIMITED};
    use crate::datatype::{CompoundMember, Datatype};
    use crate::dimscale;
    use crate::filter_pipeline::{FilterDescription, FilterPipeline, FILTER_FLETCHER32, FILTER_SHUFFLE};
    use crate::mem::MemContainer;
    use crate::property_list::{DatasetCreateProps, FillTime, Layout};

    fn reopen(c: &MemContainer) -> MemContainer {
        MemContainer::from_image(&c.image().unwrap(), true).unwrap()
    }

    fn i32_bytes(v: &[i32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    #[test]
    fn superblock_round_trip() {
        let sb = write_superblock(48, 48);
        assert_eq!(sb.len(), SUPERBLOCK_LEN as usize);
        assert!(is_hdf5(&sb));
        assert_eq!(read_superblock(&sb).unwrap(), 48);
    }

    #[test]
    fn superblock_checksum_is_verified() {
        let mut sb = write_superblock(48, 48);
        sb[40] ^= 1;
        assert!(matches!(read_superblock(&sb), Err(ContainerError::BadImage(_))));
    }

    #[test]
    fn rejects_foreign_bytes() {
        assert!(matches!(
            MemContainer::from_image(b"CDF\x01rest", false),
            Err(ContainerError::BadImage(_))
        ));
    }

    #[test]
    fn empty_container_is_hdf5() {
        let c = MemContainer::new();
        let bytes = c.image().unwrap();
        assert_eq!(&bytes[..8], SIGNATURE);
        assert_eq!(bytes[8], 3);
        let back = MemContainer::from_image(&bytes, true).unwrap();
        assert!(back.links(back.root()).unwrap().is_empty());
    }

    #[test]
    fn filtered_chunks_restored() {
        let mut c = MemContainer::new();
        let root = c.root();
        let mut pipeline = FilterPipeline::new();
        pipeline.push(FilterDescription::new(FILTER_SHUFFLE, &[]));
        pipeline.push(FilterDescription::new(FILTER_FLETCHER32, &[]));
        let ds = c
            .create_dataset(
                root,
                "v",
                Datatype::i32(),
                Dataspace::simple(&[3]),
                DatasetCreateProps::new().chunk(&[3]).pipeline(pipeline.clone()),
            )
            .unwrap();
        let data = i32_bytes(&[1, -2, 3]);
        c.write_slab(ds, &[0], &[3], &data).unwrap();
        let bytes = c.image().unwrap();
        assert!(is_hdf5(&bytes));
        let back = MemContainer::from_image(&bytes, true).unwrap();
        let ds = back.lookup(back.root(), "v").unwrap().unwrap();
        assert_eq!(back.read_all(ds).unwrap(), data);
        assert_eq!(back.dataset_create_props(ds).unwrap().pipeline, pipeline);
    }

    #[test]
    fn edge_chunks_restored_across_many_chunks() {
        let mut c = MemContainer::new();
        let root = c.root();
        let ds = c
            .create_dataset(
                root,
                "grid",
                Datatype::i32(),
                Dataspace::with_max(&[10, 7], &[UNLIMITED, 7]).unwrap(),
                DatasetCreateProps::new().chunk(&[1, 3]).fill_value(&(-1i32).to_le_bytes()),
            )
            .unwrap();
        let data = i32_bytes(&(0..70).collect::<Vec<_>>());
        c.write_slab(ds, &[0, 0], &[10, 7], &data).unwrap();
        let back = reopen(&c);
        let ds = back.lookup(back.root(), "grid").unwrap().unwrap();
        assert_eq!(back.read_all(ds).unwrap(), data);
        assert_eq!(back.dataset_space(ds).unwrap().max_dims, Some(vec![UNLIMITED, 7]));
        assert_eq!(back.dataset_create_props(ds).unwrap().layout, Layout::Chunked(vec![1, 3]));
    }

    #[test]
    fn unwritten_storage_reads_as_fill() {
        let mut c = MemContainer::new();
        let root = c.root();
        c.create_dataset(
            root,
            "f",
            Datatype::i32(),
            Dataspace::simple(&[4]),
            DatasetCreateProps::new().fill_value(&7i32.to_le_bytes()).fill_time(FillTime::Never),
        )
        .unwrap();
        let back = reopen(&c);
        let ds = back.lookup(back.root(), "f").unwrap().unwrap();
        assert_eq!(back.read_all(ds).unwrap(), i32_bytes(&[7, 7, 7, 7]));
        let dcpl = back.dataset_create_props(ds).unwrap();
        assert_eq!(dcpl.fill_time, FillTime::Never);
        assert_eq!(dcpl.fill_value, Some(7i32.to_le_bytes().to_vec()));
    }

    #[test]
    fn link_and_attribute_order_survive() {
        let mut c = MemContainer::new();
        let root = c.root();
        for name in ["zeta", "alpha", "mid"] {
            c.create_group(root, name).unwrap();
        }
        for name in ["b", "a", "c"] {
            c.write_attr(root, Attribute::string(name, name)).unwrap();
        }
        let back = reopen(&c);
        let names: Vec<String> = back.links(back.root()).unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        let attrs: Vec<String> = back.attr_names(back.root()).unwrap();
        assert_eq!(attrs, ["b", "a", "c"]);
    }

    #[test]
    fn variable_length_attributes_use_the_heap() {
        let mut c = MemContainer::new();
        let root = c.root();
        c.write_attr(
            root,
            Attribute {
                name: "names".into(),
                datatype: Datatype::VarString,
                space: Dataspace::simple(&[3]),
                data: AttrData::Strings(vec!["one".into(), String::new(), "three".into()]),
            },
        )
        .unwrap();
        c.write_attr(
            root,
            Attribute {
                name: "ragged".into(),
                datatype: Datatype::VarLen {
                    base: Box::new(Datatype::i16()),
                },
                space: Dataspace::simple(&[2]),
                data: AttrData::VarLen(vec![vec![1, 0, 2, 0], Vec::new()]),
            },
        )
        .unwrap();
        let bytes = c.image().unwrap();
        assert!(bytes.windows(4).any(|w| w == b"GCOL"));
        let back = MemContainer::from_image(&bytes, true).unwrap();
        let root = back.root();
        assert_eq!(
            back.read_attr(root, "names").unwrap().unwrap().data,
            AttrData::Strings(vec!["one".into(), String::new(), "three".into()])
        );
        assert_eq!(
            back.read_attr(root, "ragged").unwrap().unwrap().data,
            AttrData::VarLen(vec![vec![1, 0, 2, 0], Vec::new()])
        );
    }

    #[test]
    fn scale_references_point_at_reopened_objects() {
        let mut c = MemContainer::new();
        let root = c.root();
        let x = c
            .create_dataset(root, "x", Datatype::f32(), Dataspace::simple(&[4]), DatasetCreateProps::new())
            .unwrap();
        let v = c
            .create_dataset(root, "v", Datatype::f32(), Dataspace::simple(&[4]), DatasetCreateProps::new())
            .unwrap();
        dimscale::set_scale(&mut c, x, Some("x")).unwrap();
        dimscale::attach_scale(&mut c, v, x, 0).unwrap();

        let back = reopen(&c);
        let x = back.lookup(back.root(), "x").unwrap().unwrap();
        let v = back.lookup(back.root(), "v").unwrap().unwrap();
        assert_eq!(dimscale::attached_scales(&back, v, 0).unwrap(), vec![x]);
        assert_eq!(dimscale::attached_to(&back, x).unwrap(), vec![(v, 0)]);
    }

    #[test]
    fn committed_types_stay_shared() {
        let mut c = MemContainer::new();
        let root = c.root();
        let point = Datatype::Compound {
            size: 8,
            members: vec![
                CompoundMember {
                    name: "x".into(),
                    offset: 0,
                    datatype: Datatype::f32(),
                },
                CompoundMember {
                    name: "y".into(),
                    offset: 4,
                    datatype: Datatype::f32(),
                },
            ],
        };
        let pt = c.commit_datatype(root, "point", &point).unwrap();
        let track = Datatype::VarLen {
            base: Box::new(Datatype::Named(pt)),
        };
        let tr = c.commit_datatype(root, "track", &track).unwrap();
        c.create_dataset(root, "p", Datatype::Named(pt), Dataspace::simple(&[2]), DatasetCreateProps::new())
            .unwrap();
        c.create_dataset(root, "t", Datatype::Named(tr), Dataspace::simple(&[1]), DatasetCreateProps::new())
            .unwrap();

        let back = reopen(&c);
        let root = back.root();
        let pt = back.lookup(root, "point").unwrap().unwrap();
        let tr = back.lookup(root, "track").unwrap().unwrap();
        let p = back.lookup(root, "p").unwrap().unwrap();
        assert_eq!(back.dataset_type(p).unwrap(), Datatype::Named(pt));
        assert_eq!(
            back.committed_datatype(tr).unwrap(),
            Datatype::VarLen {
                base: Box::new(Datatype::Named(pt))
            }
        );
        assert_eq!(back.resolve(&Datatype::Named(pt)).unwrap(), point);
    }

    #[test]
    fn truncated_file_is_bad() {
        let mut c = MemContainer::new();
        let root = c.root();
        c.create_dataset(root, "v", Datatype::f64(), Dataspace::simple(&[8]), DatasetCreateProps::new())
            .unwrap();
        let bytes = c.image().unwrap();
        let cut = &bytes[..bytes.len() - 10];
        assert!(matches!(
            MemContainer::from_image(cut, true),
            Err(ContainerError::BadImage(_))
        ));
    }

    #[test]
    fn corrupt_header_is_bad() {
        let mut c = MemContainer::new();
        let root = c.root();
        c.create_group(root, "g").unwrap();
        let mut bytes = c.image().unwrap();
        let at = SUPERBLOCK_LEN as usize + 8;
        bytes[at] ^= 0xff;
        assert!(matches!(
            MemContainer::from_image(&bytes, true),
            Err(ContainerError::BadImage(_))
        ));
    }
}
