//! Dimension scales.
//!
//! A dimension scale is a dataset marked with `CLASS = "DIMENSION_SCALE"`
//! and an optional `NAME`. Attaching a scale to axis `k` of a dataset records
//! the relationship on both sides:
//!
//! * the dataset's `DIMENSION_LIST` holds, per axis, the scales attached to it;
//! * the scale's `REFERENCE_LIST` holds `(dataset, axis)` back-links.
//!
//! Both lists are kept consistent by every operation here; an attribute whose
//! list becomes empty is removed.

use tracing::trace;

use crate::attribute::{AttrData, Attribute};
use crate::container::Container;
use crate::dataspace::Dataspace;
use crate::datatype::{CompoundMember, Datatype};
use crate::error::{ContainerError, Result};
use crate::object::{ObjRef, ObjectKind};

/// Attribute marking a dataset as a dimension scale.
pub const CLASS: &str = "CLASS";
/// Value of [`CLASS`] on a dimension scale.
pub const DIMENSION_SCALE: &str = "DIMENSION_SCALE";
/// Attribute holding a scale's name.
pub const NAME: &str = "NAME";
/// Per-axis attached-scale lists on a dataset.
pub const DIMENSION_LIST: &str = "DIMENSION_LIST";
/// Back-links from a scale to the datasets it is attached to.
pub const REFERENCE_LIST: &str = "REFERENCE_LIST";

fn check_dataset<C: Container + ?Sized>(c: &C, obj: ObjRef) -> Result<()> {
    match c.kind(obj)? {
        ObjectKind::Dataset => Ok(()),
        _ => Err(ContainerError::WrongKind {
            obj: obj.0,
            expected: "dataset",
        }),
    }
}

/// Mark `ds` as a dimension scale, optionally naming it.
pub fn set_scale<C: Container + ?Sized>(c: &mut C, ds: ObjRef, name: Option<&str>) -> Result<()> {
    check_dataset(c, ds)?;
    if !dimension_list(c, ds)?.iter().all(Vec::is_empty) {
        return Err(ContainerError::DimScale(format!(
            "dataset {ds} has scales attached and cannot become a scale"
        )));
    }
    c.write_attr(ds, Attribute::string(CLASS, DIMENSION_SCALE))?;
    if let Some(name) = name {
        c.write_attr(ds, Attribute::string(NAME, name))?;
    }
    Ok(())
}

/// Whether `ds` is marked as a dimension scale.
pub fn is_scale<C: Container + ?Sized>(c: &C, ds: ObjRef) -> Result<bool> {
    Ok(c
        .read_attr(ds, CLASS)?
        .and_then(|a| a.as_string())
        .is_some_and(|s| s == DIMENSION_SCALE))
}

/// The `NAME` of a scale, if set.
pub fn scale_name<C: Container + ?Sized>(c: &C, ds: ObjRef) -> Result<Option<String>> {
    Ok(c.read_attr(ds, NAME)?.and_then(|a| a.as_string()))
}

/// Attach `scale` to axis `axis` of `ds`. Attaching twice is a no-op.
pub fn attach_scale<C: Container + ?Sized>(c: &mut C, ds: ObjRef, scale: ObjRef, axis: usize) -> Result<()> {
    check_dataset(c, ds)?;
    check_dataset(c, scale)?;
    if ds == scale {
        return Err(ContainerError::DimScale(format!("cannot attach {ds} to itself")));
    }
    if !is_scale(c, scale)? {
        return Err(ContainerError::DimScale(format!("{scale} is not a dimension scale")));
    }
    if is_scale(c, ds)? {
        return Err(ContainerError::DimScale(format!(
            "cannot attach a scale to dimension scale {ds}"
        )));
    }
    let rank = c.dataset_space(ds)?.rank();
    if axis >= rank {
        return Err(ContainerError::DimScale(format!(
            "axis {axis} out of range for rank-{rank} dataset {ds}"
        )));
    }

    let mut lists = dimension_list(c, ds)?;
    lists.resize(rank, Vec::new());
    if lists[axis].contains(&scale) {
        return Ok(());
    }
    lists[axis].push(scale);
    write_dimension_list(c, ds, lists)?;

    let mut back = reference_list(c, scale)?;
    back.push((ds, axis as u32));
    write_reference_list(c, scale, back)?;
    trace!(%ds, %scale, axis, "attached dimension scale");
    Ok(())
}

/// Detach `scale` from axis `axis` of `ds`. Returns whether it was attached.
///
/// A scale that no longer exists is still removed from the dataset's list.
pub fn detach_scale<C: Container + ?Sized>(c: &mut C, ds: ObjRef, scale: ObjRef, axis: usize) -> Result<bool> {
    let mut lists = dimension_list(c, ds)?;
    let Some(list) = lists.get_mut(axis) else {
        return Ok(false);
    };
    let before = list.len();
    list.retain(|s| *s != scale);
    if list.len() == before {
        return Ok(false);
    }
    write_dimension_list(c, ds, lists)?;

    if c.kind(scale).is_ok() {
        let mut back = reference_list(c, scale)?;
        back.retain(|(d, a)| !(*d == ds && *a as usize == axis));
        write_reference_list(c, scale, back)?;
    }
    trace!(%ds, %scale, axis, "detached dimension scale");
    Ok(true)
}

/// Scales attached to axis `axis` of `ds`, in attachment order.
pub fn attached_scales<C: Container + ?Sized>(c: &C, ds: ObjRef, axis: usize) -> Result<Vec<ObjRef>> {
    Ok(dimension_list(c, ds)?.into_iter().nth(axis).unwrap_or_default())
}

/// Number of scales attached to axis `axis` of `ds`.
pub fn num_scales<C: Container + ?Sized>(c: &C, ds: ObjRef, axis: usize) -> Result<usize> {
    Ok(attached_scales(c, ds, axis)?.len())
}

/// Datasets and axes `scale` is attached to.
pub fn attached_to<C: Container + ?Sized>(c: &C, scale: ObjRef) -> Result<Vec<(ObjRef, usize)>> {
    Ok(reference_list(c, scale)?
        .into_iter()
        .map(|(d, a)| (d, a as usize))
        .collect())
}

/// Detach `scale` from every dataset it is attached to, returning the
/// `(dataset, axis)` pairs that were detached.
pub fn detach_all<C: Container + ?Sized>(c: &mut C, scale: ObjRef) -> Result<Vec<(ObjRef, usize)>> {
    let links = attached_to(c, scale)?;
    let mut detached = Vec::with_capacity(links.len());
    for (ds, axis) in links {
        if c.kind(ds).is_err() {
            continue;
        }
        if detach_scale(c, ds, scale, axis)? {
            detached.push((ds, axis));
        }
    }
    if c.read_attr(scale, REFERENCE_LIST)?.is_some() {
        c.delete_attr(scale, REFERENCE_LIST)?;
    }
    Ok(detached)
}

// ---------------------------------------------------------------------------
// Attribute encoding
// ---------------------------------------------------------------------------

fn dimension_list<C: Container + ?Sized>(c: &C, ds: ObjRef) -> Result<Vec<Vec<ObjRef>>> {
    match c.read_attr(ds, DIMENSION_LIST)? {
        Some(Attribute {
            data: AttrData::References(lists),
            ..
        }) => Ok(lists),
        Some(_) => Err(ContainerError::DimScale(format!("malformed {DIMENSION_LIST} on {ds}"))),
        None => Ok(Vec::new()),
    }
}

fn write_dimension_list<C: Container + ?Sized>(c: &mut C, ds: ObjRef, lists: Vec<Vec<ObjRef>>) -> Result<()> {
    if lists.iter().all(Vec::is_empty) {
        c.delete_attr(ds, DIMENSION_LIST)?;
        return Ok(());
    }
    c.write_attr(
        ds,
        Attribute {
            name: DIMENSION_LIST.to_string(),
            datatype: Datatype::VarLen {
                base: Box::new(Datatype::Reference),
            },
            space: Dataspace::simple(&[lists.len() as u64]),
            data: AttrData::References(lists),
        },
    )
}

fn reference_list<C: Container + ?Sized>(c: &C, scale: ObjRef) -> Result<Vec<(ObjRef, u32)>> {
    match c.read_attr(scale, REFERENCE_LIST)? {
        Some(Attribute {
            data: AttrData::Backlinks(links),
            ..
        }) => Ok(links),
        Some(_) => Err(ContainerError::DimScale(format!(
            "malformed {REFERENCE_LIST} on {scale}"
        ))),
        None => Ok(Vec::new()),
    }
}

fn write_reference_list<C: Container + ?Sized>(c: &mut C, scale: ObjRef, links: Vec<(ObjRef, u32)>) -> Result<()> {
    if links.is_empty() {
        c.delete_attr(scale, REFERENCE_LIST)?;
        return Ok(());
    }
    c.write_attr(
        scale,
        Attribute {
            name: REFERENCE_LIST.to_string(),
            datatype: Datatype::Compound {
                size: 12,
                members: vec![
                    CompoundMember {
                        name: "dataset".into(),
                        offset: 0,
                        datatype: Datatype::Reference,
                    },
                    CompoundMember {
                        name: "dimension".into(),
                        offset: 8,
                        datatype: Datatype::u32(),
                    },
                ],
            },
            space: Dataspace::simple(&[links.len() as u64]),
            data: AttrData::Backlinks(links),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemContainer;
    use crate::property_list::DatasetCreateProps;

    fn two_datasets() -> (MemContainer, ObjRef, ObjRef) {
        let mut c = MemContainer::new();
        let root = c.root();
        let scale = c
            .create_dataset(root, "x", Datatype::f32(), Dataspace::simple(&[4]), DatasetCreateProps::new())
            .unwrap();
        let data = c
            .create_dataset(root, "v", Datatype::f32(), Dataspace::simple(&[3, 4]), DatasetCreateProps::new())
            .unwrap();
        (c, scale, data)
    }

    #[test]
    fn attach_records_both_sides() {
        let (mut c, scale, data) = two_datasets();
        set_scale(&mut c, scale, Some("x")).unwrap();
        attach_scale(&mut c, data, scale, 1).unwrap();
        attach_scale(&mut c, data, scale, 1).unwrap();
        assert_eq!(attached_scales(&c, data, 1).unwrap(), vec![scale]);
        assert_eq!(num_scales(&c, data, 0).unwrap(), 0);
        assert_eq!(attached_to(&c, scale).unwrap(), vec![(data, 1)]);
        assert_eq!(scale_name(&c, scale).unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn attach_requires_scale() {
        let (mut c, scale, data) = two_datasets();
        assert!(matches!(
            attach_scale(&mut c, data, scale, 0),
            Err(ContainerError::DimScale(_))
        ));
        set_scale(&mut c, scale, None).unwrap();
        assert!(attach_scale(&mut c, data, scale, 2).is_err());
    }

    #[test]
    fn detach_all_clears_lists() {
        let (mut c, scale, data) = two_datasets();
        set_scale(&mut c, scale, None).unwrap();
        attach_scale(&mut c, data, scale, 0).unwrap();
        attach_scale(&mut c, data, scale, 1).unwrap();
        let detached = detach_all(&mut c, scale).unwrap();
        assert_eq!(detached, vec![(data, 0), (data, 1)]);
        assert!(c.read_attr(data, DIMENSION_LIST).unwrap().is_none());
        assert!(c.read_attr(scale, REFERENCE_LIST).unwrap().is_none());
        assert!(is_scale(&c, scale).unwrap());
    }

    #[test]
    fn scale_with_attachments_cannot_be_a_target() {
        let (mut c, scale, data) = two_datasets();
        set_scale(&mut c, scale, None).unwrap();
        attach_scale(&mut c, data, scale, 0).unwrap();
        assert!(set_scale(&mut c, data, None).is_err());
    }
}
