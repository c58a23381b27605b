//! Rules enforced while defining the structure of a file.

use nc4h5::{parse_filter_spec, parse_filter_spec_list, CreateOptions, Error, File, Storage, TypeId, VarId, UNLIMITED};
use pretty_assertions::assert_eq;

fn new_file() -> File {
    File::create_in_memory(CreateOptions::default()).unwrap()
}

#[test]
fn names_are_unique_per_group_except_dims_and_vars() {
    let mut f = new_file();
    let root = f.root();
    let x = f.def_dim(root, "x", 4).unwrap();
    f.def_var(root, "x", TypeId::INT, &[x]).unwrap();
    f.def_grp(root, "g").unwrap();
    f.def_opaque(root, "t", 2).unwrap();

    assert!(matches!(f.def_dim(root, "x", 2), Err(Error::NameInUse(_))));
    assert!(matches!(f.def_var(root, "x", TypeId::INT, &[]), Err(Error::NameInUse(_))));
    for name in ["g", "t"] {
        assert!(matches!(f.def_dim(root, name, 2), Err(Error::NameInUse(_))));
        assert!(matches!(f.def_var(root, name, TypeId::INT, &[]), Err(Error::NameInUse(_))));
        assert!(matches!(f.def_grp(root, name), Err(Error::NameInUse(_))));
        assert!(matches!(f.def_opaque(root, name, 2), Err(Error::NameInUse(_))));
    }
    assert!(matches!(f.def_grp(root, "x"), Err(Error::NameInUse(_))));
    assert!(matches!(f.def_compound(root, "x", 4), Err(Error::NameInUse(_))));

    // Other groups have their own namespaces.
    let g = f.inq_grp_named(root, "g").unwrap();
    f.def_dim(g, "x", 2).unwrap();
    f.def_var(g, "t", TypeId::INT, &[]).unwrap();
}

#[test]
fn bad_names_rejected() {
    let mut f = new_file();
    let root = f.root();
    for name in ["", "a/b"] {
        assert!(matches!(f.def_dim(root, name, 1), Err(Error::BadName(_))));
    }
}

#[test]
fn compressors_are_mutually_exclusive() {
    let mut f = new_file();
    let root = f.root();
    let x = f.def_dim(root, "x", 64).unwrap();
    let v = f.def_var(root, "v", TypeId::FLOAT, &[x]).unwrap();
    f.def_var_deflate(root, v, false, 4).unwrap();
    assert!(matches!(
        f.def_var_szip(root, v, 32, 8),
        Err(Error::ConflictingFilter { new: 4, existing: 1 })
    ));

    f.remove_filter(root, v, 1).unwrap();
    f.def_var_szip(root, v, 32, 8).unwrap();
    assert!(matches!(
        f.def_var_deflate(root, v, false, 4),
        Err(Error::ConflictingFilter { new: 1, existing: 4 })
    ));
    assert_eq!(f.inq_var_filter_ids(root, v).unwrap(), vec![4]);
    assert_eq!(f.inq_var_filter_info(root, v, 4).unwrap().params, vec![32, 8]);
}

#[test]
fn scalars_cannot_be_chunked_or_filtered() {
    let mut f = new_file();
    let root = f.root();
    let s = f.def_var(root, "s", TypeId::DOUBLE, &[]).unwrap();
    assert!(matches!(f.def_var_deflate(root, s, false, 1), Err(Error::RequiresChunking)));
    assert!(matches!(
        f.def_var_chunking(root, s, Storage::Chunked(vec![1])),
        Err(Error::InvalidForScalar)
    ));
    f.def_var_chunking(root, s, Storage::Contiguous).unwrap();
}

#[test]
fn storage_is_frozen_once_created() {
    let mut f = new_file();
    let root = f.root();
    let t = f.def_dim(root, "t", UNLIMITED).unwrap();
    let v = f.def_var(root, "v", TypeId::INT, &[t]).unwrap();
    assert!(matches!(
        f.def_var_chunking(root, v, Storage::Contiguous),
        Err(Error::InvalidArgument(_))
    ));
    f.enddef().unwrap();
    assert!(matches!(f.def_var_deflate(root, v, true, 1), Err(Error::LateDefinition(_))));
    assert!(matches!(
        f.def_var_chunking(root, v, Storage::Chunked(vec![8])),
        Err(Error::LateDefinition(_))
    ));
    assert!(matches!(f.def_var_fill(root, v, true, None), Err(Error::LateDefinition(_))));
}

#[test]
fn fill_value_rules() {
    let mut f = new_file();
    let root = f.root();
    let x = f.def_dim(root, "x", 2).unwrap();
    let v = f.def_var(root, "v", TypeId::INT, &[x]).unwrap();

    assert!(matches!(
        f.put_att_values(root, v, "_FillValue", &[1i32, 2]),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        f.put_att_values(root, v, "_FillValue", &[1.0f32]),
        Err(Error::BadType(_))
    ));
    f.put_att_values(root, v, "_FillValue", &[-5i32]).unwrap();
    assert_eq!(f.inq_var_fill(root, v).unwrap(), (false, Some((-5i32).to_le_bytes().to_vec())));

    let fill = f.get_vara(root, v, &[0], &[2]).unwrap();
    assert_eq!(fill, [(-5i32).to_ne_bytes(), (-5i32).to_ne_bytes()].concat());

    f.put_vara(root, v, &[0], &[1], &7i32.to_ne_bytes()).unwrap();
    assert!(matches!(
        f.put_att_values(root, v, "_FillValue", &[0i32]),
        Err(Error::LateFillValueChange(_))
    ));
    assert!(matches!(f.del_att(root, v, "_FillValue"), Err(Error::LateFillValueChange(_))));
}

#[test]
fn attribute_rules() {
    let mut f = new_file();
    let root = f.root();
    f.put_att_text(root, VarId::GLOBAL, "note", "a").unwrap();
    assert!(matches!(
        f.put_att_values(root, VarId::GLOBAL, "note", &[1i32]),
        Err(Error::CharacterTypeMismatch(_))
    ));
    for reserved in ["_NCProperties", "_Netcdf4Dimid", "DIMENSION_LIST", "_nc3_strict"] {
        assert!(matches!(
            f.put_att_text(root, VarId::GLOBAL, reserved, "x"),
            Err(Error::NameInUse(_))
        ));
    }
    assert!(matches!(
        f.get_att(root, VarId::GLOBAL, "missing"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn filter_spec_parsing() {
    let spec = parse_filter_spec("2,6u,-3.5f").unwrap();
    assert_eq!(spec.id, 2);
    assert_eq!(spec.params, vec![6, (-3.5f32).to_bits()]);

    let spec = parse_filter_spec("zstd,3").unwrap();
    assert_eq!((spec.id, spec.params), (32015, vec![3]));

    let spec = parse_filter_spec("32001,-1b,2.5d").unwrap();
    let bits = 2.5f64.to_bits();
    assert_eq!(spec.params, vec![0xffff_ffff, bits as u32, (bits >> 32) as u32]);

    let list = parse_filter_spec_list("deflate,5|shuffle").unwrap();
    assert_eq!(list.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);

    assert!(matches!(parse_filter_spec(""), Err(Error::FilterSpecSyntax(_))));
    assert!(matches!(parse_filter_spec("nosuch,1"), Err(Error::FilterSpecSyntax(_))));
    assert!(matches!(parse_filter_spec("1,2.5"), Err(Error::FilterSpecSyntax(_))));
}
