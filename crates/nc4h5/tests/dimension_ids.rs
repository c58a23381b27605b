//! Dimension identity across sessions: recorded ids, scale matching and
//! invented dimensions for datasets written by other tools.

use nc4h5::{CoordState, CreateOptions, DimId, Error, File, OpenOptions, TypeId};
use nc4h5_container::{dimscale, Attribute, Container, Dataspace, DatasetCreateProps, Datatype, MemContainer};
use pretty_assertions::assert_eq;

fn i32s(v: &[i32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_ne_bytes()).collect()
}

fn names(f: &File, ids: &[DimId]) -> Vec<String> {
    ids.iter().map(|&d| f.dim(d).unwrap().name.clone()).collect()
}

#[test]
fn coordinate_variables_defined_out_of_order_keep_ids() {
    let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
    let root = f.root();
    let a = f.def_dim(root, "a", 2).unwrap();
    let b = f.def_dim(root, "b", 3).unwrap();
    // "b" is written first, so creation order alone would swap the ids.
    f.def_var(root, "b", TypeId::INT, &[b]).unwrap();
    f.def_var(root, "a", TypeId::INT, &[a]).unwrap();
    let image = f.close().unwrap().unwrap();

    let g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = g.root();
    assert_eq!(g.inq_dimid(root, "a").unwrap(), a);
    assert_eq!(g.inq_dimid(root, "b").unwrap(), b);
    let av = g.inq_varid(root, "a").unwrap();
    assert_eq!(g.var(root, av).unwrap().dimids, vec![a]);
    assert_eq!(g.coord_state(root, av).unwrap(), CoordState::Coordinate);
}

#[test]
fn coordinate_variable_added_after_redef() {
    let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
    let root = f.root();
    let x = f.def_dim(root, "x", 3).unwrap();
    let y = f.def_dim(root, "y", 2).unwrap();
    let v = f.def_var(root, "v", TypeId::INT, &[x, y]).unwrap();
    f.put_vara(root, v, &[0, 0], &[3, 2], &i32s(&[1, 2, 3, 4, 5, 6])).unwrap();
    let image = f.close().unwrap().unwrap();

    let mut f = File::open_memory(&image, OpenOptions::writable()).unwrap();
    let root = f.root();
    f.redef().unwrap();
    let xv = f.def_var(root, "x", TypeId::INT, &[x]).unwrap();
    assert_eq!(f.coord_state(root, xv).unwrap(), CoordState::Coordinate);
    f.enddef().unwrap();
    f.put_vara(root, xv, &[0], &[3], &i32s(&[10, 20, 30])).unwrap();
    let image = f.close().unwrap().unwrap();

    let mut g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = g.root();
    assert_eq!(g.inq_dimid(root, "x").unwrap(), x);
    assert_eq!(g.inq_dimid(root, "y").unwrap(), y);
    let v = g.inq_varid(root, "v").unwrap();
    assert_eq!(g.var(root, v).unwrap().dimids, vec![x, y]);
    assert_eq!(g.get_vara(root, v, &[0, 0], &[3, 2]).unwrap(), i32s(&[1, 2, 3, 4, 5, 6]));
    let xv = g.inq_varid(root, "x").unwrap();
    assert_eq!(g.coord_state(root, xv).unwrap(), CoordState::Coordinate);
    assert_eq!(g.get_vara(root, xv, &[0], &[3]).unwrap(), i32s(&[10, 20, 30]));
}

#[test]
fn child_group_dimensions_defined_first_keep_ids() {
    let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
    let root = f.root();
    let g = f.def_grp(root, "g").unwrap();
    let a = f.def_dim(g, "a", 2).unwrap();
    let b = f.def_dim(root, "b", 3).unwrap();
    f.def_var(g, "v", TypeId::INT, &[a, b]).unwrap();
    let image = f.close().unwrap().unwrap();

    let mut r = File::open_memory(&image, OpenOptions::writable()).unwrap();
    let g = r.inq_grp_named(r.root(), "g").unwrap();
    assert_eq!(r.inq_dimid(g, "a").unwrap(), a);
    assert_eq!(r.inq_dimid(r.root(), "b").unwrap(), b);
    let v = r.inq_varid(g, "v").unwrap();
    assert_eq!(r.var(g, v).unwrap().dimids, vec![a, b]);
    // New dimensions continue after the highest id read.
    let c = r.def_dim(g, "c", 4).unwrap();
    assert_eq!(c, DimId(2));
}

#[test]
fn variable_named_like_unrelated_dimension() {
    let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
    let root = f.root();
    let x = f.def_dim(root, "x", 3).unwrap();
    let y = f.def_dim(root, "y", 2).unwrap();
    let v = f.def_var(root, "x", TypeId::INT, &[y]).unwrap();
    assert_eq!(f.coord_state(root, v).unwrap(), CoordState::Independent);
    f.put_vara(root, v, &[0], &[2], &i32s(&[8, 9])).unwrap();
    let image = f.close().unwrap().unwrap();

    let mut g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = g.root();
    let v = g.inq_varid(root, "x").unwrap();
    assert_eq!(g.var(root, v).unwrap().dimids, vec![y]);
    assert_eq!(g.coord_state(root, v).unwrap(), CoordState::Independent);
    assert_eq!(g.inq_dim(x).unwrap(), ("x".to_string(), 3, false));
    assert_eq!(g.get_vara(root, v, &[0], &[2]).unwrap(), i32s(&[8, 9]));
}

#[test]
fn datasets_without_scales_get_phony_dimensions() {
    let mut c = MemContainer::new();
    let root = c.root();
    for (name, dt, dims) in [
        ("a", Datatype::i32(), [3u64, 4]),
        ("b", Datatype::i32(), [3, 4]),
        ("c", Datatype::f64(), [4, 4]),
    ] {
        c.create_dataset(root, name, dt, Dataspace::simple(&dims), DatasetCreateProps::new())
            .unwrap();
    }
    let image = c.image().unwrap();

    let f = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = f.root();
    assert!(f.provenance().is_none());
    let dims = |name: &str| f.var(root, f.inq_varid(root, name).unwrap()).unwrap().dimids.clone();

    let a = dims("a");
    assert_eq!(names(&f, &a), vec!["phony_dim_0", "phony_dim_1"]);
    assert_eq!(dims("b"), a);
    // A square dataset needs two distinct dimensions of the same length.
    let c = dims("c");
    assert_eq!(c[0], a[1]);
    assert_eq!(names(&f, &c), vec!["phony_dim_1", "phony_dim_2"]);

    for &d in &c {
        let dim = f.dim(d).unwrap();
        assert!(dim.phony);
        assert_eq!(dim.len, 4);
    }
    assert_eq!(f.inq_dimids(root, false).unwrap().len(), 3);
}

#[test]
fn attached_scales_become_dimensions() {
    let mut c = MemContainer::new();
    let root = c.root();
    let lon = c
        .create_dataset(root, "lon", Datatype::f64(), Dataspace::simple(&[4]), DatasetCreateProps::new())
        .unwrap();
    dimscale::set_scale(&mut c, lon, Some("lon")).unwrap();
    let time = c
        .create_dataset(root, "time", Datatype::f64(), Dataspace::simple(&[2]), DatasetCreateProps::new())
        .unwrap();
    dimscale::set_scale(&mut c, time, Some("time")).unwrap();
    let grid = c
        .create_dataset(root, "grid", Datatype::f32(), Dataspace::simple(&[2, 4]), DatasetCreateProps::new())
        .unwrap();
    dimscale::attach_scale(&mut c, grid, time, 0).unwrap();
    dimscale::attach_scale(&mut c, grid, lon, 1).unwrap();
    c.write_attr(grid, Attribute::string("units", "m")).unwrap();
    let image = c.image().unwrap();

    let f = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = f.root();
    let lon = f.inq_dimid(root, "lon").unwrap();
    let time = f.inq_dimid(root, "time").unwrap();
    assert_eq!((lon, time), (DimId(0), DimId(1)));
    let grid = f.inq_varid(root, "grid").unwrap();
    assert_eq!(f.var(root, grid).unwrap().dimids, vec![time, lon]);
    assert_eq!(f.get_att(root, grid, "units").unwrap().as_text().as_deref(), Some("m"));
    let lv = f.inq_varid(root, "lon").unwrap();
    assert_eq!(f.coord_state(root, lv).unwrap(), CoordState::Coordinate);
}

#[test]
fn recorded_coordinates_must_match_rank() {
    let mut c = MemContainer::new();
    let root = c.root();
    let v = c
        .create_dataset(root, "v", Datatype::i32(), Dataspace::simple(&[2, 3]), DatasetCreateProps::new())
        .unwrap();
    c.write_attr(v, Attribute::array_i32("_Netcdf4Coordinates", &[0])).unwrap();
    let image = c.image().unwrap();

    assert!(matches!(
        File::open_memory(&image, OpenOptions::read_only()),
        Err(Error::DimensionCountMismatch { recorded: 1, rank: 2, .. })
    ));
}

#[test]
fn unsupported_datasets_are_skipped() {
    let mut c = MemContainer::new();
    let root = c.root();
    c.create_dataset(
        root,
        "odd",
        Datatype::FixedString { size: 7 },
        Dataspace::simple(&[2]),
        DatasetCreateProps::new(),
    )
    .unwrap();
    c.create_dataset(root, "ok", Datatype::u16(), Dataspace::simple(&[2]), DatasetCreateProps::new())
        .unwrap();
    let image = c.image().unwrap();

    let f = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    assert_eq!(f.inq_varids(f.root()).unwrap().len(), 1);
    let ok = f.inq_varid(f.root(), "ok").unwrap();
    assert_eq!(f.var(f.root(), ok).unwrap().type_id, TypeId::USHORT);
}

#[test]
fn renamed_dimension_without_coordinate_keeps_ids() {
    let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
    let root = f.root();
    let a = f.def_dim(root, "a", 2).unwrap();
    let b = f.def_dim(root, "b", 3).unwrap();
    let v = f.def_var(root, "v", TypeId::INT, &[a, b]).unwrap();
    f.put_vara(root, v, &[0, 0], &[2, 3], &i32s(&[1, 2, 3, 4, 5, 6])).unwrap();
    let image = f.close().unwrap().unwrap();

    let mut f = File::open_memory(&image, OpenOptions::writable()).unwrap();
    f.rename_dim(a, "aa").unwrap();
    let image = f.close().unwrap().unwrap();

    let mut g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = g.root();
    assert_eq!(g.inq_dimid(root, "aa").unwrap(), a);
    assert_eq!(g.inq_dimid(root, "b").unwrap(), b);
    assert_eq!(g.inq_dim(a).unwrap(), ("aa".to_string(), 2, false));
    assert_eq!(g.inq_dim(b).unwrap(), ("b".to_string(), 3, false));
    let v = g.inq_varid(root, "v").unwrap();
    assert_eq!(g.var(root, v).unwrap().dimids, vec![a, b]);
    assert_eq!(g.get_vara(root, v, &[0, 0], &[2, 3]).unwrap(), i32s(&[1, 2, 3, 4, 5, 6]));
}

#[test]
fn fill_value_on_existing_coordinate_keeps_ids() {
    let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
    let root = f.root();
    let x = f.def_dim(root, "x", 2).unwrap();
    let y = f.def_dim(root, "y", 3).unwrap();
    let xv = f.def_var(root, "x", TypeId::INT, &[x]).unwrap();
    let yv = f.def_var(root, "y", TypeId::INT, &[y]).unwrap();
    let t = f.def_var(root, "t", TypeId::INT, &[x, y]).unwrap();
    f.put_vara(root, xv, &[0], &[2], &i32s(&[10, 20])).unwrap();
    f.put_vara(root, yv, &[0], &[3], &i32s(&[1, 2, 3])).unwrap();
    f.put_vara(root, t, &[0, 0], &[2, 3], &i32s(&[6, 5, 4, 3, 2, 1])).unwrap();
    let image = f.close().unwrap().unwrap();

    let mut f = File::open_memory(&image, OpenOptions::writable()).unwrap();
    let root = f.root();
    let xv = f.inq_varid(root, "x").unwrap();
    f.redef().unwrap();
    f.put_att_values(root, xv, "_FillValue", &[-1i32]).unwrap();
    f.enddef().unwrap();
    let image = f.close().unwrap().unwrap();

    let mut g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = g.root();
    assert_eq!(g.inq_dimid(root, "x").unwrap(), x);
    assert_eq!(g.inq_dimid(root, "y").unwrap(), y);
    let t = g.inq_varid(root, "t").unwrap();
    assert_eq!(g.var(root, t).unwrap().dimids, vec![x, y]);
    assert_eq!(g.get_vara(root, t, &[0, 0], &[2, 3]).unwrap(), i32s(&[6, 5, 4, 3, 2, 1]));
    let xv = g.inq_varid(root, "x").unwrap();
    assert_eq!(g.var(root, xv).unwrap().dimids, vec![x]);
    assert_eq!(g.coord_state(root, xv).unwrap(), CoordState::Coordinate);
    assert_eq!(g.get_vara(root, xv, &[0], &[2]).unwrap(), i32s(&[10, 20]));
    assert_eq!(g.get_att(root, xv, "_FillValue").unwrap().values::<i32>().unwrap(), vec![-1]);
    let yv = g.inq_varid(root, "y").unwrap();
    assert_eq!(g.var(root, yv).unwrap().dimids, vec![y]);
}

#[test]
fn rename_into_coordinate_after_enddef_keeps_ids() {
    let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
    let root = f.root();
    let lat = f.def_dim(root, "lat", 3).unwrap();
    let lon = f.def_dim(root, "lon", 2).unwrap();
    let latitude = f.def_var(root, "latitude", TypeId::INT, &[lat]).unwrap();
    let t = f.def_var(root, "t", TypeId::INT, &[lat, lon]).unwrap();
    f.enddef().unwrap();
    f.put_vara(root, latitude, &[0], &[3], &i32s(&[-10, 0, 10])).unwrap();
    f.put_vara(root, t, &[0, 0], &[3, 2], &i32s(&[1, 2, 3, 4, 5, 6])).unwrap();
    f.rename_var(root, latitude, "lat").unwrap();
    let image = f.close().unwrap().unwrap();

    let mut g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
    let root = g.root();
    assert_eq!(g.inq_dimid(root, "lat").unwrap(), lat);
    assert_eq!(g.inq_dimid(root, "lon").unwrap(), lon);
    let t = g.inq_varid(root, "t").unwrap();
    assert_eq!(g.var(root, t).unwrap().dimids, vec![lat, lon]);
    assert_eq!(g.get_vara(root, t, &[0, 0], &[3, 2]).unwrap(), i32s(&[1, 2, 3, 4, 5, 6]));
    let lv = g.inq_varid(root, "lat").unwrap();
    assert_eq!(g.coord_state(root, lv).unwrap(), CoordState::Coordinate);
    assert_eq!(g.var(root, lv).unwrap().dimids, vec![lat]);
    assert_eq!(g.get_vara(root, lv, &[0], &[3]).unwrap(), i32s(&[-10, 0, 10]));
}

#[test]
fn recorded_coordinates_must_match_fixed_lengths() {
    let mut c = MemContainer::new();
    let root = c.root();
    let x = c
        .create_dataset(root, "x", Datatype::i32(), Dataspace::simple(&[4]), DatasetCreateProps::new())
        .unwrap();
    dimscale::set_scale(&mut c, x, Some("x")).unwrap();
    let v = c
        .create_dataset(root, "v", Datatype::i32(), Dataspace::simple(&[2, 4]), DatasetCreateProps::new())
        .unwrap();
    c.write_attr(v, Attribute::array_i32("_Netcdf4Coordinates", &[0, 0])).unwrap();
    let image = c.image().unwrap();

    match File::open_memory(&image, OpenOptions::read_only()) {
        Err(Error::DimensionLengthMismatch {
            name,
            axis,
            dim_len,
            extent,
        }) => {
            assert_eq!(name, "v");
            assert_eq!((axis, dim_len, extent), (0, 4, 2));
        }
        other => panic!("expected a length mismatch, got {:?}", other.map(|_| ())),
    }
}
