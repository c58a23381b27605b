//! Hidden names the binding reads and writes.

/// Scalar int on a scale dataset recording its dimension id.
pub const NETCDF4_DIMID: &str = "_Netcdf4Dimid";

/// Int array on a multi-axis variable listing its dimension ids.
pub const NETCDF4_COORDINATES: &str = "_Netcdf4Coordinates";

/// Root attribute marking a strict classic-model file.
pub const NC3_STRICT: &str = "_nc3_strict";

/// Scale `NAME` prefix of a dataset that only represents a dimension.
pub const DIM_WITHOUT_VARIABLE: &str = "This is a netCDF dimension but not a netCDF variable.";

/// Link-name prefix of a variable named like a dimension it does not
/// coordinate.
pub const NON_COORD_PREFIX: &str = "_nc4_non_coord_";

/// Name prefix of dimensions invented while reading.
pub const PHONY_DIM_PREFIX: &str = "phony_dim_";

/// `NAME` of the dimension-only dataset for a dimension of length `len`.
pub fn dim_only_name(len: u64) -> String {
    format!("{DIM_WITHOUT_VARIABLE}{len:>10}")
}

/// Whether a scale `NAME` marks a dimension-only dataset.
pub fn is_dim_only(name: &str) -> bool {
    name.starts_with(DIM_WITHOUT_VARIABLE)
}

/// Length recorded in a dimension-only `NAME`.
pub fn dim_only_len(name: &str) -> Option<u64> {
    name.strip_prefix(DIM_WITHOUT_VARIABLE)?.trim().parse().ok()
}

/// Variable name behind a stored link name.
pub fn var_name_from_link(link: &str) -> &str {
    link.strip_prefix(NON_COORD_PREFIX).unwrap_or(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dim_only_name_pads_length() {
        let n = dim_only_name(42);
        assert_eq!(n, "This is a netCDF dimension but not a netCDF variable.        42");
        assert!(is_dim_only(&n));
        assert_eq!(dim_only_len(&n), Some(42));
        assert_eq!(dim_only_len(DIM_WITHOUT_VARIABLE), None);
    }

    #[test]
    fn non_coord_prefix_stripped() {
        assert_eq!(var_name_from_link("_nc4_non_coord_lat"), "lat");
        assert_eq!(var_name_from_link("lat"), "lat");
    }
}
