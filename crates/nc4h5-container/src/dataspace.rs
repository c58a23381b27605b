//! Dataspaces: current and maximum extents of a dataset or attribute.

use serde::{Deserialize, Serialize};

use crate::error::{ContainerError, Result};

/// Maximum-extent marker for an unlimited (extensible) axis.
pub const UNLIMITED: u64 = u64::MAX;

/// Shape of a dataset or attribute.
///
/// An empty `dims` vector is a scalar dataspace holding one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataspace {
    /// Current dimension sizes.
    pub dims: Vec<u64>,
    /// Maximum dimension sizes, if different from `dims`. [`UNLIMITED`] marks
    /// an extensible axis.
    pub max_dims: Option<Vec<u64>>,
}

impl Dataspace {
    /// A scalar dataspace.
    pub fn scalar() -> Self {
        Self {
            dims: Vec::new(),
            max_dims: None,
        }
    }

    /// A fixed-size simple dataspace.
    pub fn simple(dims: &[u64]) -> Self {
        Self {
            dims: dims.to_vec(),
            max_dims: None,
        }
    }

    /// A simple dataspace with explicit maximum extents.
    pub fn with_max(dims: &[u64], max_dims: &[u64]) -> Result<Self> {
        if dims.len() != max_dims.len() {
            return Err(ContainerError::RankMismatch {
                expected: dims.len(),
                got: max_dims.len(),
            });
        }
        for (axis, (&d, &m)) in dims.iter().zip(max_dims).enumerate() {
            if m != UNLIMITED && d > m {
                return Err(ContainerError::ExtentExceedsMax {
                    axis,
                    requested: d,
                    max: m,
                });
            }
        }
        Ok(Self {
            dims: dims.to_vec(),
            max_dims: Some(max_dims.to_vec()),
        })
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Whether this is a scalar dataspace.
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Number of elements addressed by the current extent.
    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Maximum extent along `axis`.
    pub fn max_dim(&self, axis: usize) -> u64 {
        match &self.max_dims {
            Some(max) => max[axis],
            None => self.dims[axis],
        }
    }

    /// Whether `axis` is unlimited.
    pub fn is_unlimited(&self, axis: usize) -> bool {
        self.max_dim(axis) == UNLIMITED
    }

    /// Validate a proposed new extent against rank and maximum dimensions.
    pub fn check_extent(&self, new_dims: &[u64]) -> Result<()> {
        if new_dims.len() != self.rank() {
            return Err(ContainerError::RankMismatch {
                expected: self.rank(),
                got: new_dims.len(),
            });
        }
        for (axis, &d) in new_dims.iter().enumerate() {
            let max = self.max_dim(axis);
            if max != UNLIMITED && d > max {
                return Err(ContainerError::ExtentExceedsMax {
                    axis,
                    requested: d,
                    max,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_one_element() {
        let s = Dataspace::scalar();
        assert!(s.is_scalar());
        assert_eq!(s.num_elements(), 1);
    }

    #[test]
    fn unlimited_axis_detected() {
        let s = Dataspace::with_max(&[0, 10], &[UNLIMITED, 10]).unwrap();
        assert!(s.is_unlimited(0));
        assert!(!s.is_unlimited(1));
        assert!(s.check_extent(&[1000, 10]).is_ok());
        assert!(matches!(
            s.check_extent(&[1, 11]),
            Err(ContainerError::ExtentExceedsMax { axis: 1, .. })
        ));
    }

    #[test]
    fn with_max_rejects_rank_mismatch() {
        assert!(matches!(
            Dataspace::with_max(&[1], &[1, 2]),
            Err(ContainerError::RankMismatch { .. })
        ));
    }
}
