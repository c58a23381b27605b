//! Dataset filter pipeline.
//!
//! Filters run in list order when data is stored and in reverse order when it
//! is loaded.

use serde::{Deserialize, Serialize};

/// Well-known filter IDs.
pub const FILTER_DEFLATE: u32 = 1;
pub const FILTER_SHUFFLE: u32 = 2;
pub const FILTER_FLETCHER32: u32 = 3;
pub const FILTER_SZIP: u32 = 4;
pub const FILTER_NBIT: u32 = 5;
pub const FILTER_SCALEOFFSET: u32 = 6;

/// Filter flag: the filter may be skipped when it cannot be applied.
pub const FLAG_OPTIONAL: u16 = 0x0001;

/// Description of a single filter in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDescription {
    /// Filter identification value.
    pub filter_id: u32,
    /// Optional filter name.
    pub name: Option<String>,
    /// Filter flags (bit 0 = optional).
    pub flags: u16,
    /// Client data values passed to the filter.
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    /// A mandatory filter with the given parameters.
    pub fn new(filter_id: u32, client_data: &[u32]) -> Self {
        Self {
            filter_id,
            name: None,
            flags: 0,
            client_data: client_data.to_vec(),
        }
    }

    /// Whether the optional flag is set.
    pub fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }
}

/// An ordered list of filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPipeline {
    /// Ordered list of filters.
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter.
    pub fn push(&mut self, filter: FilterDescription) {
        self.filters.push(filter);
    }

    /// Find the first filter with this id.
    pub fn find(&self, filter_id: u32) -> Option<&FilterDescription> {
        self.filters.iter().find(|f| f.filter_id == filter_id)
    }

    /// Whether the pipeline has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_first_match() {
        let mut p = FilterPipeline::new();
        p.push(FilterDescription::new(FILTER_SHUFFLE, &[]));
        p.push(FilterDescription::new(FILTER_DEFLATE, &[4]));
        assert_eq!(p.find(FILTER_DEFLATE).unwrap().client_data, vec![4]);
        assert!(p.find(FILTER_SZIP).is_none());
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn optional_flag() {
        let mut f = FilterDescription::new(32015, &[3]);
        assert!(!f.is_optional());
        f.flags |= FLAG_OPTIONAL;
        assert!(f.is_optional());
    }
}
