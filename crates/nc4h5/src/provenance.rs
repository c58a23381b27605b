//! The `_NCProperties` provenance record written on the root group.

use std::fmt;

/// Root attribute carrying the provenance text.
pub const NCPROPERTIES: &str = "_NCProperties";

/// Provenance format version.
pub const PROVENANCE_VERSION: u32 = 2;

/// Library versions that created a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Provenance {
    pub version: u32,
    /// `key=value` pairs after the version, in file order.
    pub entries: Vec<(String, String)>,
}

impl Provenance {
    /// Provenance of files created by this library.
    pub fn current() -> Self {
        Self {
            version: PROVENANCE_VERSION,
            entries: vec![
                ("nc4h5".to_string(), env!("CARGO_PKG_VERSION").to_string()),
                ("container".to_string(), nc4h5_container::VERSION.to_string()),
            ],
        }
    }

    /// Parse `version=N,key=value,...`. Unknown or malformed text is kept as
    /// a single entry so it survives a rewrite unchanged.
    pub fn parse(text: &str) -> Self {
        let mut version = 0;
        let mut entries = Vec::new();
        for part in text.split(',').filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                Some(("version", v)) => version = v.trim().parse().unwrap_or(0),
                Some((k, v)) => entries.push((k.to_string(), v.to_string())),
                None => entries.push((part.to_string(), String::new())),
            }
        }
        Self { version, entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version={}", self.version)?;
        for (k, v) in &self.entries {
            if v.is_empty() {
                write!(f, ",{k}")?;
            } else {
                write!(f, ",{k}={v}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_text() {
        let p = Provenance::current();
        let text = p.to_string();
        assert!(text.starts_with("version=2,nc4h5="));
        assert!(text.contains(",container="));
        assert_eq!(Provenance::parse(&text), p);
    }

    #[test]
    fn foreign_text_is_kept() {
        let p = Provenance::parse("version=2,netcdf=4.9.2,hdf5=1.14.3");
        assert_eq!(p.version, 2);
        assert_eq!(p.get("hdf5"), Some("1.14.3"));
        assert_eq!(p.to_string(), "version=2,netcdf=4.9.2,hdf5=1.14.3");
    }
}
