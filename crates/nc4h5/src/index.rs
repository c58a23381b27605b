//! Name-keyed, insertion-ordered collections with a separate numeric id.
//!
//! Groups, dimensions, variables, types and attributes all live in a
//! [`NameIndex`]. Iteration follows insertion order; lookups go through a
//! name map and an id map, both rebuilt whenever slots shift.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::error::{Error, Result};

/// Longest name accepted for any netCDF object.
pub const MAX_NAME: usize = 256;

/// An entry that can be stored in a [`NameIndex`].
pub trait Indexed {
    /// Numeric identifier type.
    type Id: Copy + Eq + Hash + fmt::Debug;

    fn id(&self) -> Self::Id;
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
}

/// Entries whose id is their position in the collection.
pub trait Positional: Indexed<Id = usize> {
    fn set_position(&mut self, position: usize);
}

/// Insertion-ordered collection addressable by name and by id.
#[derive(Debug, Clone)]
pub struct NameIndex<T: Indexed> {
    entries: Vec<T>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<T::Id, usize>,
}

impl<T: Indexed> Default for NameIndex<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<T: Indexed> NameIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Fails with [`Error::NameInUse`] on a duplicate name.
    pub fn insert(&mut self, entry: T) -> Result<T::Id> {
        if self.by_name.contains_key(entry.name()) {
            return Err(Error::NameInUse(entry.name().to_string()));
        }
        let id = entry.id();
        let slot = self.entries.len();
        self.by_name.insert(entry.name().to_string(), slot);
        self.by_id.insert(id, slot);
        self.entries.push(entry);
        Ok(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&T> {
        self.by_name.get(name).map(|&slot| &self.entries[slot])
    }

    pub fn get_by_id(&self, id: T::Id) -> Option<&T> {
        self.by_id.get(&id).map(|&slot| &self.entries[slot])
    }

    pub fn get_mut_by_name(&mut self, name: &str) -> Option<&mut T> {
        match self.by_name.get(name) {
            Some(&slot) => Some(&mut self.entries[slot]),
            None => None,
        }
    }

    pub fn get_mut_by_id(&mut self, id: T::Id) -> Option<&mut T> {
        match self.by_id.get(&id) {
            Some(&slot) => Some(&mut self.entries[slot]),
            None => None,
        }
    }

    /// Entry at an iteration position.
    pub fn get_at(&self, position: usize) -> Option<&T> {
        self.entries.get(position)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn contains_id(&self, id: T::Id) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Iteration position of an entry.
    pub fn position_of(&self, id: T::Id) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    /// Remove an entry, keeping the ids of every other entry unchanged.
    pub fn remove(&mut self, id: T::Id) -> Option<T> {
        let slot = self.by_id.get(&id).copied()?;
        let entry = self.entries.remove(slot);
        self.rebuild();
        Some(entry)
    }

    /// Rename an entry in place, keeping its position and id.
    pub fn rename(&mut self, id: T::Id, new_name: &str) -> Result<()> {
        let slot = *self
            .by_id
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("{id:?}")))?;
        if self.entries[slot].name() == new_name {
            return Ok(());
        }
        if self.by_name.contains_key(new_name) {
            return Err(Error::NameInUse(new_name.to_string()));
        }
        self.entries[slot].set_name(new_name.to_string());
        self.rebuild();
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.entries.iter_mut()
    }

    /// Ids in iteration order.
    pub fn ids(&self) -> Vec<T::Id> {
        self.entries.iter().map(Indexed::id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rebuild(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
        for (slot, e) in self.entries.iter().enumerate() {
            self.by_name.insert(e.name().to_string(), slot);
            self.by_id.insert(e.id(), slot);
        }
    }
}

impl<T: Positional> NameIndex<T> {
    /// Remove an entry and renumber the ones after it, so that every id
    /// stays equal to its position.
    pub fn remove_renumbering(&mut self, id: usize) -> Option<T> {
        if id >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(id);
        for (pos, e) in self.entries.iter_mut().enumerate().skip(id) {
            e.set_position(pos);
        }
        self.rebuild();
        Some(entry)
    }
}

impl<'a, T: Indexed> IntoIterator for &'a NameIndex<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Validate an object name.
///
/// Names must be non-empty, at most [`MAX_NAME`] bytes, contain no `/` and no
/// control characters, start with an alphanumeric character, `_` or a
/// non-ASCII character, and carry no trailing whitespace.
pub fn check_name(name: &str) -> Result<()> {
    let bad = || Error::BadName(name.to_string());
    let first = name.chars().next().ok_or_else(bad)?;
    if name.len() > MAX_NAME {
        return Err(bad());
    }
    if !(first.is_ascii_alphanumeric() || first == '_' || !first.is_ascii()) {
        return Err(bad());
    }
    if name.chars().any(|c| c == '/' || c.is_control()) {
        return Err(bad());
    }
    if name.ends_with(char::is_whitespace) {
        return Err(bad());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Item {
        id: i32,
        name: String,
    }

    impl Indexed for Item {
        type Id = i32;
        fn id(&self) -> i32 {
            self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn set_name(&mut self, name: String) {
            self.name = name;
        }
    }

    #[derive(Debug, Clone)]
    struct Slot {
        pos: usize,
        name: String,
    }

    impl Indexed for Slot {
        type Id = usize;
        fn id(&self) -> usize {
            self.pos
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn set_name(&mut self, name: String) {
            self.name = name;
        }
    }

    impl Positional for Slot {
        fn set_position(&mut self, position: usize) {
            self.pos = position;
        }
    }

    fn item(id: i32, name: &str) -> Item {
        Item {
            id,
            name: name.into(),
        }
    }

    #[test]
    fn insert_and_lookup() {
        let mut idx = NameIndex::new();
        idx.insert(item(4, "lat")).unwrap();
        idx.insert(item(9, "lon")).unwrap();
        assert_eq!(idx.get_by_name("lon").map(|i| i.id), Some(9));
        assert_eq!(idx.get_by_id(4).map(|i| i.name.as_str()), Some("lat"));
        assert!(matches!(idx.insert(item(10, "lat")), Err(Error::NameInUse(_))));
    }

    #[test]
    fn remove_keeps_ids_stable() {
        let mut idx = NameIndex::new();
        for (i, n) in ["a", "b", "c"].iter().enumerate() {
            idx.insert(item(i as i32, n)).unwrap();
        }
        idx.remove(0).unwrap();
        assert_eq!(idx.get_by_id(2).map(|i| i.name.as_str()), Some("c"));
        assert_eq!(idx.position_of(2), Some(1));
    }

    #[test]
    fn remove_renumbering_shifts_positions() {
        let mut idx = NameIndex::new();
        for (i, n) in ["units", "long_name", "scale"].iter().enumerate() {
            idx.insert(Slot {
                pos: i,
                name: n.to_string(),
            })
            .unwrap();
        }
        idx.remove_renumbering(0).unwrap();
        assert_eq!(idx.get_by_name("scale").map(|s| s.pos), Some(1));
        assert_eq!(idx.get_by_id(0).map(|s| s.name.as_str()), Some("long_name"));
    }

    #[test]
    fn rename_rebuilds_name_map() {
        let mut idx = NameIndex::new();
        idx.insert(item(0, "x")).unwrap();
        idx.insert(item(1, "y")).unwrap();
        idx.rename(0, "time").unwrap();
        assert!(idx.get_by_name("x").is_none());
        assert_eq!(idx.get_by_name("time").map(|i| i.id), Some(0));
        assert!(matches!(idx.rename(0, "y"), Err(Error::NameInUse(_))));
        assert_eq!(idx.ids(), vec![0, 1]);
    }

    #[test]
    fn name_rules() {
        assert!(check_name("temp_2m").is_ok());
        assert!(check_name("_hidden").is_ok());
        assert!(check_name("température").is_ok());
        for bad in ["", "a/b", " lead", "trail ", "tab\tin", "-dash"] {
            assert!(matches!(check_name(bad), Err(Error::BadName(_))), "{bad:?}");
        }
    }
}
