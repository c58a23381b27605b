//! The group hierarchy.
//!
//! Each group owns four name-unique collections (dimensions, variables,
//! types, attributes) and a list of child groups. The root group has id 0,
//! no parent, and can be neither renamed nor deleted.

use crate::attr::Att;
use crate::dim::Dim;
use crate::error::{Error, Result};
use crate::file::File;
use crate::index::{check_name, NameIndex};
use crate::types::UserType;
use crate::var::Var;

/// File-wide group id; the root is [`GroupId::ROOT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub usize);

impl GroupId {
    pub const ROOT: GroupId = GroupId(0);
}

/// A group and its collections.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Non-owning back-reference; `None` only for the root.
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    pub dims: NameIndex<Dim>,
    pub vars: NameIndex<Var>,
    pub types: NameIndex<UserType>,
    /// Global attributes.
    pub atts: NameIndex<Att>,
    /// Names of global attributes deleted or renamed since the last flush.
    pub(crate) att_tombstones: Vec<String>,
}

impl Group {
    pub(crate) fn new(id: GroupId, name: String, parent: Option<GroupId>) -> Self {
        Self {
            id,
            name,
            parent,
            children: Vec::new(),
            dims: NameIndex::new(),
            vars: NameIndex::new(),
            types: NameIndex::new(),
            atts: NameIndex::new(),
            att_tombstones: Vec::new(),
        }
    }
}

impl File {
    /// The root group.
    pub fn root(&self) -> GroupId {
        GroupId::ROOT
    }

    /// Define a child group.
    pub fn def_grp(&mut self, parent: GroupId, name: &str) -> Result<GroupId> {
        check_name(name)?;
        self.enter_define()?;
        if self.state.classic {
            return Err(Error::StrictClassicModel("groups".into()));
        }
        self.model.check_group_name_free(parent, name)?;
        let id = GroupId(self.model.groups.len());
        self.model.groups.push(Group::new(id, name.to_string(), Some(parent)));
        self.model.group_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Rename a group. The root cannot be renamed.
    pub fn rename_grp(&mut self, group: GroupId, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        self.check_writable()?;
        let parent = self
            .model
            .group(group)?
            .parent
            .ok_or_else(|| Error::InvalidArgument("the root group cannot be renamed".into()))?;
        if self.model.group(group)?.name == new_name {
            return Ok(());
        }
        self.model.check_group_name_free(parent, new_name)?;
        self.enter_define()?;
        self.model.group_mut(group)?.name = new_name.to_string();
        Ok(())
    }

    /// Child groups in definition order.
    pub fn inq_grps(&self, group: GroupId) -> Result<Vec<GroupId>> {
        Ok(self.model.group(group)?.children.clone())
    }

    /// Child group by name.
    pub fn inq_grp_named(&self, parent: GroupId, name: &str) -> Result<GroupId> {
        self.model
            .child_named(parent, name)?
            .ok_or_else(|| Error::NotFound(format!("group {name}")))
    }

    /// Parent of a group; the root has none.
    pub fn inq_grp_parent(&self, group: GroupId) -> Result<GroupId> {
        self.model
            .group(group)?
            .parent
            .ok_or_else(|| Error::NotFound("parent of the root group".into()))
    }

    pub fn inq_grpname(&self, group: GroupId) -> Result<&str> {
        Ok(&self.model.group(group)?.name)
    }

    /// Absolute path of a group.
    pub fn inq_grpname_full(&self, group: GroupId) -> Result<String> {
        self.model.full_name(group)
    }

    /// Resolve an absolute or root-relative group path.
    pub fn inq_grp_full_ncid(&self, path: &str) -> Result<GroupId> {
        let mut gid = GroupId::ROOT;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            gid = self.inq_grp_named(gid, part)?;
        }
        Ok(gid)
    }

    /// A group's collections.
    pub fn group(&self, group: GroupId) -> Result<&Group> {
        self.model.group(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::CreateOptions;
    use crate::types::TypeId;

    #[test]
    fn nested_paths_resolve() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        let a = f.def_grp(root, "forecast").unwrap();
        let b = f.def_grp(a, "day1").unwrap();
        assert_eq!(f.inq_grpname_full(b).unwrap(), "/forecast/day1");
        assert_eq!(f.inq_grp_full_ncid("/forecast/day1").unwrap(), b);
        assert_eq!(f.inq_grp_parent(b).unwrap(), a);
        assert_eq!(f.inq_grps(root).unwrap(), vec![a]);
        assert!(f.inq_grp_parent(root).is_err());
    }

    #[test]
    fn group_names_collide_with_siblings() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        f.def_grp(root, "g").unwrap();
        f.def_var(root, "v", TypeId::INT, &[]).unwrap();
        assert!(matches!(f.def_grp(root, "g"), Err(Error::NameInUse(_))));
        assert!(matches!(f.def_grp(root, "v"), Err(Error::NameInUse(_))));
    }

    #[test]
    fn root_rename_rejected() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        assert!(matches!(f.rename_grp(root, "top"), Err(Error::InvalidArgument(_))));
        let g = f.def_grp(root, "old").unwrap();
        f.rename_grp(g, "new").unwrap();
        assert_eq!(f.inq_grp_named(root, "new").unwrap(), g);
    }
}
