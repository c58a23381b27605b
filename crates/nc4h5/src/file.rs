//! Open files and their lifecycle.
//!
//! A [`File`] owns the in-memory model and the storage binding. Structural
//! changes only touch the model; [`File::enddef`], [`File::sync`],
//! [`File::close`] and every data access flush them to the container first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nc4h5_container::{Container, MemContainer};
use tracing::{debug, info};

use crate::binding::Hdf5Store;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::provenance::Provenance;
use crate::registry::FilterRegistry;

/// On-disk data model of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Enhanced model: groups, user types, several unlimited dimensions.
    Netcdf4,
    /// Strict classic model stored in the netCDF-4 format.
    Netcdf4Classic,
}

/// Options for [`File::create`] and [`File::create_in_memory`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Restrict the file to the classic data model.
    pub classic_model: bool,
    /// Fail instead of overwriting an existing file.
    pub no_clobber: bool,
    /// Defaults to [`Config::default`].
    pub config: Option<Config>,
    /// Defaults to [`FilterRegistry::global`].
    pub filter_registry: Option<Arc<FilterRegistry>>,
}

impl CreateOptions {
    pub fn classic() -> Self {
        Self {
            classic_model: true,
            ..Self::default()
        }
    }
}

/// Options for [`File::open`] and [`File::open_memory`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Open for writing.
    pub write: bool,
    pub config: Option<Config>,
    pub filter_registry: Option<Arc<FilterRegistry>>,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn writable() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FileState {
    pub writable: bool,
    pub define_mode: bool,
    /// Define mode was re-entered with [`File::redef`] this session.
    pub redef: bool,
    pub classic: bool,
    pub path: Option<PathBuf>,
    pub created_this_session: bool,
    pub provenance: Option<Provenance>,
}

/// An open netCDF-4 file.
#[derive(Debug)]
pub struct File {
    pub(crate) model: Model,
    pub(crate) store: Hdf5Store,
    pub(crate) state: FileState,
    pub(crate) config: Config,
    pub(crate) registry: Arc<FilterRegistry>,
}

impl File {
    /// Create a file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, opts: CreateOptions) -> Result<Self> {
        let path = path.as_ref();
        let container = MemContainer::create_file(path, !opts.no_clobber)?;
        let f = Self::new_session(Box::new(container), opts, Some(path.to_path_buf()))?;
        info!(path = %path.display(), classic = f.state.classic, "created file");
        Ok(f)
    }

    /// Create a file that lives in memory; [`File::close`] returns its bytes.
    pub fn create_in_memory(opts: CreateOptions) -> Result<Self> {
        let f = Self::new_session(Box::new(MemContainer::new()), opts, None)?;
        debug!(classic = f.state.classic, "created in-memory file");
        Ok(f)
    }

    /// Open the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, opts: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let container = MemContainer::open_file(path, !opts.write)?;
        let f = Self::open_container(Box::new(container), opts, Some(path.to_path_buf()))?;
        info!(path = %path.display(), writable = f.state.writable, "opened file");
        Ok(f)
    }

    /// Open a file from the bytes of an HDF5 file held in memory.
    pub fn open_memory(bytes: &[u8], opts: OpenOptions) -> Result<Self> {
        let container = MemContainer::from_image(bytes, !opts.write)?;
        Self::open_container(Box::new(container), opts, None)
    }

    fn new_session(container: Box<dyn Container>, opts: CreateOptions, path: Option<PathBuf>) -> Result<Self> {
        let config = opts.config.unwrap_or_default();
        config.validate()?;
        Ok(Self {
            model: Model::new(),
            store: Hdf5Store::new(container),
            state: FileState {
                writable: true,
                define_mode: true,
                redef: false,
                classic: opts.classic_model,
                path,
                created_this_session: true,
                provenance: Some(Provenance::current()),
            },
            config,
            registry: opts.filter_registry.unwrap_or_else(FilterRegistry::global),
        })
    }

    fn open_container(container: Box<dyn Container>, opts: OpenOptions, path: Option<PathBuf>) -> Result<Self> {
        let config = opts.config.unwrap_or_default();
        config.validate()?;
        let mut f = Self {
            model: Model::new(),
            store: Hdf5Store::new(container),
            state: FileState {
                writable: opts.write,
                path,
                ..FileState::default()
            },
            config,
            registry: opts.filter_registry.unwrap_or_else(FilterRegistry::global),
        };
        f.reconcile()?;
        Ok(f)
    }

    /// Leave define mode, writing pending metadata.
    pub fn enddef(&mut self) -> Result<()> {
        self.check_writable()?;
        if !self.state.define_mode && self.state.classic {
            return Err(Error::NotInDefineMode);
        }
        self.flush_metadata()?;
        self.state.define_mode = false;
        Ok(())
    }

    /// Re-enter define mode.
    pub fn redef(&mut self) -> Result<()> {
        self.check_writable()?;
        if self.state.define_mode && self.state.classic {
            return Err(Error::InDefineMode);
        }
        self.state.define_mode = true;
        self.state.redef = true;
        Ok(())
    }

    /// Write pending metadata and persist the container.
    pub fn sync(&mut self) -> Result<()> {
        if !self.state.writable {
            return Ok(());
        }
        if self.state.classic && self.state.define_mode {
            return Err(Error::InDefineMode);
        }
        self.flush_metadata()?;
        self.state.define_mode = false;
        self.store.container.flush()?;
        Ok(())
    }

    /// Flush and close. In-memory files return their HDF5 bytes.
    pub fn close(mut self) -> Result<Option<Vec<u8>>> {
        if self.state.writable {
            self.flush_metadata()?;
            self.store.container.flush()?;
        }
        self.store.release_handles();
        let image = match self.state.path {
            Some(_) => None,
            None => Some(self.store.container.image()?),
        };
        debug!(path = ?self.state.path, "closed file");
        Ok(image)
    }

    /// Discard the session without flushing. A file created by this session
    /// is removed.
    pub fn abort(self) -> Result<()> {
        if self.state.created_this_session {
            if let Some(path) = &self.state.path {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        info!(path = ?self.state.path, "aborted file");
        Ok(())
    }

    pub fn inq_format(&self) -> Format {
        if self.state.classic {
            Format::Netcdf4Classic
        } else {
            Format::Netcdf4
        }
    }

    /// Provenance recorded in the file, if any.
    pub fn provenance(&self) -> Option<&Provenance> {
        self.state.provenance.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.state.path.as_deref()
    }

    pub fn is_writable(&self) -> bool {
        self.state.writable
    }

    pub fn in_define_mode(&self) -> bool {
        self.state.define_mode
    }

    /// Configuration captured when the file was opened.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dataset handles currently open in the container.
    pub fn open_handle_count(&self) -> usize {
        self.store.container.open_handles()
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.state.writable {
            Ok(())
        } else {
            Err(Error::ReadOnly)
        }
    }

    /// Enter define mode for a structural change. Classic files require an
    /// explicit [`File::redef`].
    pub(crate) fn enter_define(&mut self) -> Result<()> {
        self.check_writable()?;
        if !self.state.define_mode {
            if self.state.classic {
                return Err(Error::NotInDefineMode);
            }
            self.state.define_mode = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::UNLIMITED;
    use crate::types::TypeId;
    use crate::var::VarId;

    #[test]
    fn memory_round_trip() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        f.def_dim(root, "x", 3).unwrap();
        f.put_att_text(root, VarId::GLOBAL, "title", "demo").unwrap();
        let image = f.close().unwrap().unwrap();

        let g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
        assert_eq!(g.inq_dimid(g.root(), "x").unwrap().0, 0);
        assert_eq!(g.get_att(g.root(), VarId::GLOBAL, "title").unwrap().as_text().as_deref(), Some("demo"));
        assert_eq!(g.inq_format(), Format::Netcdf4);
        assert_eq!(g.provenance().unwrap().version, 2);
    }

    #[test]
    fn read_only_rejects_changes() {
        let f = File::create_in_memory(CreateOptions::default()).unwrap();
        let image = f.close().unwrap().unwrap();
        let mut g = File::open_memory(&image, OpenOptions::read_only()).unwrap();
        let root = g.root();
        assert!(matches!(g.def_dim(root, "x", 1), Err(Error::ReadOnly)));
        assert!(matches!(g.redef(), Err(Error::ReadOnly)));
        assert!(g.sync().is_ok());
    }

    #[test]
    fn classic_needs_redef() {
        let mut f = File::create_in_memory(CreateOptions::classic()).unwrap();
        let root = f.root();
        f.def_dim(root, "t", UNLIMITED).unwrap();
        assert!(matches!(f.def_dim(root, "u", UNLIMITED), Err(Error::StrictClassicModel(_))));
        assert!(matches!(f.def_grp(root, "g"), Err(Error::StrictClassicModel(_))));
        assert!(matches!(f.def_var(root, "s", TypeId::STRING, &[]), Err(Error::StrictClassicModel(_))));
        f.enddef().unwrap();
        assert!(matches!(f.def_dim(root, "x", 2), Err(Error::NotInDefineMode)));
        f.redef().unwrap();
        assert!(matches!(f.redef(), Err(Error::InDefineMode)));
        f.def_dim(root, "x", 2).unwrap();
        assert_eq!(f.inq_format(), Format::Netcdf4Classic);
    }

    #[test]
    fn implicit_define_mode() {
        let mut f = File::create_in_memory(CreateOptions::default()).unwrap();
        let root = f.root();
        f.enddef().unwrap();
        assert!(!f.in_define_mode());
        f.def_dim(root, "x", 2).unwrap();
        assert!(f.in_define_mode());
    }

    #[test]
    fn abort_removes_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.nc");
        let mut f = File::create(&path, CreateOptions::default()).unwrap();
        let root = f.root();
        f.def_dim(root, "x", 2).unwrap();
        f.abort().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn no_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.nc");
        File::create(&path, CreateOptions::default()).unwrap().close().unwrap();
        let opts = CreateOptions {
            no_clobber: true,
            ..CreateOptions::default()
        };
        assert!(File::create(&path, opts).is_err());
    }
}
