use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use log::info;

use super::{unbound, unknown_slot, Binding, Driver, Requirement, Supplier};
use crate::error::{Error, Result};
use crate::protocol::{FileProviderProtocol, Protocol};
use crate::resource::{Resource, ResourceClass, ResourceKind};

const BINDINGS: &[Binding] = &[Binding {
    slot: "share",
    accepts: &[Requirement::Resource(ResourceClass::NetworkShare)],
}];

/// Publishes host files in a directory served to the board (TFTP, NFS or
/// HTTP), by symlink or by copy.
#[derive(Default)]
pub struct ProviderDriver {
    share: Option<Rc<Resource>>,
}
impl ProviderDriver {
    pub fn new() -> Self {
        Self::default()
    }
}
impl Driver for ProviderDriver {
    fn kind(&self) -> &'static str {
        "ProviderDriver"
    }

    fn protocols(&self) -> &'static [Protocol] {
        &[Protocol::FileProvider]
    }

    fn bindings(&self) -> &'static [Binding] {
        BINDINGS
    }

    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()> {
        match slot {
            "share" => self.share = Some(supplier.into_resource(slot)?),
            _ => return Err(unknown_slot(self.kind(), slot)),
        }
        Ok(())
    }

    fn as_file_provider(&mut self) -> Option<&mut dyn FileProviderProtocol> {
        Some(self)
    }
}
impl FileProviderProtocol for ProviderDriver {
    fn stage(&mut self, path: &Path) -> Result<String> {
        let share = self
            .share
            .as_ref()
            .ok_or_else(|| unbound("ProviderDriver", "share"))?;
        let (internal, external, use_symlink) = match share.kind() {
            ResourceKind::NetworkShare {
                internal,
                external,
                use_symlink,
                ..
            } => (internal, external, *use_symlink),
            other => {
                return Err(Error::Binding(format!(
                    "resource `{}` is a {}, not a network share",
                    share.name(),
                    other.class()
                )))
            }
        };

        let source = fs::canonicalize(path)?;
        let file_name = source
            .file_name()
            .ok_or_else(|| Error::Execution(format!("cannot stage {}", path.display())))?;
        let staged = internal.join(file_name);
        match fs::remove_file(&staged) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        if use_symlink {
            link(&source, &staged)?;
        } else {
            fs::copy(&source, &staged)?;
        }
        info!("staged {} as {}", source.display(), staged.display());

        Ok(format!(
            "{}/{}",
            external.trim_end_matches('/'),
            file_name.to_string_lossy()
        ))
    }
}

#[cfg(unix)]
fn link(source: &Path, staged: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, staged)
}

#[cfg(not(unix))]
fn link(source: &Path, staged: &Path) -> io::Result<()> {
    fs::copy(source, staged).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ShareProvider;
    use crate::Target;

    fn share(internal: &Path, use_symlink: bool) -> Resource {
        Resource::new(
            "tftp",
            ResourceKind::NetworkShare {
                provider: ShareProvider::Tftp,
                internal: internal.to_path_buf(),
                external: "board/".into(),
                use_symlink,
            },
        )
    }

    #[cfg(unix)]
    #[test]
    fn stages_by_symlink_and_replaces_stale_files() {
        let images = tempfile::tempdir().unwrap();
        let served = tempfile::tempdir().unwrap();
        let kernel = images.path().join("Image");
        fs::write(&kernel, b"kernel").unwrap();
        fs::write(served.path().join("Image"), b"stale").unwrap();

        let mut target = Target::new("board");
        target.add_resource(share(served.path(), true)).unwrap();
        let provider = target.add_driver("tftp", Box::new(ProviderDriver::new())).unwrap();
        target.activate(&provider).unwrap();

        let location = provider.with_file_provider(|p| p.stage(&kernel)).unwrap();
        assert_eq!(location, "board/Image");
        let staged = served.path().join("Image");
        assert!(fs::symlink_metadata(&staged).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&staged).unwrap(), b"kernel");
    }

    #[test]
    fn stages_by_copy() {
        let images = tempfile::tempdir().unwrap();
        let served = tempfile::tempdir().unwrap();
        let dtb = images.path().join("board.dtb");
        fs::write(&dtb, b"dtb").unwrap();

        let mut target = Target::new("board");
        target.add_resource(share(served.path(), false)).unwrap();
        let provider = target.add_driver("tftp", Box::new(ProviderDriver::new())).unwrap();
        target.activate(&provider).unwrap();

        provider.with_file_provider(|p| p.stage(&dtb)).unwrap();
        let staged = served.path().join("board.dtb");
        assert!(!fs::symlink_metadata(&staged).unwrap().file_type().is_symlink());
        assert!(provider
            .with_file_provider(|p| p.stage(&images.path().join("missing")))
            .is_err());
    }
}
