use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, info};
use retry::{delay, retry_with_index, OperationResult};

use super::{bound, unbound, unknown_slot, Binding, Driver, DriverHandle, Requirement, Supplier};
use crate::error::{Error, Result};
use crate::protocol::{Protocol, StorageProtocol, WriteMode, WriteRequest};
use crate::resource::{Resource, ResourceClass, ResourceKind};
use crate::settings::StorageConfig;

const BINDINGS: &[Binding] = &[
    Binding {
        slot: "shell",
        accepts: &[Requirement::Protocol(Protocol::Shell)],
    },
    Binding {
        slot: "device",
        accepts: &[Requirement::Resource(ResourceClass::BlockDevice)],
    },
];

/// Outcome of one look at the medium while waiting for it.
enum Medium {
    NotReady(String),
    Failed(Error),
}

/// Writes images to a block device of the board with tools run in its
/// shell (`dd`, `bmaptool`).
pub struct ShellStorageDriver {
    config: StorageConfig,
    shell: Option<DriverHandle>,
    device: Option<Rc<Resource>>,
}
impl ShellStorageDriver {
    pub fn new(config: StorageConfig) -> Self {
        ShellStorageDriver {
            config,
            shell: None,
            device: None,
        }
    }

    fn shell(&self) -> Result<&DriverHandle> {
        bound(&self.shell, "ShellStorageDriver", "shell")
    }

    fn block_name(&self) -> Result<&str> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| unbound("ShellStorageDriver", "device"))?;
        match device.kind() {
            ResourceKind::BlockDevice { name } => Ok(name.as_str()),
            other => Err(Error::Binding(format!(
                "resource `{}` is a {}, not a block device",
                device.name(),
                other.class()
            ))),
        }
    }

    /// First output line of the sysfs size attribute, in 512-byte sectors.
    /// `None` while the attribute cannot be read, i.e. the device node does
    /// not exist yet.
    fn read_sectors(&self) -> Result<Option<String>> {
        let cmd = format!("cat /sys/class/block/{}/size", self.block_name()?);
        let output = self.shell()?.with_command(|c| c.run(&cmd, None))?;
        if output.exit_code != 0 {
            debug!("`{}` exited with {}: {:?}", cmd, output.exit_code, output.stdout);
            return Ok(None);
        }
        Ok(Some(output.stdout.into_iter().next().unwrap_or_default()))
    }

    fn wait_for_medium(&self) -> Result<()> {
        let block = self.block_name()?;
        let interval = self.config.medium_poll_interval;
        let timeout = self.config.medium_timeout;
        let retries = timeout.as_millis() / interval.as_millis().max(1);

        let result = retry_with_index(
            delay::Fixed::from_millis(interval.as_millis() as u64).take(retries as usize),
            |index| -> OperationResult<u64, Medium> {
                let sectors = match self.read_sectors() {
                    Ok(Some(sectors)) => sectors,
                    Ok(None) => {
                        debug!("no medium yet ({})", index);
                        return OperationResult::Retry(Medium::NotReady("no device node".into()));
                    }
                    Err(e) => return OperationResult::Err(Medium::Failed(e)),
                };
                // The attribute is empty for a moment while the medium comes up.
                match sectors.trim().parse::<u64>() {
                    Ok(0) => OperationResult::Retry(Medium::NotReady("medium is empty".into())),
                    Ok(sectors) => OperationResult::Ok(sectors),
                    Err(_) => {
                        debug!("medium size not readable yet ({}): {:?}", index, sectors);
                        OperationResult::Retry(Medium::NotReady(format!(
                            "unreadable size {:?}",
                            sectors
                        )))
                    }
                }
            },
        );

        match result {
            Ok(sectors) => {
                debug!("/dev/{} has {} sectors", block, sectors);
                Ok(())
            }
            Err(retry::Error::Operation {
                error: Medium::Failed(e),
                ..
            }) => Err(e),
            Err(retry::Error::Operation {
                error: Medium::NotReady(reason),
                tries,
                ..
            }) => {
                info!("/dev/{} not ready after {} tries: {}", block, tries, reason);
                Err(Error::Timeout {
                    what: format!("medium /dev/{}", block),
                    timeout,
                })
            }
            Err(retry::Error::Internal(msg)) => Err(Error::Execution(format!(
                "internal error while waiting for /dev/{}: {}",
                block, msg
            ))),
        }
    }

    fn write_command(&self, request: &WriteRequest<'_>) -> Result<String> {
        let block = self.block_name()?;
        let target = match request.partition {
            None => format!("/dev/{}", block),
            Some(partition) => format!("/dev/{}p{}", block, partition),
        };
        let image = request.image.display();

        let args = match request.mode {
            WriteMode::RawBlockCopy => {
                info!("writing {} to {} using dd", image, target);
                let block_size = if request.skip_blocks > 0 || request.seek_blocks > 0 {
                    "512"
                } else {
                    "4M"
                };
                vec![
                    "dd".to_string(),
                    format!("if={}", image),
                    format!("of={}", target),
                    "oflag=direct".to_string(),
                    "status=progress".to_string(),
                    format!("bs={}", block_size),
                    format!("skip={}", request.skip_blocks),
                    format!("seek={}", request.seek_blocks),
                    "conv=fdatasync".to_string(),
                ]
            }
            WriteMode::BlockMapCopy => {
                info!("writing {} to {} using bmaptool", image, target);
                let bmap = match find_bmap(request.image) {
                    Some(bmap) => format!("--bmap={}", bmap.display()),
                    None => "--nobmap".to_string(),
                };
                vec![
                    "bmaptool".to_string(),
                    "copy".to_string(),
                    bmap,
                    image.to_string(),
                    target,
                ]
            }
        };
        Ok(args.join(" "))
    }
}

/// Look for a block map next to `image` the way bmaptool does: `disk.img.bmap`
/// first, then with one extension after the other stripped
/// (`disk.img.xz` → `disk.img.bmap` → `disk.bmap`).
fn find_bmap(image: &Path) -> Option<PathBuf> {
    let mut candidate = image.to_path_buf();
    loop {
        let mut bmap = OsString::from(candidate.as_os_str());
        bmap.push(".bmap");
        let bmap = PathBuf::from(bmap);
        if bmap.exists() {
            return Some(bmap);
        }
        candidate.extension()?;
        candidate.set_extension("");
    }
}

impl Driver for ShellStorageDriver {
    fn kind(&self) -> &'static str {
        "ShellStorageDriver"
    }

    fn protocols(&self) -> &'static [Protocol] {
        &[Protocol::Storage]
    }

    fn bindings(&self) -> &'static [Binding] {
        BINDINGS
    }

    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()> {
        match slot {
            "shell" => self.shell = Some(supplier.into_driver(slot)?),
            "device" => self.device = Some(supplier.into_resource(slot)?),
            _ => return Err(unknown_slot(self.kind(), slot)),
        }
        Ok(())
    }

    fn as_storage(&mut self) -> Option<&mut dyn StorageProtocol> {
        Some(self)
    }
}
impl StorageProtocol for ShellStorageDriver {
    fn write_image(&mut self, request: &WriteRequest<'_>) -> Result<()> {
        if request.mode == WriteMode::BlockMapCopy
            && (request.skip_blocks > 0 || request.seek_blocks > 0)
        {
            return Err(Error::Execution(
                "bmaptool does not support skip or seek".into(),
            ));
        }
        self.wait_for_medium()?;

        let cmd = self.write_command(request)?;
        let timeout = self.config.timeout;
        self.shell()?
            .with_command(|c| c.run_check(&cmd, Some(timeout)))
            .map(|_| ())
    }

    fn get_size(&mut self) -> Result<u64> {
        let block = self.block_name()?;
        let sectors = self.read_sectors()?.ok_or_else(|| {
            Error::Execution(format!("no size reported for /dev/{}", block))
        })?;
        let sectors: u64 = sectors.trim().parse().map_err(|_| {
            Error::Execution(format!("unexpected block device size {:?}", sectors))
        })?;
        Ok(sectors * 512)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
