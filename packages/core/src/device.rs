//! Device mappings: the map/unmap/toggle state machine for a named drive.
//!
//! A [`DeviceMapping`] ties a block device source (a loop device or a disk
//! addressed by UUID) to a [`CryptoMapper`]. It moves between two states:
//!
//! - Unmapped → Mapped via [`DeviceMapping::map_to`]
//! - Mapped → Unmapped via [`DeviceMapping::unmap_from`]
//!
//! [`DeviceMapping::toggle`] picks the direction from the current state. The
//! state query and the action that follows are separate invocations of
//! `cryptsetup`, so two concurrent toggles on one name can race; callers that
//! know what they want should use the explicit operations.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::crypt::CryptoMapper;
use crate::error::{Error, Result};
use crate::executor::CommandRunner;
use crate::filesystem::ExtFileSystem;
use crate::loopdev::LoopDevice;
use crate::mount::Mounter;
use crate::profile;
use crate::user::User;

/// Path of the device-mapper node for `name`.
pub fn name_after_mapping(name: &str) -> String {
    format!("/dev/mapper/{}", name)
}

/// Disk addressed through `/dev/disk/by-uuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskByUuid {
    uuid: String,
}

impl DiskByUuid {
    pub const PATH: &'static str = "/dev/disk/by-uuid/";

    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }

    pub fn device_name(&self) -> String {
        format!("{}{}", Self::PATH, self.uuid)
    }
}

/// Block device underneath a mapping.
pub enum DeviceSource<'a> {
    Loop(LoopDevice<'a>),
    DiskByUuid(DiskByUuid),
}

impl DeviceSource<'_> {
    /// Makes the block device available, returning its path.
    ///
    /// An unbound loop device is opened; anything else is already there.
    fn attach(&mut self) -> Result<(String, bool)> {
        match self {
            DeviceSource::Loop(device) if device.is_in_use()? => Ok((device.device_name()?, false)),
            DeviceSource::Loop(device) => Ok((device.open()?, true)),
            DeviceSource::DiskByUuid(disk) => Ok((disk.device_name(), false)),
        }
    }

    /// Gives the block device back. A no-op for disks.
    fn release(&mut self) -> Result<()> {
        match self {
            DeviceSource::Loop(device) => {
                device.close()?;
                Ok(())
            }
            DeviceSource::DiskByUuid(_) => Ok(()),
        }
    }
}

/// A source paired with the crypto strategy that maps it.
pub struct DeviceMapping<'a> {
    source: DeviceSource<'a>,
    mapper: &'a dyn CryptoMapper,
    runner: &'a dyn CommandRunner,
}

impl<'a> DeviceMapping<'a> {
    pub fn new(
        source: DeviceSource<'a>,
        mapper: &'a dyn CryptoMapper,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            source,
            mapper,
            runner,
        }
    }

    /// Maps the source as `/dev/mapper/<name>`.
    ///
    /// A busy name becomes [`Error::AlreadyInUse`] and a rejected passphrase
    /// [`Error::Passphrase`]; other failures pass through unchanged. A loop
    /// device opened by this call is released again when mapping fails.
    pub fn map_to(&mut self, name: &str) -> Result<FileSystemOnDeviceMapping<'a>> {
        let (device, attached) = self.source.attach()?;
        info!("Mapping {} to {}", device, name_after_mapping(name));

        if let Err(error) = self.mapper.map(name, &device) {
            if attached {
                if let Err(release_error) = self.source.release() {
                    warn!("Could not release {}: {}", device, release_error);
                }
            }
            return Err(translate_map_error(error, device));
        }
        Ok(self.file_system(name))
    }

    /// Unmounts, unmaps and releases, in that order.
    ///
    /// `mount_point` may be `None` when nothing was mounted.
    pub fn unmap_from(&mut self, name: &str, mount_point: Option<&Path>) -> Result<()> {
        info!("Unmapping {}", name_after_mapping(name));
        self.file_system(name).unmount_from(mount_point)?;
        self.mapper.unmap(name)?;
        self.source.release()
    }

    /// Like [`Self::unmap_from`], unmounting `target` only if the mapping is
    /// mounted there.
    pub fn unmap_mounted(&mut self, name: &str, target: &Path) -> Result<()> {
        let mounted = Mounter::new(self.runner).is_mounted(&name_after_mapping(name), target)?;
        self.unmap_from(name, mounted.then_some(target))
    }

    pub fn is_in_use(&self, name: &str) -> Result<bool> {
        self.mapper.is_in_use(name)
    }

    /// Gives the source back without touching any mapping.
    pub fn release(&mut self) -> Result<()> {
        self.source.release()
    }

    /// Maps and mounts an unmapped drive, or unmounts and unmaps a mapped one.
    ///
    /// Returns the mounted filesystem when the drive was mapped.
    pub fn toggle(&mut self, name: &str, target: &Path) -> Result<Option<MountedFileSystem>> {
        if self.is_in_use(name)? {
            self.unmap_mounted(name, target)?;
            Ok(None)
        } else {
            let mounted = self.map_to(name)?.mount_on(target)?;
            Ok(Some(mounted))
        }
    }

    fn file_system(&self, name: &str) -> FileSystemOnDeviceMapping<'a> {
        FileSystemOnDeviceMapping::new(name_after_mapping(name), self.runner)
    }
}

fn translate_map_error(error: Error, device: String) -> Error {
    if let Some(low_level) = error.low_level() {
        if low_level.is_already_in_use() {
            return Error::AlreadyInUse { resource: device };
        }
        if low_level.is_bad_passphrase() {
            return Error::Passphrase { resource: device };
        }
    }
    error
}

/// Filesystem living on a device-mapper node.
pub struct FileSystemOnDeviceMapping<'a> {
    on_device: String,
    runner: &'a dyn CommandRunner,
}

impl<'a> FileSystemOnDeviceMapping<'a> {
    pub fn new(on_device: impl Into<String>, runner: &'a dyn CommandRunner) -> Self {
        Self {
            on_device: on_device.into(),
            runner,
        }
    }

    pub fn device(&self) -> &str {
        &self.on_device
    }

    /// Formats the device with a fresh filesystem.
    pub fn with_format(self, filesystem: &ExtFileSystem<'_>) -> Result<Self> {
        filesystem.format(&self.on_device)?;
        Ok(self)
    }

    pub fn mount_on(&self, path: &Path) -> Result<MountedFileSystem> {
        Mounter::new(self.runner).mount(&self.on_device, path)?;
        Ok(MountedFileSystem::new(path))
    }

    pub fn unmount_from(&self, path: Option<&Path>) -> Result<()> {
        Mounter::new(self.runner).unmount(path)
    }
}

/// A mounted drive, ready to be seeded and handed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedFileSystem {
    mount_point: PathBuf,
    profiles: Vec<String>,
}

impl MountedFileSystem {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            profiles: Vec::new(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Profiles merged so far, in merge order.
    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    /// Copies each profile under `profiles_dir` onto the drive, in order.
    pub fn merge(mut self, profiles_dir: &Path, profiles: &[String]) -> Result<Self> {
        profile::merge(&self.mount_point, profiles_dir, profiles)?;
        self.profiles.extend_from_slice(profiles);
        Ok(self)
    }

    /// Hands the whole drive to `user`.
    pub fn own_by(&self, user: &User) -> Result<()> {
        user.own(&self.mount_point)
    }
}
