//! Mount operations module.
//!
//! This module handles mounting and unmounting mapped drives and reading the
//! table of mounted drives from `df`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::executor::CommandRunner;

/// Device prefix shared by every drive this tool manages.
pub const DRIVE_PREFIX: &str = "/dev/mapper/leitus";

/// One mounted filesystem as reported by `df`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
}

impl MountEntry {
    /// Parses one `df` line. Header and malformed lines yield `None`.
    fn from_df_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let device = fields.next()?;
        if !device.starts_with('/') {
            return None;
        }
        // size, used, available, use%
        let rest: Vec<&str> = fields.skip(4).collect();
        if rest.is_empty() {
            return None;
        }
        Some(Self {
            device: device.to_string(),
            mount_point: PathBuf::from(rest.join(" ")),
        })
    }

    /// Drive name of a managed mapping, e.g. `vanilla` for `/dev/mapper/leitus-vanilla`.
    pub fn drive_name(&self) -> Option<&str> {
        if !self.device.starts_with(DRIVE_PREFIX) {
            return None;
        }
        self.device.split_once('-').map(|(_, name)| name)
    }
}

/// Attaches and detaches filesystems.
pub struct Mounter<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Mounter<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Mounts `device` on `mount_point`.
    pub fn mount(&self, device: &str, mount_point: &Path) -> Result<()> {
        let path = mount_point.to_string_lossy();
        self.runner.run_checked("mount", &[device, &path])?;
        Ok(())
    }

    /// Unmounts whatever is mounted on `mount_point`.
    ///
    /// A drive may be unmapped before it was ever mounted, so a missing or
    /// empty path is a no-op.
    pub fn unmount(&self, mount_point: Option<&Path>) -> Result<()> {
        let Some(mount_point) = mount_point.filter(|path| !path.as_os_str().is_empty()) else {
            debug!("nothing to unmount");
            return Ok(());
        };
        let path = mount_point.to_string_lossy();
        self.runner.run_checked("umount", &[&path])?;
        Ok(())
    }

    /// Every mounted filesystem backed by a device.
    pub fn mounts(&self) -> Result<Vec<MountEntry>> {
        let output = self.runner.run_checked("df", &[])?;
        Ok(output.lines().filter_map(MountEntry::from_df_line).collect())
    }

    /// True when `device` is mounted on `mount_point`.
    pub fn is_mounted(&self, device: &str, mount_point: &Path) -> Result<bool> {
        Ok(self
            .mounts()?
            .iter()
            .any(|entry| entry.device == device && entry.mount_point == mount_point))
    }

    /// Names of the active drives.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .mounts()?
            .iter()
            .filter_map(MountEntry::drive_name)
            .map(str::to_string)
            .collect())
    }

    /// Mount points of the drive called `name`.
    pub fn active(&self, name: &str) -> Result<Vec<PathBuf>> {
        let device = format!("{}-{}", DRIVE_PREFIX, name);
        Ok(self
            .mounts()?
            .into_iter()
            .filter(|entry| entry.device == device)
            .map(|entry| entry.mount_point)
            .collect())
    }

    /// Mount points of every active drive.
    pub fn all_active(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .mounts()?
            .into_iter()
            .filter(|entry| entry.drive_name().is_some())
            .map(|entry| entry.mount_point)
            .collect())
    }

    /// Unmounts every active drive.
    pub fn umount_all(&self) -> Result<()> {
        for mount_point in self.all_active()? {
            self.unmount(Some(&mount_point))?;
        }
        Ok(())
    }
}
