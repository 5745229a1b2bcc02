//! Loop device module.
//!
//! Exposes a disc image file as a block device using `losetup`, and creates
//! fresh images filled with random bytes using `dd`.
//!
//! Allocation is not atomic: [`Losetup::first_unused_device`] only reports
//! the next free slot, and a concurrent invocation may observe the same slot
//! before [`LoopDevice::open`] binds it.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::executor::CommandRunner;

const LOSETUP: &str = "losetup";

/// Low level wrapper for calls to `losetup` and `dd`.
pub struct Losetup<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Losetup<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Status of every loop device associated with the given file.
    ///
    /// Returns `None` when nothing is associated.
    pub fn status(&self, file: &Path) -> Result<Option<String>> {
        let file = file.to_string_lossy();
        let status = self.runner.run_checked(LOSETUP, &["-j", &file])?;
        if status.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(status))
    }

    /// The name of the first unused device. Nothing is reserved.
    pub fn first_unused_device(&self) -> Result<String> {
        let device = self.runner.run_checked(LOSETUP, &["-f"])?;
        Ok(device.trim().to_string())
    }

    /// Binds `file` to `device`.
    pub fn bind(&self, device: &str, file: &Path) -> Result<()> {
        let file = file.to_string_lossy();
        self.runner.run_checked(LOSETUP, &[device, &file])?;
        Ok(())
    }

    /// Fills `file` with `megabytes` of random data, synced before returning.
    pub fn fill_with_noise(&self, file: &Path, megabytes: u64) -> Result<()> {
        let of = format!("of={}", file.display());
        let count = format!("count={}", megabytes);
        self.runner.run_checked(
            "dd",
            &[
                "if=/dev/urandom",
                &of,
                &count,
                "conv=fsync",
                "iflag=nonblock",
                "bs=1M",
            ],
        )?;
        Ok(())
    }

    /// Releases `device`.
    pub fn detach(&self, device: &str) -> Result<()> {
        self.runner.run_checked(LOSETUP, &["-d", device])?;
        Ok(())
    }
}

/// What [`LoopDevice::close`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// A bound device was released.
    Released,
    /// Nothing was bound; closing is idempotent.
    AlreadyReleased,
}

/// High level handle on the loop device backed by one file.
pub struct LoopDevice<'a> {
    file: PathBuf,
    device: Option<String>,
    api: Losetup<'a>,
}

impl<'a> LoopDevice<'a> {
    /// Creates an unbound handle for `file`.
    pub fn new(file: impl Into<PathBuf>, runner: &'a dyn CommandRunner) -> Self {
        Self {
            file: file.into(),
            device: None,
            api: Losetup::new(runner),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Binds the backing file to the first unused loop device.
    ///
    /// Returns the device path.
    pub fn open(&mut self) -> Result<String> {
        if !self.file.exists() {
            return Err(Error::DiscImageNotFound {
                path: self.file.clone(),
            });
        }
        if self.is_in_use()? {
            return Err(Error::AlreadyInUse {
                resource: self.to_string(),
            });
        }
        let device = self.api.first_unused_device()?;
        debug!(device = %device, file = %self.file.display(), "binding loop device");
        self.api.bind(&device, &self.file)?;
        self.device = Some(device.clone());
        Ok(device)
    }

    /// True when the backing file exists and a loop device is bound to it.
    pub fn is_in_use(&self) -> Result<bool> {
        Ok(self.file.exists() && self.status()?.is_some())
    }

    pub fn status(&self) -> Result<Option<String>> {
        self.api.status(&self.file)
    }

    /// Creates the backing file, `megabytes` in size, filled with random data.
    pub fn create(&self, megabytes: u64) -> Result<&Self> {
        if self.file.exists() {
            return Err(Error::AlreadyInUse {
                resource: self.file.display().to_string(),
            });
        }
        info!("Filling {} with noise...", self.file.display());
        self.api.fill_with_noise(&self.file, megabytes)?;
        info!("Done.");
        Ok(self)
    }

    /// Path of the bound loop device.
    pub fn device_name(&self) -> Result<String> {
        if let Some(device) = &self.device {
            return Ok(device.clone());
        }
        match self.status()? {
            Some(status) => Ok(device_from_status(&status)),
            None => Err(Error::NotFound {
                resource: self.to_string(),
            }),
        }
    }

    /// Releases the bound device. Closing an unbound device is not an error.
    pub fn close(&mut self) -> Result<CloseOutcome> {
        let device = match self.device_name() {
            Ok(device) => device,
            Err(Error::NotFound { .. }) => {
                debug!(file = %self.file.display(), "loop device already released");
                return Ok(CloseOutcome::AlreadyReleased);
            }
            Err(e) => return Err(e),
        };
        self.api.detach(&device)?;
        self.device = None;
        Ok(CloseOutcome::Released)
    }
}

impl fmt::Display for LoopDevice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loop device (based on '{}')", self.file.display())
    }
}

/// Extracts the device from a `losetup -j` line, e.g.
/// `/dev/loop0: [fd05]:49178 (/var/lib/leitus/small.img)`.
fn device_from_status(status: &str) -> String {
    status
        .split_once(':')
        .map(|(device, _)| device)
        .unwrap_or(status)
        .trim()
        .to_string()
}
