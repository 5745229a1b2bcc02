//! Ext filesystem tooling: formatting, header inspection and tuning.

use std::fmt;

use tracing::info;

use crate::device::name_after_mapping;
use crate::error::Result;
use crate::executor::CommandRunner;

const LAST_CHECK: &str = "Last checked";
const CHECK_INTERVAL: &str = "Check interval";
const MOUNT_COUNT: &str = "Mount count";
const MAX_MOUNT_COUNT: &str = "Maximum mount count";

/// Snapshot of the tunable metadata `dumpe2fs -h` reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSystemHeaders {
    pub last_check: Option<String>,
    pub check_interval: Option<String>,
    pub mount_count: Option<String>,
    pub max_mount_count: Option<String>,
}

impl FileSystemHeaders {
    /// Picks the four tuning fields out of raw `dumpe2fs -h` output.
    pub fn parse(raw: &str) -> Self {
        let mut headers = Self::default();
        for line in raw.lines() {
            let Some((label, value)) = line.split_once(':') else {
                continue;
            };
            let value = Some(value.trim().to_string());
            match label.trim() {
                LAST_CHECK => headers.last_check = value,
                CHECK_INTERVAL => headers.check_interval = value,
                MOUNT_COUNT => headers.mount_count = value,
                MAX_MOUNT_COUNT => headers.max_mount_count = value,
                _ => {}
            }
        }
        headers
    }

    /// True when neither time nor mount based checks are scheduled.
    pub fn checks_disabled(&self) -> bool {
        let interval_off = self
            .check_interval
            .as_deref()
            .is_none_or(|interval| interval.starts_with('0'));
        let mounts_off = self
            .max_mount_count
            .as_deref()
            .is_none_or(|count| count.starts_with('-') || count == "0");
        interval_off && mounts_off
    }
}

impl fmt::Display for FileSystemHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("Last check:", &self.last_check),
            ("Check interval:", &self.check_interval),
            ("Mount count:", &self.mount_count),
            ("Maximum mount count:", &self.max_mount_count),
        ];
        writeln!(f)?;
        for (label, value) in fields {
            writeln!(f, "{:<22}{}", label, value.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

/// How often a filesystem should be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningPolicy {
    /// Days between checks.
    pub interval_days: u32,
    /// Mounts between checks.
    pub max_mounts: u32,
}

impl Default for TuningPolicy {
    fn default() -> Self {
        Self {
            interval_days: 30,
            max_mounts: 30,
        }
    }
}

/// Journaled ext filesystem on a device-mapper device.
pub struct ExtFileSystem<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> ExtFileSystem<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Creates a fresh journaled filesystem on `device`.
    ///
    /// Only for ephemeral session drives; LUKS and image drives are expected
    /// to be formatted already.
    pub fn format(&self, device: &str) -> Result<()> {
        info!("Formatting {}", device);
        self.runner.run_checked(
            "mke2fs",
            &["-j", "-m", "1", "-O", "dir_index,filetype", device],
        )?;
        Ok(())
    }

    /// Reads the tuning headers of the filesystem mapped as `name`.
    pub fn headers(&self, name: &str) -> Result<FileSystemHeaders> {
        let device = name_after_mapping(name);
        let raw = self.runner.run_checked("dumpe2fs", &["-h", &device])?;
        Ok(FileSystemHeaders::parse(&raw))
    }

    /// Schedules regular checks for the filesystem mapped as `name`.
    pub fn tune(&self, name: &str, policy: TuningPolicy) -> Result<()> {
        let device = name_after_mapping(name);
        let count = policy.max_mounts.to_string();
        let interval = format!("{}d", policy.interval_days);
        info!(
            "Scheduling checks on {} every {} mounts or {} days",
            device, policy.max_mounts, policy.interval_days
        );
        self.runner
            .run_checked("tune2fs", &["-c", &count, "-i", &interval, &device])?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_HEADERS: &str = "
dumpe2fs 1.45.5 (07-Jan-2020)
Filesystem volume name:   music
Last mounted on:          /home/rob/Music
Filesystem UUID:          d646cbfc-8814-4c40-b8a2-3cd418d4033d
Filesystem magic number:  0xEF53
Filesystem revision #:    1 (dynamic)
Filesystem features:      has_journal ext_attr resize_inode dir_index filetype extent flex_bg sparse_super large_file
Filesystem state:         clean
Errors behavior:          Continue
Inode count:              19660800
Block count:              78642688
Block size:               4096
Filesystem created:       Fri Apr 10 12:00:58 2015
Last mount time:          Mon Apr 27 08:56:51 2020
Last write time:          Mon Apr 27 08:57:19 2020
Mount count:              2049
Maximum mount count:      -1
Last checked:             Fri Apr 10 12:00:58 2015
Check interval:           0 (<none>)
Lifetime writes:          228 GB
Reserved blocks uid:      0 (user root)
Journal size:             128M
";
