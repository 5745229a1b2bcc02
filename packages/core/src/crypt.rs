//! Device-mapper crypto mappings via `cryptsetup`.
//!
//! Two interchangeable strategies sit behind [`CryptoMapper`]:
//! [`RandomKeyMapper`] for ephemeral session drives and [`LuksMapper`] for
//! persistent LUKS volumes.

use tracing::{debug, info};

use crate::device::name_after_mapping;
use crate::error::{LowLevelError, Result};
use crate::executor::CommandRunner;
use crate::filesystem::{ExtFileSystem, TuningPolicy};

const CRYPTSETUP: &str = "cryptsetup";

/// Establishes and removes a named device-mapper mapping over a block device.
pub trait CryptoMapper {
    /// Maps `device` as `/dev/mapper/<name>`.
    fn map(&self, name: &str, device: &str) -> Result<()>;

    /// Removes the mapping called `name`.
    fn unmap(&self, name: &str) -> Result<()>;

    /// True when a mapping called `name` exists.
    fn is_in_use(&self, name: &str) -> Result<bool>;
}

/// Runs cryptsetup, interpreting a non-zero exit as [`LowLevelError::Cryptsetup`].
fn cryptsetup(runner: &dyn CommandRunner, args: &[&str]) -> Result<()> {
    let output = runner.output(CRYPTSETUP, args)?;
    if !output.success() {
        return Err(LowLevelError::Cryptsetup { code: output.code }.into());
    }
    Ok(())
}

fn status(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
    let output = runner.output(CRYPTSETUP, &["status", name])?;
    debug!(name, code = output.code, "cryptsetup status");
    Ok(output.success())
}

/// Plain dm-crypt mapping keyed from `/dev/urandom`.
///
/// The key is never stored, so the data is gone once the mapping is removed.
pub struct RandomKeyMapper<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> RandomKeyMapper<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl CryptoMapper for RandomKeyMapper<'_> {
    fn map(&self, name: &str, device: &str) -> Result<()> {
        cryptsetup(
            self.runner,
            &["-d", "/dev/urandom", "create", name, device],
        )
    }

    fn unmap(&self, name: &str) -> Result<()> {
        cryptsetup(self.runner, &["remove", name])
    }

    fn is_in_use(&self, name: &str) -> Result<bool> {
        status(self.runner, name)
    }
}

/// LUKS volume unlocked with a passphrase typed by the user.
pub struct LuksMapper<'a> {
    runner: &'a dyn CommandRunner,
    tuning: Option<TuningPolicy>,
}

impl<'a> LuksMapper<'a> {
    /// Creates a mapper that reports filesystem tuning but never changes it.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            tuning: None,
        }
    }

    /// Applies `policy` whenever an opened filesystem has checks disabled.
    pub fn with_tuning(mut self, policy: TuningPolicy) -> Self {
        self.tuning = Some(policy);
        self
    }

    fn check_tuning(&self, name: &str) -> Result<()> {
        let filesystem = ExtFileSystem::new(self.runner);
        let headers = filesystem.headers(name)?;
        info!("{}", headers);
        if let Some(policy) = self.tuning {
            if headers.checks_disabled() {
                filesystem.tune(name, policy)?;
            }
        }
        Ok(())
    }

    /// Fails fast when the unlocked filesystem is corrupt.
    fn check_filesystem(&self, name: &str) -> Result<()> {
        let device = name_after_mapping(name);
        let output = self.runner.output("fsck", &["-MCr", &device])?;
        // 1 means errors were found and corrected
        if output.code > 1 {
            return Err(LowLevelError::Tool {
                command: format!("fsck -MCr {}", device),
                code: output.code,
                stderr: output.stderr,
            }
            .into());
        }
        Ok(())
    }
}

impl CryptoMapper for LuksMapper<'_> {
    fn map(&self, name: &str, device: &str) -> Result<()> {
        let output = self
            .runner
            .interactive(CRYPTSETUP, &["luksOpen", device, name])?;
        if !output.success() {
            return Err(LowLevelError::Cryptsetup { code: output.code }.into());
        }
        self.check_tuning(name)?;
        self.check_filesystem(name)
    }

    fn unmap(&self, name: &str) -> Result<()> {
        cryptsetup(self.runner, &["luksClose", name])
    }

    fn is_in_use(&self, name: &str) -> Result<bool> {
        status(self.runner, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::filesystem::SAMPLE_HEADERS;
    use crate::testing::FakeSystem;

    #[test]
    fn test_luks_map_calls() {
        let system = FakeSystem::new();
        system.set_headers(SAMPLE_HEADERS);

        LuksMapper::new(&system).map("A-NAME", "/some/device").unwrap();

        assert_eq!(
            system.calls(),
            vec![
                "cryptsetup luksOpen /some/device A-NAME",
                "dumpe2fs -h /dev/mapper/A-NAME",
                "fsck -MCr /dev/mapper/A-NAME",
            ]
        );
    }

    #[test]
    fn test_luks_map_applies_tuning() {
        let system = FakeSystem::new();
        system.set_headers(SAMPLE_HEADERS);

        LuksMapper::new(&system)
            .with_tuning(TuningPolicy::default())
            .map("music", "/dev/sdb1")
            .unwrap();

        assert_eq!(
            system.calls_to("tune2fs"),
            vec!["tune2fs -c 30 -i 30d /dev/mapper/music"]
        );
    }

    #[test]
    fn test_luks_bad_passphrase() {
        let system = FakeSystem::new();
        system.fail("cryptsetup", "luksOpen", 2);

        let error = LuksMapper::new(&system)
            .map("A-NAME", "/some/device")
            .expect_err("passphrase rejected");

        let low_level = error.low_level().expect("low level error");
        assert!(low_level.is_bad_passphrase());
        assert_eq!(system.calls().len(), 1);
    }

    #[test]
    fn test_luks_corrupt_filesystem() {
        let system = FakeSystem::new();
        system.fail("fsck", "-MCr", 4);

        let error = LuksMapper::new(&system)
            .map("A-NAME", "/some/device")
            .expect_err("fsck failure");

        assert!(matches!(
            error,
            Error::LowLevel {
                source: LowLevelError::Tool { code: 4, .. }
            }
        ));
    }

    #[test]
    fn test_luks_corrected_filesystem_is_accepted() {
        let system = FakeSystem::new();
        system.fail("fsck", "-MCr", 1);

        assert!(LuksMapper::new(&system).map("A-NAME", "/some/device").is_ok());
    }

    #[test]
    fn test_luks_unmap_calls() {
        let system = FakeSystem::new();
        system.add_mapping("A-NAME", "/some/device");

        LuksMapper::new(&system).unmap("A-NAME").unwrap();

        assert_eq!(system.calls(), vec!["cryptsetup luksClose A-NAME"]);
        assert!(!system.is_mapped("A-NAME"));
    }

    #[test]
    fn test_is_in_use_calls() {
        let system = FakeSystem::new();
        let mapper = LuksMapper::new(&system);

        assert!(!mapper.is_in_use("A-NAME").unwrap());
        system.add_mapping("A-NAME", "/some/device");
        assert!(mapper.is_in_use("A-NAME").unwrap());
        assert_eq!(
            system.calls(),
            vec!["cryptsetup status A-NAME", "cryptsetup status A-NAME"]
        );
    }

    #[test]
    fn test_random_key_calls() {
        let system = FakeSystem::new();
        let mapper = RandomKeyMapper::new(&system);

        mapper.map("neo", "/dev/loop0").unwrap();
        mapper.unmap("neo").unwrap();

        assert_eq!(
            system.calls(),
            vec![
                "cryptsetup -d /dev/urandom create neo /dev/loop0",
                "cryptsetup remove neo",
            ]
        );
    }

    #[test]
    fn test_random_key_busy_name() {
        let system = FakeSystem::new();
        system.add_mapping("neo", "/dev/loop1");

        let error = RandomKeyMapper::new(&system)
            .map("neo", "/dev/loop0")
            .expect_err("name taken");

        assert!(error.low_level().is_some_and(LowLevelError::is_already_in_use));
    }
}
