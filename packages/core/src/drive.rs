//! Drive variants and their resolution from configuration records.
//!
//! Every record resolves to exactly one [`DriveConfiguration`]:
//!
//! - `UUID` present: a [`LuksDrive`] on the disk with that UUID
//! - otherwise `source` present: an [`ImageDrive`] on a LUKS disc image
//! - otherwise: a [`SessionHome`], an ephemeral drive keyed at random
//!
//! Each variant can be toggled with `perform`, or driven explicitly with
//! `commission` and `decommission`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::ConfigurationRecord;
use crate::crypt::{CryptoMapper, LuksMapper, RandomKeyMapper};
use crate::device::{
    DeviceMapping, DeviceSource, DiskByUuid, MountedFileSystem, name_after_mapping,
};
use crate::error::{IoResultExt, Result};
use crate::executor::CommandRunner;
use crate::filesystem::{ExtFileSystem, TuningPolicy};
use crate::layout::StandardLayout;
use crate::loopdev::LoopDevice;
use crate::user::User;

/// Profiles directory used when no layout is supplied.
const DEFAULT_PROFILES_DIR: &str = "profiles.d";

/// Collaborators a drive operation runs with.
#[derive(Clone, Copy)]
pub struct Tools<'a> {
    pub runner: &'a dyn CommandRunner,
    /// Applied to LUKS filesystems found with checks disabled.
    pub tuning: Option<TuningPolicy>,
}

impl<'a> Tools<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            tuning: None,
        }
    }

    pub fn with_tuning(mut self, policy: TuningPolicy) -> Self {
        self.tuning = Some(policy);
        self
    }

    fn luks(&self) -> LuksMapper<'a> {
        let mapper = LuksMapper::new(self.runner);
        match self.tuning {
            Some(policy) => mapper.with_tuning(policy),
            None => mapper,
        }
    }
}

/// Which way a toggle went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The drive was mapped and mounted.
    Commissioned,
    /// The drive was unmounted and unmapped.
    Decommissioned,
}

impl From<Option<MountedFileSystem>> for Transition {
    fn from(mounted: Option<MountedFileSystem>) -> Self {
        match mounted {
            Some(_) => Transition::Commissioned,
            None => Transition::Decommissioned,
        }
    }
}

/// Ephemeral home directory on a random-key mapping over a fresh disc image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHome {
    pub profiles: Vec<String>,
    pub name: String,
    pub size_in_megabytes: u64,
    pub user: User,
    pub target: PathBuf,
    pub profiles_dir: PathBuf,
    /// Backing disc image. Its existence tells whether the drive is live.
    pub image: PathBuf,
}

impl SessionHome {
    /// Backing image for the session drive called `name`.
    pub fn image_for(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("leitus-drive-{}.img", name))
    }

    pub fn commission(&self, tools: Tools<'_>) -> Result<()> {
        let device = LoopDevice::new(&self.image, tools.runner);
        device.create(self.size_in_megabytes)?;

        let mapper = RandomKeyMapper::new(tools.runner);
        DeviceMapping::new(DeviceSource::Loop(device), &mapper, tools.runner)
            .map_to(&self.name)?
            .with_format(&ExtFileSystem::new(tools.runner))?
            .mount_on(&self.target)?
            .merge(&self.profiles_dir, &self.profiles)?
            .own_by(&self.user)
    }

    /// Unmounts, unmaps and releases the drive, then deletes its image.
    ///
    /// An image left behind by a failed commission has no mapping; its loop
    /// device is released and the image removed all the same.
    pub fn decommission(&self, tools: Tools<'_>) -> Result<()> {
        let mapper = RandomKeyMapper::new(tools.runner);
        let mut mapping = self.mapping(&mapper, tools.runner);
        if mapping.is_in_use(&self.name)? {
            mapping.unmap_mounted(&self.name, &self.target)?;
        } else {
            warn!("{} is not mapped", name_after_mapping(&self.name));
            mapping.release()?;
        }
        info!("Removing {}", self.image.display());
        fs::remove_file(&self.image).image_removal_context(&self.image)
    }

    pub fn perform(&self, tools: Tools<'_>) -> Result<Transition> {
        if self.image.exists() {
            self.decommission(tools)?;
            Ok(Transition::Decommissioned)
        } else {
            self.commission(tools)?;
            Ok(Transition::Commissioned)
        }
    }

    pub fn info(&self) -> String {
        let profiles = self
            .profiles
            .iter()
            .map(|profile| format!("'{}'", profile))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "\n\nSession drive:\n\n\tsize:\t\t{}M\n\tmapping:\t'{}'\n\ttarget:\t\t'{}'\n\tuser:\t\t{}\n\tprofiles:\t{}\n\n",
            self.size_in_megabytes,
            self.name,
            self.target.display(),
            self.user,
            profiles
        )
    }

    fn mapping<'a>(
        &self,
        mapper: &'a dyn CryptoMapper,
        runner: &'a dyn CommandRunner,
    ) -> DeviceMapping<'a> {
        DeviceMapping::new(
            DeviceSource::Loop(LoopDevice::new(&self.image, runner)),
            mapper,
            runner,
        )
    }
}

/// LUKS volume on a disk addressed by UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuksDrive {
    pub uuid: String,
    pub name: String,
    pub target: PathBuf,
}

impl LuksDrive {
    pub fn commission(&self, tools: Tools<'_>) -> Result<()> {
        let mapper = tools.luks();
        self.mapping(&mapper, tools.runner)
            .map_to(&self.name)?
            .mount_on(&self.target)?;
        Ok(())
    }

    pub fn decommission(&self, tools: Tools<'_>) -> Result<()> {
        let mapper = tools.luks();
        self.mapping(&mapper, tools.runner)
            .unmap_mounted(&self.name, &self.target)
    }

    pub fn perform(&self, tools: Tools<'_>) -> Result<Transition> {
        info!("LUKS {} {} {}", self.uuid, self.name, self.target.display());
        let mapper = tools.luks();
        let mounted = self
            .mapping(&mapper, tools.runner)
            .toggle(&self.name, &self.target)?;
        Ok(mounted.into())
    }

    pub fn info(&self) -> String {
        format!(
            "\n\nLUKS encrypted drive:\n\n\tuuid:\t\t{}\n\tmapping:\t'{}'\n\ttarget:\t\t'{}'\n\n",
            self.uuid,
            self.name,
            self.target.display()
        )
    }

    fn mapping<'a>(
        &self,
        mapper: &'a dyn CryptoMapper,
        runner: &'a dyn CommandRunner,
    ) -> DeviceMapping<'a> {
        DeviceMapping::new(
            DeviceSource::DiskByUuid(DiskByUuid::new(&self.uuid)),
            mapper,
            runner,
        )
    }
}

/// LUKS volume inside a disc image, attached through a loop device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDrive {
    pub source: PathBuf,
    pub name: String,
    pub target: PathBuf,
}

impl ImageDrive {
    pub fn commission(&self, tools: Tools<'_>) -> Result<()> {
        let mapper = tools.luks();
        self.mapping(&mapper, tools.runner)
            .map_to(&self.name)?
            .mount_on(&self.target)?;
        Ok(())
    }

    pub fn decommission(&self, tools: Tools<'_>) -> Result<()> {
        let mapper = tools.luks();
        self.mapping(&mapper, tools.runner)
            .unmap_mounted(&self.name, &self.target)
    }

    /// Toggles the drive. A mapped drive is torn down without reopening its
    /// loop device.
    pub fn perform(&self, tools: Tools<'_>) -> Result<Transition> {
        let mapper = tools.luks();
        let mounted = self
            .mapping(&mapper, tools.runner)
            .toggle(&self.name, &self.target)?;
        Ok(mounted.into())
    }

    pub fn info(&self) -> String {
        format!(
            "Image Drive\n  source: {}\n  target: {}\n\n",
            self.source.display(),
            self.target.display()
        )
    }

    fn mapping<'a>(
        &self,
        mapper: &'a dyn CryptoMapper,
        runner: &'a dyn CommandRunner,
    ) -> DeviceMapping<'a> {
        DeviceMapping::new(
            DeviceSource::Loop(LoopDevice::new(&self.source, runner)),
            mapper,
            runner,
        )
    }
}

/// A resolved drive configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveConfiguration {
    SessionHome(SessionHome),
    Luks(LuksDrive),
    Image(ImageDrive),
}

impl DriveConfiguration {
    /// Picks the variant for `record`.
    ///
    /// `UUID` wins over `source`. Relative sources are resolved against the
    /// layout's drives directory when a layout is given. For a session home
    /// the user is looked up now and their home becomes the target.
    pub fn resolve(record: &ConfigurationRecord, layout: Option<&StandardLayout>) -> Result<Self> {
        let name = record.name()?.to_string();

        if let Some(uuid) = &record.uuid {
            let target = record.required(record.target.as_deref(), "target")?;
            return Ok(DriveConfiguration::Luks(LuksDrive {
                uuid: uuid.clone(),
                name,
                target: target.to_path_buf(),
            }));
        }

        if let Some(source) = &record.source {
            let target = record.required(record.target.as_deref(), "target")?;
            let source = match layout {
                Some(layout) => layout.drive_path(source),
                None => source.clone(),
            };
            return Ok(DriveConfiguration::Image(ImageDrive {
                source,
                name,
                target: target.to_path_buf(),
            }));
        }

        let user = User::lookup(record.required(record.user.as_deref(), "user")?)?;
        let size_in_megabytes = *record.required(record.size_in_meg.as_ref(), "sizeInMeg")?;
        let profiles_dir = layout
            .map(|layout| layout.profiles_d.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILES_DIR));
        Ok(DriveConfiguration::SessionHome(SessionHome {
            profiles: record.profiles.clone().unwrap_or_default(),
            image: SessionHome::image_for(&name),
            name,
            size_in_megabytes,
            target: user.home.clone(),
            user,
            profiles_dir,
        }))
    }

    pub fn name(&self) -> &str {
        match self {
            DriveConfiguration::SessionHome(drive) => &drive.name,
            DriveConfiguration::Luks(drive) => &drive.name,
            DriveConfiguration::Image(drive) => &drive.name,
        }
    }

    pub fn target(&self) -> &Path {
        match self {
            DriveConfiguration::SessionHome(drive) => &drive.target,
            DriveConfiguration::Luks(drive) => &drive.target,
            DriveConfiguration::Image(drive) => &drive.target,
        }
    }

    pub fn perform(&self, tools: Tools<'_>) -> Result<Transition> {
        match self {
            DriveConfiguration::SessionHome(drive) => drive.perform(tools),
            DriveConfiguration::Luks(drive) => drive.perform(tools),
            DriveConfiguration::Image(drive) => drive.perform(tools),
        }
    }

    pub fn commission(&self, tools: Tools<'_>) -> Result<()> {
        match self {
            DriveConfiguration::SessionHome(drive) => drive.commission(tools),
            DriveConfiguration::Luks(drive) => drive.commission(tools),
            DriveConfiguration::Image(drive) => drive.commission(tools),
        }
    }

    pub fn decommission(&self, tools: Tools<'_>) -> Result<()> {
        match self {
            DriveConfiguration::SessionHome(drive) => drive.decommission(tools),
            DriveConfiguration::Luks(drive) => drive.decommission(tools),
            DriveConfiguration::Image(drive) => drive.decommission(tools),
        }
    }

    pub fn info(&self) -> String {
        match self {
            DriveConfiguration::SessionHome(drive) => drive.info(),
            DriveConfiguration::Luks(drive) => drive.info(),
            DriveConfiguration::Image(drive) => drive.info(),
        }
    }
}
