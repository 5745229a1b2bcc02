//! Where configurations, disc images and profiles live.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use snafu::IntoError;

use crate::error::{
    ConfigurationNotFoundSnafu, ConfigurationPermissionSnafu, ConfigurationReadSnafu, Error,
    Result,
};

const APP_DIR: &str = "leitus";

/// The three directories a drive configuration refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardLayout {
    pub conf_d: PathBuf,
    pub drives_d: PathBuf,
    pub profiles_d: PathBuf,
}

impl StandardLayout {
    pub fn new(
        conf_d: impl Into<PathBuf>,
        drives_d: impl Into<PathBuf>,
        profiles_d: impl Into<PathBuf>,
    ) -> Self {
        Self {
            conf_d: conf_d.into(),
            drives_d: drives_d.into(),
            profiles_d: profiles_d.into(),
        }
    }

    /// Default layout under the user's configuration and data directories:
    ///
    /// - `<config_dir>/leitus`
    /// - `<data_local_dir>/leitus/drives.d`
    /// - `<data_local_dir>/leitus/profiles.d`
    pub fn discover() -> Result<Self> {
        let config = dirs::config_dir().ok_or_else(|| Error::NotFound {
            resource: "configuration directory".to_string(),
        })?;
        let data = dirs::data_local_dir().ok_or_else(|| Error::NotFound {
            resource: "data directory".to_string(),
        })?;
        let data = data.join(APP_DIR);
        Ok(Self::new(
            config.join(APP_DIR),
            data.join("drives.d"),
            data.join("profiles.d"),
        ))
    }

    /// Resolves a disc image path: relative paths live in the drives directory.
    pub fn drive_path(&self, resource: &Path) -> PathBuf {
        if resource.is_absolute() {
            resource.to_path_buf()
        } else {
            self.drives_d.join(resource)
        }
    }

    /// Reads `resource` from the configuration directory.
    pub fn read_conf(&self, resource: &str) -> Result<String> {
        let path = self.conf_d.join(resource);
        fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ConfigurationNotFoundSnafu {
                resource,
                directory: &self.conf_d,
            }
            .into_error(source),
            io::ErrorKind::PermissionDenied => ConfigurationPermissionSnafu {
                resource,
                directory: &self.conf_d,
            }
            .into_error(source),
            _ => ConfigurationReadSnafu { path: &path }.into_error(source),
        })
    }
}
