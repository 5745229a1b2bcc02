//! JSON drive configuration records.
//!
//! A record lives at `<conf_d>/<name>.json`. Every field is optional on disk;
//! which ones are required depends on the drive variant chosen when the
//! record is resolved (see [`crate::drive::DriveConfiguration::resolve`]).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use crate::error::{ConfigurationFieldSnafu, ConfigurationParseSnafu, Result};
use crate::layout::StandardLayout;

const SUFFIX: &str = ".json";

/// One drive configuration as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    #[serde(
        rename = "sizeInMeg",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub size_in_meg: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "UUID", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl ConfigurationRecord {
    /// Loads `<name>.json` from the layout's configuration directory.
    pub fn load(name: &str, layout: &StandardLayout) -> Result<Self> {
        let resource = format!("{}{}", name, SUFFIX);
        let raw = layout.read_conf(&resource)?;
        Self::parse(&raw).context(ConfigurationParseSnafu {
            path: layout.conf_d.join(&resource),
        })
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Starts a session home record named `name`.
    pub fn session_home(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, megabytes: u64) -> Self {
        self.size_in_meg = Some(megabytes);
        self
    }

    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn merge_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = Some(profiles.into_iter().map(Into::into).collect());
        self
    }

    /// The drive name, which doubles as the device-mapper name.
    pub fn name(&self) -> Result<&str> {
        self.name.as_deref().context(ConfigurationFieldSnafu {
            drive: "<unnamed>",
            field: "name",
        })
    }

    /// Returns a required field, or [`crate::error::Error::ConfigurationField`].
    pub(crate) fn required<'r, T: ?Sized>(
        &'r self,
        value: Option<&'r T>,
        field: &str,
    ) -> Result<&'r T> {
        let drive = self.name.as_deref().unwrap_or("<unnamed>");
        value.context(ConfigurationFieldSnafu { drive, field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_parse_field_names() {
        let record = ConfigurationRecord::parse(
            r#"{"user": "rdonkin", "profiles": ["home", "gnome"], "sizeInMeg": 2000,
                "name": "neo", "UUID": "8e1f215f", "target": "/mnt/x", "source": "test.img"}"#,
        )
        .unwrap();

        assert_eq!(record.user.as_deref(), Some("rdonkin"));
        assert_eq!(
            record.profiles,
            Some(vec!["home".to_string(), "gnome".to_string()])
        );
        assert_eq!(record.size_in_meg, Some(2000));
        assert_eq!(record.uuid.as_deref(), Some("8e1f215f"));
        assert_eq!(record.target, Some(PathBuf::from("/mnt/x")));
        assert_eq!(record.source, Some(PathBuf::from("test.img")));
    }

    #[test]
    fn test_builder() {
        let record = ConfigurationRecord::session_home("neo")
            .with_size(2000)
            .for_user("rdonkin")
            .merge_profiles(["home", "gnome", "maven"]);

        assert_eq!(record.name().unwrap(), "neo");
        assert_eq!(record.size_in_meg, Some(2000));
        assert_eq!(record.profiles.as_ref().map(Vec::len), Some(3));
        assert!(record.uuid.is_none());
    }

    #[test]
    fn test_serialize_skips_absent() {
        let json = serde_json::to_string(&ConfigurationRecord::session_home("neo").with_size(20))
            .unwrap();
        assert_eq!(json, r#"{"sizeInMeg":20,"name":"neo"}"#);
    }

    #[test]
    fn test_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("bongo.json"),
            r#"{"source": "test.img", "name": "bongo", "target": "/mnt/x"}"#,
        )
        .unwrap();
        let layout = StandardLayout::new(dir.path(), "drives.d", "profiles.d");

        let record = ConfigurationRecord::load("bongo", &layout).unwrap();

        assert_eq!(record.name().unwrap(), "bongo");
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        let layout = StandardLayout::new(dir.path(), "drives.d", "profiles.d");

        let result = ConfigurationRecord::load("nope", &layout);

        assert!(matches!(
            result,
            Err(Error::ConfigurationNotFound { resource, .. }) if resource == "nope.json"
        ));
    }

    #[test]
    fn test_load_malformed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let layout = StandardLayout::new(dir.path(), "drives.d", "profiles.d");

        let result = ConfigurationRecord::load("bad", &layout);

        assert!(matches!(result, Err(Error::ConfigurationParse { .. })));
    }

    #[test]
    fn test_missing_name() {
        let record = ConfigurationRecord::default();
        assert!(matches!(
            record.name(),
            Err(Error::ConfigurationField { field, .. }) if field == "name"
        ));
    }
}
