//! High level API over named drive configurations.

use tracing::debug;

use crate::config::ConfigurationRecord;
use crate::diagnosis::Diagnosis;
use crate::drive::{DriveConfiguration, Tools, Transition};
use crate::error::Result;
use crate::executor::CommandRunner;
use crate::filesystem::TuningPolicy;
use crate::layout::StandardLayout;
use crate::mount::Mounter;

/// Entry point for the drives described in a [`StandardLayout`].
///
/// Collaborators are wired once, when the value is built, and shared by
/// every call. Failures leave as a [`Diagnosis`].
pub struct Leitus {
    layout: StandardLayout,
    runner: Box<dyn CommandRunner>,
    tuning: Option<TuningPolicy>,
}

impl Leitus {
    pub fn new(layout: StandardLayout, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            layout,
            runner,
            tuning: None,
        }
    }

    /// Schedules filesystem checks on LUKS drives found with none.
    pub fn with_tuning(mut self, policy: TuningPolicy) -> Self {
        self.tuning = Some(policy);
        self
    }

    pub fn layout(&self) -> &StandardLayout {
        &self.layout
    }

    /// Loads and resolves the configuration called `name`.
    pub fn configuration(&self, name: &str) -> std::result::Result<DriveConfiguration, Diagnosis> {
        self.diagnose(self.resolve(name))
    }

    /// Toggles the drive called `name`.
    pub fn perform(&self, name: &str) -> std::result::Result<Transition, Diagnosis> {
        let result = self.resolve(name).and_then(|drive| {
            debug!(drive = drive.name(), target = %drive.target().display(), "toggling");
            drive.perform(self.tools())
        });
        self.diagnose(result)
    }

    pub fn commission(&self, name: &str) -> std::result::Result<(), Diagnosis> {
        let result = self
            .resolve(name)
            .and_then(|drive| drive.commission(self.tools()));
        self.diagnose(result)
    }

    pub fn decommission(&self, name: &str) -> std::result::Result<(), Diagnosis> {
        let result = self
            .resolve(name)
            .and_then(|drive| drive.decommission(self.tools()));
        self.diagnose(result)
    }

    /// Describes the drive called `name`.
    pub fn info(&self, name: &str) -> std::result::Result<String, Diagnosis> {
        self.configuration(name).map(|drive| drive.info())
    }

    /// Names of the active drives.
    pub fn list(&self) -> std::result::Result<Vec<String>, Diagnosis> {
        self.diagnose(Mounter::new(self.runner.as_ref()).list())
    }

    fn resolve(&self, name: &str) -> Result<DriveConfiguration> {
        let record = ConfigurationRecord::load(name, &self.layout)?;
        DriveConfiguration::resolve(&record, Some(&self.layout))
    }

    fn tools(&self) -> Tools<'_> {
        let tools = Tools::new(self.runner.as_ref());
        match self.tuning {
            Some(policy) => tools.with_tuning(policy),
            None => tools,
        }
    }

    fn diagnose<T>(&self, result: Result<T>) -> std::result::Result<T, Diagnosis> {
        result.map_err(|error| Diagnosis::new(&error, &self.layout))
    }
}
