//! leitus-core: encrypted drive lifecycle.
//!
//! This library maps, mounts and hands over encrypted drives by driving the
//! usual Linux tools (`losetup`, `cryptsetup`, `mount`, e2fsprogs). Nothing
//! cryptographic is implemented here.
//!
//! # Modules
//!
//! - [`loopdev`]: Loop devices over disc images
//! - [`crypt`]: Random-key and LUKS mappings via `cryptsetup`
//! - [`device`]: The map/unmap/toggle state machine
//! - [`filesystem`]: Formatting, header inspection and tuning
//! - [`mount`]: Mount/unmount and the table of active drives
//! - [`profile`]: Profile overlays
//! - [`user`]: User lookup and ownership
//! - [`drive`]: Drive variants resolved from configuration
//! - [`config`], [`layout`]: Configuration records and directories
//! - [`diagnosis`]: Translation of errors into remediation advice
//! - [`executor`]: Command execution, optionally escalated
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use leitus_core::{ExecutionContext, Leitus, StandardLayout};
//!
//! let layout = StandardLayout::discover().unwrap();
//! let leitus = Leitus::new(layout, Box::new(ExecutionContext::with_sudo()));
//!
//! match leitus.perform("music") {
//!     Ok(transition) => println!("{:?}", transition),
//!     Err(diagnosis) => eprintln!("{}\n\n{}", diagnosis, diagnosis.fix),
//! }
//! ```

pub mod app;
pub mod config;
pub mod crypt;
pub mod device;
pub mod diagnosis;
pub mod drive;
pub mod error;
pub mod executor;
pub mod filesystem;
pub mod layout;
pub mod loopdev;
pub mod mount;
pub mod profile;
pub mod user;

#[cfg(test)]
mod testing;

pub use app::Leitus;
pub use config::ConfigurationRecord;
pub use diagnosis::{Diagnosis, DiagnosisKind};
pub use drive::{DriveConfiguration, Transition};
pub use error::{Error, Result};
pub use executor::{CommandRunner, ExecutionContext, PrivilegeEscalation};
pub use filesystem::TuningPolicy;
pub use layout::StandardLayout;
