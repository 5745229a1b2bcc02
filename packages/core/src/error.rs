//! Unified error types for the leitus-core library.
//!
//! Uses SNAFU for context-rich error handling. Components raise the most
//! specific variant they can and never retry; translation into user-facing
//! diagnostics happens once, in [`crate::diagnosis`].

use snafu::{ResultExt, Snafu};
use std::io;
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque failure reported by an external tool.
///
/// Callers query the predicates rather than matching exit codes, so the
/// tool-specific interpretation stays here.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum LowLevelError {
    /// A tool exited with a status nobody interprets.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    Tool {
        command: String,
        code: i32,
        stderr: String,
    },

    /// `cryptsetup` exited with a non-zero status.
    ///
    /// Codes: 1 wrong parameters, 2 no permission (bad passphrase),
    /// 3 out of memory, 4 wrong device specified, 5 device already exists
    /// or device is busy.
    #[snafu(display("{}", cryptsetup_cause(*code)))]
    Cryptsetup { code: i32 },
}

impl LowLevelError {
    /// Names the low level API that failed.
    pub fn api(&self) -> &str {
        match self {
            LowLevelError::Tool { command, .. } => command,
            LowLevelError::Cryptsetup { .. } => "cryptation",
        }
    }

    /// Raw exit code of the failed tool.
    pub fn code(&self) -> i32 {
        match self {
            LowLevelError::Tool { code, .. } | LowLevelError::Cryptsetup { code } => *code,
        }
    }

    pub fn is_already_in_use(&self) -> bool {
        self.is_device_busy()
    }

    pub fn is_not_found(&self) -> bool {
        false
    }

    pub fn is_bad_passphrase(&self) -> bool {
        self.cryptsetup_code() == Some(2)
    }

    pub fn is_parameter_error(&self) -> bool {
        self.cryptsetup_code() == Some(1)
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.cryptsetup_code() == Some(3)
    }

    pub fn is_device_error(&self) -> bool {
        self.cryptsetup_code() == Some(4)
    }

    pub fn is_device_busy(&self) -> bool {
        self.cryptsetup_code() == Some(5)
    }

    /// Human explanation of the failure.
    pub fn cause(&self) -> String {
        self.to_string()
    }

    fn cryptsetup_code(&self) -> Option<i32> {
        match self {
            LowLevelError::Cryptsetup { code } => Some(*code),
            LowLevelError::Tool { .. } => None,
        }
    }
}

/// Interprets a `cryptsetup` exit code.
pub fn cryptsetup_cause(code: i32) -> String {
    match code {
        1 => "I seem to have passed the wrong parameters.\nIs this version unsupported?".to_string(),
        2 => "Did you mistype the passphrase?".to_string(),
        3 => "I'm sorry but there's too little memory left.".to_string(),
        4 => "I seem to have the wrong device. Please accept my apologies.".to_string(),
        5 => "Seems that the device already exists or is busy.".to_string(),
        other => format!("error code {}", other),
    }
}

/// Explains why a tool could not be started.
pub fn explain_os_error(error: &io::Error) -> String {
    match error.kind() {
        io::ErrorKind::NotFound => "this isn't on your user's path.".to_string(),
        io::ErrorKind::PermissionDenied => "this isn't readable by your user.".to_string(),
        _ => format!("this failed.\n{}", error),
    }
}

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A resource required by an operation cannot be located.
    #[snafu(display("{resource} not found."))]
    NotFound { resource: String },

    /// The disc image backing a loop back drive cannot be found.
    #[snafu(display("{} not found.", path.display()))]
    DiscImageNotFound { path: PathBuf },

    /// An operation conflicts with an existing use of a drive, device or file.
    #[snafu(display("{resource} is already in use."))]
    AlreadyInUse { resource: String },

    /// An encrypted device could not be unlocked.
    #[snafu(display("{resource} could not be unlocked."))]
    Passphrase { resource: String },

    /// The OS lacks a tool this library relies on.
    #[snafu(display("Leitus tried to use '{tool}' but {}", explain_os_error(source)))]
    Unsupported { tool: String, source: io::Error },

    /// An external tool failed.
    #[snafu(context(false), display("{source}"))]
    LowLevel { source: LowLevelError },

    /// Drive configuration does not exist.
    #[snafu(display("configuration '{resource}' not found in {}", directory.display()))]
    ConfigurationNotFound {
        resource: String,
        directory: PathBuf,
        source: io::Error,
    },

    /// Drive configuration exists but cannot be read.
    #[snafu(display("configuration '{resource}' in {} is not readable", directory.display()))]
    ConfigurationPermission {
        resource: String,
        directory: PathBuf,
        source: io::Error,
    },

    /// Any other failure reading a drive configuration.
    #[snafu(display("failed to read configuration at {}", path.display()))]
    ConfigurationRead { path: PathBuf, source: io::Error },

    /// Drive configuration is not valid JSON.
    #[snafu(display("failed to parse configuration at {}", path.display()))]
    ConfigurationParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Drive configuration lacks a field its variant requires.
    #[snafu(display("configuration for '{drive}' is missing '{field}'"))]
    ConfigurationField { drive: String, field: String },

    /// No passwd entry for the named user.
    #[snafu(display("user '{name}' not found"))]
    UserNotFound { name: String },

    /// Looking up a passwd entry failed.
    #[snafu(display("failed to look up user '{name}'"))]
    UserLookup {
        name: String,
        source: nix::errno::Errno,
    },

    /// Copying a profile entry failed.
    #[snafu(display("failed to copy {} to {}", from.display(), to.display()))]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Changing ownership failed.
    #[snafu(display("failed to change owner of {}", path.display()))]
    Ownership {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    /// Walking or changing permissions of a tree failed.
    #[snafu(display("failed to update permissions at {}", path.display()))]
    Permissions { path: PathBuf, source: io::Error },

    /// The backing image of a session drive could not be removed.
    #[snafu(display("failed to remove disc image {}", path.display()))]
    ImageRemoval { path: PathBuf, source: io::Error },
}

impl Error {
    /// The low level failure behind this error, if any.
    pub fn low_level(&self) -> Option<&LowLevelError> {
        match self {
            Error::LowLevel { source } => Some(source),
            _ => None,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for copy errors.
    fn copy_context(self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Result<T>;

    /// Add context for permission and tree walking errors.
    fn permissions_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for image removal errors.
    fn image_removal_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, io::Error> {
    fn copy_context(self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Result<T> {
        self.context(CopySnafu {
            from: from.into(),
            to: to.into(),
        })
    }

    fn permissions_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(PermissionsSnafu { path: path.into() })
    }

    fn image_removal_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ImageRemovalSnafu { path: path.into() })
    }
}
