//! User-facing diagnostics.
//!
//! Core errors are translated exactly once, where an operation leaves the
//! [`crate::Leitus`] facade. Each [`Diagnosis`] pairs a message with a
//! recommended fix and keeps the raw cause for display alongside it.

use std::error::Error as StdError;
use std::fmt;

use crate::error::Error;
use crate::layout::StandardLayout;

/// Broad failure category, one per exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisKind {
    MissingConfiguration,
    MissingDiscImage,
    CannotUnlock,
    MissingRequirement,
    InUse,
    Failure,
}

impl DiagnosisKind {
    pub fn exit_code(self) -> i32 {
        match self {
            DiagnosisKind::MissingConfiguration => 1,
            DiagnosisKind::MissingDiscImage => 3,
            DiagnosisKind::CannotUnlock => 4,
            DiagnosisKind::MissingRequirement | DiagnosisKind::InUse => 5,
            DiagnosisKind::Failure => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub kind: DiagnosisKind,
    pub message: String,
    pub fix: String,
    /// The underlying error and its sources, one per line.
    pub cause: String,
}

impl Diagnosis {
    /// Translates `error`, raised while working with drives in `layout`.
    pub fn new(error: &Error, layout: &StandardLayout) -> Self {
        let (kind, message, fix) = match error {
            Error::ConfigurationNotFound {
                resource,
                directory,
                ..
            } => (
                DiagnosisKind::MissingConfiguration,
                format!(
                    "Missing configuration: '{}' not found in directory '{}'",
                    resource,
                    directory.display()
                ),
                format!("Did you mistype '{}'?", resource),
            ),
            Error::ConfigurationPermission {
                resource,
                directory,
                ..
            } => (
                DiagnosisKind::MissingConfiguration,
                format!(
                    "Could not read '{}' in directory '{}'",
                    resource,
                    directory.display()
                ),
                "Did you mean to sudo?".to_string(),
            ),
            Error::DiscImageNotFound { path } => (
                DiagnosisKind::MissingDiscImage,
                format!(
                    "Disc image '{}' not found. Drives in directory '{}'",
                    path.display(),
                    layout.drives_d.display()
                ),
                "Did you mean to specify a drives directory on the command line?".to_string(),
            ),
            Error::Passphrase { resource } => (
                DiagnosisKind::CannotUnlock,
                format!("'{}' couldn't be unlocked.", resource),
                "Did you type the right passphrase?".to_string(),
            ),
            Error::Unsupported { .. } => (
                DiagnosisKind::MissingRequirement,
                error.to_string(),
                "Looks like your system is missing a vital requirement for Leitus.".to_string(),
            ),
            Error::AlreadyInUse { resource } => (
                DiagnosisKind::InUse,
                format!("{} is already in use.", resource),
                "Is another drive using this name? 'leitus --list' shows the active drives."
                    .to_string(),
            ),
            _ => (
                DiagnosisKind::Failure,
                error.to_string(),
                "Some manual tidy up might be a good idea.".to_string(),
            ),
        };
        Self {
            kind,
            message,
            fix,
            cause: cause_chain(error),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn cause_chain(error: &Error) -> String {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        lines.push(inner.to_string());
        source = inner.source();
    }
    lines.join("\n")
}
