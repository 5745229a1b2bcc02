//! POSIX identities and ownership hand-over.

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{self, Gid, Uid};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::error::{
    IoResultExt, OwnershipSnafu, Result, UserLookupSnafu, UserNotFoundSnafu,
};

/// Mode applied to the root of a drive once it has been handed over.
const OWNER_ONLY: u32 = 0o700;

/// A user resolved from the passwd database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl User {
    /// Looks `name` up in the passwd database.
    ///
    /// Nothing is cached: every call reads the database afresh.
    pub fn lookup(name: &str) -> Result<Self> {
        let entry = unistd::User::from_name(name)
            .context(UserLookupSnafu { name })?
            .context(UserNotFoundSnafu { name })?;
        Ok(Self {
            name: entry.name,
            uid: entry.uid.as_raw(),
            gid: entry.gid.as_raw(),
            home: entry.dir,
        })
    }

    /// Makes this user the owner of `target` and everything below it, then
    /// restricts `target` to its owner.
    ///
    /// Symlinks are left alone.
    pub fn own(&self, target: &Path) -> Result<()> {
        debug!(user = %self.name, target = %target.display(), "taking ownership");
        self.chown(target)?;
        self.chown_tree(target)?;
        fs::set_permissions(target, fs::Permissions::from_mode(OWNER_ONLY))
            .permissions_context(target)
    }

    fn chown_tree(&self, directory: &Path) -> Result<()> {
        for entry in fs::read_dir(directory).permissions_context(directory)? {
            let entry = entry.permissions_context(directory)?;
            let path = entry.path();
            let file_type = entry.file_type().permissions_context(&path)?;
            if file_type.is_symlink() {
                continue;
            }
            self.chown(&path)?;
            if file_type.is_dir() {
                self.chown_tree(&path)?;
            }
        }
        Ok(())
    }

    fn chown(&self, path: &Path) -> Result<()> {
        unistd::chown(
            path,
            Some(Uid::from_raw(self.uid)),
            Some(Gid::from_raw(self.gid)),
        )
        .context(OwnershipSnafu { path })
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
