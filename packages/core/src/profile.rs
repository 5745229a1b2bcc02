//! Profile overlays.
//!
//! A profile is a directory tree under the profiles directory. Merging copies
//! each tree onto a freshly mounted drive, one after another, so a file in a
//! later profile replaces the same file from an earlier one.

use std::fs::{self, File};
use std::os::unix::fs::symlink;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, IoResultExt, Result};

/// Copies `profiles` from `profiles_dir` into `mount_point`, in order.
pub fn merge(mount_point: &Path, profiles_dir: &Path, profiles: &[String]) -> Result<()> {
    if !mount_point.exists() {
        return Err(Error::NotFound {
            resource: format!("File system at {}", mount_point.display()),
        });
    }
    for profile in profiles {
        let source = profiles_dir.join(profile);
        if !source.is_dir() {
            return Err(Error::NotFound {
                resource: source.display().to_string(),
            });
        }
        info!("Merging profile '{}'", profile);
        copy_into(&source, mount_point)?;
    }
    Ok(())
}

/// Recursively copies the contents of `source` into `target`.
///
/// Directories merge with existing ones; files and symlinks replace what is
/// there, and a directory replaces a file or symlink in its way. Permissions and modification times follow the source.
fn copy_into(source: &Path, target: &Path) -> Result<()> {
    for entry in fs::read_dir(source).copy_context(source, target)? {
        let entry = entry.copy_context(source, target)?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        let metadata = fs::symlink_metadata(&from).copy_context(&from, &to)?;
        let file_type = metadata.file_type();

        if file_type.is_dir() {
            let existing = fs::symlink_metadata(&to).ok();
            if !existing.is_some_and(|existing| existing.is_dir()) {
                remove_existing(&to).copy_context(&from, &to)?;
                fs::create_dir(&to).copy_context(&from, &to)?;
            }
            copy_into(&from, &to)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(&from).copy_context(&from, &to)?;
            remove_existing(&to).copy_context(&from, &to)?;
            symlink(&link, &to).copy_context(&from, &to)?;
            continue;
        } else {
            remove_existing(&to).copy_context(&from, &to)?;
            fs::copy(&from, &to).copy_context(&from, &to)?;
            debug!(from = %from.display(), to = %to.display(), "copied");
        }

        fs::set_permissions(&to, metadata.permissions()).copy_context(&from, &to)?;
        let modified = metadata.modified().copy_context(&from, &to)?;
        File::open(&to)
            .and_then(|file| file.set_modified(modified))
            .copy_context(&from, &to)?;
    }
    Ok(())
}

/// Removes a file or symlink left by an earlier profile.
fn remove_existing(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.is_dir() => fs::remove_file(path),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn profiles(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn setup() -> (TempDir, TempDir) {
        let profiles_dir = TempDir::new().unwrap();
        for (profile, content) in [("a", "from a"), ("b", "from b")] {
            let root = profiles_dir.path().join(profile);
            fs::create_dir_all(root.join("conf")).unwrap();
            fs::write(root.join("x"), content).unwrap();
            fs::write(root.join("conf").join(profile), content).unwrap();
        }
        (profiles_dir, TempDir::new().unwrap())
    }

    #[test]
    fn test_later_profile_wins() {
        let (profiles_dir, mount) = setup();

        merge(mount.path(), profiles_dir.path(), &profiles(&["a", "b"])).unwrap();

        assert_eq!(fs::read_to_string(mount.path().join("x")).unwrap(), "from b");
        assert!(mount.path().join("conf/a").exists());
        assert!(mount.path().join("conf/b").exists());
    }

    #[test]
    fn test_order_matters() {
        let (profiles_dir, mount) = setup();

        merge(mount.path(), profiles_dir.path(), &profiles(&["b", "a"])).unwrap();

        assert_eq!(fs::read_to_string(mount.path().join("x")).unwrap(), "from a");
    }

    #[test]
    fn test_missing_mount_point() {
        let (profiles_dir, mount) = setup();
        let missing = mount.path().join("missing");

        let result = merge(&missing, profiles_dir.path(), &profiles(&["a"]));

        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_missing_profile() {
        let (profiles_dir, mount) = setup();

        let result = merge(mount.path(), profiles_dir.path(), &profiles(&["a", "zzz"]));

        match result {
            Err(Error::NotFound { resource }) => assert!(resource.ends_with("zzz")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_metadata_preserved() {
        let (profiles_dir, mount) = setup();
        let script = profiles_dir.path().join("a/run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
        let then = SystemTime::UNIX_EPOCH + Duration::from_secs(1_300_000_000);
        File::open(&script).unwrap().set_modified(then).unwrap();

        merge(mount.path(), profiles_dir.path(), &profiles(&["a"])).unwrap();

        let copied = fs::metadata(mount.path().join("run.sh")).unwrap();
        assert_eq!(copied.permissions().mode() & 0o777, 0o750);
        assert_eq!(copied.modified().unwrap(), then);
    }

    #[test]
    fn test_read_only_file_is_replaced() {
        let (profiles_dir, mount) = setup();
        fs::set_permissions(
            profiles_dir.path().join("a/x"),
            fs::Permissions::from_mode(0o444),
        )
        .unwrap();

        merge(mount.path(), profiles_dir.path(), &profiles(&["a", "b"])).unwrap();

        assert_eq!(fs::read_to_string(mount.path().join("x")).unwrap(), "from b");
    }

    #[test]
    fn test_symlinks_recreated() {
        let (profiles_dir, mount) = setup();
        symlink("x", profiles_dir.path().join("a/link")).unwrap();

        merge(mount.path(), profiles_dir.path(), &profiles(&["a"])).unwrap();

        assert_eq!(
            fs::read_link(mount.path().join("link")).unwrap(),
            Path::new("x")
        );
    }

    #[test]
    fn test_directory_replaces_earlier_symlink() {
        let (profiles_dir, mount) = setup();
        let outside = TempDir::new().unwrap();
        symlink(outside.path(), profiles_dir.path().join("a/etc")).unwrap();
        fs::create_dir(profiles_dir.path().join("b/etc")).unwrap();
        fs::write(profiles_dir.path().join("b/etc/hosts"), "from b").unwrap();

        merge(mount.path(), profiles_dir.path(), &profiles(&["a", "b"])).unwrap();

        assert!(!outside.path().join("hosts").exists());
        let etc = fs::symlink_metadata(mount.path().join("etc")).unwrap();
        assert!(etc.is_dir());
        assert_eq!(
            fs::read_to_string(mount.path().join("etc/hosts")).unwrap(),
            "from b"
        );
    }
}
