//! Moving package trees between the PROD and LOCAL roots.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

use crate::config::LauncherConfig;

pub const PACKAGE_FILE: &str = "package.py";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("source package {0} not found")]
    MissingSource(PathBuf),
    #[error("destination {0} already exists")]
    DestinationExists(PathBuf),
    #[error("invalid package spec `{0}`; expected <name>-<version>")]
    InvalidSpec(String),
    #[error("no version assignment found in {0}")]
    VersionNotFound(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PackageError + '_ {
    move |source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `name-version`, split on the first and last dash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
}

impl PackageSpec {
    pub fn parse(raw: &str) -> Result<Self, PackageError> {
        let trimmed = raw.trim();
        let name = trimmed.split('-').next().unwrap_or_default();
        let version = trimmed.rsplit('-').next().unwrap_or_default();
        if name.is_empty() || version.is_empty() || !trimmed.contains('-') {
            return Err(PackageError::InvalidSpec(raw.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn dir_under(&self, root: &Path) -> PathBuf {
        root.join(&self.name).join(&self.version)
    }
}

/// Copy `<prod>/<package>` to `<local>/<package>`, replacing any LOCAL copy.
pub fn grab_package_to_local(config: &LauncherConfig, package: &str) -> Result<PathBuf, PackageError> {
    let src = config.prod_root.join(package);
    let dest = config.local_root.join(package);
    if !src.is_dir() {
        return Err(PackageError::MissingSource(src));
    }
    if dest.exists() {
        tracing::warn!(package, "package already exists in LOCAL, overwriting");
        fs::remove_dir_all(&dest).map_err(io_err(&dest))?;
    }
    copy_tree_or_discard(&src, &dest)?;
    tracing::info!(package, "package copied from PROD to LOCAL");
    Ok(dest)
}

/// Outcome of [`release_package`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { destination: PathBuf },
    /// The package tree was copied but `package.py` had no version to rewrite.
    ReleasedWithoutVersionBump { destination: PathBuf },
}

/// Publish a LOCAL package version to PROD under a (possibly new) version.
///
/// `local` and `prod` are `name-version` specs. Nothing is written when the
/// source is missing or the destination already exists.
pub fn release_package(
    config: &LauncherConfig,
    local: &str,
    prod: &str,
) -> Result<ReleaseOutcome, PackageError> {
    let local = PackageSpec::parse(local)?;
    let prod = PackageSpec::parse(prod)?;
    let src = local.dir_under(&config.local_root);
    let dest = prod.dir_under(&config.prod_root);
    if !src.is_dir() {
        return Err(PackageError::MissingSource(src));
    }
    if dest.exists() {
        return Err(PackageError::DestinationExists(dest));
    }
    copy_tree_or_discard(&src, &dest)?;

    let package_file = dest.join(PACKAGE_FILE);
    let outcome = match update_version(&package_file, &prod.version) {
        Ok(old) => {
            tracing::info!(from = %old, to = %prod.version, "version updated");
            ReleaseOutcome::Released {
                destination: dest.clone(),
            }
        }
        Err(PackageError::VersionNotFound(path)) | Err(PackageError::Io { path, .. }) => {
            tracing::error!(file = %path.display(), "version not found in package file");
            ReleaseOutcome::ReleasedWithoutVersionBump {
                destination: dest.clone(),
            }
        }
        Err(other) => return Err(other),
    };
    tracing::info!(src = %src.display(), dest = %dest.display(), "package released to PROD");
    Ok(outcome)
}

/// Rewrite the first `version = "..."` value in `file`. Returns the old version.
pub fn update_version(file: &Path, new_version: &str) -> Result<String, PackageError> {
    let content = fs::read_to_string(file).map_err(io_err(file))?;
    let pattern = Regex::new(r#"(?m)^\s*version\s*=\s*["']([^"'\n]+)["']"#).expect("regex");
    let Some(caps) = pattern.captures(&content) else {
        return Err(PackageError::VersionNotFound(file.to_path_buf()));
    };
    let (Some(whole), Some(value)) = (caps.get(0), caps.get(1)) else {
        return Err(PackageError::VersionNotFound(file.to_path_buf()));
    };
    let old = value.as_str().to_string();
    let replaced = whole.as_str().replacen(&old, new_version, 1);
    let mut rewritten = String::with_capacity(content.len());
    rewritten.push_str(&content[..whole.start()]);
    rewritten.push_str(&replaced);
    rewritten.push_str(&content[whole.end()..]);
    fs::write(file, rewritten).map_err(io_err(file))?;
    Ok(old)
}

/// Copy `src` to `dest`; a failed copy removes whatever reached `dest`.
fn copy_tree_or_discard(src: &Path, dest: &Path) -> Result<(), PackageError> {
    let copied = copy_dir_recursive(src, dest);
    if copied.is_err() && dest.exists() {
        if let Err(err) = fs::remove_dir_all(dest) {
            tracing::warn!(dest = %dest.display(), error = %err, "failed to remove partial copy");
        }
    }
    copied
}

pub fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), PackageError> {
    fs::create_dir_all(dest).map_err(io_err(dest))?;
    for entry in fs::read_dir(src).map_err(io_err(src))? {
        let entry = entry.map_err(io_err(src))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(io_err(&from))?;
        if file_type.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(io_err(&from))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(temp: &TempDir) -> LauncherConfig {
        let config = LauncherConfig::rooted_at(temp.path());
        fs::create_dir_all(&config.prod_root).expect("prod");
        fs::create_dir_all(&config.local_root).expect("local");
        config
    }

    #[test]
    fn grab_copies_tree_and_overwrites_local() {
        let temp = TempDir::new().expect("tempdir");
        let config = layout(&temp);
        let prod_pkg = config.prod_root.join("lookdev").join("1.2.0");
        fs::create_dir_all(&prod_pkg).expect("prod pkg");
        fs::write(prod_pkg.join(PACKAGE_FILE), "version = \"1.2.0\"\n").expect("write");

        let stale = config.local_root.join("lookdev").join("0.9.0");
        fs::create_dir_all(&stale).expect("stale");

        let dest = grab_package_to_local(&config, "lookdev").expect("grab");
        assert!(dest.join("1.2.0").join(PACKAGE_FILE).is_file());
        assert!(!stale.exists());
    }

    #[test]
    fn grab_missing_source_is_error() {
        let temp = TempDir::new().expect("tempdir");
        let config = layout(&temp);
        let err = grab_package_to_local(&config, "ghost").expect_err("missing");
        assert!(matches!(err, PackageError::MissingSource(_)));
    }

    #[test]
    fn name_version_splits_on_dashes() {
        let spec = PackageSpec::parse("iter-1.1.0").expect("spec");
        assert_eq!(spec.name, "iter");
        assert_eq!(spec.version, "1.1.0");
        assert!(PackageSpec::parse("iter").is_err());
    }

    #[test]
    fn update_version_rewrites_first_assignment_only() {
        let temp = TempDir::new().expect("tempdir");
        let file = temp.path().join(PACKAGE_FILE);
        fs::write(
            &file,
            "name = \"iter\"\nversion = \"1.1.0\"\nrequires = ['python-1.1.0']\n",
        )
        .expect("write");

        let old = update_version(&file, "1.1.1").expect("update");
        assert_eq!(old, "1.1.0");
        let text = fs::read_to_string(&file).expect("read");
        assert!(text.contains("version = \"1.1.1\""));
        assert!(text.contains("python-1.1.0"));
    }

    #[test]
    fn release_copies_and_bumps_version() {
        let temp = TempDir::new().expect("tempdir");
        let config = layout(&temp);
        let local = config.local_root.join("iter").join("1.1.0");
        fs::create_dir_all(local.join("python")).expect("local");
        fs::write(local.join(PACKAGE_FILE), "name = 'iter'\nversion = '1.1.0'\n").expect("write");
        fs::write(local.join("python").join("iter.py"), "pass\n").expect("write");

        let outcome = release_package(&config, "iter-1.1.0", "iter-1.2.0").expect("release");
        let dest = config.prod_root.join("iter").join("1.2.0");
        assert_eq!(
            outcome,
            ReleaseOutcome::Released {
                destination: dest.clone()
            }
        );
        assert!(dest.join("python").join("iter.py").is_file());
        let text = fs::read_to_string(dest.join(PACKAGE_FILE)).expect("read");
        assert!(text.contains("version = '1.2.0'"));
    }

    #[test]
    fn release_refuses_existing_destination() {
        let temp = TempDir::new().expect("tempdir");
        let config = layout(&temp);
        fs::create_dir_all(config.local_root.join("iter").join("1.0.0")).expect("local");
        fs::create_dir_all(config.prod_root.join("iter").join("1.0.0")).expect("prod");
        let err = release_package(&config, "iter-1.0.0", "iter-1.0.0").expect_err("exists");
        assert!(matches!(err, PackageError::DestinationExists(_)));
    }

    #[cfg(unix)]
    #[test]
    fn failed_release_leaves_no_partial_tree() {
        let temp = TempDir::new().expect("tempdir");
        let config = layout(&temp);
        let local = config.local_root.join("iter").join("1.1.0");
        fs::create_dir_all(&local).expect("local");
        fs::write(local.join(PACKAGE_FILE), "version = '1.1.0'\n").expect("write");
        let dangling = local.join("broken");
        std::os::unix::fs::symlink(temp.path().join("nowhere"), &dangling).expect("symlink");

        let err = release_package(&config, "iter-1.1.0", "iter-1.2.0").expect_err("copy fails");
        assert!(matches!(err, PackageError::Io { .. }));
        let dest = config.prod_root.join("iter").join("1.2.0");
        assert!(!dest.exists());

        fs::remove_file(&dangling).expect("remove link");
        release_package(&config, "iter-1.1.0", "iter-1.2.0").expect("retry succeeds");
        assert!(dest.join(PACKAGE_FILE).is_file());
    }
}
