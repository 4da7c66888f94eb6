use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unable to resolve home directory; set KLAUNCHER_HOME to an absolute path")]
    NoHome,
}

/// Pipeline layout and external tool names.
///
/// Every component receives this explicitly; nothing reads global constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Pipeline root holding the context folder.
    pub root_folder: PathBuf,
    /// Subdirectory of `root_folder` holding the JSON state and `.rxt` snapshots.
    pub context_folder: String,
    /// Working-copy package tree.
    pub local_root: PathBuf,
    /// Released package tree.
    pub prod_root: PathBuf,
    pub context_file: String,
    pub repos_file: String,
    pub configs_file: String,
    pub rez_bin: String,
    pub git_bin: String,
    /// Separator used when stacking LOCAL over PROD in `REZ_PACKAGES_PATH`.
    pub packages_path_separator: String,
    /// Private key handed to `ssh-add` before cloning.
    pub ssh_key: Option<PathBuf>,
    /// Process names accepted as the terminal host when deriving a session id.
    pub shell_hosts: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let home = resolve_klauncher_home().unwrap_or_else(|_| PathBuf::from(".klauncher"));
        Self::rooted_at(&home)
    }
}

impl LauncherConfig {
    /// Default layout with every tree placed under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            root_folder: root.to_path_buf(),
            context_folder: "context".to_string(),
            local_root: root.join("packages").join("local"),
            prod_root: root.join("packages").join("prod"),
            context_file: "context.json".to_string(),
            repos_file: "repos.json".to_string(),
            configs_file: "configs.json".to_string(),
            rez_bin: "rez".to_string(),
            git_bin: "git".to_string(),
            packages_path_separator: ";".to_string(),
            ssh_key: None,
            shell_hosts: default_shell_hosts(),
        }
    }

    pub fn context_dir(&self) -> PathBuf {
        self.root_folder.join(&self.context_folder)
    }

    pub fn context_file_path(&self) -> PathBuf {
        self.context_dir().join(&self.context_file)
    }

    pub fn repos_file_path(&self) -> PathBuf {
        self.context_dir().join(&self.repos_file)
    }

    pub fn configs_file_path(&self) -> PathBuf {
        self.context_dir().join(&self.configs_file)
    }

    /// Key for `ssh-add`, falling back to `~/.ssh/id_rsa`.
    pub fn ssh_key_path(&self) -> Option<PathBuf> {
        self.ssh_key.clone().or_else(|| {
            resolve_user_home_dir().map(|home| home.join(".ssh").join("id_rsa"))
        })
    }
}

fn default_shell_hosts() -> Vec<String> {
    ["cmd.exe", "powershell", "pwsh", "bash", "zsh", "fish", "sh"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_klauncher_home() -> Result<PathBuf, ConfigError> {
    if let Ok(value) = std::env::var("KLAUNCHER_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir()
        .map(|home| home.join(".klauncher"))
        .ok_or(ConfigError::NoHome)
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_klauncher_home()
        .ok()
        .map(|home| home.join("config.toml"))
}

/// Load a config file. Keys missing from the file keep their defaults,
/// rooted at the directory holding the file.
pub fn load_config_file(path: &Path) -> Result<LauncherConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    let base = path
        .parent()
        .map(LauncherConfig::rooted_at)
        .unwrap_or_default();
    let value: toml::Value = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    merge_over(base, value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_over(base: LauncherConfig, overrides: toml::Value) -> Result<LauncherConfig, toml::de::Error> {
    let mut merged = toml::Value::try_from(&base).unwrap_or(toml::Value::Table(Default::default()));
    if let (toml::Value::Table(target), toml::Value::Table(source)) = (&mut merged, overrides) {
        for (key, value) in source {
            target.insert(key, value);
        }
    }
    merged.try_into()
}

/// Resolve the active config: explicit path, then `$KLAUNCHER_HOME/config.toml`,
/// then built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<LauncherConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_config_file(path);
    }
    if let Some(path) = global_config_path() {
        if path.is_file() {
            return load_config_file(&path);
        }
    }
    let home = resolve_klauncher_home()?;
    Ok(LauncherConfig::rooted_at(&home))
}

pub fn write_config(path: &Path, config: &LauncherConfig) -> Result<PathBuf, ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::ffi::OsString;
    use tempfile::TempDir;

    struct EnvGuard {
        klauncher_home: Option<OsString>,
    }

    impl EnvGuard {
        fn capture() -> Self {
            Self {
                klauncher_home: std::env::var_os("KLAUNCHER_HOME"),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.klauncher_home.as_ref() {
                Some(value) => std::env::set_var("KLAUNCHER_HOME", value),
                None => std::env::remove_var("KLAUNCHER_HOME"),
            }
        }
    }

    #[test]
    fn rooted_layout_places_state_under_context_folder() {
        let config = LauncherConfig::rooted_at(Path::new("/pipe"));
        assert_eq!(
            config.context_file_path(),
            PathBuf::from("/pipe/context/context.json")
        );
        assert_eq!(
            config.repos_file_path(),
            PathBuf::from("/pipe/context/repos.json")
        );
        assert_eq!(
            config.configs_file_path(),
            PathBuf::from("/pipe/context/configs.json")
        );
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "rez_bin = \"rez-env-wrapper\"\nprod_root = \"/mnt/prod\"\n")
            .expect("write config");

        let loaded = load_config_file(&path).expect("load");
        assert_eq!(loaded.rez_bin, "rez-env-wrapper");
        assert_eq!(loaded.prod_root, PathBuf::from("/mnt/prod"));
        assert_eq!(loaded.git_bin, "git");
        assert_eq!(loaded.root_folder, temp.path());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        let mut config = LauncherConfig::rooted_at(temp.path());
        config.ssh_key = Some(PathBuf::from("/keys/pipeline"));
        write_config(&path, &config).expect("write");

        let loaded = load_config_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "rez_bin = [").expect("write");
        let err = load_config_file(&path).expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    #[serial]
    fn resolve_config_prefers_home_config_then_defaults() {
        let _env = EnvGuard::capture();
        let home = TempDir::new().expect("home");
        std::env::set_var("KLAUNCHER_HOME", home.path());

        let defaults = resolve_config(None).expect("defaults");
        assert_eq!(defaults.root_folder, home.path());

        fs::write(home.path().join("config.toml"), "git_bin = \"git2\"\n").expect("write");
        let loaded = resolve_config(None).expect("home config");
        assert_eq!(loaded.git_bin, "git2");
    }
}
