//! `rez env` command construction.
//!
//! A [`RezRequest`] carries the optional fragments collected from the CLI.
//! [`CommandBuilder::build`] never fails: a fragment that cannot be produced
//! is logged, recorded in [`BuildReport::skipped`] and left out.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::LauncherConfig;
use crate::exec::{ExecError, ProcessOutput, ToolCommand};
use crate::packages;
use crate::store::{self, StoreError};

pub const PACKAGES_PATH_VAR: &str = "REZ_PACKAGES_PATH";
pub const CONTEXT_EXTENSION: &str = "rxt";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RezRequest {
    pub config_set: Option<String>,
    pub package: Option<String>,
    pub add: Vec<String>,
    pub load: Option<String>,
    pub save: Option<String>,
    pub grab: Vec<String>,
    pub switch: Vec<String>,
    pub launch: Option<String>,
}

impl RezRequest {
    pub fn uses_local_packages(&self) -> bool {
        !self.grab.is_empty() || !self.switch.is_empty()
    }

    /// Log every input, one line each.
    pub fn echo(&self) {
        tracing::info!("Config set: {}", display_opt(&self.config_set));
        tracing::info!("Package: {}", display_opt(&self.package));
        tracing::info!("Additional packages: {}", self.add.join(" "));
        tracing::info!("Launch DCC software: {}", display_opt(&self.launch));
        tracing::info!("Save config: {}", display_opt(&self.save));
        tracing::info!("Load config: {}", display_opt(&self.load));
        tracing::info!("Grab packages: {}", self.grab.join(" "));
        tracing::info!("Switch packages: {}", self.switch.join(" "));
    }
}

fn display_opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("None")
}

/// A fully assembled `rez env` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RezCommand {
    pub rez_bin: String,
    /// Applied to the child process only.
    pub env: BTreeMap<String, String>,
    pub packages: Vec<String>,
    /// `-i <rxt>` / `-o <rxt>` flags.
    pub context_args: Vec<String>,
    pub launch: Option<String>,
}

impl RezCommand {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["env".to_string()];
        args.extend(self.packages.iter().cloned());
        args.extend(self.context_args.iter().cloned());
        if let Some(launch) = self.launch.as_ref() {
            args.push("--".to_string());
            args.push(launch.clone());
        }
        args
    }

    /// Single shell line, prefixed with `set VAR=value &&` for each override.
    pub fn render(&self) -> String {
        let mut line = String::new();
        for (key, value) in &self.env {
            line.push_str(&format!("set {key}={value} && "));
        }
        let mut words = vec![self.rez_bin.clone()];
        words.extend(self.args());
        line.push_str(&shell_words::join(words));
        line
    }

    pub fn to_tool_command(&self) -> ToolCommand {
        ToolCommand::new(self.rez_bin.clone())
            .args(self.args())
            .envs(&self.env)
    }
}

impl fmt::Display for RezCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Grab(String),
    LoadConfig,
    SaveConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFragment {
    pub fragment: Fragment,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub command: RezCommand,
    pub skipped: Vec<SkippedFragment>,
}

/// `{config_set: {name: rxt_path}}` lookup table of saved environments.
#[derive(Debug, Clone)]
pub struct ConfigTable {
    path: PathBuf,
}

pub type ConfigSets = BTreeMap<String, BTreeMap<String, String>>;

impl ConfigTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<ConfigSets>, StoreError> {
        store::read_json(&self.path)
    }

    pub fn lookup(&self, config_set: &str, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .load()?
            .and_then(|sets| sets.get(config_set).and_then(|set| set.get(name)).cloned()))
    }

    pub fn record(&self, config_set: &str, name: &str, rxt: &Path) -> Result<(), StoreError> {
        store::update_json(&self.path, |sets: &mut ConfigSets| {
            sets.entry(config_set.to_string())
                .or_default()
                .insert(name.to_string(), rxt.to_string_lossy().to_string());
        })
    }
}

/// Outcome of running a built command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded { stdout: String },
    Failed { code: Option<i32>, stdout: String, stderr: String },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

pub struct CommandBuilder<'a> {
    config: &'a LauncherConfig,
    table: ConfigTable,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a LauncherConfig) -> Self {
        Self {
            config,
            table: ConfigTable::new(config.configs_file_path()),
        }
    }

    pub fn table(&self) -> &ConfigTable {
        &self.table
    }

    /// `<context_dir>/<config_set>-<package>.rxt`
    pub fn rxt_path(&self, config_set: &str, package: &str) -> PathBuf {
        self.config
            .context_dir()
            .join(format!("{config_set}-{package}.{CONTEXT_EXTENSION}"))
    }

    pub fn build(&self, request: &RezRequest) -> BuildReport {
        let mut skipped = Vec::new();
        let mut command = RezCommand {
            rez_bin: self.config.rez_bin.clone(),
            ..RezCommand::default()
        };

        if request.uses_local_packages() {
            command.env.insert(
                PACKAGES_PATH_VAR.to_string(),
                format!(
                    "{}{}{}",
                    self.config.local_root.display(),
                    self.config.packages_path_separator,
                    self.config.prod_root.display()
                ),
            );
            for package in &request.grab {
                match packages::grab_package_to_local(self.config, package) {
                    Ok(_) => command.packages.push(package.clone()),
                    Err(err) => {
                        tracing::error!(package = %package, error = %err, "failed to grab package");
                        skipped.push(SkippedFragment {
                            fragment: Fragment::Grab(package.clone()),
                            reason: err.to_string(),
                        });
                    }
                }
            }
            command.packages.extend(request.switch.iter().cloned());
        } else {
            command.packages.extend(request.package.iter().cloned());
            command.packages.extend(request.add.iter().cloned());
        }

        if let Some(load) = request.load.as_deref() {
            match self.load_fragment(request.config_set.as_deref(), load) {
                Ok(rxt) => {
                    command.context_args.push("-i".to_string());
                    command.context_args.push(rxt);
                }
                Err(reason) => {
                    tracing::error!("{reason}");
                    skipped.push(SkippedFragment {
                        fragment: Fragment::LoadConfig,
                        reason,
                    });
                }
            }
        }

        if request.save.is_some() {
            match self.save_fragment(request.config_set.as_deref(), request.package.as_deref()) {
                Ok(rxt) => {
                    command.context_args.push("-o".to_string());
                    command.context_args.push(rxt.to_string_lossy().to_string());
                }
                Err(reason) => {
                    tracing::error!("{reason}");
                    skipped.push(SkippedFragment {
                        fragment: Fragment::SaveConfig,
                        reason,
                    });
                }
            }
        }

        command.launch = request.launch.clone();
        BuildReport { command, skipped }
    }

    fn load_fragment(&self, config_set: Option<&str>, load: &str) -> Result<String, String> {
        let Some(config_set) = config_set else {
            return Err(format!("Load config '{load}' requires a config set"));
        };
        match self.table.lookup(config_set, load) {
            Ok(Some(rxt)) => Ok(rxt),
            Ok(None) => Err(format!("Load config '{load}' not found in '{config_set}'.")),
            Err(err) => Err(format!(
                "Error loading config from {}: {err}",
                self.table.path().display()
            )),
        }
    }

    /// Records `[config_set][package] = rxt` before the command that writes
    /// the `.rxt` file has run.
    fn save_fragment(&self, config_set: Option<&str>, package: Option<&str>) -> Result<PathBuf, String> {
        let Some(package) = package else {
            return Err("Save config requires a package".to_string());
        };
        let Some(config_set) = config_set else {
            return Err("Save config requires a config set".to_string());
        };
        let rxt = self.rxt_path(config_set, package);
        self.table.record(config_set, package, &rxt).map_err(|err| {
            format!(
                "Error saving config to {}: {err}",
                self.table.path().display()
            )
        })?;
        Ok(rxt)
    }

    /// Run `command`, blocking until rez exits.
    pub fn run(&self, command: &RezCommand) -> Result<CommandOutcome, ExecError> {
        tracing::info!(command = %command, "executing command");
        let ProcessOutput {
            code,
            stdout,
            stderr,
        } = command.to_tool_command().output()?;
        if code == Some(0) {
            return Ok(CommandOutcome::Succeeded { stdout });
        }
        tracing::error!(code = ?code, "error executing command");
        tracing::error!("Command Output:\n{stdout}{stderr}");
        Ok(CommandOutcome::Failed {
            code,
            stdout,
            stderr,
        })
    }
}
