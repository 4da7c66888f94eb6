use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("`{program}` not found on PATH")]
    NotFound { program: String },
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// One blocking invocation of an external tool.
///
/// Environment overrides are applied to the child only; the host process
/// environment is left untouched.
#[derive(Debug, Clone, Default)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: BTreeMap<String, String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn envs(mut self, envs: &BTreeMap<String, String>) -> Self {
        self.envs
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_envs(&self) -> &BTreeMap<String, String> {
        &self.envs
    }

    /// Display form, quoted for a POSIX shell.
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }

    /// Run to completion, capturing stdout and stderr.
    pub fn output(&self) -> Result<ProcessOutput, ExecError> {
        let resolved = which::which(&self.program).map_err(|_| ExecError::NotFound {
            program: self.program.clone(),
        })?;
        let mut cmd = Command::new(resolved);
        cmd.args(&self.args).envs(&self.envs);
        if let Some(cwd) = self.cwd.as_ref() {
            cmd.current_dir(cwd);
        }
        tracing::debug!(command = %self.display(), cwd = ?self.cwd, "running");
        let output = cmd.output().map_err(|source| ExecError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = ToolCommand::new("git").args(["commit", "-m", "fix shader paths"]);
        assert_eq!(cmd.display(), "git commit -m 'fix shader paths'");
    }

    #[test]
    fn unknown_program_is_not_found() {
        let err = ToolCommand::new("klauncher-definitely-missing-tool")
            .output()
            .expect_err("missing");
        assert!(matches!(err, ExecError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn env_overrides_reach_the_child_only() {
        if !tool_available("sh") {
            return;
        }
        let mut envs = BTreeMap::new();
        envs.insert("KLAUNCHER_EXEC_PROBE".to_string(), "on".to_string());
        let out = ToolCommand::new("sh")
            .args(["-c", "printf %s \"$KLAUNCHER_EXEC_PROBE\""])
            .envs(&envs)
            .output()
            .expect("run sh");
        assert!(out.success());
        assert_eq!(out.stdout, "on");
        assert!(std::env::var_os("KLAUNCHER_EXEC_PROBE").is_none());
    }
}
