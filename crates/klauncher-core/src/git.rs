//! One-shot git operations against package checkouts.
//!
//! Every operation targets `<path>/<name>`. A missing working directory is a
//! warning, not an error, and a failing git call is logged with its captured
//! stderr; both are reported back as a [`GitOutcome`] so callers can react.
//! `Err` is reserved for git itself being unavailable.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::LauncherConfig;
use crate::exec::{ExecError, ToolCommand};
use crate::registry::RepoRegistry;
use crate::ssh;

pub const DEFAULT_LOG_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitOutcome {
    Completed { stdout: String },
    Failed {
        step: String,
        code: Option<i32>,
        stderr: String,
    },
    MissingWorkdir { path: PathBuf },
    /// Clone was asked for an alias the registry does not know.
    Unresolved { alias: String },
}

impl GitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Completed or skipped for a missing working directory.
    pub fn is_tolerated(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::MissingWorkdir { .. })
    }

    pub fn stdout(&self) -> Option<&str> {
        match self {
            Self::Completed { stdout } => Some(stdout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneSource {
    /// Resolved through the repository registry; also names the checkout.
    Alias(String),
    Url { url: String, name: Option<String> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckoutOptions {
    /// Stash uncommitted changes first.
    pub auto_stash: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// `git add --all` instead of only modified tracked files.
    pub add_all: bool,
    /// Push the current branch to `origin` afterwards.
    pub push: bool,
}

pub struct GitOps<'a> {
    config: &'a LauncherConfig,
}

enum Step {
    Ok(String),
    Failed(GitOutcome),
}

impl<'a> GitOps<'a> {
    pub fn new(config: &'a LauncherConfig) -> Self {
        Self { config }
    }

    pub fn workdir(path: &Path, name: &str) -> PathBuf {
        path.join(name)
    }

    fn git(&self) -> ToolCommand {
        ToolCommand::new(self.config.git_bin.clone())
    }

    fn step(&self, repo: &Path, args: &[&str]) -> Result<Step, ExecError> {
        let out = self.git().args(args.iter().copied()).current_dir(repo).output()?;
        if out.success() {
            return Ok(Step::Ok(out.stdout));
        }
        let step = format!("git {}", args.join(" "));
        tracing::error!(step = %step, code = ?out.code, stderr = %out.stderr.trim(), "git command failed");
        Ok(Step::Failed(GitOutcome::Failed {
            step,
            code: out.code,
            stderr: out.stderr,
        }))
    }

    /// Resolve `<path>/<name>`, or report it missing.
    fn repo(&self, path: &Path, name: &str) -> Result<PathBuf, GitOutcome> {
        let repo = Self::workdir(path, name);
        if repo.is_dir() {
            Ok(repo)
        } else {
            tracing::warn!(repo = %repo.display(), "repository '{name}' not found locally");
            Err(GitOutcome::MissingWorkdir { path: repo })
        }
    }

    pub fn clone_repository(
        &self,
        registry: &RepoRegistry,
        source: &CloneSource,
        path: &Path,
    ) -> Result<GitOutcome, ExecError> {
        let (url, name) = match source {
            CloneSource::Alias(alias) => match registry.resolve(alias) {
                Some(url) => (url.to_string(), alias.clone()),
                None => {
                    tracing::error!(alias = %alias, "repository not found or URL is invalid");
                    return Ok(GitOutcome::Unresolved {
                        alias: alias.clone(),
                    });
                }
            },
            CloneSource::Url { url, name } => {
                let name = name.clone().unwrap_or_else(|| repo_name_from_url(url));
                (url.clone(), name)
            }
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "creating directory");
            if let Err(err) = fs::create_dir_all(path) {
                tracing::error!(path = %path.display(), error = %err, "failed to create clone directory");
                return Ok(GitOutcome::Failed {
                    step: "create clone directory".to_string(),
                    code: None,
                    stderr: err.to_string(),
                });
            }
        }

        let agent = ssh::ensure_agent(self.config.ssh_key_path().as_deref());
        let target = Self::workdir(path, &name);
        tracing::info!(name = %name, url = %url, target = %target.display(), "cloning repository");
        let out = self
            .git()
            .arg("clone")
            .arg(url.clone())
            .arg(target.to_string_lossy())
            .envs(agent.envs())
            .output()?;
        if out.success() {
            tracing::info!("{}", out.stdout.trim());
            return Ok(GitOutcome::Completed { stdout: out.stdout });
        }
        tracing::error!(name = %name, stderr = %out.stderr.trim(), "error cloning repository");
        Ok(GitOutcome::Failed {
            step: format!("git clone {url}"),
            code: out.code,
            stderr: out.stderr,
        })
    }

    pub fn fetch(&self, path: &Path, name: &str) -> Result<GitOutcome, ExecError> {
        self.single(path, name, &["fetch"], "fetched latest changes")
    }

    pub fn pull(&self, path: &Path, name: &str) -> Result<GitOutcome, ExecError> {
        self.single(path, name, &["pull"], "pulled latest changes")
    }

    pub fn create_branch(&self, path: &Path, name: &str, branch: &str) -> Result<GitOutcome, ExecError> {
        self.single(
            path,
            name,
            &["checkout", "-b", branch],
            "created and checked out branch",
        )
    }

    pub fn tag(&self, path: &Path, name: &str, tag: &str) -> Result<GitOutcome, ExecError> {
        self.single(path, name, &["tag", tag], "tagged repository")
    }

    pub fn list_remote_branches(&self, path: &Path, name: &str) -> Result<GitOutcome, ExecError> {
        self.single(path, name, &["branch", "-r"], "remote branches")
    }

    pub fn log(&self, path: &Path, name: &str, count: usize) -> Result<GitOutcome, ExecError> {
        let count = count.to_string();
        self.single(path, name, &["log", "-n", &count], "recent commits")
    }

    /// Full history followed by the tag list.
    pub fn history(&self, path: &Path, name: &str) -> Result<GitOutcome, ExecError> {
        let repo = match self.repo(path, name) {
            Ok(repo) => repo,
            Err(missing) => return Ok(missing),
        };
        let log = match self.step(&repo, &["log", "--oneline", "--decorate"])? {
            Step::Ok(out) => out,
            Step::Failed(outcome) => return Ok(outcome),
        };
        let tags = match self.step(&repo, &["tag", "--list"])? {
            Step::Ok(out) => out,
            Step::Failed(outcome) => return Ok(outcome),
        };
        let stdout = format!("{log}\nTags:\n{tags}");
        tracing::info!("history for '{name}':\n{stdout}");
        Ok(GitOutcome::Completed { stdout })
    }

    pub fn checkout(
        &self,
        path: &Path,
        name: &str,
        branch: &str,
        options: CheckoutOptions,
    ) -> Result<GitOutcome, ExecError> {
        let repo = match self.repo(path, name) {
            Ok(repo) => repo,
            Err(missing) => return Ok(missing),
        };

        if options.auto_stash {
            let status = match self.step(&repo, &["status", "--porcelain"])? {
                Step::Ok(out) => out,
                Step::Failed(outcome) => return Ok(outcome),
            };
            if !status.trim().is_empty() {
                let message = format!("klauncher auto-stash before checkout {branch}");
                if let Step::Failed(outcome) =
                    self.step(&repo, &["stash", "push", "--include-untracked", "-m", &message])?
                {
                    return Ok(outcome);
                }
                tracing::info!(repo = %repo.display(), "stashed uncommitted changes");
            }
        }

        let args: Vec<&str> = if self.branch_exists(&repo, branch)? {
            vec!["checkout", branch]
        } else {
            tracing::info!(branch, "branch does not exist, creating it");
            vec!["checkout", "-b", branch]
        };
        match self.step(&repo, &args)? {
            Step::Ok(stdout) => {
                tracing::info!("checked out branch '{branch}' for repository '{name}'");
                Ok(GitOutcome::Completed { stdout })
            }
            Step::Failed(outcome) => Ok(outcome),
        }
    }

    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, ExecError> {
        for reference in [
            format!("refs/heads/{branch}"),
            format!("refs/remotes/origin/{branch}"),
        ] {
            let out = self
                .git()
                .args(["rev-parse", "--verify", "--quiet", reference.as_str()])
                .current_dir(repo)
                .output()?;
            if out.success() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn commit(
        &self,
        path: &Path,
        name: &str,
        message: &str,
        options: CommitOptions,
    ) -> Result<GitOutcome, ExecError> {
        let repo = match self.repo(path, name) {
            Ok(repo) => repo,
            Err(missing) => return Ok(missing),
        };

        let stage: &[&str] = if options.add_all {
            &["add", "--all"]
        } else {
            &["add", "--update"]
        };
        if let Step::Failed(outcome) = self.step(&repo, stage)? {
            return Ok(outcome);
        }

        let mut stdout = match self.step(&repo, &["commit", "-m", message])? {
            Step::Ok(out) => out,
            Step::Failed(outcome) => return Ok(outcome),
        };
        tracing::info!("committed changes to repository '{name}' with message: '{message}'");

        if options.push {
            let branch = match self.step(&repo, &["rev-parse", "--abbrev-ref", "HEAD"])? {
                Step::Ok(out) => out.trim().to_string(),
                Step::Failed(outcome) => return Ok(outcome),
            };
            match self.step(&repo, &["push", "-u", "origin", &branch])? {
                Step::Ok(out) => stdout.push_str(&out),
                Step::Failed(outcome) => return Ok(outcome),
            }
            tracing::info!("pushed branch '{branch}' to origin");
        }
        Ok(GitOutcome::Completed { stdout })
    }

    fn single(
        &self,
        path: &Path,
        name: &str,
        args: &[&str],
        done: &str,
    ) -> Result<GitOutcome, ExecError> {
        let repo = match self.repo(path, name) {
            Ok(repo) => repo,
            Err(missing) => return Ok(missing),
        };
        match self.step(&repo, args)? {
            Step::Ok(stdout) => {
                if stdout.trim().is_empty() {
                    tracing::info!("{done} for '{name}'");
                } else {
                    tracing::info!("{done} for '{name}':\n{}", stdout.trim_end());
                }
                Ok(GitOutcome::Completed { stdout })
            }
            Step::Failed(outcome) => Ok(outcome),
        }
    }
}

/// `git@host:team/shotgrid.git` → `shotgrid`
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}
