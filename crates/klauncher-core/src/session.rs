//! Session identity.
//!
//! A session partitions the persisted context. It is resolved, in order, from
//! an explicit value (CLI flag), the `KLAUNCHER_SESSION` environment variable,
//! or the pid of the nearest ancestor process that is a known shell host.

use std::collections::BTreeSet;
use std::fmt;

use sysinfo::{Pid, System};
use thiserror::Error;

pub const SESSION_ENV: &str = "KLAUNCHER_SESSION";

/// Upper bound on ancestors visited; guards against pid cycles.
const MAX_ANCESTORS: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session id must not be empty")]
    Empty,
    #[error("no shell host found among ancestors of pid {start_pid} (looked for {hosts:?}); pass --session or set KLAUNCHER_SESSION")]
    NoShellHost { start_pid: u32, hosts: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Result<Self, SessionError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SessionError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a resolved session id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    Explicit,
    Env,
    ProcessTree,
}

pub fn resolve_session(
    explicit: Option<&str>,
    shell_hosts: &[String],
) -> Result<(SessionId, SessionSource), SessionError> {
    if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
        return Ok((SessionId::new(value)?, SessionSource::Explicit));
    }
    if let Ok(value) = std::env::var(SESSION_ENV) {
        if !value.trim().is_empty() {
            return Ok((SessionId::new(value)?, SessionSource::Env));
        }
    }
    let pid = terminal_host_pid(shell_hosts)?;
    Ok((SessionId::new(pid.to_string())?, SessionSource::ProcessTree))
}

fn terminal_host_pid(shell_hosts: &[String]) -> Result<u32, SessionError> {
    let processes = SystemProcesses::snapshot();
    find_shell_ancestor(&processes, std::process::id(), shell_hosts)
}

/// Parent links and names of running processes.
pub trait ProcessTable {
    fn parent(&self, pid: u32) -> Option<u32>;
    fn name(&self, pid: u32) -> Option<String>;
}

/// Snapshot of the host process table.
pub struct SystemProcesses {
    system: System,
}

impl SystemProcesses {
    pub fn snapshot() -> Self {
        let mut system = System::new();
        system.refresh_processes();
        Self { system }
    }
}

impl ProcessTable for SystemProcesses {
    fn parent(&self, pid: u32) -> Option<u32> {
        self.system
            .process(Pid::from_u32(pid))
            .and_then(|process| process.parent())
            .map(|parent| parent.as_u32())
    }

    fn name(&self, pid: u32) -> Option<String> {
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| process.name().to_string())
    }
}

/// Walk parents of `start_pid` and return the first whose name matches one
/// of `shell_hosts`. Matching ignores case and a trailing `.exe`.
pub fn find_shell_ancestor(
    processes: &impl ProcessTable,
    start_pid: u32,
    shell_hosts: &[String],
) -> Result<u32, SessionError> {
    let hosts: BTreeSet<String> = shell_hosts.iter().map(|h| h.to_lowercase()).collect();
    let mut pid = processes.parent(start_pid);
    let mut visited = 0;
    while let Some(current) = pid.filter(|p| *p > 0) {
        if visited >= MAX_ANCESTORS {
            break;
        }
        if let Some(name) = processes.name(current) {
            let name = name.to_lowercase();
            let stem = name.strip_suffix(".exe").unwrap_or(&name);
            if hosts.contains(&name) || hosts.contains(stem) {
                return Ok(current);
            }
        }
        pid = processes.parent(current);
        visited += 1;
    }
    Err(SessionError::NoShellHost {
        start_pid,
        hosts: shell_hosts.to_vec(),
    })
}
