use std::collections::BTreeMap;
use std::path::Path;

use crate::exec::ToolCommand;

const AUTH_SOCK: &str = "SSH_AUTH_SOCK";
const AGENT_PID: &str = "SSH_AGENT_PID";

/// Agent variables for child processes. An agent started by
/// [`ensure_agent`] is stopped with `ssh-agent -k` when this is dropped.
#[derive(Debug, Default)]
pub struct SshAgent {
    envs: BTreeMap<String, String>,
    started: bool,
}

impl SshAgent {
    pub fn envs(&self) -> &BTreeMap<String, String> {
        &self.envs
    }

    pub fn started(&self) -> bool {
        self.started
    }
}

impl Drop for SshAgent {
    fn drop(&mut self) {
        if !self.started {
            return;
        }
        let Some(stop) = stop_command(&self.envs) else {
            return;
        };
        match stop.output() {
            Ok(out) if out.success() => tracing::debug!("ssh-agent stopped"),
            Ok(out) => tracing::warn!(stderr = %out.stderr.trim(), "failed to stop ssh-agent"),
            Err(err) => tracing::warn!(error = %err, "failed to stop ssh-agent"),
        }
    }
}

/// `ssh-agent -k` aimed at the agent described by `envs`.
pub fn stop_command(envs: &BTreeMap<String, String>) -> Option<ToolCommand> {
    let pid = envs.get(AGENT_PID)?;
    if pid.parse::<u32>().map_or(true, |pid| pid == 0) {
        return None;
    }
    Some(ToolCommand::new("ssh-agent").arg("-k").envs(envs))
}

/// Make sure an agent is reachable and `key` is loaded into it.
///
/// When the host has no `SSH_AUTH_SOCK`, a fresh `ssh-agent` is started and
/// its variables are returned so the caller can hand them to child
/// processes. Failures are logged; the returned map may be empty.
pub fn ensure_agent(key: Option<&Path>) -> SshAgent {
    let mut agent = SshAgent::default();
    if std::env::var_os(AUTH_SOCK).is_none() {
        tracing::info!("starting ssh-agent");
        match ToolCommand::new("ssh-agent").arg("-s").output() {
            Ok(out) if out.success() => {
                agent.envs = parse_agent_env(&out.stdout);
                agent.started = agent.envs.contains_key(AGENT_PID);
            }
            Ok(out) => tracing::error!(stderr = %out.stderr.trim(), "ssh-agent failed"),
            Err(err) => tracing::error!(error = %err, "ssh-agent unavailable"),
        }
    }

    let Some(key) = key else {
        return agent;
    };
    if !key.exists() {
        tracing::warn!(key = %key.display(), "ssh key not found, skipping ssh-add");
        return agent;
    }
    match ToolCommand::new("ssh-add")
        .arg(key.to_string_lossy())
        .envs(agent.envs())
        .output()
    {
        Ok(out) if out.success() => tracing::info!("SSH key added to agent"),
        Ok(out) => tracing::error!(stderr = %out.stderr.trim(), "failed to add SSH key to agent"),
        Err(err) => tracing::error!(error = %err, "failed to add SSH key to agent"),
    }
    agent
}

/// Extract `SSH_AUTH_SOCK` / `SSH_AGENT_PID` from `ssh-agent -s` output.
pub fn parse_agent_env(raw: &str) -> BTreeMap<String, String> {
    let mut envs = BTreeMap::new();
    for statement in raw.split([';', '\n']) {
        let statement = statement.trim();
        let Some((key, value)) = statement.split_once('=') else {
            continue;
        };
        if key == AUTH_SOCK || key == AGENT_PID {
            envs.insert(key.to_string(), value.trim().to_string());
        }
    }
    envs
}
