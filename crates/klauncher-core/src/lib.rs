//! Core of the klauncher pipeline tools: rez command building, git
//! operations, and per-terminal-session context.

pub mod config;
pub mod context;
pub mod exec;
pub mod git;
pub mod packages;
pub mod registry;
pub mod rez;
pub mod session;
pub mod ssh;
pub mod store;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::version;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
