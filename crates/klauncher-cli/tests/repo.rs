use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn repo(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_klauncher"))
        .env("KLAUNCHER_HOME", home)
        .env_remove("KLAUNCHER_CONFIG")
        .arg("repo")
        .args(args)
        .output()
        .expect("run klauncher repo")
}

#[test]
fn add_resolve_update_remove() {
    let home = TempDir::new().expect("home");
    assert!(repo(home.path(), &["add", "lookdev", "git@host:studio/lookdev.git"]).status.success());

    let resolved = repo(home.path(), &["resolve", "lookdev"]);
    assert!(resolved.status.success());
    assert_eq!(
        String::from_utf8_lossy(&resolved.stdout).trim(),
        "git@host:studio/lookdev.git"
    );

    assert!(repo(home.path(), &["update", "lookdev", "git@host:fx/lookdev.git"]).status.success());
    let listed = repo(home.path(), &["list", "--json"]);
    let repos: Value = serde_json::from_slice(&listed.stdout).expect("json");
    assert_eq!(repos["lookdev"], "git@host:fx/lookdev.git");

    assert!(repo(home.path(), &["remove", "lookdev"]).status.success());
    assert_eq!(repo(home.path(), &["resolve", "lookdev"]).status.code(), Some(1));
}

#[test]
fn unknown_alias_is_reported() {
    let home = TempDir::new().expect("home");
    assert_eq!(repo(home.path(), &["update", "ghost", "url"]).status.code(), Some(1));
    assert_eq!(repo(home.path(), &["remove", "ghost"]).status.code(), Some(1));
    assert!(!home.path().join("context").join("repos.json").exists());
}
