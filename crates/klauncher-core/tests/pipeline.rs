use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use klauncher_core::config::LauncherConfig;
use klauncher_core::context::ContextStore;
use klauncher_core::rez::{CommandBuilder, Fragment, RezRequest, PACKAGES_PATH_VAR};
use klauncher_core::session::SessionId;

fn pipeline(temp: &TempDir) -> LauncherConfig {
    let config = LauncherConfig::rooted_at(temp.path());
    fs::create_dir_all(&config.local_root).expect("local");
    fs::create_dir_all(&config.prod_root).expect("prod");
    config
}

#[test]
fn grab_copies_from_prod_and_switches_to_local() {
    let temp = TempDir::new().expect("tempdir");
    let config = pipeline(&temp);
    let released = config.prod_root.join("shaders").join("2.0.0");
    fs::create_dir_all(&released).expect("prod pkg");
    fs::write(released.join("package.py"), "version = '2.0.0'\n").expect("write");

    let request = RezRequest {
        grab: vec!["shaders".to_string(), "missing".to_string()],
        switch: vec!["lookdev".to_string()],
        launch: Some("maya".to_string()),
        ..RezRequest::default()
    };
    let report = CommandBuilder::new(&config).build(&request);

    assert!(config.local_root.join("shaders").join("2.0.0").join("package.py").is_file());
    assert_eq!(report.command.packages, vec!["shaders".to_string(), "lookdev".to_string()]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].fragment, Fragment::Grab("missing".to_string()));
    assert_eq!(
        report.command.env.get(PACKAGES_PATH_VAR).cloned(),
        Some(format!(
            "{};{}",
            config.local_root.display(),
            config.prod_root.display()
        ))
    );
}

#[test]
fn saved_environment_is_found_by_a_later_session() {
    let temp = TempDir::new().expect("tempdir");
    let config = pipeline(&temp);
    let builder = CommandBuilder::new(&config);

    let save = RezRequest {
        config_set: Some("dev".to_string()),
        package: Some("lookdev".to_string()),
        save: Some("lookdev".to_string()),
        ..RezRequest::default()
    };
    let saved = builder.build(&save);
    assert!(saved.skipped.is_empty());
    let rxt = config.context_dir().join("dev-lookdev.rxt");
    assert_eq!(
        saved.command.context_args,
        vec!["-o".to_string(), rxt.to_string_lossy().to_string()]
    );

    let load = RezRequest {
        config_set: Some("dev".to_string()),
        load: Some("lookdev".to_string()),
        launch: Some("houdini".to_string()),
        ..RezRequest::default()
    };
    let loaded = CommandBuilder::new(&config).build(&load);
    assert_eq!(
        loaded.command.args(),
        vec![
            "env".to_string(),
            "-i".to_string(),
            rxt.to_string_lossy().to_string(),
            "--".to_string(),
            "houdini".to_string(),
        ]
    );
}

#[test]
fn sessions_share_one_context_file() {
    let temp = TempDir::new().expect("tempdir");
    let config = pipeline(&temp);
    let store = ContextStore::new(config.context_file_path());
    let first = SessionId::new("101").expect("id");
    let second = SessionId::new("202").expect("id");

    store.save(&first, "package", "lookdev").expect("save");
    store.save(&second, "package", "comp").expect("save");
    store.save(&first, "branch", "dev").expect("save");

    let ctx = store.session(&first);
    assert_eq!(ctx.package(), Some("lookdev"));
    assert_eq!(ctx.branch(), Some("dev"));
    assert_eq!(store.session(&second).package(), Some("comp"));
    assert_eq!(store.load_all().len(), 2);
}
