mod info;
mod version;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use klauncher_core::config::{resolve_config, LauncherConfig};
use klauncher_core::context::{
    ContextStore, SessionContext, FIELD_BRANCH, FIELD_PACKAGE, FIELD_PATH, FIELD_URL,
};
use klauncher_core::git::{
    CheckoutOptions, CloneSource, CommitOptions, GitOps, GitOutcome, DEFAULT_LOG_COUNT,
};
use klauncher_core::packages::{self, ReleaseOutcome};
use klauncher_core::registry::RepoRegistry;
use klauncher_core::rez::{CommandBuilder, CommandOutcome, RezRequest, PACKAGES_PATH_VAR};
use klauncher_core::session::{resolve_session, SessionId};

#[derive(Parser)]
#[command(name = "klauncher", version = version::FULL, about = "Rez launcher and git helper for the pipeline")]
struct Cli {
    /// Session id partitioning the saved context (defaults to the terminal)
    #[arg(long, global = true)]
    session: Option<String>,
    /// Pipeline config file
    #[arg(long = "pipeline-config", global = true, env = "KLAUNCHER_CONFIG")]
    pipeline_config: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build and run rez environments
    Rez(RezArgs),
    /// Git operations on package checkouts
    Git(GitArgs),
    /// Manage the package repository registry
    #[command(subcommand)]
    Repo(RepoCommand),
    /// Inspect or edit the session context
    #[command(subcommand)]
    Context(ContextCommand),
    /// Print version information
    Version,
}

#[derive(Args, Debug, Default)]
struct RezArgs {
    #[arg(short, long)]
    info: bool,
    #[arg(short, long)]
    echo: bool,
    #[arg(long)]
    context: bool,
    /// Config set the saved environments belong to
    #[arg(short = 'c', long = "config", alias = "config-set")]
    config_set: Option<String>,
    #[arg(short, long)]
    package: Option<String>,
    #[arg(short, long, num_args = 1..)]
    add: Vec<String>,
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    load: Option<String>,
    #[arg(short, long)]
    save: Option<String>,
    #[arg(short, long, num_args = 1..)]
    grab: Vec<String>,
    #[arg(short = 'w', long, num_args = 1..)]
    switch: Vec<String>,
    #[arg(short, long)]
    launch: Option<String>,
    #[arg(short, long)]
    release: Option<String>,
    #[arg(long = "prod-release")]
    prod_release: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug, Default)]
struct GitArgs {
    #[arg(short, long)]
    info: bool,
    #[arg(long)]
    context: bool,
    #[arg(short, long)]
    package: Option<String>,
    #[arg(long)]
    path: Option<String>,
    #[arg(short, long)]
    branch: Option<String>,
    #[arg(short, long)]
    msg: Option<String>,
    #[arg(long = "git-url")]
    git_url: Option<String>,
    #[arg(short = 't', long = "git-tag")]
    git_tag: Option<String>,
    #[arg(long)]
    clone: bool,
    #[arg(long)]
    fetch: bool,
    #[arg(long)]
    pull: bool,
    #[arg(long)]
    checkout: bool,
    #[arg(long)]
    stash: bool,
    #[arg(long)]
    commit: bool,
    #[arg(long)]
    all: bool,
    #[arg(long)]
    push: bool,
    #[arg(long)]
    create_branch: bool,
    #[arg(long)]
    list_branches: bool,
    #[arg(long, num_args = 0..=1, default_missing_value = "5")]
    log: Option<usize>,
    #[arg(long)]
    history: bool,
}

#[derive(Subcommand)]
enum RepoCommand {
    /// Register (or overwrite) an alias
    Add { alias: String, url: String },
    /// Change the URL of an existing alias
    Update { alias: String, url: String },
    Remove { alias: String },
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the URL registered for an alias
    Resolve { alias: String },
}

#[derive(Subcommand)]
enum ContextCommand {
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Store one field for the current session
    Set { field: String, value: String },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Version = cli.command {
        println!("klauncher {}", version::FULL);
        return Ok(ExitCode::SUCCESS);
    }

    let config = resolve_config(cli.pipeline_config.as_deref())
        .context("failed to load pipeline config")?;
    tracing::debug!(root = %config.root_folder.display(), "pipeline config resolved");

    match cli.command {
        Command::Repo(command) => handle_repo(&config, command),
        Command::Rez(args) => {
            let app = App::new(config, cli.session.as_deref())?;
            app.handle_rez(args)
        }
        Command::Git(args) => {
            let app = App::new(config, cli.session.as_deref())?;
            app.handle_git(args)
        }
        Command::Context(command) => {
            let app = App::new(config, cli.session.as_deref())?;
            app.handle_context(command)
        }
        Command::Version => Ok(ExitCode::SUCCESS),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn missing(message: &str) -> Result<ExitCode> {
    tracing::error!("{message}");
    Ok(ExitCode::FAILURE)
}

struct App {
    config: LauncherConfig,
    session: SessionId,
    contexts: ContextStore,
}

impl App {
    fn new(config: LauncherConfig, explicit_session: Option<&str>) -> Result<Self> {
        let (session, source) = resolve_session(explicit_session, &config.shell_hosts)
            .context("unable to determine the terminal session")?;
        tracing::debug!(session = %session, source = ?source, "session resolved");
        let contexts = ContextStore::new(config.context_file_path());
        Ok(Self {
            config,
            session,
            contexts,
        })
    }

    fn save_field(&self, field: &str, value: &str) -> Result<()> {
        self.contexts
            .save(&self.session, field, value)
            .with_context(|| format!("failed to save {field} to the session context"))?;
        Ok(())
    }

    /// Store the given fields, then fill in the working path: the given one,
    /// else the stored one, else the LOCAL root.
    fn merge_context(
        &self,
        package: Option<&str>,
        branch: Option<&str>,
        url: Option<&str>,
        path: Option<&str>,
    ) -> Result<SessionContext> {
        for (field, value) in [(FIELD_PACKAGE, package), (FIELD_BRANCH, branch), (FIELD_URL, url)] {
            if let Some(value) = value {
                self.save_field(field, value)?;
            }
        }
        match path {
            Some(path) => self.save_field(FIELD_PATH, path)?,
            None => {
                if self.contexts.session(&self.session).path().is_none() {
                    let local = self.config.local_root.to_string_lossy().to_string();
                    self.save_field(FIELD_PATH, &local)?;
                }
            }
        }
        Ok(self.contexts.session(&self.session))
    }

    fn log_context(&self) {
        let fields = self.contexts.load(&self.session);
        if fields.is_empty() {
            tracing::warn!(session = %self.session, "no context found for session");
        }
        for (key, value) in fields {
            tracing::info!("context : {key} value is {value}");
        }
    }

    fn handle_rez(&self, args: RezArgs) -> Result<ExitCode> {
        self.merge_context(args.package.as_deref(), None, None, args.path.as_deref())?;

        if args.info {
            print!("{}", info::REZ);
        }

        if args.context {
            self.log_context();
            return Ok(ExitCode::SUCCESS);
        }

        match (args.release.as_deref(), args.prod_release.as_deref()) {
            (Some(local), Some(prod)) => return self.release(local, prod),
            (Some(_), None) | (None, Some(_)) => {
                return missing("Missing required arguments for release: --release and --prod-release.")
            }
            (None, None) => {}
        }

        let request = RezRequest {
            config_set: args.config_set,
            package: args.package,
            add: args.add,
            load: args.load,
            save: args.save,
            grab: args.grab,
            switch: args.switch,
            launch: args.launch,
        };

        if args.echo {
            request.echo();
            log_rez_env_variables();
        }

        if !has_environment(&request) {
            if args.info || args.echo {
                return Ok(ExitCode::SUCCESS);
            }
            return missing("Nothing to run: give a package, --add, --grab, --switch, --load or --launch.");
        }

        let builder = CommandBuilder::new(&self.config);
        let report = builder.build(&request);
        for skipped in &report.skipped {
            tracing::warn!(fragment = ?skipped.fragment, reason = %skipped.reason, "fragment left out");
        }

        if args.dry_run {
            println!("{}", report.command.render());
            return Ok(ExitCode::SUCCESS);
        }

        match builder.run(&report.command).context("failed to run rez")? {
            CommandOutcome::Succeeded { stdout } => {
                print!("{stdout}");
                Ok(ExitCode::SUCCESS)
            }
            CommandOutcome::Failed { .. } => Ok(ExitCode::FAILURE),
        }
    }

    fn release(&self, local: &str, prod: &str) -> Result<ExitCode> {
        match packages::release_package(&self.config, local, prod) {
            Ok(ReleaseOutcome::Released { destination }) => {
                println!("{}", destination.display());
                Ok(ExitCode::SUCCESS)
            }
            Ok(ReleaseOutcome::ReleasedWithoutVersionBump { destination }) => {
                tracing::warn!(destination = %destination.display(), "released without a version bump");
                println!("{}", destination.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                tracing::error!(error = %err, "release failed");
                Ok(ExitCode::FAILURE)
            }
        }
    }

    fn handle_git(&self, args: GitArgs) -> Result<ExitCode> {
        let ctx = self.merge_context(
            args.package.as_deref(),
            args.branch.as_deref(),
            args.git_url.as_deref(),
            args.path.as_deref(),
        )?;

        if args.info {
            print!("{}", info::GIT);
        }
        if args.context {
            self.log_context();
        }

        let steps = match plan_git_steps(&args, &ctx) {
            Ok(steps) => steps,
            Err(message) => return missing(&message),
        };
        if steps.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }

        let Some(path) = ctx.path().map(PathBuf::from) else {
            return missing("Missing path for git operations.");
        };
        let ops = GitOps::new(&self.config);
        let registry = RepoRegistry::load(self.config.repos_file_path())
            .context("failed to read the repository registry")?;

        for step in steps {
            let outcome = step.run(&ops, &registry, &path).context("failed to run git")?;
            if let Some(stdout) = outcome.stdout() {
                print!("{stdout}");
            }
            if !outcome.is_tolerated() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn handle_context(&self, command: ContextCommand) -> Result<ExitCode> {
        match command {
            ContextCommand::Show { json } => {
                let fields = self.contexts.load(&self.session);
                if json {
                    let body = json!({
                        "session": self.session.as_str(),
                        "context": fields,
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                } else if fields.is_empty() {
                    tracing::warn!(session = %self.session, "no context found for session");
                } else {
                    for (key, value) in fields {
                        println!("{key}: {value}");
                    }
                }
            }
            ContextCommand::Set { field, value } => {
                let field = field.trim();
                if field.is_empty() {
                    return missing("Context field name must not be empty.");
                }
                self.save_field(field, &value)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn has_environment(request: &RezRequest) -> bool {
    request.package.is_some()
        || !request.add.is_empty()
        || !request.grab.is_empty()
        || !request.switch.is_empty()
        || request.load.is_some()
        || request.launch.is_some()
}

fn log_rez_env_variables() {
    let vars: BTreeMap<String, String> = std::env::vars()
        .filter(|(key, _)| key.starts_with("REZ_"))
        .collect();
    if !vars.contains_key(PACKAGES_PATH_VAR) {
        tracing::info!("{PACKAGES_PATH_VAR} is not set");
    }
    for (key, value) in vars {
        tracing::info!("{key}={value}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RepoOp {
    Fetch,
    Pull,
    Checkout { branch: String, auto_stash: bool },
    Commit { message: String, options: CommitOptions },
    CreateBranch(String),
    ListBranches,
    Log(usize),
    History,
    Tag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GitStep {
    Clone(CloneSource),
    InRepo { name: String, op: RepoOp },
}

impl GitStep {
    fn run(
        &self,
        ops: &GitOps<'_>,
        registry: &RepoRegistry,
        path: &Path,
    ) -> Result<GitOutcome, klauncher_core::exec::ExecError> {
        let (name, op) = match self {
            Self::Clone(source) => return ops.clone_repository(registry, source, path),
            Self::InRepo { name, op } => (name.as_str(), op),
        };
        match op {
            RepoOp::Fetch => ops.fetch(path, name),
            RepoOp::Pull => ops.pull(path, name),
            RepoOp::Checkout { branch, auto_stash } => ops.checkout(
                path,
                name,
                branch,
                CheckoutOptions {
                    auto_stash: *auto_stash,
                },
            ),
            RepoOp::Commit { message, options } => ops.commit(path, name, message, *options),
            RepoOp::CreateBranch(branch) => ops.create_branch(path, name, branch),
            RepoOp::ListBranches => ops.list_remote_branches(path, name),
            RepoOp::Log(count) => ops.log(path, name, *count),
            RepoOp::History => ops.history(path, name),
            RepoOp::Tag(tag) => ops.tag(path, name, tag),
        }
    }
}

/// Validate every requested operation before running any of them.
fn plan_git_steps(args: &GitArgs, ctx: &SessionContext) -> Result<Vec<GitStep>, String> {
    let package = ctx.package().map(str::to_string);
    let mut steps = Vec::new();

    let in_repo = |op: RepoOp, what: &str| -> Result<GitStep, String> {
        match package.clone() {
            Some(name) => Ok(GitStep::InRepo { name, op }),
            None => Err(format!("Missing package for git {what}.")),
        }
    };

    if args.clone {
        let source = match (args.git_url.as_ref(), package.as_ref()) {
            // The checkout is named after this invocation's package or the URL,
            // never after a package remembered from an earlier command.
            (Some(url), _) => CloneSource::Url {
                url: url.clone(),
                name: args.package.clone(),
            },
            (None, Some(name)) => CloneSource::Alias(name.clone()),
            (None, None) => {
                return Err(
                    "Missing required arguments for git clone: --git-url or a package.".to_string(),
                )
            }
        };
        steps.push(GitStep::Clone(source));
    }
    if args.fetch {
        steps.push(in_repo(RepoOp::Fetch, "fetch")?);
    }
    if args.pull {
        steps.push(in_repo(RepoOp::Pull, "pull")?);
    }
    if args.checkout {
        let Some(branch) = ctx.branch() else {
            return Err("Missing branch for git checkout.".to_string());
        };
        steps.push(in_repo(
            RepoOp::Checkout {
                branch: branch.to_string(),
                auto_stash: args.stash,
            },
            "checkout",
        )?);
    }
    if args.commit {
        let Some(message) = args.msg.as_ref().filter(|m| !m.trim().is_empty()) else {
            return Err("Missing --msg for git commit.".to_string());
        };
        steps.push(in_repo(
            RepoOp::Commit {
                message: message.clone(),
                options: CommitOptions {
                    add_all: args.all,
                    push: args.push,
                },
            },
            "commit",
        )?);
    }
    if args.create_branch {
        let Some(branch) = ctx.branch() else {
            return Err("Missing branch for git branch creation.".to_string());
        };
        steps.push(in_repo(RepoOp::CreateBranch(branch.to_string()), "branch creation")?);
    }
    if args.list_branches {
        steps.push(in_repo(RepoOp::ListBranches, "list remote branches")?);
    }
    if let Some(count) = args.log {
        let count = if count == 0 { DEFAULT_LOG_COUNT } else { count };
        steps.push(in_repo(RepoOp::Log(count), "log")?);
    }
    if args.history {
        steps.push(in_repo(RepoOp::History, "history")?);
    }
    if let Some(tag) = args.git_tag.as_ref() {
        steps.push(in_repo(RepoOp::Tag(tag.clone()), "tag")?);
    }
    Ok(steps)
}

fn handle_repo(config: &LauncherConfig, command: RepoCommand) -> Result<ExitCode> {
    let path = config.repos_file_path();
    let mut registry = RepoRegistry::load(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match command {
        RepoCommand::Add { alias, url } => {
            registry.add(&alias, &url).context("failed to save repository")?;
        }
        RepoCommand::Update { alias, url } => {
            if !registry.update(&alias, &url).context("failed to save repository")? {
                return Ok(ExitCode::FAILURE);
            }
        }
        RepoCommand::Remove { alias } => {
            if !registry.remove(&alias).context("failed to save repository")? {
                return Ok(ExitCode::FAILURE);
            }
        }
        RepoCommand::List { json } => {
            if json {
                let repos: BTreeMap<&str, &str> = registry.list().collect();
                println!("{}", serde_json::to_string_pretty(&repos)?);
            } else {
                for (alias, url) in registry.list() {
                    println!("{alias}\t{url}");
                }
            }
        }
        RepoCommand::Resolve { alias } => match registry.resolve(&alias) {
            Some(url) => println!("{url}"),
            None => return missing(&format!("Repository '{alias}' not found.")),
        },
    }
    Ok(ExitCode::SUCCESS)
}
