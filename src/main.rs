//! Deckhand CLI entrypoint.
//!
//! This is the main entrypoint for the deckhand command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use deckhand::cli::{Cli, Commands, OutputFormatter, StateCommands};
use deckhand::config::{
    ConfigHasher, ConfigParser, ConfigValidator, StackConfig, StateBackend, Variables,
    find_config_file,
};
use deckhand::error::{ConfigError, DeckhandError, Result, StateError};
use deckhand::graph::{GraphBuilder, ResourceGraph, ResourceId};
use deckhand::planner::{DiffEngine, Plan, PlanExecutor};
use deckhand::provider::{HttpProvider, RetryPolicy};
use deckhand::refresh::Refresher;
use deckhand::state::{
    HistoryEntry, LocalStateStore, RunKind, S3StateStore, STATE_DIR, Snapshot, StateLock,
    StateStore, generate_holder_id, load_or_init,
};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { out, no_refresh } => {
            cmd_plan(config, out.as_deref(), no_refresh, &formatter).await
        }
        Commands::Apply {
            plan_file,
            yes,
            continue_on_error,
            max_attempts,
        } => {
            let options = ApplyOptions {
                plan_file,
                auto_approve: yes,
                continue_on_error,
                max_attempts,
            };
            cmd_apply(config, options, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config, yes, &formatter).await,
        Commands::Refresh => cmd_refresh(config, &formatter).await,
        Commands::Drift => cmd_drift(config, &formatter).await,
        Commands::Graph => cmd_graph(config, &formatter),
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Flags of the `apply` command.
struct ApplyOptions {
    plan_file: Option<PathBuf>,
    auto_approve: bool,
    continue_on_error: bool,
    max_attempts: Option<u32>,
}

/// What a lock-guarded run talks to.
struct Session<'a> {
    provider: &'a HttpProvider,
    variables: &'a Variables,
    retry: RetryPolicy,
    lock_id: &'a str,
}

/// A loaded stack: configuration, graph and state backend.
struct Workspace {
    config: StackConfig,
    config_hash: String,
    graph: ResourceGraph,
    store: Box<dyn StateStore>,
}

impl Workspace {
    /// Loads the configuration, builds the graph and opens the state store.
    async fn open(config_path: Option<&Path>) -> Result<Self> {
        let (config, base_dir) = load_config(config_path)?;
        let graph = GraphBuilder::new().build(&config)?;
        let store = open_state_store(&config, &base_dir).await?;
        let config_hash = ConfigHasher::new().hash_config(&config);

        Ok(Self {
            config,
            config_hash,
            graph,
            store,
        })
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        load_or_init(
            self.store.as_ref(),
            &self.config.project.name,
            &self.config.project.environment,
        )
        .await
    }

    /// HTTP provider whose errors are scrubbed of the sensitive `variables`.
    fn provider(&self, variables: &Variables) -> Result<HttpProvider> {
        let token = ConfigParser::get_api_token()?;
        Ok(HttpProvider::new(&self.config.provider, token)?.with_redactor(variables.redactor()))
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.provider)
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new deckhand project in: {}", path.display());

    let config_path = path.join("deckhand.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/deckhand.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.lines().any(|l| l.trim() == state_entry);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# deckhand")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your secrets");
    eprintln!("  2. Edit deckhand.yaml to describe your stack");
    eprintln!("  3. Run 'deckhand validate' to check your configuration");
    eprintln!("  4. Run 'deckhand plan' to see what will change");
    eprintln!("  5. Run 'deckhand apply' to provision it");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let result = ConfigValidator::new().check(&config);
    let graph = GraphBuilder::new().build(&config)?;

    println!("{}", formatter.format_validation(&result, &graph, show_warnings));
    Ok(())
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    out: Option<&Path>,
    no_refresh: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::open(config_path).await?;
    let snapshot = workspace.snapshot().await?;
    let variables = Variables::from_env(&workspace.config);

    if !no_refresh && !snapshot.is_empty() {
        let provider = workspace.provider(&variables)?;
        Refresher::new(&provider)
            .with_retry(workspace.retry())
            .detect(&snapshot)
            .await?
            .ensure_converged()?;
    }

    let diff = DiffEngine::new().compute_diff(&workspace.graph, &snapshot, &variables)?;
    let plan = Plan::from_diff(&diff, &snapshot, &workspace.config_hash);

    println!("{}", formatter.format_plan(&plan));

    if let Some(path) = out {
        plan.save(path)?;
        eprintln!("{}", formatter.success(&format!("Plan saved to {}", path.display())));
    }

    Ok(())
}

/// Apply a saved or freshly computed plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    options: ApplyOptions,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::open(config_path).await?;
    let variables = Variables::from_env(&workspace.config);
    let provider = workspace.provider(&variables)?;

    let mut retry = workspace.retry();
    if let Some(attempts) = options.max_attempts {
        retry = retry.with_max_attempts(attempts);
    }

    let lock = StateLock::acquire(workspace.store.as_ref(), "apply").await?;
    let session = Session {
        provider: &provider,
        variables: &variables,
        retry,
        lock_id: lock.lock_id(),
    };
    let result = apply_locked(&workspace, &session, &options, formatter).await;
    lock.release_quietly(workspace.store.as_ref()).await;
    result
}

/// Body of `apply`, run while holding the state lock.
async fn apply_locked(
    workspace: &Workspace,
    session: &Session<'_>,
    options: &ApplyOptions,
    formatter: &OutputFormatter,
) -> Result<()> {
    // Saved plans carry no values, so the current environment must supply them.
    session.variables.require(workspace.graph.variables_used())?;

    let mut snapshot = workspace.snapshot().await?;

    if !snapshot.is_empty() {
        Refresher::new(session.provider)
            .with_retry(session.retry)
            .detect(&snapshot)
            .await?
            .ensure_converged()?;
    }

    let plan = match &options.plan_file {
        Some(path) => {
            let plan = Plan::load(path)?;
            plan.verify_baseline(&snapshot, &workspace.config_hash)?;
            plan
        }
        None => {
            let diff =
                DiffEngine::new().compute_diff(&workspace.graph, &snapshot, session.variables)?;
            Plan::from_diff(&diff, &snapshot, &workspace.config_hash)
        }
    };

    println!("{}", formatter.format_plan(&plan));
    if plan.is_empty() {
        return Ok(());
    }

    if !options.auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let report = PlanExecutor::new(session.provider, &workspace.graph, session.variables)
        .with_retry(session.retry)
        .with_continue_on_error(options.continue_on_error)
        .with_checkpoint(workspace.store.as_ref())
        .with_lease(session.lock_id)
        .execute(&plan, &mut snapshot)
        .await?;

    println!("{}", formatter.format_apply(&report));

    report.ensure_complete()
}

/// Delete every tracked resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::open(config_path).await?;
    let variables = Variables::from_env(&workspace.config);
    let provider = workspace.provider(&variables)?;

    let lock = StateLock::acquire(workspace.store.as_ref(), "destroy").await?;
    let session = Session {
        provider: &provider,
        variables: &variables,
        retry: workspace.retry(),
        lock_id: lock.lock_id(),
    };
    let result = destroy_locked(&workspace, &session, auto_approve, formatter).await;
    lock.release_quietly(workspace.store.as_ref()).await;
    result
}

/// Body of `destroy`, run while holding the state lock.
async fn destroy_locked(
    workspace: &Workspace,
    session: &Session<'_>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let mut snapshot = workspace.snapshot().await?;
    if snapshot.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    let diff = DiffEngine::new().destroy_diff(&snapshot);
    let plan = Plan::from_diff(&diff, &snapshot, &workspace.config_hash);
    println!("{}", formatter.format_plan(&plan));

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let empty = ResourceGraph::default();
    let report = PlanExecutor::new(session.provider, &empty, session.variables)
        .with_retry(session.retry)
        .with_checkpoint(workspace.store.as_ref())
        .with_lease(session.lock_id)
        .with_run_kind(RunKind::Destroy)
        .execute(&plan, &mut snapshot)
        .await?;

    println!("{}", formatter.format_apply(&report));

    report.ensure_complete()
}

/// Accept the observed remote state into the snapshot.
async fn cmd_refresh(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(config_path).await?;
    let provider = workspace.provider(&Variables::from_env(&workspace.config))?;

    let mut lock = StateLock::acquire(workspace.store.as_ref(), "refresh").await?;
    let result = async {
        let mut snapshot = workspace.snapshot().await?;
        let report = Refresher::new(&provider)
            .with_retry(workspace.retry())
            .refresh(&mut snapshot)
            .await?;
        if !report.is_clean() {
            lock.renew(workspace.store.as_ref()).await?;
            workspace.store.save(&snapshot).await?;
        }
        Ok::<_, DeckhandError>(report)
    }
    .await;
    lock.release_quietly(workspace.store.as_ref()).await;

    println!("{}", formatter.format_drift(&result?));
    Ok(())
}

/// Report drift without touching state.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(config_path).await?;
    let snapshot = workspace.snapshot().await?;
    let provider = workspace.provider(&Variables::from_env(&workspace.config))?;

    let report = Refresher::new(&provider)
        .with_retry(workspace.retry())
        .detect(&snapshot)
        .await?;

    println!("{}", formatter.format_drift(&report));
    Ok(())
}

/// Print the graph in dependency order.
fn cmd_graph(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let graph = GraphBuilder::new().build(&config)?;

    println!("{}", formatter.format_graph(&graph));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = open_state_store(&config, &base_dir).await?;
    let store = store.as_ref();

    match command {
        StateCommands::Show => {
            let snapshot = load_or_init(store, &config.project.name, &config.project.environment)
                .await?;
            println!("{}", formatter.format_snapshot(&snapshot));
        }
        StateCommands::List => {
            let snapshot = load_or_init(store, &config.project.name, &config.project.environment)
                .await?;
            println!("{}", formatter.format_resources(&snapshot));
        }
        StateCommands::Rm { address } => {
            let id: ResourceId = address.parse().map_err(|message| ConfigError::ValidationError {
                message,
                field: Some(String::from("address")),
            })?;

            let lock = StateLock::acquire(store, "state rm").await?;
            let result = forget_resource(store, &config, &id).await;
            lock.release_quietly(store).await;
            result?;

            eprintln!(
                "{}",
                formatter.success(&format!("Removed {id} from state; the remote object is untouched"))
            );
        }
        StateCommands::Lock => {
            let info = store.acquire_lock(&generate_holder_id(), "manual").await?;
            println!("{}", formatter.format_lock(&info));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match store.force_unlock().await? {
                    Some(info) => {
                        warn!("Removed lock {} held by {}", info.lock_id, info.holder);
                        eprintln!("{}", formatter.success("State forcefully unlocked."));
                    }
                    None => eprintln!("{}", formatter.warning("State was not locked.")),
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                return Err(DeckhandError::internal("Provide --lock-id or use --force"));
            }
        }
    }

    Ok(())
}

/// Drops one resource from the snapshot and saves it.
async fn forget_resource(store: &dyn StateStore, config: &StackConfig, id: &ResourceId) -> Result<()> {
    let mut snapshot = load_or_init(store, &config.project.name, &config.project.environment).await?;

    if snapshot.forget(id).is_none() {
        return Err(StateError::UnknownResource {
            resource: id.to_string(),
        }
        .into());
    }
    snapshot.add_history(HistoryEntry::new(
        RunKind::Remove,
        snapshot.serial,
        vec![id.to_string()],
    ));

    store.save(&snapshot).await
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Asks for confirmation on stderr; true if the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads `.env` and the configuration, then validates it.
///
/// Returns the configuration and the directory it was found in.
fn load_config(config_path: Option<&Path>) -> Result<(StackConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_dir = config_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    Ok((config, base_dir))
}

/// Creates the state store configured for the stack.
async fn open_state_store(config: &StackConfig, base_dir: &Path) -> Result<Box<dyn StateStore>> {
    let store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(STATE_DIR), |p| base_dir.join(p));
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.as_deref().ok_or_else(|| {
                DeckhandError::Config(ConfigError::ValidationError {
                    message: String::from("S3 bucket not configured"),
                    field: Some(String::from("state.bucket")),
                })
            })?;
            Box::new(
                S3StateStore::new(bucket, config.state.prefix.as_deref(), config.state.region.as_deref())
                    .await?,
            )
        }
    };

    debug!("Using {} state at {}", store.backend_type(), store.location());
    Ok(store)
}
