//! Stackforge CLI entrypoint.
//!
//! This is the main entrypoint for the stackforge command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use stackforge::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stackforge::config::{
    find_config_file, ConfigHasher, ConfigParser, ConfigValidator, ProjectConfig, StateBackend,
};
use stackforge::error::{PlanError, Result, StackforgeError};
use stackforge::planner::{DiffEngine, PlanExecutor, ProjectPlan};
use stackforge::project::{Project, TargetFilter};
use stackforge::state::{LocalStateStore, S3StateStore, StateLock, StateSnapshot, StateStore};
use stackforge::unit::{ExecContext, UnitRegistry};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Starter configuration written by `init`.
const STARTER_CONFIG: &str = r#"project:
  name: my-project
  parallelism: 3

state:
  backend: local

stacks:
  - name: infra
    units:
      - name: network
        type: printer
        outputs:
          subnet_id: subnet-0001

  - name: app
    units:
      - name: web
        type: shell
        env:
          SUBNET: '{{ output "infra.network.subnet_id" }}'
        apply:
          - echo "deploying into $SUBNET"
          - echo "url=http://web.$SUBNET.local"
        destroy:
          - echo "tearing down web"
        outputs:
          - url
"#;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
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
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan {
            detailed,
            unit_plan,
            ignore_state,
            target,
            exclude,
        } => {
            let filter = TargetFilter::new(target, exclude);
            cmd_plan(config, detailed, unit_plan, ignore_state, &filter, &formatter).await
        }
        Commands::Apply {
            force,
            parallelism,
            ignore_state,
            target,
            exclude,
        } => {
            let filter = TargetFilter::new(target, exclude);
            cmd_apply(config, force, parallelism, ignore_state, &filter, &formatter).await
        }
        Commands::Destroy {
            force,
            parallelism,
            ignore_state,
        } => cmd_destroy(config, force, parallelism, ignore_state, &formatter).await,
        Commands::Build => cmd_build(config, &formatter).await,
        Commands::Output { unit } => cmd_output(config, unit.as_deref(), &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new Stackforge project in: {}", path.display());

    let config_path = path.join("stackforge.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, STARTER_CONFIG)?;
    eprintln!("Created: {}", config_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".stackforge") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Stackforge")?;
            writeln!(file, ".stackforge/")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.stackforge/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit stackforge.yaml with your stacks and units");
    eprintln!("  2. Run 'stackforge validate' to check your configuration");
    eprintln!("  3. Run 'stackforge plan' to see what will be deployed");
    eprintln!("  4. Run 'stackforge apply' to deploy");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&config, &result, show_warnings));

    if let Some(first) = result.errors.first() {
        return Err(StackforgeError::Config(stackforge::error::ConfigError::validation(
            first.message.clone(),
            first.field.clone(),
        )));
    }

    // Building the project catches cycles and dangling references too.
    let live = Project::from_config(&config, &UnitRegistry::with_builtin())?;
    live.check_dependencies()?;

    Ok(())
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    unit_plan: bool,
    ignore_state: bool,
    filter: &TargetFilter,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::open(config_path).await?;
    let snapshot = session.load_snapshot().await?;
    let (live, previous) = session.projects(&snapshot)?;

    let plan = session.plan(&live, &previous, &snapshot, ignore_state, filter)?;
    println!("{}", formatter.format_plan(&plan, detailed));

    if unit_plan && plan.has_changes() {
        let executor = PlanExecutor::new(&live, &previous, session.store.as_ref(), session.context());
        let plans = executor.plan_units(&plan, &snapshot).await?;
        println!("{}", formatter.format_unit_plans(&plans));
    }

    Ok(())
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    force: bool,
    parallelism: Option<usize>,
    ignore_state: bool,
    filter: &TargetFilter,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::open(config_path).await?;
    let mut lock = session.lock().await?;

    let outcome = lock
        .hold(
            session.store.as_ref(),
            apply_locked(&session, force, parallelism, ignore_state, filter, formatter),
        )
        .await;

    lock.release_quietly(session.store.as_ref()).await;
    outcome
}

/// Plans and applies while the state lock is held.
async fn apply_locked(
    session: &Session,
    force: bool,
    parallelism: Option<usize>,
    ignore_state: bool,
    filter: &TargetFilter,
    formatter: &OutputFormatter,
) -> Result<()> {
    let mut snapshot = session.load_snapshot().await?;
    let (live, previous) = session.projects(&snapshot)?;

    let plan = session.plan(&live, &previous, &snapshot, ignore_state, filter)?;
    if !plan.has_changes() {
        eprintln!("No changes, nothing to do.");
        return Ok(());
    }

    println!("{}", formatter.format_plan(&plan, false));

    if !force && !confirm("Continue? (yes/no): ")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let ctx = session.context();
    install_interrupt_handler(&ctx);
    let executor = PlanExecutor::new(&live, &previous, session.store.as_ref(), ctx)
        .with_parallelism(parallelism.unwrap_or(session.config.project.parallelism));

    let result = executor.apply(&plan, &mut snapshot).await?;
    println!("{}", formatter.format_result(&result));
    Ok(())
}

/// Destroy every recorded unit.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    force: bool,
    parallelism: Option<usize>,
    ignore_state: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::open(config_path).await?;
    let mut lock = session.lock().await?;

    let outcome = lock
        .hold(
            session.store.as_ref(),
            destroy_locked(&session, force, parallelism, ignore_state, formatter),
        )
        .await;

    lock.release_quietly(session.store.as_ref()).await;
    outcome
}

/// Destroys while the state lock is held.
async fn destroy_locked(
    session: &Session,
    force: bool,
    parallelism: Option<usize>,
    ignore_state: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let mut snapshot = session.load_snapshot().await?;
    let (live, previous) = session.projects(&snapshot)?;

    let targets: Vec<&String> = if ignore_state {
        live.keys().collect()
    } else {
        previous.keys().collect()
    };
    if targets.is_empty() {
        eprintln!("Nothing to destroy.");
        return Ok(());
    }

    eprintln!("The following units will be destroyed:");
    for key in &targets {
        eprintln!("  - {key}");
    }

    if !force && !confirm("\nThis action is IRREVERSIBLE. Continue? (yes/no): ")? {
        eprintln!("Destroy cancelled.");
        return Ok(());
    }

    let ctx = session.context();
    install_interrupt_handler(&ctx);
    let executor = PlanExecutor::new(&live, &previous, session.store.as_ref(), ctx)
        .with_parallelism(parallelism.unwrap_or(session.config.project.parallelism));

    let result = executor.destroy_all(&mut snapshot, ignore_state).await?;
    println!("{}", formatter.format_result(&result));
    Ok(())
}

/// Build every unit artifact.
async fn cmd_build(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let session = Session::open(config_path).await?;
    let snapshot = session.load_snapshot().await?;
    let (live, previous) = session.projects(&snapshot)?;

    let executor = PlanExecutor::new(&live, &previous, session.store.as_ref(), session.context());
    let artifacts = executor.build_all(&snapshot)?;
    println!("{}", formatter.format_artifacts(&artifacts));

    Ok(())
}

/// Show published outputs.
async fn cmd_output(
    config_path: Option<&PathBuf>,
    unit: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::open(config_path).await?;
    let snapshot = session.load_snapshot().await?;

    let outputs = match unit {
        Some(key) => {
            if !snapshot.units.contains_key(key) {
                return Err(PlanError::UnknownTarget {
                    target: key.to_string(),
                }
                .into());
            }
            vec![(key.to_string(), snapshot.outputs_of(key))]
        }
        None => snapshot
            .units
            .keys()
            .map(|key| (key.clone(), snapshot.outputs_of(key)))
            .collect(),
    };

    println!("{}", formatter.format_outputs(&outputs));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::open(config_path).await?;
    let store = session.store.as_ref();

    match command {
        StateCommands::Show => {
            if store.exists().await? {
                let snapshot = session.load_snapshot().await?;
                println!("{}", formatter.format_state(&snapshot));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Pull { path } => match store.read_state().await? {
            Some(content) => {
                std::fs::write(&path, content)?;
                eprintln!("State written to: {}", path.display());
            }
            None => eprintln!("No state found."),
        },
        StateCommands::Backup => match store.read_state().await? {
            Some(content) => {
                let name = format!(
                    "state.backup.{}.json",
                    chrono::Utc::now().format("%Y%m%d%H%M%S")
                );
                let path = config_dir(&session.config_file).join(name);
                std::fs::write(&path, content)?;
                eprintln!("State backed up to: {}", path.display());
            }
            None => eprintln!("No state found."),
        },
        StateCommands::Lock { holder } => {
            let holder_str = holder.as_deref().unwrap_or("");
            let lock = store.lock_state(holder_str).await?;
            eprintln!("State locked: {} (holder {})", lock.lock_id, lock.holder);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.lock_info().await? {
                    store.unlock_state(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.unlock_state(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Everything a command needs: configuration, backend and unit kinds.
struct Session {
    config_file: PathBuf,
    config: ProjectConfig,
    store: Box<dyn StateStore>,
    registry: UnitRegistry,
}

impl Session {
    /// Loads and validates the configuration, then opens the state backend.
    async fn open(config_path: Option<&PathBuf>) -> Result<Self> {
        let (config_file, config, store) = load_config_and_state(config_path).await?;
        Ok(Self {
            config_file,
            config,
            store,
            registry: UnitRegistry::with_builtin(),
        })
    }

    async fn load_snapshot(&self) -> Result<StateSnapshot> {
        StateSnapshot::load(self.store.as_ref(), &self.config.project.name).await
    }

    /// Builds the live project and the project recorded in the snapshot.
    fn projects(&self, snapshot: &StateSnapshot) -> Result<(Project, Project)> {
        let live = Project::from_config(&self.config, &self.registry)?;
        live.check_dependencies()?;
        let previous = Project::from_snapshot(snapshot, &self.registry)?;
        Ok((live, previous))
    }

    fn plan(
        &self,
        live: &Project,
        previous: &Project,
        snapshot: &StateSnapshot,
        ignore_state: bool,
        filter: &TargetFilter,
    ) -> Result<ProjectPlan> {
        let config_hash = ConfigHasher::new().hash_config(&self.config);
        let mut plan = DiffEngine::new(live, previous, snapshot)
            .ignore_state(ignore_state)
            .plan(&config_hash);

        if !filter.is_empty() {
            let known: Vec<String> = live.keys().chain(previous.keys()).cloned().collect();
            filter.check(&known)?;
            plan.retain(|key| filter.matches(key));
        }

        Ok(plan)
    }

    fn context(&self) -> ExecContext {
        ExecContext::new(config_dir(&self.config_file))
    }

    async fn lock(&self) -> Result<StateLock> {
        let lock = StateLock::acquire(self.store.as_ref(), "").await?;
        debug!("Acquired state lock {} as {}", lock.lock_id(), lock.holder());
        Ok(lock)
    }
}

/// Raises the context's interrupt flag on Ctrl-C.
fn install_interrupt_handler(ctx: &ExecContext) {
    let flag = ctx.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for running units to finish");
            flag.store(true, Ordering::SeqCst);
        }
    });
}

/// Asks a yes/no question on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("yes"))
}

/// Directory holding the configuration file.
fn config_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads configuration and creates the appropriate state store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(PathBuf, ProjectConfig, Box<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_dir = config_dir(&config_file);
    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;

    // Validate
    let validator = ConfigValidator::new();
    validator.validate(&config)?;

    // Create state store based on config
    let state_store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(stackforge::state::STATE_DIR), |p| base_dir.join(p));
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| StackforgeError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    Ok((config_file, config, state_store))
}
