use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use weft_core::config::AppConfig;
use weft_core::execution::{ExecutionOptions, ExecutionUpdate};
use weft_core::traits::AgentStore;
use weft_core::workflow::{Agent, Workflow};
use weft_engine::{BlockChecker, ExecutorRegistry, WorkflowEngine};
use weft_gateway::{DailyLimiter, GatewayServer};
use weft_store::SqliteStore;
use weft_tools::{ConfigCredentials, ToolInvoker, ToolRegistry};

#[derive(Parser)]
#[command(name = "weft", version, about = "Workflow execution engine for AI agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket/HTTP execution gateway
    Serve,
    /// Run a workflow file once and print the API response
    Run {
        /// Workflow JSON file
        workflow: PathBuf,
        /// Trigger input as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
        /// User the run executes as (selects stored credentials)
        #[arg(long, default_value = "local")]
        user: String,
        /// Workflow goal handed to the block checker
        #[arg(long)]
        goal: Option<String>,
        /// Verify each block with the checker model
        #[arg(long)]
        checker: bool,
        /// Model used by the checker
        #[arg(long)]
        checker_model: Option<String>,
    },
    /// Check a workflow file without running it
    Validate {
        /// Workflow JSON file
        workflow: PathBuf,
    },
    /// Store an agent (with its workflow) in the database
    Import {
        /// Agent JSON file
        agent: PathBuf,
        /// Override the owning user
        #[arg(long)]
        user: Option<String>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "weft", &mut std::io::stdout());
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { workflow } => {
            let config = load_config(&cli.config)?;
            let workflow = read_workflow(&workflow)?;
            let engine = build_engine(&config)?;
            let plan = engine.validate(&workflow)?;
            println!(
                "Workflow {} is valid: {} blocks, {} connections",
                workflow.id,
                plan.order.len(),
                workflow.connections.len()
            );
        }
        Commands::Import { agent, user } => {
            let config = load_config(&cli.config)?;
            let text = std::fs::read_to_string(&agent)?;
            let mut agent: Agent = serde_json::from_str(&text)?;
            if let Some(user) = user {
                agent.user_id = user;
            }
            if let Some(workflow) = &agent.workflow {
                build_engine(&config)?.validate(workflow)?;
            }
            let store = open_store(&config)?;
            let saved = store.save_agent(agent).await?;
            println!(
                "Imported agent {} for {} (workflow version {})",
                saved.id,
                saved.user_id,
                saved.workflow.as_ref().map(|w| w.version).unwrap_or(0)
            );
        }
        Commands::Run {
            workflow,
            input,
            user,
            goal,
            checker,
            checker_model,
        } => {
            let config = load_config(&cli.config)?;
            let workflow = read_workflow(&workflow)?;
            let mut input: Map<String, Value> = serde_json::from_str(&input)?;
            input.insert(weft_core::USER_ID_KEY.to_string(), Value::String(user));
            let options = ExecutionOptions {
                workflow_goal: goal,
                enable_block_checker: checker,
                checker_model_id: checker_model,
                ..ExecutionOptions::default()
            };
            run_once(&config, &workflow, input, options).await?;
        }
        Commands::Serve => {
            let config = load_config(&cli.config)?;
            let engine = Arc::new(build_engine(&config)?);
            let store = Arc::new(open_store(&config)?);
            info!(bind = %config.gateway.bind, "Starting execution gateway");

            let server = GatewayServer::new(config.gateway.clone(), engine, store.clone())
                .with_executions(store)
                .with_limiter(Arc::new(DailyLimiter::new(config.limits.max_executions_per_day)));

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = AppConfig::default_path().filter(|p| p.exists()) {
        info!(path = %home.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&home)?);
    }
    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create weft.toml");
    Ok(AppConfig::from_env())
}

fn read_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let text = std::fs::read_to_string(path)?;
    Ok(Workflow::from_json(&text)?)
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    let path = config.store_path();
    info!(path = %path.display(), "Opening store");
    Ok(SqliteStore::open(&path)?)
}

/// Model client, tools with config-backed credentials, executors, and checker.
fn build_engine(config: &AppConfig) -> anyhow::Result<WorkflowEngine> {
    let llm = weft_llm::build_client(config)?;

    let tools = ToolRegistry::with_builtins();
    info!(tools = tools.list().len(), "Tool registry ready");
    let invoker = ToolInvoker::new(Arc::new(tools))
        .with_credentials(Arc::new(ConfigCredentials::new(config.credentials.clone())));

    let registry = ExecutorRegistry::with_defaults(llm.clone(), invoker, config.model.clone(), &config.engine);
    let checker = BlockChecker::new(llm, &config.model, &config.engine.checker);

    Ok(WorkflowEngine::new(Arc::new(registry), config.engine.clone()).with_checker(checker))
}

async fn run_once(
    config: &AppConfig,
    workflow: &Workflow,
    input: Map<String, Value>,
    options: ExecutionOptions,
) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let execution_id = uuid::Uuid::new_v4().to_string();
    let options = ExecutionOptions {
        execution_id: Some(execution_id.clone()),
        ..options
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let (tx, mut rx) = mpsc::channel::<ExecutionUpdate>(config.engine.update_buffer.max(1));
    let printer = async {
        while let Some(update) = rx.recv().await {
            match &update.error {
                Some(error) => eprintln!("[{}] {}: {}", update.block_id, status_label(&update), error),
                None => eprintln!("[{}] {}", update.block_id, status_label(&update)),
            }
        }
    };

    let started = std::time::Instant::now();
    let (result, ()) = tokio::join!(engine.execute(workflow, input, tx, options, cancel), printer);
    let result = result?;
    let duration_ms = started.elapsed().as_millis() as u64;

    let response = engine.build_api_response(&result, workflow, &execution_id, duration_ms);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn status_label(update: &ExecutionUpdate) -> String {
    format!("{:?}", update.status).to_lowercase()
}
