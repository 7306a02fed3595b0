/*!
 * RCRT Agent Runner
 *
 * Loads agent.def.v1 definitions from the workspace and runs one worker
 * per agent: subscriptions feed a bounded context window, the LLM's
 * structured reply becomes breadcrumbs, and nested tool requests round-trip
 * over the bus.
 */

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rcrt_agent_runner::config::Config;
use rcrt_agent_runner::definition;
use rcrt_agent_runner::llm::OpenRouterClient;
use rcrt_agent_runner::worker::AgentWorker;
use rcrt_client::{RcrtClient, SecretManager, SecretResolution};
use rcrt_core::journal::DedupJournal;
use rcrt_core::models::{RequiredSecret, SecretScope};
use rcrt_core::RcrtError;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "rcrt-agent-runner", about = "RCRT agent execution service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the agent runner
    Start(StartArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Workspace tag to serve (overrides WORKSPACE)
    #[arg(long)]
    workspace: Option<String>,

    /// Breadcrumb store base URL (overrides RCRT_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Log filter, e.g. info or rcrt_agent_runner=debug
    #[arg(long)]
    log_level: Option<String>,

    /// Dedup journal retention in hours (overrides JOURNAL_RETENTION_HOURS)
    #[arg(long)]
    retention_hours: Option<i64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Start(args) => start(args).await,
    }
}

async fn start(args: StartArgs) -> ExitCode {
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| "rcrt_agent_runner=info,rcrt_client=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&log_level)
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            let code = e
                .downcast_ref::<RcrtError>()
                .map(|re| re.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn load_config(args: &StartArgs) -> Result<Config, RcrtError> {
    let mut config = Config::from_env()?;
    if let Some(workspace) = &args.workspace {
        config.workspace = workspace.clone();
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(retention) = args.retention_hours {
        if retention <= 0 {
            return Err(RcrtError::Validation("--retention-hours must be positive".into()));
        }
        config.retention_hours = retention;
    }
    Ok(config)
}

async fn run(config: Config) -> Result<()> {
    info!("🚀 RCRT Agent Runner starting...");
    info!("   Store: {}", config.base_url);
    info!("   Workspace: {}", config.workspace);

    let client = Arc::new(
        RcrtClient::connect(&config.base_url, &config.owner_id, &config.agent_id).await?,
    );
    client.start_token_renewal();

    let journal = Arc::new(DedupJournal::open(&config.journal_path, config.retention_hours)?);
    info!("✅ journal loaded ({} live entries)", journal.len());

    let secrets = SecretManager::new(client.clone(), config.secret_bootstrap_from_env);

    // The LLM key flows through the secret manager; the environment is only
    // consulted on the explicit one-time bootstrap path.
    let llm_secret = RequiredSecret {
        name: config.llm_secret_name.clone(),
        scope_type: SecretScope::Global,
        scope_id: None,
    };
    let api_key = match secrets.ensure(&llm_secret, config.agent_scope_id()).await? {
        SecretResolution::Found(secret_ref) => secret_ref,
        SecretResolution::Missing => {
            secrets
                .emit_config_request(&config.workspace, "agent-runner", &[llm_secret.clone()])
                .await?;
            return Err(RcrtError::ConfigMissing(format!(
                "llm secret '{}' is not provisioned",
                config.llm_secret_name
            ))
            .into());
        }
    };
    info!("✅ LLM secret resolved ({})", api_key.name);

    let llm = Arc::new(OpenRouterClient::new(
        &config.llm_base_url,
        secrets.clone(),
        api_key,
        config.llm_referer.clone(),
        config.llm_site_title.clone(),
    )?);

    let agents = definition::load_all(&client, &config.workspace).await?;
    if agents.is_empty() {
        return Err(RcrtError::ConfigMissing(format!(
            "no agent.def.v1 breadcrumbs in {}",
            config.workspace
        ))
        .into());
    }
    info!("✅ {} agent definition(s) loaded", agents.len());

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    for agent in agents {
        info!("   - {} (def {})", agent.definition.name, agent.definition_id);
        let worker = AgentWorker::new(
            client.clone(),
            llm.clone(),
            journal.clone(),
            agent.definition,
            config.workspace.clone(),
        );
        let token = cancel.child_token();
        let name = worker.name().to_string();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!("agent '{}' exited with error: {}", name, e);
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| RcrtError::Fatal(format!("signal handler failed: {}", e)))?;
    info!("🛑 shutdown requested, draining agents...");
    cancel.cancel();

    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("shutdown grace elapsed, aborting remaining agents");
    }

    info!("💚 agent runner stopped cleanly");
    Ok(())
}
