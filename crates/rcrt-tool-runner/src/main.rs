/*!
 * RCRT Tool Runner
 *
 * Hosts executable tools behind the breadcrumb bus: publishes the
 * workspace catalog, consumes tool.request.v1 breadcrumbs, executes, and
 * publishes tool.response.v1 with at-most-once semantics per requestId.
 */

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rcrt_client::{RcrtClient, SecretManager};
use rcrt_core::journal::DedupJournal;
use rcrt_core::RcrtError;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use rcrt_tool_runner::config::Config;
use rcrt_tool_runner::registry::ToolRegistry;
use rcrt_tool_runner::runner::ToolRunner;
use rcrt_tool_runner::tools;

#[derive(Parser)]
#[command(name = "rcrt-tool-runner", about = "RCRT tool execution service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the tool runner
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

    /// Log filter, e.g. info or rcrt_tool_runner=debug
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
        .unwrap_or_else(|| "rcrt_tool_runner=info,rcrt_client=info".to_string());
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
    info!("🚀 RCRT Tool Runner starting...");
    info!("   Store: {}", config.base_url);
    info!("   Workspace: {}", config.workspace);

    let client = Arc::new(
        RcrtClient::connect(&config.base_url, &config.owner_id, &config.agent_id).await?,
    );
    client.start_token_renewal();

    let journal = Arc::new(DedupJournal::open(&config.journal_path, config.retention_hours)?);
    info!("✅ journal loaded ({} live entries)", journal.len());

    let secrets = SecretManager::new(client.clone(), config.secret_bootstrap_from_env);

    let registry = Arc::new(ToolRegistry::new());
    if config.enable_builtin_tools {
        tools::register_builtins(&registry);
        info!("✅ built-in tools registered");
    }
    if config.enable_langchain_tools {
        match &config.proxy_url {
            Some(proxy_url) => {
                match tools::external::load(&client, &config.workspace, proxy_url).await {
                    Ok(loaded) => {
                        info!("✅ {} external tool(s) loaded", loaded.len());
                        for tool in loaded {
                            registry.register(tool);
                        }
                    }
                    Err(e) => warn!("external tool load failed, continuing without: {}", e),
                }
            }
            None => warn!("ENABLE_LANGCHAIN_TOOLS set but RCRT_PROXY_URL missing, skipping"),
        }
    }

    if registry.is_empty() {
        return Err(RcrtError::ConfigMissing("no tools registered".into()).into());
    }

    let runner = ToolRunner::new(client, registry, secrets, journal, config);
    runner.run().await?;
    Ok(())
}
