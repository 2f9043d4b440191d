use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use agenterm_core::{ConfigStore, Store};
use agenterm_orchestrator::agent::AgentClient;
use agenterm_orchestrator::{NullAgentClient, OrchestratorEngine, SidecarAgentClient, SidecarConfig};
use agenterm_runtime::SessionManager;
use agenterm_server::{serve, AppState};
use agenterm_types::{OrchestratorProfile, Project};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "agenterm-engine")]
#[command(about = "Headless AgenTerm backend engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the REST/SSE server.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 4700)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
        #[arg(long, env = "AGENTERM_API_TOKEN")]
        api_token: Option<String>,
    },
    /// Register a project row against an existing git repository.
    InitProject {
        name: String,
        repo_path: String,
        #[arg(long, default_value = "stub")]
        provider: String,
        #[arg(long, default_value = "stub-model")]
        model: String,
    },
    /// Run one orchestrator invocation against an existing project and print the reply.
    Run {
        #[arg(long)]
        project_id: Uuid,
        prompt: String,
    },
    /// Apply any pending schema migrations to the state directory and exit.
    Migrate {
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
            api_token,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let state = build_state(&state_dir, api_token).await?;
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            log_startup_paths(&state_dir, &addr);
            serve(addr, state).await?;
        }
        Command::InitProject {
            name,
            repo_path,
            provider,
            model,
        } => {
            let state_dir = resolve_state_dir(None);
            let store = Store::new(state_dir.join("state")).await?;
            let profile = OrchestratorProfile {
                provider,
                model,
                api_base: String::new(),
                max_parallel: 1,
            };
            let project = Project::new(name, repo_path, profile);
            store.create_project(&project).await?;
            println!("{}", project.id);
        }
        Command::Run { project_id, prompt } => {
            let state_dir = resolve_state_dir(None);
            let state = build_state(&state_dir, None).await?;
            let reply = state.engine.invoke(project_id, &prompt).await?;
            println!("{reply}");
        }
        Command::Migrate { state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let report = agenterm_core::migrate(&state_dir).await?;
            if report.applied.is_empty() {
                println!(
                    "state dir already at schema version {} (no pending migrations)",
                    report.to_version
                );
            } else {
                println!(
                    "migrated state dir from schema version {} to {} (applied: {:?})",
                    report.from_version, report.to_version, report.applied
                );
            }
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("AGENTERM_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    agenterm_core::default_state_dir()
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let config_path = state_dir.join("config.json");
    info!("starting agenterm-engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={} config_path={}",
        exe.display(),
        cwd.display(),
        state_dir.display(),
        config_path.display()
    );
}

async fn build_state(state_dir: &PathBuf, api_token: Option<String>) -> anyhow::Result<AppState> {
    let migration_report = agenterm_core::migrate(state_dir).await?;
    if !migration_report.applied.is_empty() {
        info!(applied = ?migration_report.applied, "applied pending schema migrations");
    }
    let store = Arc::new(Store::new(state_dir.join("state")).await?);
    let config = Arc::new(ConfigStore::new(state_dir.join("config.json")).await?);
    let engine_config = config.get().await;

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        engine_config.timeouts.clone(),
        engine_config.scrollback_lines,
    ));
    let agent: Arc<dyn AgentClient> = match engine_config.sidecar_url {
        Some(base_url) => Arc::new(SidecarAgentClient::new(SidecarConfig {
            base_url,
            ..Default::default()
        })),
        None => Arc::new(NullAgentClient),
    };
    let engine = Arc::new(OrchestratorEngine::new(store.clone(), sessions.clone(), agent));

    spawn_reclassify_ticker(store.clone(), sessions.clone());

    Ok(AppState::new(store, sessions, engine, config, api_token))
}

/// Periodically sweeps every project's sessions through
/// [`SessionManager::reclassify_all`] so sessions age from `working` into
/// `idle`/`waiting`/`stalled` even when nothing else touches them.
fn spawn_reclassify_ticker(store: Arc<Store>, sessions: Arc<SessionManager>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let projects = match store.list_projects().await {
                Ok(projects) => projects,
                Err(err) => {
                    tracing::warn!(%err, "reclassify ticker failed to list projects");
                    continue;
                }
            };
            for project in projects {
                if let Err(err) = sessions.reclassify_all(project.id).await {
                    tracing::warn!(project_id = %project.id, %err, "failed to reclassify sessions");
                }
            }
        }
    });
}
