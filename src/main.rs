//! Agent server entry point: environment validation, wiring, and the
//! main task set.

use cindy_agent::agent::runtime::{run_agent_loop, run_periodic_scan};
use cindy_agent::agent::{AgentDeps, AgentRegistry, load_agents};
use cindy_agent::api::{ApiState, start_admin_console};
use cindy_agent::chat::traits::UnconfiguredConnector;
use cindy_agent::chat::ChatTransport as _;
use cindy_agent::clock::Clock;
use cindy_agent::config::{Config, SCAN_INTERVAL};
use cindy_agent::media::{DescriptionBudget, build_chain};
use cindy_agent::prompt::PromptLoader;
use cindy_agent::storage::Storage;
use cindy_agent::tasks::WorkQueue;
use cindy_agent::tick::Tick;
use cindy_agent::typing::TypingState;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let level = std::env::var("CINDY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(level.to_ascii_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(error) => {
            error!(%error, "startup validation failed");
            return ExitCode::from(2);
        }
    };

    // The base prompt must exist somewhere in the config path; agents
    // cannot plan without it.
    let prompts = Arc::new(PromptLoader::new(config.config_dirs.clone()));
    if let Err(error) = prompts.load("Instructions") {
        error!(%error, "startup validation failed: the 'Instructions' prompt is required");
        return ExitCode::from(2);
    }

    let storage = match Storage::open(&config.sqlite_path()).await {
        Ok(storage) => storage,
        Err(error) => {
            error!(%error, "failed to open relational store");
            return ExitCode::from(2);
        }
    };

    // Shared media chain: curated directories from every config root in
    // front of the persistent AI cache.
    let curated: Vec<std::path::PathBuf> =
        config.config_dirs.iter().map(|dir| dir.join("media")).collect();
    let (shared_chain, _cache) = build_chain(&curated, &config.media_dir());

    let agents = match load_agents(&config, shared_chain) {
        Ok(agents) => agents,
        Err(error) => {
            error!(%error, "startup validation failed while loading agents");
            return ExitCode::from(2);
        }
    };
    if agents.is_empty() {
        info!("no agent definitions found; only the admin console will run");
    }
    let registry = Arc::new(AgentRegistry::new(agents));

    let work_queue_path = config.work_queue_path();
    let queue = match WorkQueue::load(&work_queue_path) {
        Ok(queue) => {
            info!(graphs = queue.graphs().len(), "restored work queue");
            queue.shared()
        }
        Err(error) => {
            error!(%error, "failed to load work queue snapshot");
            return ExitCode::from(2);
        }
    };

    let deps = AgentDeps {
        registry: registry.clone(),
        queue,
        typing: TypingState::new(),
        storage,
        clock: Clock::new(),
        config: config.clone(),
        prompts,
        budget: DescriptionBudget::new(),
        // The MTProto SDK binding plugs in here; without one, agents wait
        // in the authentication retry loop.
        connector: Arc::new(UnconfiguredConnector),
        work_queue_path,
    };

    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    if config.admin_console.enabled {
        let state = ApiState::new(deps.clone());
        if let Some(handle) = start_admin_console(&config.admin_console, state).await {
            tasks.push(handle);
        }
    } else {
        info!("admin console disabled");
    }

    if config.agent_loop_enabled {
        for agent in registry.all() {
            tasks.push(tokio::spawn(run_agent_loop(agent.clone(), deps.clone())));
        }
        let tick = Tick::new(deps.clone());
        tasks.push(tokio::spawn(async move { tick.run_loop().await }));
        tasks.push(tokio::spawn(run_periodic_scan(deps.clone(), SCAN_INTERVAL)));
    } else {
        info!("agent loop disabled; admin console only");
        if !config.admin_console.enabled {
            error!("both the agent loop and the admin console are disabled; nothing to run");
            return ExitCode::from(2);
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(error) => error!(%error, "failed to listen for shutdown signal"),
    }

    for task in &tasks {
        task.abort();
    }
    for agent in registry.all() {
        if let Some(transport) = agent.transport() {
            let _ = transport.disconnect().await;
        }
    }
    deps.persist_queue();
    info!("shutdown complete");
    ExitCode::SUCCESS
}
