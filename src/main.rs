//! Rendering Resource Manager daemon.
//!
//! Brokers interactive rendering sessions against a batch-scheduled
//! compute cluster, or against locally forked processes in `--local` mode.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rendering_resource_manager::adapter::control_channel::SshControlChannel;
use rendering_resource_manager::adapter::process::ProcessAdapter;
use rendering_resource_manager::adapter::scheduler::{ShellJobService, SlurmSchedulerAdapter};
use rendering_resource_manager::adapter::RendererAdapter;
use rendering_resource_manager::config::ProcessConfig;
use rendering_resource_manager::engine::{AdapterKind, Engine};
use rendering_resource_manager::http;
use rendering_resource_manager::policy;
use rendering_resource_manager::renderer_client::RendererClient;
use rendering_resource_manager::store::memory::{MemoryConfigStore, MemoryPolicyStore, MemorySessionStore};
use rendering_resource_manager::store::sqlite::{SqliteConfigStore, SqliteHandle, SqlitePolicyStore, SqliteSessionStore};
use rendering_resource_manager::store::{ConfigStore, PolicyStore, SessionStore};
use rendering_resource_manager::sweeper::Sweeper;

#[derive(Parser, Debug)]
#[command(name = "rendering-resource-manager")]
#[command(about = "Control plane for brokering interactive rendering sessions on a batch cluster")]
struct Args {
    /// Manage renderers as locally forked processes instead of cluster jobs.
    #[arg(long)]
    local: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ProcessConfig::from_env().context("failed to load process configuration")?;
    info!(bind_address = %config.bind_address, local_mode = args.local, "loaded configuration");

    let renderer_client = RendererClient::new(config.request_timeout);

    let (config_store, session_store, policy_store): (
        Arc<dyn ConfigStore>,
        Arc<dyn SessionStore>,
        Arc<dyn PolicyStore>,
    ) = match &config.database_path {
        Some(path) => {
            info!(%path, "using sqlite store");
            let handle = SqliteHandle::open(path)
                .await
                .context("failed to open sqlite database")?;
            (
                Arc::new(SqliteConfigStore::new(handle.clone())),
                Arc::new(SqliteSessionStore::new(handle.clone())),
                Arc::new(SqlitePolicyStore::new(
                    handle,
                    config.keep_alive_timeout.as_secs() as i64,
                )),
            )
        }
        None => {
            info!("using in-memory store");
            (
                Arc::new(MemoryConfigStore::new()),
                Arc::new(MemorySessionStore::new()),
                Arc::new(MemoryPolicyStore::new(config.keep_alive_timeout.as_secs() as i64)),
            )
        }
    };

    let (adapter, adapter_kind): (Arc<dyn RendererAdapter>, AdapterKind) = if args.local {
        (Arc::new(ProcessAdapter::new(renderer_client.clone())), AdapterKind::Process)
    } else {
        let job_service = Arc::new(ShellJobService::new(config.scheduler.clone()));
        let control_channel = Arc::new(SshControlChannel::new(config.scheduler.clone()));
        (
            Arc::new(SlurmSchedulerAdapter::new(
                config.scheduler.clone(),
                job_service,
                control_channel,
                renderer_client.clone(),
            )),
            AdapterKind::Scheduler,
        )
    };

    // Ensure the policy row exists (spec §3: "created lazily at service
    // start if absent").
    policy::get(policy_store.as_ref()).await?;

    let engine = Arc::new(Engine::new(
        config_store,
        session_store,
        policy_store,
        adapter,
        adapter_kind,
        renderer_client,
    ));

    let sweeper = Arc::new(Sweeper::new(engine.clone(), config.keep_alive_poll_interval));
    let _sweeper_handle = sweeper.start();

    let router = http::build_router(engine);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;

    info!(address = %config.bind_address, "listening");
    axum::serve(listener, router)
        .await
        .context("http server terminated unexpectedly")?;

    Ok(())
}
