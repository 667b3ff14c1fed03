//! Scheduler Adapter (C3) and Process Adapter (C4) — spec §4.3/§4.4.
//!
//! Both share one contract, `RendererAdapter`, matching spec §4.4's "Same
//! shape as C3 but manages a locally forked child." The Session Engine
//! holds exactly one adapter instance for the whole process (cluster mode
//! or local-process mode are deployment choices, not per-session ones —
//! the data model's "exactly one of job_id/process_pid" invariant records
//! which kind a given session ended up with).

pub mod control_channel;
pub mod process;
pub mod scheduler;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::model::{RendererConfig, Session};

/// Result of asking the adapter to resolve a job/process handle to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResolution {
    /// The renderer is running and reachable at this hostname.
    Running(String),
    /// Scheduled/forked but not yet running.
    Scheduled,
    /// The job/process no longer exists or is in a failed terminal state.
    Failed,
}

/// Shared contract for submitting, resolving, and tearing down a renderer
/// instance, whether it lives on the batch cluster (C3) or as a local
/// child process (C4).
#[async_trait]
pub trait RendererAdapter: Send + Sync {
    /// Submits the renderer described by `cfg` for `session`, returning an
    /// opaque handle (`job_id` for the cluster, stringified `pid` locally).
    /// `extra_params`/`extra_env` are caller-supplied additions appended
    /// after the formatted REST parameters / configured environment
    /// (spec §4.3).
    async fn submit(
        &self,
        cfg: &RendererConfig,
        session: &Session,
        extra_params: &str,
        extra_env: &str,
    ) -> AppResult<String>;

    /// Resolves `handle` to its current placement (spec §4.3 `resolve_host`).
    async fn resolve_host(&self, handle: &str) -> AppResult<HostResolution>;

    /// Gracefully stops the renderer: issues `EXIT` first if
    /// `cfg.graceful_exit`, then cancels the job/process, waiting up to 2
    /// seconds for it to disappear (spec §4.3 `cancel`).
    async fn cancel(&self, cfg: &RendererConfig, session: &Session, handle: &str) -> AppResult<()>;

    /// Best-effort hard kill, used only after a failed `cancel`
    /// (spec §4.3 `kill`).
    async fn kill(&self, handle: &str) -> AppResult<()>;

    /// Best-effort debugging aid — not part of the lifecycle state machine
    /// and never required for correctness. Returns `None` rather than an
    /// error when no information is available, matching the narrow,
    /// best-effort contract this is meant to have.
    async fn job_info(&self, handle: &str) -> AppResult<Option<String>>;
}
