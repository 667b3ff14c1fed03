//! Local Process Adapter (C4, spec §4.4).
//!
//! "Same shape as C3 but manages a locally forked child" — no scheduler,
//! no SSH control channel: the process is forked directly and `localhost`
//! is the only host it can ever resolve to. Grounded on the teacher's
//! `backend/jail.rs` spawn-with-piped-stdio idiom, minus the sandboxing
//! (out of scope here) and stdin piping (renderers take no stdin program).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{HostResolution, RendererAdapter};
use crate::error::{AppError, AppResult};
use crate::formatter;
use crate::model::{RendererConfig, Session};
use crate::renderer_client::RendererClient;

/// C4: forks and tracks renderer processes on the local host.
pub struct ProcessAdapter {
    renderer_client: RendererClient,
    children: Mutex<HashMap<i64, Child>>,
}

impl ProcessAdapter {
    #[must_use]
    pub fn new(renderer_client: RendererClient) -> Self {
        Self {
            renderer_client,
            children: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RendererAdapter for ProcessAdapter {
    async fn submit(
        &self,
        cfg: &RendererConfig,
        session: &Session,
        extra_params: &str,
        extra_env: &str,
    ) -> AppResult<String> {
        let schema = format!("rest{}{}", cfg.id, session.session_id);
        let rest_parameters = formatter::format(
            &cfg.process_rest_parameters_format,
            &session.http_host,
            &session.http_port.to_string(),
            &schema,
        );

        let mut arguments: Vec<String> =
            rest_parameters.split_whitespace().map(str::to_string).collect();
        if !extra_params.is_empty() {
            arguments.push(extra_params.to_string());
        }

        let mut cmd = Command::new(&cfg.command_line);
        cmd.args(&arguments);
        for (k, v) in cfg.env_pairs() {
            cmd.env(k, v);
        }
        if !extra_env.is_empty() {
            if let Some((k, v)) = extra_env.split_once('=') {
                cmd.env(k, v);
            }
        }

        let out_file = format!("{}-{}.out", cfg.id, session.session_id);
        let err_file = format!("{}-{}.err", cfg.id, session.session_id);
        if let Ok(file) = File::create(&out_file).await {
            cmd.stdout(file.into_std().await);
        } else {
            cmd.stdout(Stdio::null());
        }
        if let Ok(file) = File::create(&err_file).await {
            cmd.stderr(file.into_std().await);
        } else {
            cmd.stderr(Stdio::null());
        }
        cmd.stdin(Stdio::null());

        let child = cmd
            .spawn()
            .map_err(|e| AppError::Internal(format!("failed to spawn {}: {e}", cfg.command_line)))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::Internal("spawned child has no pid".to_string()))?;

        info!(renderer = %cfg.id, session = %session.session_id, pid, "forked local renderer process");
        self.children.lock().await.insert(i64::from(pid), child);
        Ok(pid.to_string())
    }

    async fn resolve_host(&self, handle: &str) -> AppResult<HostResolution> {
        let pid: i64 = handle
            .parse()
            .map_err(|_| AppError::Internal(format!("malformed process handle: {handle}")))?;

        let mut children = self.children.lock().await;
        let Some(child) = children.get_mut(&pid) else {
            return Ok(HostResolution::Failed);
        };
        match child.try_wait() {
            Ok(None) => Ok(HostResolution::Running("localhost".to_string())),
            Ok(Some(status)) => {
                debug!(pid, %status, "local renderer process already exited");
                Ok(HostResolution::Failed)
            }
            Err(e) => Err(AppError::Internal(format!("failed to poll process {pid}: {e}"))),
        }
    }

    async fn cancel(&self, cfg: &RendererConfig, session: &Session, handle: &str) -> AppResult<()> {
        if cfg.graceful_exit && !session.http_host.is_empty() {
            self.renderer_client
                .request_exit(&session.http_host, session.http_port)
                .await;
        }

        let pid: i64 = handle
            .parse()
            .map_err(|_| AppError::Internal(format!("malformed process handle: {handle}")))?;

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let exited = {
                let mut children = self.children.lock().await;
                match children.get_mut(&pid) {
                    None => true,
                    Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                }
            };
            if exited {
                self.children.lock().await.remove(&pid);
                info!(pid, "local renderer process exited after graceful request");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(pid, "local renderer process did not exit within 2s of graceful request");
                return Err(AppError::Internal(format!(
                    "process {pid} did not exit after graceful request"
                )));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn kill(&self, handle: &str) -> AppResult<()> {
        let pid: i64 = handle
            .parse()
            .map_err(|_| AppError::Internal(format!("malformed process handle: {handle}")))?;

        let mut children = self.children.lock().await;
        if let Some(mut child) = children.remove(&pid) {
            debug!(pid, "killing local renderer process as cancel fallback");
            child
                .start_kill()
                .map_err(|e| AppError::Internal(format!("failed to kill process {pid}: {e}")))?;
        }
        Ok(())
    }

    /// No remote stderr file or control channel to read locally; reports
    /// only whether the pid is still tracked as running.
    async fn job_info(&self, handle: &str) -> AppResult<Option<String>> {
        let Ok(pid) = handle.parse::<i64>() else {
            return Ok(None);
        };
        let children = self.children.lock().await;
        Ok(children.get(&pid).map(|_| format!("pid {pid} running locally")))
    }
}
