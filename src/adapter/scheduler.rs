//! Cluster Scheduler Adapter (C3, spec §4.3).
//!
//! `JobService` plays the role the original's SAGA job service plays:
//! submit/query/cancel/kill against the batch scheduler. It deliberately
//! does *not* cover hostname resolution — spec §9 notes the original needs
//! a second, SSH-based channel for that because SAGA can't report a
//! running job's batch host; see `control_channel`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::control_channel::{parse_control_output, parse_job_id, ControlChannel, JobControlState};
use super::{HostResolution, RendererAdapter};
use crate::config::SchedulerConfig;
use crate::error::{AppError, AppResult};
use crate::formatter;
use crate::model::{RendererConfig, Session};
use crate::renderer_client::RendererClient;

/// One pre-script line (`module purge`, `module load X`, ...) plus the
/// executable invocation the job runs (spec §4.3 "Name"/"Pre-script").
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub name: String,
    pub pre_script: Vec<String>,
    pub executable: String,
    pub arguments: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub queue: String,
    pub project: String,
    pub stdout_path: String,
    pub stderr_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Pending,
    Failed,
}

/// Abstraction over the batch job service (submit/query/cancel/kill).
/// `connect` is idempotent, matching spec §4.3's "Connects lazily on first
/// use... idempotent."
#[async_trait]
pub trait JobService: Send + Sync {
    async fn connect(&self) -> AppResult<()>;
    async fn submit(&self, description: JobDescription) -> AppResult<String>;
    async fn state(&self, job_id: &str) -> AppResult<JobState>;
    /// Returns `true` once the job is confirmed cancelled.
    async fn cancel(&self, job_id: &str) -> AppResult<bool>;
    async fn kill(&self, job_id: &str) -> AppResult<()>;
}

/// Default `JobService`: shells out to the cluster's command-line tools,
/// the same family of operation the original performs through SAGA.
pub struct ShellJobService {
    config: SchedulerConfig,
}

impl ShellJobService {
    #[must_use]
    pub const fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl JobService for ShellJobService {
    async fn connect(&self) -> AppResult<()> {
        // Nothing to keep open: each call below invokes a fresh CLI
        // command. "Connect" here only validates that a service URL was
        // configured, matching spec's idempotent-connect contract.
        if self.config.service_url.is_empty() {
            return Err(AppError::Internal(
                "SLURM_SERVICE_URL is not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn submit(&self, description: JobDescription) -> AppResult<String> {
        let mut script = description.pre_script.join("\n");
        script.push('\n');
        script.push_str(&description.executable);
        for arg in &description.arguments {
            script.push(' ');
            script.push_str(arg);
        }

        let mut cmd = Command::new("sbatch");
        cmd.arg("--job-name").arg(&description.name);
        if !description.queue.is_empty() {
            cmd.arg("--partition").arg(&description.queue);
        }
        if !description.project.is_empty() {
            cmd.arg("--account").arg(&description.project);
        }
        cmd.arg("--output").arg(&description.stdout_path);
        cmd.arg("--error").arg(&description.stderr_path);
        for (k, v) in &description.environment {
            cmd.env(k, v);
        }
        cmd.arg("--wrap").arg(&script);

        let output = cmd
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("failed to invoke sbatch: {e}")))?;
        if !output.status.success() {
            return Err(AppError::SchedulerFailure(format!(
                "sbatch failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = stdout
            .split_whitespace()
            .last()
            .ok_or_else(|| AppError::Internal("sbatch produced no job id".to_string()))?;
        Ok(format!("{}-[{job_id}]", self.config.job_name_prefix))
    }

    async fn state(&self, job_id: &str) -> AppResult<JobState> {
        let numeric = parse_job_id(job_id)?;
        let output = Command::new("squeue")
            .args(["--job", &numeric, "--noheader", "--format=%T"])
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("failed to invoke squeue: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        match text.trim() {
            "" => Ok(JobState::Failed),
            "RUNNING" => Ok(JobState::Running),
            _ => Ok(JobState::Pending),
        }
    }

    async fn cancel(&self, job_id: &str) -> AppResult<bool> {
        let numeric = parse_job_id(job_id)?;
        let output = Command::new("scancel")
            .arg(&numeric)
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("failed to invoke scancel: {e}")))?;
        Ok(output.status.success())
    }

    async fn kill(&self, job_id: &str) -> AppResult<()> {
        let numeric = parse_job_id(job_id)?;
        Command::new("scancel")
            .args(["--signal=KILL", &numeric])
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("failed to invoke scancel --signal=KILL: {e}")))?;
        Ok(())
    }
}

/// C3: the cluster Scheduler Adapter. All operations serialize on
/// `guard`, matching spec §5's "one process-wide instance; all adapter
/// operations serialize on a single mutex... released on all exit paths
/// including errors."
pub struct SlurmSchedulerAdapter {
    config: SchedulerConfig,
    job_service: std::sync::Arc<dyn JobService>,
    control_channel: std::sync::Arc<dyn ControlChannel>,
    renderer_client: RendererClient,
    guard: Mutex<()>,
}

impl SlurmSchedulerAdapter {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        job_service: std::sync::Arc<dyn JobService>,
        control_channel: std::sync::Arc<dyn ControlChannel>,
        renderer_client: RendererClient,
    ) -> Self {
        Self {
            config,
            job_service,
            control_channel,
            renderer_client,
            guard: Mutex::new(()),
        }
    }
}

#[async_trait]
impl RendererAdapter for SlurmSchedulerAdapter {
    async fn submit(
        &self,
        cfg: &RendererConfig,
        session: &Session,
        extra_params: &str,
        extra_env: &str,
    ) -> AppResult<String> {
        let _held = self.guard.lock().await;
        self.job_service.connect().await?;

        let schema = format!("rest{}{}", cfg.id, session.session_id);
        let rest_parameters = formatter::format(
            &cfg.scheduler_rest_parameters_format,
            &session.http_host,
            &session.http_port.to_string(),
            &schema,
        );

        let mut arguments: Vec<String> =
            rest_parameters.split_whitespace().map(str::to_string).collect();
        if !extra_params.is_empty() {
            arguments.push(extra_params.to_string());
        }

        let mut pre_script = vec!["module purge".to_string()];
        if !self.config.default_module.is_empty() {
            pre_script.push(format!("module load {}", self.config.default_module));
        }
        for module in cfg.module_list() {
            pre_script.push(format!("module load {module}"));
        }

        let mut environment = cfg
            .env_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>();
        if !extra_env.is_empty() {
            if let Some((k, v)) = extra_env.split_once('=') {
                environment.push((k.to_string(), v.to_string()));
            }
        }

        let description = JobDescription {
            name: format!("{}{}", self.config.job_name_prefix, cfg.command_line),
            pre_script,
            executable: cfg.command_line.clone(),
            arguments,
            environment,
            queue: self.config.queue.clone(),
            project: self.config.project.clone(),
            stdout_path: format!(
                "{}{}{}",
                self.config.output_prefix, cfg.command_line, self.config.out_file
            ),
            stderr_path: format!(
                "{}{}{}",
                self.config.output_prefix, cfg.command_line, self.config.err_file
            ),
        };

        info!(renderer = %cfg.id, session = %session.session_id, "submitting cluster job");
        self.job_service.submit(description).await
    }

    async fn resolve_host(&self, handle: &str) -> AppResult<HostResolution> {
        let _held = self.guard.lock().await;
        let numeric = parse_job_id(handle)?;
        let raw = self.control_channel.show_job(&numeric).await?;
        match parse_control_output(&raw, &self.config.host_domain)? {
            JobControlState::Failed => Ok(HostResolution::Failed),
            JobControlState::Scheduled => Ok(HostResolution::Scheduled),
            JobControlState::Running { batch_host } => Ok(HostResolution::Running(batch_host)),
        }
    }

    async fn cancel(&self, cfg: &RendererConfig, session: &Session, handle: &str) -> AppResult<()> {
        let _held = self.guard.lock().await;
        self.job_service.connect().await?;

        if cfg.graceful_exit && !session.http_host.is_empty() {
            self.renderer_client
                .request_exit(&session.http_host, session.http_port)
                .await;
        }

        let cancelled = timeout(Duration::from_secs(2), self.job_service.cancel(handle))
            .await
            .unwrap_or(Ok(false))?;

        if cancelled {
            info!(job = %handle, "job cancelled");
            Ok(())
        } else {
            warn!(job = %handle, "job did not confirm cancellation within 2s");
            Err(AppError::Internal(format!("could not cancel job {handle}")))
        }
    }

    async fn kill(&self, handle: &str) -> AppResult<()> {
        let _held = self.guard.lock().await;
        self.job_service.connect().await?;
        debug!(job = %handle, "killing job as cancel fallback");
        self.job_service.kill(handle).await
    }

    /// Mirrors the original `JobManager.job_information` debugging helper:
    /// raw `scontrol show job` text, best-effort. Never fails the caller —
    /// an unreachable control channel or malformed handle just yields `None`.
    async fn job_info(&self, handle: &str) -> AppResult<Option<String>> {
        let _held = self.guard.lock().await;
        let Ok(numeric) = parse_job_id(handle) else {
            return Ok(None);
        };
        match self.control_channel.show_job(&numeric).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) => {
                debug!(job = %handle, error = %e, "job_info unavailable");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    struct MockJobService {
        submit_result: AppResult<String>,
        cancel_result: bool,
    }

    #[async_trait]
    impl JobService for MockJobService {
        async fn connect(&self) -> AppResult<()> {
            Ok(())
        }
        async fn submit(&self, _description: JobDescription) -> AppResult<String> {
            match &self.submit_result {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(AppError::SchedulerFailure("mock failure".to_string())),
            }
        }
        async fn state(&self, _job_id: &str) -> AppResult<JobState> {
            Ok(JobState::Running)
        }
        async fn cancel(&self, _job_id: &str) -> AppResult<bool> {
            Ok(self.cancel_result)
        }
        async fn kill(&self, _job_id: &str) -> AppResult<()> {
            Ok(())
        }
    }

    struct MockControlChannel {
        output: String,
    }

    #[async_trait]
    impl ControlChannel for MockControlChannel {
        async fn show_job(&self, _job_id_numeric: &str) -> AppResult<String> {
            Ok(self.output.clone())
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            username: "user".into(),
            password: "pass".into(),
            host: "head.cluster".into(),
            host_domain: ".cluster.example".into(),
            service_url: "https://head.cluster".into(),
            queue: "viz".into(),
            project: "proj".into(),
            default_module: "viz/1.0".into(),
            job_name_prefix: "rrm-".into(),
            output_prefix: "/out/".into(),
            out_file: ".out".into(),
            err_file: ".err".into(),
        }
    }

    fn test_cfg() -> RendererConfig {
        RendererConfig {
            id: "rtneuron".to_string(),
            command_line: "rtneuron-service".to_string(),
            environment_variables: "FOO=bar".to_string(),
            modules: "rtneuron/1.0".to_string(),
            process_rest_parameters_format: String::new(),
            scheduler_rest_parameters_format: "--rest ${rest_hostname}:${rest_port}".to_string(),
            graceful_exit: true,
            wait_until_running: false,
        }
    }

    fn test_session() -> Session {
        Session::new(
            uuid::Uuid::new_v4(),
            "alice".to_string(),
            "rtneuron".to_string(),
            chrono::Utc::now(),
            chrono::Duration::seconds(60),
        )
    }

    #[tokio::test]
    async fn submit_returns_job_id_on_success() {
        let job_service = Arc::new(MockJobService {
            submit_result: Ok("rrm-[42]".to_string()),
            cancel_result: true,
        });
        let control_channel = Arc::new(MockControlChannel { output: String::new() });
        let client = RendererClient::new(Duration::from_millis(100));
        let adapter =
            SlurmSchedulerAdapter::new(test_config(), job_service, control_channel, client);

        let job_id = adapter
            .submit(&test_cfg(), &test_session(), "", "")
            .await
            .unwrap();
        assert_eq!(job_id, "rrm-[42]");
    }

    #[tokio::test]
    async fn resolve_host_running_returns_host() {
        let job_service = Arc::new(MockJobService {
            submit_result: Ok("rrm-[42]".to_string()),
            cancel_result: true,
        });
        let control_channel = Arc::new(MockControlChannel {
            output: "JobState=RUNNING BatchHost=node01".to_string(),
        });
        let client = RendererClient::new(Duration::from_millis(100));
        let adapter =
            SlurmSchedulerAdapter::new(test_config(), job_service, control_channel, client);

        let res = adapter.resolve_host("rrm-[42]").await.unwrap();
        assert_eq!(res, HostResolution::Running("node01.cluster.example".to_string()));
    }

    #[tokio::test]
    async fn resolve_host_failed_maps_to_failed_variant() {
        let job_service = Arc::new(MockJobService {
            submit_result: Ok("rrm-[42]".to_string()),
            cancel_result: true,
        });
        let control_channel = Arc::new(MockControlChannel {
            output: "JobState=FAILED".to_string(),
        });
        let client = RendererClient::new(Duration::from_millis(100));
        let adapter =
            SlurmSchedulerAdapter::new(test_config(), job_service, control_channel, client);

        let res = adapter.resolve_host("rrm-[42]").await.unwrap();
        assert_eq!(res, HostResolution::Failed);
    }

    #[tokio::test]
    async fn cancel_fails_when_job_service_reports_not_cancelled() {
        let job_service = Arc::new(MockJobService {
            submit_result: Ok("rrm-[42]".to_string()),
            cancel_result: false,
        });
        let control_channel = Arc::new(MockControlChannel { output: String::new() });
        let client = RendererClient::new(Duration::from_millis(100));
        let adapter =
            SlurmSchedulerAdapter::new(test_config(), job_service, control_channel, client);

        let mut session = test_session();
        session.http_host = String::new();
        let err = adapter
            .cancel(&test_cfg(), &session, "rrm-[42]")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn job_info_returns_raw_control_channel_output() {
        let job_service = Arc::new(MockJobService {
            submit_result: Ok("rrm-[42]".to_string()),
            cancel_result: true,
        });
        let control_channel = Arc::new(MockControlChannel {
            output: "JobState=RUNNING BatchHost=node01".to_string(),
        });
        let client = RendererClient::new(Duration::from_millis(100));
        let adapter =
            SlurmSchedulerAdapter::new(test_config(), job_service, control_channel, client);

        let info = adapter.job_info("rrm-[42]").await.unwrap();
        assert_eq!(info, Some("JobState=RUNNING BatchHost=node01".to_string()));
    }

    #[tokio::test]
    async fn job_info_is_none_for_malformed_handle() {
        let job_service = Arc::new(MockJobService {
            submit_result: Ok("rrm-[42]".to_string()),
            cancel_result: true,
        });
        let control_channel = Arc::new(MockControlChannel { output: String::new() });
        let client = RendererClient::new(Duration::from_millis(100));
        let adapter =
            SlurmSchedulerAdapter::new(test_config(), job_service, control_channel, client);

        assert!(adapter.job_info("not-a-job-id").await.unwrap().is_none());
    }

    #[test]
    fn mutex_guard_unused_warning_silenced() {
        // Keeps StdMutex import used if test set changes; placeholder to
        // document that `guard` above is a tokio::sync::Mutex, not std's.
        let _m: StdMutex<()> = StdMutex::new(());
    }
}
