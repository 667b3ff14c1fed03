//! Hostname resolution via an out-of-band control channel (spec §9).
//!
//! The original relies on `sshpass`/`ssh`/`scontrol show job` because the
//! SAGA job service it uses for submission cannot report a running job's
//! batch host. The abstract contract kept here is exactly what spec §9
//! describes: "an implementation may use native cluster APIs if available."
//! `SshControlChannel` is the default, shelling out the same way the
//! original does; anything implementing the trait (e.g. a future native
//! client) can be substituted without touching the scheduler adapter.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::error::{AppError, AppResult};

/// Abstraction over "ask the cluster head what's going on with this job".
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Raw `scontrol show job <id>`-equivalent output for `job_id_numeric`.
    async fn show_job(&self, job_id_numeric: &str) -> AppResult<String>;
}

fn job_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-\[(\w+)\]").expect("static regex is valid"))
}

/// Extracts the bracketed numeric job id from an opaque scheduler job id
/// (spec §9's "Job id parsing" design note). A malformed job id is an
/// `Internal` error, never silently swallowed.
pub fn parse_job_id(job_id: &str) -> AppResult<String> {
    job_id_regex()
        .captures(job_id)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AppError::Internal(format!("malformed job id: {job_id}")))
}

fn job_state_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"JobState=(\w+)").expect("static regex is valid"))
}

fn batch_host_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"BatchHost=(\w+)").expect("static regex is valid"))
}

/// Parsed `scontrol show job` fields relevant to hostname resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobControlState {
    Running { batch_host: String },
    Scheduled,
    Failed,
}

/// Parses the raw `scontrol show job` text into a `JobControlState`, then
/// appends the configured domain suffix if the batch host is running and
/// bare (spec §4.3 `resolve_host`).
pub fn parse_control_output(output: &str, host_domain: &str) -> AppResult<JobControlState> {
    let state = job_state_regex()
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| AppError::Internal("scontrol output missing JobState".to_string()))?;

    if state == "FAILED" {
        return Ok(JobControlState::Failed);
    }
    if state != "RUNNING" {
        return Ok(JobControlState::Scheduled);
    }

    let mut batch_host = batch_host_regex()
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AppError::Internal("scontrol output missing BatchHost".to_string()))?;

    if !host_domain.is_empty() && !batch_host.contains(host_domain) {
        batch_host.push_str(host_domain);
    }
    Ok(JobControlState::Running { batch_host })
}

/// Default control channel: shells out to `sshpass`/`ssh`/`scontrol`,
/// matching the original implementation's mechanics (spec §9).
pub struct SshControlChannel {
    config: SchedulerConfig,
}

impl SshControlChannel {
    #[must_use]
    pub const fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ControlChannel for SshControlChannel {
    async fn show_job(&self, job_id_numeric: &str) -> AppResult<String> {
        debug!(job = %job_id_numeric, host = %self.config.host, "querying job state over ssh");

        let target = format!("{}@{}", self.config.username, self.config.host);
        let output = Command::new("sshpass")
            .args([
                "-p",
                &self.config.password,
                "ssh",
                &target,
                "scontrol",
                "show",
                "job",
                job_id_numeric,
            ])
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("failed to run ssh control channel: {e}")))?;

        if !output.status.success() {
            return Err(AppError::Internal(format!(
                "control channel exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_job_id_extracts_bracketed_number() {
        assert_eq!(parse_job_id("rrm-[1234]").unwrap(), "1234");
    }

    #[test]
    fn parse_job_id_rejects_malformed_input() {
        assert!(parse_job_id("not-a-job-id").is_err());
    }

    #[test]
    fn parse_control_output_running_appends_domain() {
        let out = "JobState=RUNNING BatchHost=node07";
        let state = parse_control_output(out, ".cluster.example").unwrap();
        assert_eq!(
            state,
            JobControlState::Running {
                batch_host: "node07.cluster.example".to_string()
            }
        );
    }

    #[test]
    fn parse_control_output_running_keeps_fqdn_as_is() {
        let out = "JobState=RUNNING BatchHost=node07.cluster.example";
        let state = parse_control_output(out, ".cluster.example").unwrap();
        assert_eq!(
            state,
            JobControlState::Running {
                batch_host: "node07.cluster.example".to_string()
            }
        );
    }

    #[test]
    fn parse_control_output_scheduled() {
        let out = "JobState=PENDING";
        assert_eq!(parse_control_output(out, "").unwrap(), JobControlState::Scheduled);
    }

    #[test]
    fn parse_control_output_failed() {
        let out = "JobState=FAILED";
        assert_eq!(parse_control_output(out, "").unwrap(), JobControlState::Failed);
    }

    #[test]
    fn parse_control_output_missing_state_is_internal_error() {
        assert!(parse_control_output("no state here", "").is_err());
    }
}
