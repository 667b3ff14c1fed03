//! Process configuration loaded from environment variables (spec §6).
//!
//! Follows the teacher's `Config::from_env()` convention: no config
//! framework, just `std::env::var` with documented defaults and
//! `anyhow::Context` on the variables that are genuinely required.

use std::time::Duration;

use anyhow::{Context, Result};

/// Cluster scheduler connection and job-shape settings (recognized
/// environment variables listed in spec §6).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub host_domain: String,
    pub service_url: String,
    pub queue: String,
    pub project: String,
    pub default_module: String,
    pub job_name_prefix: String,
    pub output_prefix: String,
    pub out_file: String,
    pub err_file: String,
}

impl SchedulerConfig {
    /// Loads every `SLURM_*` variable. Credentials and the service URL are
    /// not required at startup so the daemon can still start in
    /// process-only (no cluster) deployments; they are only needed once a
    /// cluster-backed session is actually scheduled.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            username: std::env::var("SLURM_USERNAME").unwrap_or_default(),
            password: std::env::var("SLURM_PASSWORD").unwrap_or_default(),
            host: std::env::var("SLURM_HOST").unwrap_or_default(),
            host_domain: std::env::var("SLURM_HOST_DOMAIN").unwrap_or_default(),
            service_url: std::env::var("SLURM_SERVICE_URL").unwrap_or_default(),
            queue: std::env::var("SLURM_QUEUE").unwrap_or_default(),
            project: std::env::var("SLURM_PROJECT").unwrap_or_default(),
            default_module: std::env::var("SLURM_DEFAULT_MODULE").unwrap_or_default(),
            job_name_prefix: std::env::var("SLURM_JOB_NAME_PREFIX").unwrap_or_default(),
            output_prefix: std::env::var("SLURM_OUTPUT_PREFIX").unwrap_or_default(),
            out_file: std::env::var("SLURM_OUT_FILE").unwrap_or_else(|_| ".out".to_string()),
            err_file: std::env::var("SLURM_ERR_FILE").unwrap_or_else(|_| ".err".to_string()),
        })
    }
}

/// Timeouts, intervals and the HTTP bind address for a running daemon
/// (spec §6's recognized environment variables, plus the ambient bits
/// needed to actually serve the REST surface).
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub scheduler: SchedulerConfig,

    /// `REQUEST_TIMEOUT` — seconds for renderer probes.
    pub request_timeout: Duration,

    /// `KEEP_ALIVE_TIMEOUT` — default session idle horizon.
    pub keep_alive_timeout: Duration,

    /// `KEEP_ALIVE_POLL_INTERVAL` — sweeper period. Spec §4.6 fixes this at
    /// 5 seconds; kept configurable for tests, defaulting to that value.
    pub keep_alive_poll_interval: Duration,

    /// HTTP boundary bind address, e.g. `0.0.0.0:8080`. Ambient: not named
    /// by spec.md, needed to actually run the service.
    pub bind_address: String,

    /// Path to the sqlite database file for the durable store backend.
    /// Ambient: the persistence backend choice (spec §9) is left to the
    /// deployer; `None` selects the in-memory store.
    pub database_path: Option<String>,
}

impl ProcessConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            scheduler: SchedulerConfig::from_env().context("failed to load scheduler config")?,
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT", 5)),
            keep_alive_timeout: Duration::from_secs(env_u64("KEEP_ALIVE_TIMEOUT", 1000)),
            keep_alive_poll_interval: Duration::from_secs(env_u64("KEEP_ALIVE_POLL_INTERVAL", 5)),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_path: std::env::var("DATABASE_PATH").ok(),
        })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u64_falls_back_to_default_when_unset() {
        std::env::remove_var("RRM_TEST_NONEXISTENT_VAR");
        assert_eq!(env_u64("RRM_TEST_NONEXISTENT_VAR", 42), 42);
    }

    #[test]
    fn env_u64_parses_set_value() {
        std::env::set_var("RRM_TEST_PARSE_VAR", "77");
        assert_eq!(env_u64("RRM_TEST_PARSE_VAR", 1), 77);
        std::env::remove_var("RRM_TEST_PARSE_VAR");
    }
}
