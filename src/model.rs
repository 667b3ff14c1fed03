//! Data model (spec §3): `RendererConfig`, `Session`, `SessionStatus`,
//! `GlobalPolicy`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Max length enforced on every bounded string field of `RendererConfig`,
/// except `id` which is capped at 50 per spec §3.
const MAX_FIELD_LEN: usize = 4096;
const MAX_ID_LEN: usize = 50;
const MAX_COMMAND_LINE_LEN: usize = 1024;

/// Persisted, reusable template describing how to launch one kind of
/// renderer (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererConfig {
    pub id: String,
    pub command_line: String,
    #[serde(default)]
    pub environment_variables: String,
    #[serde(default)]
    pub modules: String,
    #[serde(default)]
    pub process_rest_parameters_format: String,
    #[serde(default)]
    pub scheduler_rest_parameters_format: String,
    #[serde(default = "default_true")]
    pub graceful_exit: bool,
    /// Open question in spec.md §9: not in the original persisted schema.
    /// Added as a first-class column, default `false` (see DESIGN.md).
    #[serde(default)]
    pub wait_until_running: bool,
}

const fn default_true() -> bool {
    true
}

impl RendererConfig {
    /// Validates field-length invariants enforced at write (spec §3).
    pub fn validate(&self) -> AppResult<()> {
        if self.id.is_empty() || self.id.len() > MAX_ID_LEN {
            return Err(AppError::InvalidArgument(format!(
                "renderer config id must be 1..={MAX_ID_LEN} chars, got {}",
                self.id.len()
            )));
        }
        if self.command_line.len() > MAX_COMMAND_LINE_LEN {
            return Err(AppError::InvalidArgument(format!(
                "command_line exceeds {MAX_COMMAND_LINE_LEN} chars"
            )));
        }
        for (name, value) in [
            ("environment_variables", &self.environment_variables),
            ("modules", &self.modules),
            (
                "process_rest_parameters_format",
                &self.process_rest_parameters_format,
            ),
            (
                "scheduler_rest_parameters_format",
                &self.scheduler_rest_parameters_format,
            ),
        ] {
            if value.len() > MAX_FIELD_LEN {
                return Err(AppError::InvalidArgument(format!(
                    "{name} exceeds {MAX_FIELD_LEN} chars"
                )));
            }
        }
        Ok(())
    }

    /// Module names to load on the cluster (whitespace-separated per spec §3).
    pub fn module_list(&self) -> Vec<&str> {
        self.modules.split_whitespace().collect()
    }

    /// `K=V` environment pairs (whitespace-separated per spec §3).
    pub fn env_pairs(&self) -> Vec<(&str, &str)> {
        self.environment_variables
            .split_whitespace()
            .filter_map(|pair| pair.split_once('='))
            .collect()
    }
}

/// Session lifecycle status (spec §4.5). Ordering here mirrors the state
/// graph's natural progression; `RUNNING`/`BUSY` is the only cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduling,
    Scheduled,
    GettingHostname,
    Starting,
    Running,
    Busy,
    Stopping,
    Stopped,
    Failed,
}

impl SessionStatus {
    /// Human-readable status text, mirrors the original's `status_as_string`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduling => "Scheduling",
            Self::Scheduled => "Scheduled",
            Self::GettingHostname => "Getting hostname",
            Self::Starting | Self::Running => "Running",
            Self::Busy => "Busy",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
        }
    }

    /// A terminal state admits no further mutation except deletion
    /// (spec §3 invariant).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

/// How a session's renderer process is hosted: a cluster job, a local
/// process, or neither (only valid in `Stopped`/`Scheduling`) — spec §3
/// invariant "exactly one of (job_id set, process_pid >= 0, neither)".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    Job(String),
    Process(i64),
    None,
}

/// A runtime instance of a renderer allocated for a client (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub owner: String,
    pub configuration_id: String,
    pub status: SessionStatus,
    pub placement: Placement,
    pub http_host: String,
    pub http_port: u16,
    pub created: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Session {
    /// Constructs a freshly-created session in `SCHEDULING` with no
    /// placement and host/port unset, as `create_session` does (spec
    /// §4.5 step 2).
    pub fn new(
        session_id: Uuid,
        owner: String,
        configuration_id: String,
        now: DateTime<Utc>,
        keep_alive_timeout: chrono::Duration,
    ) -> Self {
        Self {
            session_id,
            owner,
            configuration_id,
            status: SessionStatus::Scheduling,
            placement: Placement::None,
            http_host: String::new(),
            http_port: 0,
            created: now,
            valid_until: now + keep_alive_timeout,
        }
    }

    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        match &self.placement {
            Placement::Job(id) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn process_pid(&self) -> Option<i64> {
        match self.placement {
            Placement::Process(pid) => Some(pid),
            _ => None,
        }
    }
}

/// Single-row global configuration (spec §3, §4.7). `id` is always 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalPolicy {
    pub session_creation_enabled: bool,
    pub keep_alive_timeout_secs: i64,
}

impl GlobalPolicy {
    pub const ID: i64 = 0;

    #[must_use]
    pub const fn new(keep_alive_timeout_secs: i64) -> Self {
        Self {
            session_creation_enabled: true,
            keep_alive_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(id: &str) -> RendererConfig {
        RendererConfig {
            id: id.to_string(),
            command_line: "rtneuron".to_string(),
            environment_variables: String::new(),
            modules: String::new(),
            process_rest_parameters_format: String::new(),
            scheduler_rest_parameters_format: String::new(),
            graceful_exit: true,
            wait_until_running: false,
        }
    }

    #[test]
    fn validate_rejects_overlong_id() {
        let c = cfg(&"x".repeat(51));
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_id() {
        let c = cfg("");
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_config() {
        assert!(cfg("rtneuron").validate().is_ok());
    }

    #[test]
    fn env_pairs_parses_whitespace_separated_kv() {
        let mut c = cfg("rtneuron");
        c.environment_variables = "A=1 B=2".to_string();
        assert_eq!(c.env_pairs(), vec![("A", "1"), ("B", "2")]);
    }

    #[test]
    fn module_list_splits_whitespace() {
        let mut c = cfg("rtneuron");
        c.modules = "viz rtneuron/1.0".to_string();
        assert_eq!(c.module_list(), vec!["viz", "rtneuron/1.0"]);
    }

    #[test]
    fn status_text_matches_original_mapping() {
        assert_eq!(SessionStatus::Starting.as_str(), "Running");
        assert_eq!(SessionStatus::Running.as_str(), "Running");
        assert_eq!(SessionStatus::Busy.as_str(), "Busy");
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Stopped.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
    }
}
