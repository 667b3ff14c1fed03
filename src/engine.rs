//! Session Engine (C5, spec §4.5) — the heart of the system.
//!
//! Owns the per-session state machine and composes the Config Store, the
//! Session Store, the renderer adapter (cluster or local-process, whichever
//! was wired in at construction) and the Global Policy. Every public
//! operation here returns `AppResult`, never an opaque error, matching
//! spec §7's propagation policy.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapter::{HostResolution, RendererAdapter};
use crate::error::{AppError, AppResult};
use crate::model::{Placement, RendererConfig, Session, SessionStatus};
use crate::renderer_client::{RendererClient, VocabularyProbe};
use crate::store::{ConfigStore, PolicyStore, SessionStore};

/// First ephemeral port handed to a newly-scheduled session; wraps back to
/// this value after `PORT_RANGE` allocations. Ambient — not named by the
/// distilled spec, needed because a cluster job must be told which port to
/// bind to before its batch host is even known.
const PORT_BASE: u16 = 20000;
const PORT_RANGE: u16 = 10000;

/// Which kind of handle this engine's adapter produces, so `schedule` knows
/// how to wrap the returned string into a `Placement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Scheduler,
    Process,
}

/// Response record returned by `query_status` (spec §4.5/§6).
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusView {
    pub session_id: Uuid,
    pub status_code: u16,
    pub status_text: String,
    pub hostname: String,
    pub port: u16,
}

pub struct Engine {
    config_store: Arc<dyn ConfigStore>,
    session_store: Arc<dyn SessionStore>,
    policy_store: Arc<dyn PolicyStore>,
    adapter: Arc<dyn RendererAdapter>,
    adapter_kind: AdapterKind,
    renderer_client: RendererClient,
    next_port: AtomicU16,
}

impl Engine {
    #[must_use]
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        session_store: Arc<dyn SessionStore>,
        policy_store: Arc<dyn PolicyStore>,
        adapter: Arc<dyn RendererAdapter>,
        adapter_kind: AdapterKind,
        renderer_client: RendererClient,
    ) -> Self {
        Self {
            config_store,
            session_store,
            policy_store,
            adapter,
            adapter_kind,
            renderer_client,
            next_port: AtomicU16::new(PORT_BASE),
        }
    }

    fn allocate_port(&self) -> u16 {
        let offset = self.next_port.fetch_add(1, Ordering::Relaxed) - PORT_BASE;
        PORT_BASE + (offset % PORT_RANGE)
    }

    /// `create_session` (spec §4.5) followed immediately by `schedule` with
    /// no extra parameters/environment — the REST surface (§6) exposes a
    /// single creation call, so the two-step engine contract is driven
    /// back-to-back here rather than across two client round-trips.
    pub async fn create_session(
        &self,
        session_id: Uuid,
        owner: String,
        configuration_id: String,
    ) -> AppResult<SessionStatusView> {
        let policy = self.policy_store.get().await?;
        if !policy.session_creation_enabled {
            return Err(AppError::Forbidden("session creation is suspended".to_string()));
        }

        // Fail fast on an unknown configuration rather than persisting a
        // row that can never schedule (the data model invariant requires
        // configuration_id to reference an existing RendererConfig).
        self.config_store.get(&configuration_id.to_lowercase()).await?;

        let now = Utc::now();
        let session = Session::new(
            session_id,
            owner,
            configuration_id,
            now,
            chrono::Duration::seconds(policy.keep_alive_timeout_secs),
        );
        self.session_store.insert(session).await?;
        info!(%session_id, "session created");

        match self.schedule(session_id, "", "").await {
            Ok(view) => Ok(view),
            Err(e) => {
                warn!(%session_id, error = %e, "schedule failed after create");
                Err(e)
            }
        }
    }

    /// `schedule(session_id, extra_params, extra_env)` (spec §4.5).
    pub async fn schedule(
        &self,
        session_id: Uuid,
        extra_params: &str,
        extra_env: &str,
    ) -> AppResult<SessionStatusView> {
        let current = self.session_store.get(session_id).await?;
        if current.status != SessionStatus::Scheduling {
            // Already advanced by a concurrent caller; accept as a no-op
            // per spec §5's linearizability rule.
            return Ok(self.view_of(&current, 200));
        }

        let cfg = self
            .config_store
            .get(&current.configuration_id.to_lowercase())
            .await?;

        let mut submitting = current.clone();
        submitting.http_port = self.allocate_port();

        let submit_result = self
            .adapter
            .submit(&cfg, &submitting, extra_params, extra_env)
            .await;

        match submit_result {
            Ok(handle) => {
                let port = submitting.http_port;
                let kind = self.adapter_kind;
                let updated = self
                    .session_store
                    .update(
                        session_id,
                        Box::new(move |s: &mut Session| {
                            if s.status != SessionStatus::Scheduling {
                                return Ok(());
                            }
                            s.http_port = port;
                            s.placement = match kind {
                                AdapterKind::Scheduler => Placement::Job(handle.clone()),
                                AdapterKind::Process => Placement::Process(
                                    handle.parse().unwrap_or(-1),
                                ),
                            };
                            s.status = SessionStatus::Scheduled;
                            Ok(())
                        }),
                    )
                    .await?;
                info!(%session_id, "job/process submitted, session scheduled");
                Ok(self.view_of(&updated, 200))
            }
            Err(e) => {
                error!(%session_id, error = %e, "submission failed, marking session failed");
                let updated = self
                    .session_store
                    .update(
                        session_id,
                        Box::new(|s: &mut Session| {
                            if !s.status.is_terminal() {
                                s.status = SessionStatus::Failed;
                            }
                            Ok(())
                        }),
                    )
                    .await?;
                let _ = self.view_of(&updated, 500);
                Err(e)
            }
        }
    }

    fn view_of(&self, session: &Session, status_code: u16) -> SessionStatusView {
        SessionStatusView {
            session_id: session.session_id,
            status_code,
            status_text: session.status.as_str().to_string(),
            hostname: session.http_host.clone(),
            port: session.http_port,
        }
    }

    fn handle_of(session: &Session) -> AppResult<String> {
        match &session.placement {
            Placement::Job(id) => Ok(id.clone()),
            Placement::Process(pid) => Ok(pid.to_string()),
            Placement::None => Err(AppError::Internal(format!(
                "session {} has no placement handle",
                session.session_id
            ))),
        }
    }

    /// `query_status(session_id)` (spec §4.5): advances at most one stage
    /// per call, never skips states.
    pub async fn query_status(&self, session_id: Uuid) -> AppResult<SessionStatusView> {
        let session = self.session_store.get(session_id).await?;

        match session.status {
            SessionStatus::Scheduling | SessionStatus::Stopping | SessionStatus::Stopped => {
                Ok(self.view_of(&session, 200))
            }
            SessionStatus::Scheduled | SessionStatus::GettingHostname => {
                self.advance_host_discovery(session).await
            }
            SessionStatus::Starting => self.advance_starting(session).await,
            SessionStatus::Running | SessionStatus::Busy => self.probe_health(session).await,
            SessionStatus::Failed => Ok(self.view_of(&session, 200)),
        }
    }

    async fn advance_host_discovery(&self, session: Session) -> AppResult<SessionStatusView> {
        let handle = Self::handle_of(&session)?;
        let resolution = self.adapter.resolve_host(&handle).await;

        let resolution = match resolution {
            Ok(r) => r,
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "resolve_host transport error");
                return Ok(self.view_of(&session, 503));
            }
        };

        match resolution {
            HostResolution::Failed => {
                let updated = self.mark_failed(session.session_id).await?;
                Ok(self.view_of(&updated, 200))
            }
            HostResolution::Scheduled => {
                let session_id = session.session_id;
                let updated = self
                    .session_store
                    .update(
                        session_id,
                        Box::new(|s: &mut Session| {
                            if s.status == SessionStatus::Scheduled {
                                s.status = SessionStatus::GettingHostname;
                            }
                            Ok(())
                        }),
                    )
                    .await?;
                Ok(self.view_of(&updated, 200))
            }
            HostResolution::Running(host) => {
                let session_id = session.session_id;
                let updated = self
                    .session_store
                    .update(
                        session_id,
                        Box::new(move |s: &mut Session| {
                            if s.status == SessionStatus::Scheduled || s.status == SessionStatus::GettingHostname {
                                s.http_host = host.clone();
                                s.status = SessionStatus::Starting;
                            }
                            Ok(())
                        }),
                    )
                    .await?;
                info!(%session_id, host = %updated.http_host, "batch host resolved");
                Ok(self.view_of(&updated, 200))
            }
        }
    }

    async fn advance_starting(&self, session: Session) -> AppResult<SessionStatusView> {
        let cfg = self
            .config_store
            .get(&session.configuration_id.to_lowercase())
            .await?;

        if !cfg.wait_until_running {
            let session_id = session.session_id;
            let updated = self
                .session_store
                .update(
                    session_id,
                    Box::new(|s: &mut Session| {
                        if s.status == SessionStatus::Starting {
                            s.status = SessionStatus::Running;
                        }
                        Ok(())
                    }),
                )
                .await?;
            return Ok(self.view_of(&updated, 200));
        }

        self.probe_health(session).await
    }

    async fn probe_health(&self, session: Session) -> AppResult<SessionStatusView> {
        let probe = self
            .renderer_client
            .request_vocabulary(&session.http_host, session.http_port)
            .await;

        match probe {
            VocabularyProbe::Ready => {
                let policy = self.policy_store.get().await?;
                let session_id = session.session_id;
                let updated = self
                    .session_store
                    .update(
                        session_id,
                        Box::new(move |s: &mut Session| {
                            if matches!(s.status, SessionStatus::Starting | SessionStatus::Busy | SessionStatus::Running) {
                                s.status = SessionStatus::Running;
                            }
                            let now = Utc::now();
                            if now >= s.valid_until {
                                s.valid_until = now + chrono::Duration::seconds(policy.keep_alive_timeout_secs);
                            }
                            Ok(())
                        }),
                    )
                    .await?;
                Ok(self.view_of(&updated, 200))
            }
            VocabularyProbe::Gone => {
                let session_id = session.session_id;
                let updated = self
                    .session_store
                    .update(
                        session_id,
                        Box::new(|s: &mut Session| {
                            if !s.status.is_terminal() {
                                s.status = SessionStatus::Stopped;
                            }
                            Ok(())
                        }),
                    )
                    .await?;
                warn!(%session_id, "renderer endpoint gone, job has been cancelled");
                Ok(self.view_of(&updated, 200))
            }
            VocabularyProbe::Busy => {
                let session_id = session.session_id;
                let updated = self
                    .session_store
                    .update(
                        session_id,
                        Box::new(|s: &mut Session| {
                            if s.status == SessionStatus::Running {
                                s.status = SessionStatus::Busy;
                            }
                            Ok(())
                        }),
                    )
                    .await?;
                Ok(self.view_of(&updated, 503))
            }
        }
    }

    async fn mark_failed(&self, session_id: Uuid) -> AppResult<Session> {
        self.session_store
            .update(
                session_id,
                Box::new(|s: &mut Session| {
                    if !s.status.is_terminal() {
                        s.status = SessionStatus::Failed;
                    }
                    Ok(())
                }),
            )
            .await
    }

    /// `delete_session(session_id)` (spec §4.5): best-effort stop, always
    /// removes the row. The source's dead code after its early `return` is
    /// not reproduced here — this is the canonical single path.
    pub async fn delete_session(&self, session_id: Uuid) -> AppResult<()> {
        let session = self
            .session_store
            .update(
                session_id,
                Box::new(|s: &mut Session| {
                    s.status = SessionStatus::Stopping;
                    Ok(())
                }),
            )
            .await?;

        if session.placement != Placement::None {
            if let Ok(handle) = Self::handle_of(&session) {
                let cfg = self
                    .config_store
                    .get(&session.configuration_id.to_lowercase())
                    .await
                    .ok();

                let cancelled = match &cfg {
                    Some(cfg) => self.adapter.cancel(cfg, &session, &handle).await,
                    None => Err(AppError::Internal(
                        "configuration missing, skipping graceful cancel".to_string(),
                    )),
                };

                if let Err(e) = cancelled {
                    warn!(%session_id, error = %e, "cancel failed, falling back to kill");
                    if let Err(e) = self.adapter.kill(&handle).await {
                        error!(%session_id, error = %e, "kill also failed");
                    }
                }
            }
        }

        self.session_store.delete(session_id).await?;
        info!(%session_id, "session deleted");
        Ok(())
    }

    /// `keep_alive(session_id)` (spec §4.5): extends `valid_until`, never
    /// advances status. A no-op in a terminal state (spec §3 invariant).
    pub async fn keep_alive(&self, session_id: Uuid) -> AppResult<()> {
        let policy = self.policy_store.get().await?;
        self.session_store
            .update(
                session_id,
                Box::new(move |s: &mut Session| {
                    if s.status.is_terminal() {
                        return Ok(());
                    }
                    s.valid_until = Utc::now() + chrono::Duration::seconds(policy.keep_alive_timeout_secs);
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn list_sessions(&self) -> AppResult<Vec<Session>> {
        self.session_store.list().await
    }

    /// Sessions past their keep-alive horizon as of `now` (spec §4.6).
    pub async fn expired_sessions(&self, now: DateTime<Utc>) -> AppResult<Vec<Session>> {
        self.session_store.expired_before(now).await
    }

    pub async fn create_config(&self, cfg: RendererConfig) -> AppResult<()> {
        cfg.validate()?;
        self.config_store.create(cfg).await
    }

    pub async fn update_config(&self, cfg: RendererConfig) -> AppResult<()> {
        cfg.validate()?;
        self.config_store.update(cfg).await
    }

    pub async fn delete_config(&self, id: &str) -> AppResult<()> {
        self.config_store.delete(&id.to_lowercase()).await
    }

    pub async fn get_config(&self, id: &str) -> AppResult<RendererConfig> {
        self.config_store.get(&id.to_lowercase()).await
    }

    pub async fn list_configs(&self) -> AppResult<Vec<RendererConfig>> {
        self.config_store.list().await
    }

    pub async fn suspend(&self) -> AppResult<bool> {
        let policy = self.policy_store.set_creation_enabled(false).await?;
        Ok(policy.session_creation_enabled)
    }

    pub async fn resume(&self) -> AppResult<bool> {
        let policy = self.policy_store.set_creation_enabled(true).await?;
        Ok(policy.session_creation_enabled)
    }

    pub async fn policy(&self) -> AppResult<crate::model::GlobalPolicy> {
        self.policy_store.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryConfigStore, MemoryPolicyStore, MemorySessionStore};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubAdapter {
        resolution: HostResolution,
    }

    #[async_trait]
    impl RendererAdapter for StubAdapter {
        async fn submit(
            &self,
            _cfg: &RendererConfig,
            _session: &Session,
            _extra_params: &str,
            _extra_env: &str,
        ) -> AppResult<String> {
            Ok("99-[99]".to_string())
        }

        async fn resolve_host(&self, _handle: &str) -> AppResult<HostResolution> {
            Ok(self.resolution.clone())
        }

        async fn cancel(&self, _cfg: &RendererConfig, _session: &Session, _handle: &str) -> AppResult<()> {
            Ok(())
        }

        async fn kill(&self, _handle: &str) -> AppResult<()> {
            Ok(())
        }

        async fn job_info(&self, _handle: &str) -> AppResult<Option<String>> {
            Ok(None)
        }
    }

    fn test_cfg() -> RendererConfig {
        RendererConfig {
            id: "rtneuron".to_string(),
            command_line: "rtneuron-service".to_string(),
            environment_variables: String::new(),
            modules: String::new(),
            process_rest_parameters_format: String::new(),
            scheduler_rest_parameters_format: "--rest ${rest_hostname}:${rest_port}".to_string(),
            graceful_exit: false,
            wait_until_running: false,
        }
    }

    async fn build_engine(resolution: HostResolution) -> Engine {
        let config_store = Arc::new(MemoryConfigStore::new());
        config_store.create(test_cfg()).await.unwrap();
        let session_store = Arc::new(MemorySessionStore::new());
        let policy_store = Arc::new(MemoryPolicyStore::new(60));
        let adapter = Arc::new(StubAdapter { resolution });
        let client = RendererClient::new(Duration::from_millis(100));
        Engine::new(
            config_store,
            session_store,
            policy_store,
            adapter,
            AdapterKind::Scheduler,
            client,
        )
    }

    #[tokio::test]
    async fn create_session_then_schedule_reaches_scheduled() {
        let engine = build_engine(HostResolution::Scheduled).await;
        let id = Uuid::new_v4();
        let view = engine
            .create_session(id, "alice".to_string(), "rtneuron".to_string())
            .await
            .unwrap();
        assert_eq!(view.status_text, "Scheduled");
    }

    #[tokio::test]
    async fn create_session_forbidden_when_suspended() {
        let engine = build_engine(HostResolution::Scheduled).await;
        engine.suspend().await.unwrap();
        let err = engine
            .create_session(Uuid::new_v4(), "alice".to_string(), "rtneuron".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn create_session_rejects_unknown_configuration() {
        let engine = build_engine(HostResolution::Scheduled).await;
        let err = engine
            .create_session(Uuid::new_v4(), "alice".to_string(), "missing".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_status_advances_scheduled_to_getting_hostname() {
        let engine = build_engine(HostResolution::Scheduled).await;
        let id = Uuid::new_v4();
        engine
            .create_session(id, "alice".to_string(), "rtneuron".to_string())
            .await
            .unwrap();
        let view = engine.query_status(id).await.unwrap();
        assert_eq!(view.status_text, "Getting hostname");
    }

    #[tokio::test]
    async fn query_status_advances_to_starting_once_host_running() {
        let engine = build_engine(HostResolution::Running("node01".to_string())).await;
        let id = Uuid::new_v4();
        engine
            .create_session(id, "alice".to_string(), "rtneuron".to_string())
            .await
            .unwrap();
        let view = engine.query_status(id).await.unwrap();
        assert_eq!(view.status_text, "Running");
        assert_eq!(view.hostname, "node01");
    }

    #[tokio::test]
    async fn query_status_marks_failed_on_job_failure() {
        let engine = build_engine(HostResolution::Failed).await;
        let id = Uuid::new_v4();
        engine
            .create_session(id, "alice".to_string(), "rtneuron".to_string())
            .await
            .unwrap();
        let view = engine.query_status(id).await.unwrap();
        assert_eq!(view.status_text, "Failed");
    }

    #[tokio::test]
    async fn delete_session_removes_row() {
        let engine = build_engine(HostResolution::Running("node01".to_string())).await;
        let id = Uuid::new_v4();
        engine
            .create_session(id, "alice".to_string(), "rtneuron".to_string())
            .await
            .unwrap();
        engine.delete_session(id).await.unwrap();
        let err = engine.query_status(id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn keep_alive_extends_valid_until() {
        let engine = build_engine(HostResolution::Scheduled).await;
        let id = Uuid::new_v4();
        engine
            .create_session(id, "alice".to_string(), "rtneuron".to_string())
            .await
            .unwrap();
        let before = engine.session_store.get(id).await.unwrap().valid_until;
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.keep_alive(id).await.unwrap();
        let after = engine.session_store.get(id).await.unwrap().valid_until;
        assert!(after >= before);
    }
}
