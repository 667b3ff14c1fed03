//! Keep-Alive Sweeper (C6, spec §4.6).
//!
//! Structured the same way the reaper task is: `tokio::spawn` plus
//! `tokio::time::interval`, snapshotting expired ids under one lock
//! acquisition before acting on them. Detached — the returned `JoinHandle`
//! is not awaited by the caller, so it never blocks shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

pub struct Sweeper {
    engine: Arc<Engine>,
    period: Duration,
}

impl Sweeper {
    #[must_use]
    pub const fn new(engine: Arc<Engine>, period: Duration) -> Self {
        Self { engine, period }
    }

    /// One sweep: sessions with `valid_until < now` at sweep start are
    /// deleted. A session whose `valid_until` is bumped mid-sweep by a
    /// concurrent `keep_alive` is simply not in the snapshot the next
    /// sweep takes, satisfying spec §8's invariant 6.
    async fn sweep_once(&self) {
        let now = chrono::Utc::now();
        let expired = match self.engine.expired_sessions(now).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "sweeper failed to list expired sessions");
                return;
            }
        };

        if expired.is_empty() {
            return;
        }

        debug!(count = expired.len(), "sweeper deleting expired sessions");
        for session in expired {
            if let Err(e) = self.engine.delete_session(session.session_id).await {
                warn!(session_id = %session.session_id, error = %e, "sweeper failed to delete session");
            }
        }
    }

    /// Starts the background sweep loop. Period is fixed at 5 seconds by
    /// spec §4.6; kept configurable here for tests.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{HostResolution, RendererAdapter};
    use crate::engine::AdapterKind;
    use crate::error::AppResult;
    use crate::model::{RendererConfig, Session};
    use crate::renderer_client::RendererClient;
    use crate::store::memory::{MemoryConfigStore, MemoryPolicyStore, MemorySessionStore};
    use crate::store::{ConfigStore, SessionStore};
    use async_trait::async_trait;

    struct NoopAdapter;

    #[async_trait]
    impl RendererAdapter for NoopAdapter {
        async fn submit(&self, _cfg: &RendererConfig, _session: &Session, _p: &str, _e: &str) -> AppResult<String> {
            Ok("1-[1]".to_string())
        }
        async fn resolve_host(&self, _handle: &str) -> AppResult<HostResolution> {
            Ok(HostResolution::Scheduled)
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
            command_line: "x".to_string(),
            environment_variables: String::new(),
            modules: String::new(),
            process_rest_parameters_format: String::new(),
            scheduler_rest_parameters_format: String::new(),
            graceful_exit: false,
            wait_until_running: false,
        }
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_sessions() {
        let config_store = Arc::new(MemoryConfigStore::new());
        config_store.create(test_cfg()).await.unwrap();
        let session_store = Arc::new(MemorySessionStore::new());
        let policy_store = Arc::new(MemoryPolicyStore::new(60));
        let engine = Arc::new(Engine::new(
            config_store,
            session_store.clone(),
            policy_store,
            Arc::new(NoopAdapter),
            AdapterKind::Scheduler,
            RendererClient::new(Duration::from_millis(100)),
        ));

        let now = chrono::Utc::now();
        let expired = Session::new(
            uuid::Uuid::new_v4(),
            "alice".to_string(),
            "rtneuron".to_string(),
            now - chrono::Duration::seconds(120),
            chrono::Duration::seconds(1),
        );
        let fresh = Session::new(
            uuid::Uuid::new_v4(),
            "bob".to_string(),
            "rtneuron".to_string(),
            now,
            chrono::Duration::seconds(3600),
        );
        session_store.insert(expired.clone()).await.unwrap();
        session_store.insert(fresh.clone()).await.unwrap();

        let sweeper = Sweeper::new(engine, Duration::from_secs(5));
        sweeper.sweep_once().await;

        assert!(session_store.get(expired.session_id).await.is_err());
        assert!(session_store.get(fresh.session_id).await.is_ok());
    }
}
