//! In-memory store implementations. Used by default for tests, and as a
//! lightweight production option when `DATABASE_PATH` is unset (spec §9:
//! "an in-memory map for tests and a durable backend").

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ConfigStore, PolicyStore, SessionMutator, SessionStore};
use crate::error::{AppError, AppResult};
use crate::model::{GlobalPolicy, RendererConfig, Session};

/// Guarded by a single mutex: every operation takes an exclusive lock for
/// its duration, which trivially satisfies the "no partially-written row
/// observable" and "atomic read-modify-write" requirements of spec §4.1/§5.
#[derive(Default)]
pub struct MemoryConfigStore {
    rows: Mutex<HashMap<String, RendererConfig>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn create(&self, cfg: RendererConfig) -> AppResult<()> {
        cfg.validate()?;
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&cfg.id) {
            return Err(AppError::Conflict(format!("config '{}' already exists", cfg.id)));
        }
        rows.insert(cfg.id.clone(), cfg);
        Ok(())
    }

    async fn update(&self, cfg: RendererConfig) -> AppResult<()> {
        cfg.validate()?;
        let mut rows = self.rows.lock().await;
        if !rows.contains_key(&cfg.id) {
            return Err(AppError::NotFound(format!("config '{}' not found", cfg.id)));
        }
        rows.insert(cfg.id.clone(), cfg);
        Ok(())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        let mut rows = self.rows.lock().await;
        rows.remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("config '{id}' not found")))
    }

    async fn get(&self, id: &str) -> AppResult<RendererConfig> {
        let rows = self.rows.lock().await;
        rows.get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("config '{id}' not found")))
    }

    async fn list(&self) -> AppResult<Vec<RendererConfig>> {
        let rows = self.rows.lock().await;
        let mut out: Vec<_> = rows.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn clear(&self) -> AppResult<()> {
        self.rows.lock().await.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    rows: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: Session) -> AppResult<()> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&session.session_id) {
            return Err(AppError::Conflict(format!(
                "session '{}' already exists",
                session.session_id
            )));
        }
        rows.insert(session.session_id, session);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Session> {
        let rows = self.rows.lock().await;
        rows.get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session '{id}' not found")))
    }

    async fn update(&self, id: Uuid, mutator: SessionMutator) -> AppResult<Session> {
        let mut rows = self.rows.lock().await;
        let session = rows
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("session '{id}' not found")))?;
        mutator(session)?;
        Ok(session.clone())
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let mut rows = self.rows.lock().await;
        rows.remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("session '{id}' not found")))
    }

    async fn list(&self) -> AppResult<Vec<Session>> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn expired_before(&self, t: DateTime<Utc>) -> AppResult<Vec<Session>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|s| s.valid_until < t)
            .cloned()
            .collect())
    }

    async fn clear(&self) -> AppResult<()> {
        self.rows.lock().await.clear();
        Ok(())
    }
}

pub struct MemoryPolicyStore {
    row: Mutex<GlobalPolicy>,
}

impl MemoryPolicyStore {
    #[must_use]
    pub fn new(default_keep_alive_timeout_secs: i64) -> Self {
        Self {
            row: Mutex::new(GlobalPolicy::new(default_keep_alive_timeout_secs)),
        }
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get(&self) -> AppResult<GlobalPolicy> {
        Ok(self.row.lock().await.clone())
    }

    async fn set_creation_enabled(&self, enabled: bool) -> AppResult<GlobalPolicy> {
        let mut row = self.row.lock().await;
        row.session_creation_enabled = enabled;
        Ok(row.clone())
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

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = MemoryConfigStore::new();
        store.create(cfg("rtneuron")).await.unwrap();
        let got = store.get("rtneuron").await.unwrap();
        assert_eq!(got, cfg("rtneuron"));
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = MemoryConfigStore::new();
        store.create(cfg("rtneuron")).await.unwrap();
        let err = store.create(cfg("rtneuron")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_unknown_not_found() {
        let store = MemoryConfigStore::new();
        let err = store.delete("@%$#$").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_delete_again_is_not_found() {
        let store = MemoryConfigStore::new();
        store.create(cfg("rtneuron")).await.unwrap();
        store.delete("rtneuron").await.unwrap();
        let err = store.delete("rtneuron").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_is_ordered_by_id_ascending() {
        let store = MemoryConfigStore::new();
        store.create(cfg("rtneuron")).await.unwrap();
        store.create(cfg("livre")).await.unwrap();
        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["livre".to_string(), "rtneuron".to_string()]);
    }

    #[tokio::test]
    async fn update_replaces_every_field() {
        let store = MemoryConfigStore::new();
        store.create(cfg("rtneuron")).await.unwrap();
        let mut updated = cfg("rtneuron");
        updated.command_line = "rtneuron2".to_string();
        store.update(updated.clone()).await.unwrap();
        assert_eq!(store.get("rtneuron").await.unwrap(), updated);
    }

    #[tokio::test]
    async fn update_unknown_is_not_found() {
        let store = MemoryConfigStore::new();
        let err = store.update(cfg("ghost")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn session_insert_duplicate_conflicts() {
        let store = MemorySessionStore::new();
        let id = Uuid::new_v4();
        let s = Session::new(id, "alice".into(), "rtneuron".into(), Utc::now(), chrono::Duration::seconds(60));
        store.insert(s.clone()).await.unwrap();
        let err = store.insert(s).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn session_update_mutates_in_place() {
        let store = MemorySessionStore::new();
        let id = Uuid::new_v4();
        let s = Session::new(id, "alice".into(), "rtneuron".into(), Utc::now(), chrono::Duration::seconds(60));
        store.insert(s).await.unwrap();
        let updated = store
            .update(
                id,
                Box::new(|s| {
                    s.http_host = "node01".to_string();
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.http_host, "node01");
        assert_eq!(store.get(id).await.unwrap().http_host, "node01");
    }

    #[tokio::test]
    async fn expired_before_filters_by_valid_until() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let expired = Session::new(Uuid::new_v4(), "a".into(), "r".into(), now - chrono::Duration::seconds(120), chrono::Duration::seconds(1));
        let fresh = Session::new(Uuid::new_v4(), "a".into(), "r".into(), now, chrono::Duration::seconds(3600));
        store.insert(expired.clone()).await.unwrap();
        store.insert(fresh).await.unwrap();
        let found = store.expired_before(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session_id, expired.session_id);
    }

    #[tokio::test]
    async fn policy_defaults_creation_enabled() {
        let store = MemoryPolicyStore::new(1000);
        let p = store.get().await.unwrap();
        assert!(p.session_creation_enabled);
        assert_eq!(p.keep_alive_timeout_secs, 1000);
    }

    #[tokio::test]
    async fn policy_suspend_and_resume() {
        let store = MemoryPolicyStore::new(1000);
        store.set_creation_enabled(false).await.unwrap();
        assert!(!store.get().await.unwrap().session_creation_enabled);
        store.set_creation_enabled(true).await.unwrap();
        assert!(store.get().await.unwrap().session_creation_enabled);
    }
}
