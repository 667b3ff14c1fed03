//! Durable store backend (spec §9: "any ACID-capable store suffices").
//!
//! Built on `rusqlite`. `rusqlite::Connection` is not `Send`-friendly for
//! concurrent async use, so — mirroring the teacher's coarse-grained mutex
//! around the non-reentrant scheduler-adapter connection (spec §5) — a
//! single connection is guarded by one `tokio::sync::Mutex`. Opening the
//! database and running migrations happens inside `spawn_blocking`
//! (`SqliteHandle::open`); the CRUD methods below run their `rusqlite`
//! calls synchronously while holding the mutex guard instead, since each
//! query is small and the guard already serializes access.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ConfigStore, PolicyStore, SessionMutator, SessionStore};
use crate::error::{AppError, AppResult};
use crate::model::{GlobalPolicy, Placement, RendererConfig, Session, SessionStatus};

fn to_internal(err: rusqlite::Error) -> AppError {
    AppError::Internal(format!("sqlite error: {err}"))
}

/// Shared connection handle. Cloning is cheap (`Arc`); all store structs in
/// this module wrap the same handle so config, session and policy rows
/// live in one database file.
#[derive(Clone)]
pub struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandle {
    /// Opens (or creates) the database at `path` and runs migrations.
    pub async fn open(path: &str) -> AppResult<Self> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open(path)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS renderer_config (
                    id TEXT PRIMARY KEY,
                    command_line TEXT NOT NULL,
                    environment_variables TEXT NOT NULL,
                    modules TEXT NOT NULL,
                    process_rest_parameters_format TEXT NOT NULL,
                    scheduler_rest_parameters_format TEXT NOT NULL,
                    graceful_exit INTEGER NOT NULL,
                    wait_until_running INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS session (
                    session_id TEXT PRIMARY KEY,
                    owner TEXT NOT NULL,
                    configuration_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    placement_kind TEXT NOT NULL,
                    placement_job_id TEXT,
                    placement_pid INTEGER,
                    http_host TEXT NOT NULL,
                    http_port INTEGER NOT NULL,
                    created INTEGER NOT NULL,
                    valid_until INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS global_policy (
                    id INTEGER PRIMARY KEY,
                    session_creation_enabled INTEGER NOT NULL,
                    keep_alive_timeout_secs INTEGER NOT NULL
                );",
            )?;
            Ok(conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("sqlite init task panicked: {e}")))?
        .map_err(to_internal)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<RendererConfig> {
    Ok(RendererConfig {
        id: row.get(0)?,
        command_line: row.get(1)?,
        environment_variables: row.get(2)?,
        modules: row.get(3)?,
        process_rest_parameters_format: row.get(4)?,
        scheduler_rest_parameters_format: row.get(5)?,
        graceful_exit: row.get::<_, i64>(6)? != 0,
        wait_until_running: row.get::<_, i64>(7)? != 0,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let session_id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let placement_kind: String = row.get(4)?;
    let placement_job_id: Option<String> = row.get(5)?;
    let placement_pid: Option<i64> = row.get(6)?;
    let created: i64 = row.get(9)?;
    let valid_until: i64 = row.get(10)?;

    let placement = match placement_kind.as_str() {
        "job" => Placement::Job(placement_job_id.unwrap_or_default()),
        "process" => Placement::Process(placement_pid.unwrap_or(-1)),
        _ => Placement::None,
    };
    let status = match status.as_str() {
        "scheduling" => SessionStatus::Scheduling,
        "scheduled" => SessionStatus::Scheduled,
        "getting_hostname" => SessionStatus::GettingHostname,
        "starting" => SessionStatus::Starting,
        "running" => SessionStatus::Running,
        "busy" => SessionStatus::Busy,
        "stopping" => SessionStatus::Stopping,
        "stopped" => SessionStatus::Stopped,
        _ => SessionStatus::Failed,
    };

    Ok(Session {
        session_id: Uuid::parse_str(&session_id).unwrap_or_default(),
        owner: row.get(1)?,
        configuration_id: row.get(2)?,
        status,
        placement,
        http_host: row.get(7)?,
        http_port: row.get::<_, i64>(8)? as u16,
        created: Utc.timestamp_opt(created, 0).single().unwrap_or_else(Utc::now),
        valid_until: Utc.timestamp_opt(valid_until, 0).single().unwrap_or_else(Utc::now),
    })
}

const fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Scheduling => "scheduling",
        SessionStatus::Scheduled => "scheduled",
        SessionStatus::GettingHostname => "getting_hostname",
        SessionStatus::Starting => "starting",
        SessionStatus::Running => "running",
        SessionStatus::Busy => "busy",
        SessionStatus::Stopping => "stopping",
        SessionStatus::Stopped => "stopped",
        SessionStatus::Failed => "failed",
    }
}

fn write_session(conn: &Connection, s: &Session) -> rusqlite::Result<()> {
    let (kind, job_id, pid) = match &s.placement {
        Placement::Job(id) => ("job", Some(id.clone()), None),
        Placement::Process(pid) => ("process", None, Some(*pid)),
        Placement::None => ("none", None, None),
    };
    conn.execute(
        "INSERT INTO session (session_id, owner, configuration_id, status, placement_kind,
            placement_job_id, placement_pid, http_host, http_port, created, valid_until)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(session_id) DO UPDATE SET
            owner = excluded.owner,
            configuration_id = excluded.configuration_id,
            status = excluded.status,
            placement_kind = excluded.placement_kind,
            placement_job_id = excluded.placement_job_id,
            placement_pid = excluded.placement_pid,
            http_host = excluded.http_host,
            http_port = excluded.http_port,
            created = excluded.created,
            valid_until = excluded.valid_until",
        params![
            s.session_id.to_string(),
            s.owner,
            s.configuration_id,
            status_str(s.status),
            kind,
            job_id,
            pid,
            s.http_host,
            i64::from(s.http_port),
            s.created.timestamp(),
            s.valid_until.timestamp(),
        ],
    )?;
    Ok(())
}

pub struct SqliteConfigStore {
    handle: SqliteHandle,
}

impl SqliteConfigStore {
    #[must_use]
    pub const fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn create(&self, cfg: RendererConfig) -> AppResult<()> {
        cfg.validate()?;
        let conn = self.handle.conn.clone();
        let guard = conn.lock().await;
        let existing: Option<String> = guard
            .query_row(
                "SELECT id FROM renderer_config WHERE id = ?1",
                params![cfg.id],
                |r| r.get(0),
            )
            .optional()
            .map_err(to_internal)?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("config '{}' already exists", cfg.id)));
        }
        guard
            .execute(
                "INSERT INTO renderer_config (id, command_line, environment_variables, modules,
                    process_rest_parameters_format, scheduler_rest_parameters_format,
                    graceful_exit, wait_until_running) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    cfg.id,
                    cfg.command_line,
                    cfg.environment_variables,
                    cfg.modules,
                    cfg.process_rest_parameters_format,
                    cfg.scheduler_rest_parameters_format,
                    i64::from(cfg.graceful_exit),
                    i64::from(cfg.wait_until_running),
                ],
            )
            .map_err(to_internal)?;
        Ok(())
    }

    async fn update(&self, cfg: RendererConfig) -> AppResult<()> {
        cfg.validate()?;
        let guard = self.handle.conn.lock().await;
        let rows = guard
            .execute(
                "UPDATE renderer_config SET command_line=?2, environment_variables=?3,
                    modules=?4, process_rest_parameters_format=?5,
                    scheduler_rest_parameters_format=?6, graceful_exit=?7,
                    wait_until_running=?8 WHERE id=?1",
                params![
                    cfg.id,
                    cfg.command_line,
                    cfg.environment_variables,
                    cfg.modules,
                    cfg.process_rest_parameters_format,
                    cfg.scheduler_rest_parameters_format,
                    i64::from(cfg.graceful_exit),
                    i64::from(cfg.wait_until_running),
                ],
            )
            .map_err(to_internal)?;
        if rows == 0 {
            return Err(AppError::NotFound(format!("config '{}' not found", cfg.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        let guard = self.handle.conn.lock().await;
        let rows = guard
            .execute("DELETE FROM renderer_config WHERE id = ?1", params![id])
            .map_err(to_internal)?;
        if rows == 0 {
            return Err(AppError::NotFound(format!("config '{id}' not found")));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<RendererConfig> {
        let guard = self.handle.conn.lock().await;
        guard
            .query_row(
                "SELECT id, command_line, environment_variables, modules,
                    process_rest_parameters_format, scheduler_rest_parameters_format,
                    graceful_exit, wait_until_running FROM renderer_config WHERE id = ?1",
                params![id],
                row_to_config,
            )
            .optional()
            .map_err(to_internal)?
            .ok_or_else(|| AppError::NotFound(format!("config '{id}' not found")))
    }

    async fn list(&self) -> AppResult<Vec<RendererConfig>> {
        let guard = self.handle.conn.lock().await;
        let mut stmt = guard
            .prepare(
                "SELECT id, command_line, environment_variables, modules,
                    process_rest_parameters_format, scheduler_rest_parameters_format,
                    graceful_exit, wait_until_running FROM renderer_config ORDER BY id ASC",
            )
            .map_err(to_internal)?;
        let rows = stmt
            .query_map([], row_to_config)
            .map_err(to_internal)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(to_internal)?;
        Ok(rows)
    }

    async fn clear(&self) -> AppResult<()> {
        let guard = self.handle.conn.lock().await;
        guard
            .execute("DELETE FROM renderer_config", [])
            .map_err(to_internal)?;
        Ok(())
    }
}

pub struct SqliteSessionStore {
    handle: SqliteHandle,
}

impl SqliteSessionStore {
    #[must_use]
    pub const fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: Session) -> AppResult<()> {
        let guard = self.handle.conn.lock().await;
        let existing: Option<String> = guard
            .query_row(
                "SELECT session_id FROM session WHERE session_id = ?1",
                params![session.session_id.to_string()],
                |r| r.get(0),
            )
            .optional()
            .map_err(to_internal)?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!(
                "session '{}' already exists",
                session.session_id
            )));
        }
        write_session(&guard, &session).map_err(to_internal)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Session> {
        let guard = self.handle.conn.lock().await;
        guard
            .query_row(
                "SELECT session_id, owner, configuration_id, status, placement_kind,
                    placement_job_id, placement_pid, http_host, http_port, created, valid_until
                 FROM session WHERE session_id = ?1",
                params![id.to_string()],
                row_to_session,
            )
            .optional()
            .map_err(to_internal)?
            .ok_or_else(|| AppError::NotFound(format!("session '{id}' not found")))
    }

    async fn update(&self, id: Uuid, mutator: SessionMutator) -> AppResult<Session> {
        let guard = self.handle.conn.lock().await;
        let mut session = guard
            .query_row(
                "SELECT session_id, owner, configuration_id, status, placement_kind,
                    placement_job_id, placement_pid, http_host, http_port, created, valid_until
                 FROM session WHERE session_id = ?1",
                params![id.to_string()],
                row_to_session,
            )
            .optional()
            .map_err(to_internal)?
            .ok_or_else(|| AppError::NotFound(format!("session '{id}' not found")))?;
        mutator(&mut session)?;
        write_session(&guard, &session).map_err(to_internal)?;
        Ok(session)
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let guard = self.handle.conn.lock().await;
        let rows = guard
            .execute("DELETE FROM session WHERE session_id = ?1", params![id.to_string()])
            .map_err(to_internal)?;
        if rows == 0 {
            return Err(AppError::NotFound(format!("session '{id}' not found")));
        }
        Ok(())
    }

    async fn list(&self) -> AppResult<Vec<Session>> {
        let guard = self.handle.conn.lock().await;
        let mut stmt = guard
            .prepare(
                "SELECT session_id, owner, configuration_id, status, placement_kind,
                    placement_job_id, placement_pid, http_host, http_port, created, valid_until
                 FROM session",
            )
            .map_err(to_internal)?;
        let rows = stmt
            .query_map([], row_to_session)
            .map_err(to_internal)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(to_internal)?;
        Ok(rows)
    }

    async fn expired_before(&self, t: DateTime<Utc>) -> AppResult<Vec<Session>> {
        let guard = self.handle.conn.lock().await;
        let mut stmt = guard
            .prepare(
                "SELECT session_id, owner, configuration_id, status, placement_kind,
                    placement_job_id, placement_pid, http_host, http_port, created, valid_until
                 FROM session WHERE valid_until < ?1",
            )
            .map_err(to_internal)?;
        let rows = stmt
            .query_map(params![t.timestamp()], row_to_session)
            .map_err(to_internal)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(to_internal)?;
        Ok(rows)
    }

    async fn clear(&self) -> AppResult<()> {
        let guard = self.handle.conn.lock().await;
        guard.execute("DELETE FROM session", []).map_err(to_internal)?;
        Ok(())
    }
}

pub struct SqlitePolicyStore {
    handle: SqliteHandle,
    default_keep_alive_timeout_secs: i64,
}

impl SqlitePolicyStore {
    #[must_use]
    pub const fn new(handle: SqliteHandle, default_keep_alive_timeout_secs: i64) -> Self {
        Self {
            handle,
            default_keep_alive_timeout_secs,
        }
    }

    /// Creates the row lazily on first access if absent (spec §3).
    async fn ensure_row(&self, guard: &Connection) -> AppResult<()> {
        guard
            .execute(
                "INSERT OR IGNORE INTO global_policy (id, session_creation_enabled,
                    keep_alive_timeout_secs) VALUES (?1, 1, ?2)",
                params![GlobalPolicy::ID, self.default_keep_alive_timeout_secs],
            )
            .map_err(to_internal)?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn get(&self) -> AppResult<GlobalPolicy> {
        let guard = self.handle.conn.lock().await;
        self.ensure_row(&guard).await?;
        guard
            .query_row(
                "SELECT session_creation_enabled, keep_alive_timeout_secs FROM global_policy
                 WHERE id = ?1",
                params![GlobalPolicy::ID],
                |row| {
                    Ok(GlobalPolicy {
                        session_creation_enabled: row.get::<_, i64>(0)? != 0,
                        keep_alive_timeout_secs: row.get(1)?,
                    })
                },
            )
            .map_err(to_internal)
    }

    async fn set_creation_enabled(&self, enabled: bool) -> AppResult<GlobalPolicy> {
        let guard = self.handle.conn.lock().await;
        self.ensure_row(&guard).await?;
        guard
            .execute(
                "UPDATE global_policy SET session_creation_enabled = ?2 WHERE id = ?1",
                params![GlobalPolicy::ID, i64::from(enabled)],
            )
            .map_err(to_internal)?;
        guard
            .query_row(
                "SELECT session_creation_enabled, keep_alive_timeout_secs FROM global_policy
                 WHERE id = ?1",
                params![GlobalPolicy::ID],
                |row| {
                    Ok(GlobalPolicy {
                        session_creation_enabled: row.get::<_, i64>(0)? != 0,
                        keep_alive_timeout_secs: row.get(1)?,
                    })
                },
            )
            .map_err(to_internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn handle() -> SqliteHandle {
        SqliteHandle::open(":memory:").await.unwrap()
    }

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
        let store = SqliteConfigStore::new(handle().await);
        store.create(cfg("rtneuron")).await.unwrap();
        assert_eq!(store.get("rtneuron").await.unwrap(), cfg("rtneuron"));
    }

    #[tokio::test]
    async fn list_is_ordered_by_id_ascending() {
        let store = SqliteConfigStore::new(handle().await);
        store.create(cfg("rtneuron")).await.unwrap();
        store.create(cfg("livre")).await.unwrap();
        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["livre".to_string(), "rtneuron".to_string()]);
    }

    #[tokio::test]
    async fn session_roundtrip_and_expiry() {
        let h = handle().await;
        let store = SqliteSessionStore::new(h);
        let now = Utc::now();
        let s = Session::new(Uuid::new_v4(), "alice".into(), "rtneuron".into(), now, chrono::Duration::seconds(-5));
        let id = s.session_id;
        store.insert(s).await.unwrap();
        let expired = store.expired_before(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, id);
    }

    #[tokio::test]
    async fn policy_lazily_created_with_default_timeout() {
        let store = SqlitePolicyStore::new(handle().await, 1234);
        let p = store.get().await.unwrap();
        assert!(p.session_creation_enabled);
        assert_eq!(p.keep_alive_timeout_secs, 1234);
    }
}
