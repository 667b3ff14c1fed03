//! Repository interfaces for the Config Store (C1) and Session Store (C2),
//! plus the Global Policy single-row record (C7's persistence half).
//!
//! Per spec §9's design notes, the framework-coupled persistence of the
//! original is replaced by a plain repository interface with two
//! implementations: an in-memory map (`memory`, also used by tests) and a
//! durable backend (`sqlite`). Both are exercised through the same trait so
//! the engine never depends on which one is wired in.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::model::{GlobalPolicy, RendererConfig, Session};

/// C1: persistent mapping `renderer_id -> RendererConfig` (spec §4.1).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fails with `Conflict` if `cfg.id` already exists.
    async fn create(&self, cfg: RendererConfig) -> AppResult<()>;

    /// Replaces every field of an existing row; fails with `NotFound`
    /// otherwise.
    async fn update(&self, cfg: RendererConfig) -> AppResult<()>;

    /// Fails with `NotFound` if `id` is unknown.
    async fn delete(&self, id: &str) -> AppResult<()>;

    /// Fails with `NotFound` if `id` is unknown.
    async fn get(&self, id: &str) -> AppResult<RendererConfig>;

    /// Ordered by `id` ascending (spec §4.1).
    async fn list(&self) -> AppResult<Vec<RendererConfig>>;

    /// Removes all rows.
    async fn clear(&self) -> AppResult<()>;
}

/// A synchronous, fallible mutation applied to one `Session` row under the
/// store's atomicity guarantee. The closure must validate the row's current
/// state itself (e.g. check `session.status` matches what the caller
/// expected) before mutating — the store only guarantees the read and the
/// write are atomic with respect to other callers, not that the caller's
/// expectations about content still hold (spec §5).
pub type SessionMutator = Box<dyn FnOnce(&mut Session) -> AppResult<()> + Send>;

/// C2: persistent mapping `session_id -> Session` (spec §4.2).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with `Conflict` on a duplicate `session_id`.
    async fn insert(&self, session: Session) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Session>;

    /// Atomically reads the row, applies `mutator`, and writes the result
    /// back. Returns the mutated row. Fails with `NotFound` if `id` is
    /// unknown.
    async fn update(&self, id: Uuid, mutator: SessionMutator) -> AppResult<Session>;

    async fn delete(&self, id: Uuid) -> AppResult<()>;

    async fn list(&self) -> AppResult<Vec<Session>>;

    /// Sessions whose `valid_until` is strictly before `t` (spec §4.6).
    async fn expired_before(&self, t: DateTime<Utc>) -> AppResult<Vec<Session>>;

    async fn clear(&self) -> AppResult<()>;
}

/// C7's persisted half: the single `GlobalPolicy` row (spec §3, §4.7).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Created lazily on first access if absent (spec §3 "Lifecycle").
    async fn get(&self) -> AppResult<GlobalPolicy>;

    async fn set_creation_enabled(&self, enabled: bool) -> AppResult<GlobalPolicy>;
}
