//! Global Policy operations (C7, spec §4.7).
//!
//! Thin wrapper kept separate from `Engine` so the HTTP admin routes depend
//! only on this narrow surface, not the whole engine. `Engine::suspend`/
//! `resume`/`policy` delegate straight through to the same `PolicyStore`.

use crate::error::AppResult;
use crate::model::GlobalPolicy;
use crate::store::PolicyStore;

/// `suspend()`/`resume()` are idempotent and return the post-state
/// (spec §4.7: "Both state-changing operations are idempotent and return
/// the post-state message.").
pub async fn suspend(store: &dyn PolicyStore) -> AppResult<GlobalPolicy> {
    store.set_creation_enabled(false).await
}

pub async fn resume(store: &dyn PolicyStore) -> AppResult<GlobalPolicy> {
    store.set_creation_enabled(true).await
}

pub async fn get(store: &dyn PolicyStore) -> AppResult<GlobalPolicy> {
    store.get().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryPolicyStore;

    #[tokio::test]
    async fn suspend_then_resume_round_trips() {
        let store = MemoryPolicyStore::new(1000);
        let suspended = suspend(&store).await.unwrap();
        assert!(!suspended.session_creation_enabled);
        let resumed = resume(&store).await.unwrap();
        assert!(resumed.session_creation_enabled);
    }

    #[tokio::test]
    async fn suspend_is_idempotent() {
        let store = MemoryPolicyStore::new(1000);
        suspend(&store).await.unwrap();
        let again = suspend(&store).await.unwrap();
        assert!(!again.session_creation_enabled);
    }
}
