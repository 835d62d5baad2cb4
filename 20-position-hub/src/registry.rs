//! Shared state for every live connection and the player it represents.
//!
//! Connections and player states live behind one lock so they are always
//! added and removed together. Callers never hold the lock across a network
//! write; the dispatcher's delivery pass is the single exception.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::{Mutex, MutexGuard};

use crate::{
    connection::ConnectionHandle,
    message::{PlayerId, PlayerState},
};

#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    connections: HashMap<PlayerId, ConnectionHandle>,
    players: BTreeMap<PlayerId, PlayerState>,
}

impl RegistryInner {
    pub(crate) fn connections(&self) -> impl Iterator<Item = (&PlayerId, &ConnectionHandle)> {
        self.connections.iter()
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<ConnectionHandle> {
        self.players.remove(id);
        self.connections.remove(id)
    }

    fn is_consistent(&self) -> bool {
        self.connections.len() == self.players.len()
            && self.players.keys().all(|id| self.connections.contains_key(id))
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection together with a freshly spawned player and returns
    /// every player currently known, the new one included.
    pub async fn register(
        &self,
        id: PlayerId,
        handle: ConnectionHandle,
    ) -> BTreeMap<PlayerId, PlayerState> {
        let mut inner = self.inner.lock().await;
        inner.players.insert(id.clone(), PlayerState::spawn(id.clone()));
        inner.connections.insert(id, handle);
        debug_assert!(inner.is_consistent());
        inner.players.clone()
    }

    /// Removes the connection and its player. Returns `None` when the id is
    /// already gone.
    pub async fn unregister(&self, id: &str) -> Option<ConnectionHandle> {
        let mut inner = self.inner.lock().await;
        let removed = inner.remove(id);
        debug_assert!(inner.is_consistent());
        removed
    }

    /// Replaces the stored state for `id`. Late updates for a player that has
    /// already left are ignored.
    pub async fn update_position(
        &self,
        id: &str,
        x: f64,
        y: f64,
        facing: String,
    ) -> Option<PlayerState> {
        let mut inner = self.inner.lock().await;
        let state = inner.players.get_mut(id)?;
        *state = PlayerState {
            id: id.to_string(),
            x,
            y,
            facing,
        };
        Some(state.clone())
    }

    pub async fn snapshot_all(&self) -> BTreeMap<PlayerId, PlayerState> {
        self.inner.lock().await.players.clone()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.connections.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().await
    }

    #[cfg(test)]
    pub(crate) async fn is_consistent(&self) -> bool {
        self.inner.lock().await.is_consistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory;

    fn handle() -> ConnectionHandle {
        memory::connection().0.split().0
    }

    #[tokio::test]
    async fn register_spawns_default_state_and_returns_snapshot() {
        let registry = Registry::new();

        let first = registry.register("a".into(), handle()).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first["a"], PlayerState::spawn("a".into()));
        assert_eq!(first["a"].facing, "idle");

        let second = registry.register("b".into(), handle()).await;
        assert_eq!(second.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = Registry::new();
        registry.register("a".into(), handle()).await;
        registry.register("b".into(), handle()).await;

        assert!(registry.unregister("a").await.is_some());
        let after_first = registry.snapshot_all().await;

        assert!(registry.unregister("a").await.is_none());
        assert_eq!(registry.snapshot_all().await, after_first);
        assert_eq!(registry.len().await, 1);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn update_replaces_the_whole_state() {
        let registry = Registry::new();
        registry.register("a".into(), handle()).await;

        let updated = registry
            .update_position("a", 5.0, 10.0, "up".into())
            .await
            .expect("registered player");
        assert_eq!(
            updated,
            PlayerState {
                id: "a".into(),
                x: 5.0,
                y: 10.0,
                facing: "up".into()
            }
        );
        assert_eq!(registry.snapshot_all().await["a"], updated);
    }

    #[tokio::test]
    async fn update_for_unknown_player_is_ignored() {
        let registry = Registry::new();

        assert!(registry.update_position("ghost", 1.0, 1.0, "left".into()).await.is_none());
        assert!(registry.is_empty().await);
        assert!(!registry.contains("ghost").await);
    }

    #[tokio::test]
    async fn concurrent_churn_keeps_maps_in_step() {
        let registry = std::sync::Arc::new(Registry::new());

        let tasks: Vec<_> = (0..32)
            .map(|n| {
                let registry = std::sync::Arc::clone(&registry);
                tokio::spawn(async move {
                    let id = format!("p{n}");
                    registry.register(id.clone(), handle()).await;
                    registry.update_position(&id, n as f64, 0.0, "right".into()).await;
                    if n % 2 == 0 {
                        registry.unregister(&id).await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("churn task");
        }

        assert_eq!(registry.len().await, 16);
        assert!(registry.is_consistent().await);
    }
}
