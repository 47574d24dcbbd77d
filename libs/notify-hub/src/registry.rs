//! Connected-client registry (spec §4.4 "Hub state").
//!
//! A nested `tenant → user → client-id → handle` map behind a single
//! `RwLock`: structural edits (register/unregister) take the write lock,
//! reads (broadcast, connected-user queries) take the read lock. No send
//! to a client's own outbound channel requires holding the lock across the
//! `await` — `try_send` is synchronous, matching the "reads may proceed
//! concurrently with sends" contract.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

pub const CLIENT_CHANNEL_CAPACITY: usize = 256;

struct ClientHandle<M> {
    tx: mpsc::Sender<M>,
}

/// Generic over the message type so the WebSocket and SSE transports each
/// get their own registry without duplicating this module.
pub struct ClientRegistry<M> {
    clients: RwLock<HashMap<String, HashMap<Uuid, HashMap<Uuid, ClientHandle<M>>>>>,
}

impl<M: Clone> ClientRegistry<M> {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a client id, register its outbound channel, and return the
    /// receiver half for the write loop to drain.
    pub fn register(&self, tenant_id: &str, user_id: Uuid, capacity: usize) -> (Uuid, mpsc::Receiver<M>) {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut guard = self.clients.write().unwrap();
        guard
            .entry(tenant_id.to_string())
            .or_default()
            .entry(user_id)
            .or_default()
            .insert(client_id, ClientHandle { tx });
        (client_id, rx)
    }

    /// Remove exactly one client, pruning now-empty inner maps.
    pub fn unregister(&self, tenant_id: &str, user_id: Uuid, client_id: Uuid) {
        let mut guard = self.clients.write().unwrap();
        if let Some(users) = guard.get_mut(tenant_id) {
            if let Some(clients) = users.get_mut(&user_id) {
                clients.remove(&client_id);
                if clients.is_empty() {
                    users.remove(&user_id);
                }
            }
            if users.is_empty() {
                guard.remove(tenant_id);
            }
        }
    }

    /// Non-blocking fan-out to every client of (tenant, user). A full
    /// channel drops the frame for that client only (spec §4.4
    /// "Back-pressure policy").
    pub fn broadcast(&self, tenant_id: &str, user_id: Uuid, message: M) {
        let guard = self.clients.read().unwrap();
        let Some(clients) = guard.get(tenant_id).and_then(|users| users.get(&user_id)) else {
            return;
        };
        for (client_id, handle) in clients {
            if handle.tx.try_send(message.clone()).is_err() {
                warn!(msg = "dropping frame for slow or closed client", tenant_id, %user_id, %client_id);
            }
        }
    }

    /// Users with at least one live client in `tenant_id`, excluding the
    /// broadcast sentinel (used by [`crate::resolver`]).
    pub fn connected_users(&self, tenant_id: &str, exclude: Uuid) -> HashSet<Uuid> {
        let guard = self.clients.read().unwrap();
        guard
            .get(tenant_id)
            .map(|users| users.keys().copied().filter(|u| *u != exclude).collect())
            .unwrap_or_default()
    }

    /// Shut down every outbound channel by dropping all handles, signalling
    /// every write loop to terminate (spec §4.4 "Hub shutdown").
    pub fn shutdown(&self) {
        self.clients.write().unwrap().clear();
    }
}

impl<M: Clone> Default for ClientRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_prunes_empty_maps() {
        let registry: ClientRegistry<u32> = ClientRegistry::new();
        let user = Uuid::new_v4();
        let (client_id, _rx) = registry.register("t1", user, 4);
        assert_eq!(registry.connected_users("t1", Uuid::nil()).len(), 1);

        registry.unregister("t1", user, client_id);
        assert!(registry.connected_users("t1", Uuid::nil()).is_empty());
        assert!(registry.clients.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcast_drops_on_full_channel_without_blocking() {
        let registry: ClientRegistry<u32> = ClientRegistry::new();
        let user = Uuid::new_v4();
        let (_client_id, mut rx) = registry.register("t1", user, 1);

        registry.broadcast("t1", user, 1);
        registry.broadcast("t1", user, 2); // channel full, dropped

        assert_eq!(rx.recv().await, Some(1));
    }
}
