//! Breaks the cycle between the event subscriber and the two transport hubs
//! (spec §9 "Cyclic references"). The subscriber depends only on this
//! trait; a combined resolver over both registries implements it.

use crate::model::BROADCAST_USER;
use crate::registry::ClientRegistry;
use crate::wire::ServerMessage;

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub trait TargetUserResolver: Send + Sync {
    /// Admin users of `tenant_id` with at least one live client on either
    /// transport.
    fn connected_admin_users(&self, tenant_id: &str) -> HashSet<Uuid>;
}

/// Union of the WebSocket and SSE registries' connected users.
pub struct CombinedResolver {
    ws: Arc<ClientRegistry<ServerMessage>>,
    sse: Arc<ClientRegistry<ServerMessage>>,
}

impl CombinedResolver {
    pub fn new(ws: Arc<ClientRegistry<ServerMessage>>, sse: Arc<ClientRegistry<ServerMessage>>) -> Self {
        Self { ws, sse }
    }
}

impl TargetUserResolver for CombinedResolver {
    fn connected_admin_users(&self, tenant_id: &str) -> HashSet<Uuid> {
        let mut users = self.ws.connected_users(tenant_id, BROADCAST_USER);
        users.extend(self.sse.connected_users(tenant_id, BROADCAST_USER));
        users
    }
}
