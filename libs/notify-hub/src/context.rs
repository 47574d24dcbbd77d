//! Shared state bundle for the HTTP/WebSocket/SSE surface (spec §4.4, §4.6).

use crate::registry::ClientRegistry;
use crate::repository::Repository;
use crate::wire::ServerMessage;

use axum::extract::FromRef;
use std::sync::Arc;
use tr_common::identity::TicketValidator;

#[derive(Clone)]
pub struct HubState {
    pub repository: Repository,
    pub ws_registry: Arc<ClientRegistry<ServerMessage>>,
    pub sse_registry: Arc<ClientRegistry<ServerMessage>>,
    pub ticket_validator: Arc<TicketValidator>,
    pub client_channel_capacity: usize,
    pub ws_ping_secs: u64,
    pub sse_heartbeat_secs: u64,
}

impl FromRef<HubState> for Arc<TicketValidator> {
    fn from_ref(state: &HubState) -> Self {
        state.ticket_validator.clone()
    }
}
