//! Notification fan-out hub: turns domain events into per-user
//! notifications and pushes them to connected clients over WebSocket or
//! SSE, with Postgres as the durable read model (spec §3, §4.4, §4.5).

pub mod config;
pub mod context;
pub mod events;
pub mod http;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod sse;
pub mod transform;
pub mod wire;
pub mod ws;

pub use context::HubState;
pub use registry::ClientRegistry;
pub use repository::Repository;
pub use resolver::{CombinedResolver, TargetUserResolver};
