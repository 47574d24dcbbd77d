//! Tenant routing reconciler: turns `tenant.created`/`tenant.deleted`
//! events into cert-manager `Certificate`, Istio `Gateway`/`VirtualService`/
//! `AuthorizationPolicy` objects and (optionally) OIDC client updates, with
//! Postgres as the source of truth for provisioning progress (spec §3, §4).

pub mod config;
pub mod context;
pub mod crd;
pub mod drift;
pub mod events;
pub mod http;
pub mod metrics;
pub mod model;
pub mod oidc_token;
pub mod queue;
pub mod reconcile;
pub mod repository;

pub use context::ReconcileCtx;
pub use queue::{Queue, ReconcileOutcome, Reconciler};
pub use reconcile::TenantReconciler;
pub use repository::Repository;
