//! Integration tests gated behind `e2e-test`, since they need a real
//! Kubernetes cluster (cert-manager + Istio CRDs installed), Postgres, and
//! NATS JetStream. See `test/tenant_router.rs` for the routing reconciler
//! lifecycle and `test/notify_hub.rs` for the notification fan-out hub.

#[cfg(all(test, feature = "e2e-test"))]
mod test;
