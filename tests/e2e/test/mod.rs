mod notify_hub;
mod tenant_router;

use std::time::Duration;

use kube::api::Api;
use kube::runtime::wait::{await_condition, Condition};
use sqlx::PgPool;
use tokio::time::timeout;

pub const BASE_DOMAIN: &str = "example.com";

pub async fn test_db() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for e2e tests");
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database")
}

pub async fn test_stream() -> async_nats::Client {
    let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    async_nats::connect(&url).await.expect("connect to test NATS server")
}

/// Poll `api` for `name` to satisfy `condition`, matching the reconciler's
/// own eventual-consistency contract rather than asserting on a fixed delay.
pub async fn wait_for<K, C>(api: Api<K>, name: &str, condition: C)
where
    K: kube::Resource + Clone + std::fmt::Debug + for<'de> k8s_openapi::serde::Deserialize<'de> + 'static + Send,
    C: Condition<K>,
{
    let result = timeout(Duration::from_secs(60), await_condition(api.clone(), name, condition)).await;
    match result {
        Ok(Ok(_)) => {}
        _ => panic!("timed out waiting for {name} to match condition"),
    }
}
