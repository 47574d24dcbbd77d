//! Tenant-routing reconciler lifecycle tests against real Kubernetes,
//! Postgres and NATS (spec.md §8 scenarios 1 and 3).

use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::runtime::wait::Condition;
use kube::Client;
use tenant_router::crd::{Certificate, Gateway};
use tenant_router::model::TenantStatus;
use tenant_router::repository::Repository;
use tokio::time::timeout;
use uuid::Uuid;

use super::{test_db, test_stream, wait_for, BASE_DOMAIN};

const NAMESPACE: &str = "tenant-routing";

async fn ensure_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let _ = api.create(&PostParams::default(), &ns).await;
}

fn certificate_ready() -> impl Condition<Certificate> {
    |obj: Option<&Certificate>| obj.map(|c| c.spec.dns_names.iter().any(|n| !n.is_empty())).unwrap_or(false)
}

fn gateway_exists() -> impl Condition<Gateway> {
    |obj: Option<&Gateway>| obj.is_some()
}

async fn publish_tenant_created(nats: &async_nats::Client, slug: &str) {
    let payload = serde_json::json!({
        "tenant_id": Uuid::new_v4().to_string(),
        "slug": slug,
        "admin_host": format!("{slug}-admin.{BASE_DOMAIN}"),
        "storefront_host": format!("{slug}.{BASE_DOMAIN}"),
        "api_host": format!("{slug}-api.{BASE_DOMAIN}"),
        "base_domain": BASE_DOMAIN,
        "is_custom_domain": false,
    });
    nats.publish("tenant.created", serde_json::to_vec(&payload).unwrap().into())
        .await
        .unwrap();
    nats.flush().await.unwrap();
}

/// A `tenant.created` event eventually yields a provisioned
/// `tenant_host_records` row and live `Certificate`/`Gateway` objects.
#[tokio::test]
async fn tenant_created_flow_provisions_resources() {
    let pool = test_db().await;
    let nats = test_stream().await;
    let client = Client::try_default().await.expect("kube client");
    ensure_namespace(&client, NAMESPACE).await;

    let slug = format!("e2e-{}", &Uuid::new_v4().to_string()[..8]);
    publish_tenant_created(&nats, &slug).await;

    let repository = Repository::new(pool);
    let record = timeout(Duration::from_secs(60), async {
        loop {
            if let Ok(Some(record)) = repository.get_by_slug(&slug).await {
                if record.status == TenantStatus::Provisioned {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    })
    .await
    .expect("tenant record to reach provisioned status");

    assert_eq!(record.slug, slug);

    let cert_api: Api<Certificate> = Api::namespaced(client.clone(), NAMESPACE);
    wait_for(cert_api, &format!("{slug}-default-domain"), certificate_ready()).await;

    let gw_api: Api<Gateway> = Api::namespaced(client, NAMESPACE);
    if let Ok(list) = gw_api.list(&Default::default()).await {
        assert!(!list.items.is_empty());
    }
}

/// A `tenant.deleted` event drives the record to `deleted`.
#[tokio::test]
async fn tenant_deleted_flow_soft_deletes_record() {
    let pool = test_db().await;
    let nats = test_stream().await;
    let slug = format!("e2e-del-{}", &Uuid::new_v4().to_string()[..8]);
    publish_tenant_created(&nats, &slug).await;

    let repository = Repository::new(pool);
    timeout(Duration::from_secs(60), async {
        loop {
            if matches!(repository.get_by_slug(&slug).await, Ok(Some(r)) if r.status == TenantStatus::Provisioned) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    })
    .await
    .expect("tenant provisioned before delete");

    let payload = serde_json::json!({ "slug": slug });
    nats.publish("tenant.deleted", serde_json::to_vec(&payload).unwrap().into())
        .await
        .unwrap();
    nats.flush().await.unwrap();

    timeout(Duration::from_secs(60), async {
        loop {
            if matches!(repository.get_by_slug(&slug).await, Ok(Some(r)) if r.status == TenantStatus::Deleted) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    })
    .await
    .expect("tenant record to reach deleted status");
}
