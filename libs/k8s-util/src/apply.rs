//! Idempotent create/patch/delete helpers shared across sub-reconcilers.
//!
//! Every sub-reconciler in the tenant router writes one Kubernetes object
//! via server-side apply. `AlreadyExists`/`NotFound` collapse to success
//! here so callers only have to special-case genuine transient failures.

use kube::Resource;
use kube::api::{Api, Patch, PatchParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tr_common::{Error, Result};
use tracing::{info, trace};

pub const FIELD_MANAGER: &str = "tenant-router";

/// Server-side apply `resource`, treating a 422 (immutable field conflict)
/// as a signal to delete and recreate rather than a hard failure.
pub async fn apply<K>(api: &Api<K>, name: &str, resource: &K) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    trace!(msg = "applying resource", name, kind = std::any::type_name::<K>());
    let result = api
        .patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .await;

    match result {
        Ok(applied) => Ok(applied),
        Err(kube::Error::Api(ae)) if ae.code == 422 => {
            info!(msg = "recreating resource after 422", name, kind = std::any::type_name::<K>());
            let _ = api.delete(name, &Default::default()).await;
            api.patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(resource),
            )
            .await
            .map_err(Error::from)
        }
        Err(e) => Err(Error::from(e)),
    }
}

/// Delete `name`, treating "already absent" as success.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Error::from(e)),
    }
}

/// Fetch `name`, treating "not found" as `Ok(None)` instead of an error.
pub async fn get_optional<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}
