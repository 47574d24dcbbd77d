//! `name -> namespace` discovery cache for cluster-scoped-by-convention
//! objects whose actual namespace is discovered by search (spec §4.3,
//! §4.3 tie-breaks, §5 "eventually consistent, self-heal on not-found").

use kube::api::{Api, ListParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::RwLock;
use tracing::{debug, trace};

#[derive(Default)]
pub struct NamespaceCache {
    entries: RwLock<HashMap<String, String>>,
}

impl NamespaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name`'s namespace, trying the cache first, then `candidates`
    /// in order, then a cluster-wide list as a last resort.
    pub async fn resolve<K>(
        &self,
        client: &kube::Client,
        name: &str,
        candidates: &[&str],
    ) -> Option<String>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        if let Some(ns) = self.entries.read().await.get(name).cloned() {
            trace!(msg = "namespace cache hit", name, namespace = %ns);
            return Some(ns);
        }

        for &ns in candidates {
            let api: Api<K> = Api::namespaced(client.clone(), ns);
            if api.get(name).await.is_ok() {
                self.entries.write().await.insert(name.to_string(), ns.to_string());
                debug!(msg = "namespace discovered", name, namespace = ns);
                return Some(ns.to_string());
            }
        }

        let api: Api<K> = Api::all(client.clone());
        if let Ok(list) = api.list(&ListParams::default()).await {
            if let Some(obj) = list.items.into_iter().find(|o| o.name_any() == name) {
                let ns = obj.namespace()?;
                self.entries
                    .write()
                    .await
                    .insert(name.to_string(), ns.clone());
                debug!(msg = "namespace discovered via cluster-wide list", name, namespace = %ns);
                return Some(ns);
            }
        }

        None
    }

    /// Drop a stale entry after a not-found response so the next lookup
    /// rediscovers the object.
    pub async fn invalidate(&self, name: &str) {
        if self.entries.write().await.remove(name).is_some() {
            debug!(msg = "namespace cache entry invalidated", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = NamespaceCache::new();
        cache
            .entries
            .write()
            .await
            .insert("tpl".to_string(), "ns-a".to_string());
        cache.invalidate("tpl").await;
        assert!(cache.entries.read().await.get("tpl").is_none());
    }
}
