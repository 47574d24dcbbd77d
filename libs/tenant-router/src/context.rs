//! Shared state threaded through every sub-reconciler and the HTTP surface.

use crate::config::TenantRouterArgs;
use crate::metrics::ReconcilerMetrics;
use crate::oidc_token::OidcTokenCache;
use crate::repository::Repository;

use kube::Client;
use std::sync::Arc;
use tr_common::ratelimit::RateLimiter;
use tr_k8s_util::namespace_cache::NamespaceCache;

pub struct ReconcileCtx {
    pub client: Client,
    pub repository: Repository,
    pub namespaces: NamespaceCache,
    pub metrics: ReconcilerMetrics,
    pub limiter: Arc<RateLimiter>,
    pub http: reqwest::Client,
    pub oidc_token: OidcTokenCache,
    pub config: TenantRouterArgs,
}

impl ReconcileCtx {
    pub fn new(
        client: Client,
        repository: Repository,
        metrics: ReconcilerMetrics,
        config: TenantRouterArgs,
    ) -> Arc<Self> {
        let limiter = RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst);
        Arc::new(Self {
            client,
            repository,
            namespaces: NamespaceCache::new(),
            metrics,
            limiter,
            http: reqwest::Client::new(),
            oidc_token: OidcTokenCache::default(),
            config,
        })
    }
}
