//! Tenant-router-specific configuration layered on top of
//! [`tr_common::config::CommonArgs`] (spec §4.3 "configured cluster issuer",
//! "configured namespace", "configured workload label").

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct TenantRouterArgs {
    #[command(flatten)]
    pub common: tr_common::config::CommonArgs,

    /// cert-manager ClusterIssuer used for default-domain certificates.
    #[arg(long, default_value = "letsencrypt-dns01", env)]
    pub cluster_issuer_default: String,

    /// cert-manager ClusterIssuer used for custom-domain (HTTP-01) certificates.
    #[arg(long, default_value = "letsencrypt-http01", env)]
    pub cluster_issuer_http01: String,

    /// Namespace certificates for default-domain tenants are created in.
    #[arg(long, default_value = "tenant-routing", env)]
    pub default_cert_namespace: String,

    /// Namespace certificates and dedicated gateways for custom-domain
    /// tenants are created in.
    #[arg(long, default_value = "custom-domain-ingress", env)]
    pub custom_domain_namespace: String,

    /// Namespace checked first when discovering the shared gateway and
    /// template VirtualServices.
    #[arg(long, default_value = "istio-ingress", env)]
    pub ingress_namespace: String,

    /// Namespace checked second when discovering the shared gateway and
    /// template VirtualServices.
    #[arg(long, default_value = "tenant-routing", env)]
    pub app_namespace: String,

    /// Name of the shared Gateway object mutated for default-domain tenants
    /// when wildcard-cert mode is off.
    #[arg(long, default_value = "shared-gateway", env)]
    pub shared_gateway_name: String,

    /// When true, default-domain tenants are covered by a wildcard
    /// certificate and step 3 never mutates the shared gateway.
    #[arg(long, default_value_t = true, env)]
    pub wildcard_cert_mode: bool,

    /// Credential name paired with the wildcard certificate secret for the
    /// shared gateway, `{namespace}/{secret}`.
    #[arg(long, default_value = "istio-ingress/wildcard-tenant-tls", env)]
    pub wildcard_credential: String,

    /// Name of the admin-surface template VirtualService to clone per tenant.
    #[arg(long, default_value = "admin-template-vs", env)]
    pub admin_template_vs: String,

    /// Name of the storefront template VirtualService to clone per tenant.
    #[arg(long, default_value = "storefront-template-vs", env)]
    pub storefront_template_vs: String,

    /// Name of the api-surface template VirtualService to clone per tenant.
    #[arg(long, default_value = "api-template-vs", env)]
    pub api_template_vs: String,

    /// Root domain used to build default-domain hosts and the onboarding
    /// origin allowed in admin CORS policies.
    #[arg(long, default_value = "example.com", env)]
    pub base_domain: String,

    /// Workload label (`key=value`) the ingress authorization policies
    /// select on.
    #[arg(long, default_value = "istio=ingressgateway", env)]
    pub workload_selector: String,

    /// Name of the shared authorization policy covering all custom-domain
    /// tenant hosts.
    #[arg(long, default_value = "tenant-router-custom-domain-hosts", env)]
    pub shared_auth_policy_name: String,

    /// Enable step 9 (OIDC redirect URI management).
    #[arg(long, default_value_t = false, env)]
    pub oidc_enabled: bool,

    /// Comma-separated OIDC client ids to update with tenant redirect URIs.
    #[arg(long, value_delimiter = ',', env)]
    pub oidc_client_ids: Vec<String>,

    /// Base URL of the OIDC provider's admin API.
    #[arg(long, env)]
    pub oidc_admin_api_base: Option<String>,

    /// Client id used to obtain an admin access token for the OIDC provider.
    #[arg(long, env)]
    pub oidc_admin_client_id: Option<String>,

    /// Client secret used to obtain an admin access token for the OIDC provider.
    #[arg(long, env)]
    pub oidc_admin_client_secret: Option<String>,

    /// Number of queue workers reconciling tenants concurrently.
    #[arg(long, default_value_t = crate::queue::DEFAULT_WORKERS, env)]
    pub workers: usize,

    /// Token-bucket rate (requests/second) gating cluster-mutating calls.
    #[arg(long, default_value_t = 10, env)]
    pub rate_limit_rps: u32,

    /// Token-bucket burst size gating cluster-mutating calls.
    #[arg(long, default_value_t = 20, env)]
    pub rate_limit_burst: u32,
}

impl TenantRouterArgs {
    pub fn ingress_candidates(&self) -> Vec<&str> {
        vec![self.ingress_namespace.as_str(), self.app_namespace.as_str()]
    }
}
