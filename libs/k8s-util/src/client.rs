use hyper_util::rt::TokioExecutor;
use kube::{Client, Config, client::ConfigExt};
use tower::{BoxError, ServiceBuilder};
use tracing::{error, info};

/// Build a `kube::Client` from in-cluster or kubeconfig configuration,
/// verifying connectivity by listing namespaces once at startup.
pub async fn new_client(config: Config) -> kube::Result<Client> {
    let https = config.rustls_https_connector()?;
    let service = ServiceBuilder::new()
        .layer(config.base_uri_layer())
        .option_layer(config.auth_layer()?)
        .map_err(BoxError::from)
        .service(hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https));

    let client = Client::new(service, config.default_namespace);
    info!(msg = "kubernetes client initialized");
    Ok(client)
}

/// Exit non-zero if `K` cannot be listed, since the operator has nothing
/// useful to do without API access to the resources it manages.
pub async fn check_api_queryable<K>(client: &Client)
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api = kube::Api::<K>::all(client.clone());
    if let Err(e) = api.list(&kube::api::ListParams::default().limit(1)).await {
        error!(
            "{} is not queryable: {e:?}. Check controller permissions",
            std::any::type_name::<K>()
        );
        std::process::exit(1);
    }
}
