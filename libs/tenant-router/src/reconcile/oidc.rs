//! Sub-reconciler 9: OIDC redirect URI management (spec §4.3 step 9),
//! gated on identity integration being enabled.

use crate::context::ReconcileCtx;
use crate::model::TenantHostRecord;
use crate::queue::ReconcileOutcome;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tr_common::{Error, Result};
use tracing::warn;

const FAILURE_REQUEUE: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, Serialize)]
struct OidcClient {
    id: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
    #[serde(default)]
    web_origins: Vec<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

fn required_redirect_uris(host: &str) -> [String; 3] {
    [
        format!("https://{host}/*"),
        format!("https://{host}/auth/callback"),
        format!("https://{host}/api/auth/callback/*"),
    ]
}

pub async fn ensure(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<ReconcileOutcome> {
    if !ctx.config.oidc_enabled {
        return Ok(ReconcileOutcome::done());
    }

    let (Some(base), Some(client_id), Some(secret)) = (
        ctx.config.oidc_admin_api_base.as_deref(),
        ctx.config.oidc_admin_client_id.as_deref(),
        ctx.config.oidc_admin_client_secret.as_deref(),
    ) else {
        warn!(
            msg = "OIDC integration enabled but admin API credentials are not configured",
            slug = %record.slug
        );
        return Ok(ReconcileOutcome::done());
    };

    let token = ctx.oidc_token.get(&ctx.http, base, client_id, secret).await;
    let token = match token {
        Ok(t) => t,
        Err(e) if e.is_retryable() => return Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE)),
        Err(e) => return Err(e),
    };

    let hosts = record.all_hosts();

    for target_client_id in &ctx.config.oidc_client_ids {
        match update_client(ctx, base, &token, target_client_id, &hosts).await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                ctx.metrics.failure_inc(&record.slug);
                return Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ReconcileOutcome::done())
}

async fn update_client(
    ctx: &ReconcileCtx,
    base: &str,
    token: &str,
    client_id: &str,
    hosts: &[String],
) -> Result<()> {
    let url = format!("{base}/clients/{client_id}");
    let mut client: OidcClient = ctx
        .http
        .get(&url)
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()
        .map_err(Error::from)?
        .json()
        .await?;

    let mut redirect_uris: HashSet<String> = client.redirect_uris.drain(..).collect();
    let mut web_origins: HashSet<String> = client.web_origins.drain(..).collect();

    for host in hosts {
        for uri in required_redirect_uris(host) {
            redirect_uris.insert(uri);
        }
        web_origins.insert(format!("https://{host}"));
    }

    client.redirect_uris = redirect_uris.into_iter().collect();
    client.web_origins = web_origins.into_iter().collect();

    ctx.http
        .put(&url)
        .bearer_auth(token)
        .json(&client)
        .send()
        .await?
        .error_for_status()
        .map_err(Error::from)?;

    Ok(())
}

/// Remove this tenant's hosts from every configured OIDC client's redirect
/// URIs (delete flow, mirror of `ensure`).
pub async fn delete(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<()> {
    if !ctx.config.oidc_enabled {
        return Ok(());
    }
    let (Some(base), Some(client_id), Some(secret)) = (
        ctx.config.oidc_admin_api_base.as_deref(),
        ctx.config.oidc_admin_client_id.as_deref(),
        ctx.config.oidc_admin_client_secret.as_deref(),
    ) else {
        return Ok(());
    };

    let token = ctx.oidc_token.get(&ctx.http, base, client_id, secret).await?;
    let hosts = record.all_hosts();

    for target_client_id in &ctx.config.oidc_client_ids {
        let url = format!("{base}/clients/{target_client_id}");
        let mut client: OidcClient = match ctx.http.get(&url).bearer_auth(&token).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => resp.json().await?,
                Err(_) => continue,
            },
            Err(_) => continue,
        };

        let uris_to_remove: HashSet<String> =
            hosts.iter().flat_map(|h| required_redirect_uris(h)).collect();
        let origins_to_remove: HashSet<String> =
            hosts.iter().map(|h| format!("https://{h}")).collect();

        client.redirect_uris.retain(|u| !uris_to_remove.contains(u));
        client.web_origins.retain(|o| !origins_to_remove.contains(o));

        let _ = ctx.http.put(&url).bearer_auth(&token).json(&client).send().await;
    }

    Ok(())
}
