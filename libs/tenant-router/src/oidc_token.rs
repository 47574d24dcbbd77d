//! Admin access token cache for the OIDC provider (spec §4.3 step 9: "the
//! admin access token is cached until 30s before its advertised expiry").

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tr_common::{Error, Result};

const EXPIRY_SKEW: Duration = Duration::seconds(30);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Default)]
pub struct OidcTokenCache {
    cached: Mutex<Option<CachedToken>>,
}

impl OidcTokenCache {
    /// Return a cached token if it won't expire within the skew window,
    /// otherwise fetch a fresh one via the client-credentials grant.
    pub async fn get(
        &self,
        http: &reqwest::Client,
        admin_api_base: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String> {
        {
            let guard = self.cached.lock().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at - EXPIRY_SKEW > Utc::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let url = format!("{admin_api_base}/protocol/openid-connect/token");
        let response = http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;

        let parsed: TokenResponse = response.json().await?;
        let expires_at = Utc::now() + Duration::seconds(parsed.expires_in);

        let mut guard = self.cached.lock().await;
        *guard = Some(CachedToken {
            access_token: parsed.access_token.clone(),
            expires_at,
        });
        Ok(parsed.access_token)
    }
}
