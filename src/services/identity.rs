//! Bearer-token identity lookup.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::SessionError;
use crate::models::{Identity, IdentityConfig};
use crate::utils::{RetryConfig, with_retry};

/// Resolves a bearer token to the tenant and role it belongs to.
///
/// Any failure (unreachable service, non-2xx, malformed payload) is an
/// authentication failure.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, SessionError>;
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    result: ProfileResult,
}

#[derive(Debug, Deserialize)]
struct ProfileResult {
    #[serde(default)]
    labels: HashMap<String, Value>,
}

/// JSON-RPC profile service: `{"jsonrpc":"2.0","method":"get"}` returning
/// `result.labels`. The admin flag is the presence of the admin label; the
/// tenant is the value of the tenant label.
#[derive(Debug, Clone)]
pub struct HttpIdentityResolver {
    client: Client,
    url: String,
    admin_label: String,
    tenant_label: String,
}

impl HttpIdentityResolver {
    pub fn new(config: &IdentityConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SessionError::IdentityResolution(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            admin_label: config.admin_label.clone(),
            tenant_label: config.tenant_label.clone(),
        })
    }

    fn identity_from_labels(
        &self,
        labels: &HashMap<String, Value>,
    ) -> Result<Identity, SessionError> {
        let is_admin = labels.contains_key(&self.admin_label);
        let tenant = match labels.get(&self.tenant_label) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(_) => {
                return Err(SessionError::IdentityResolution(format!(
                    "label '{}' is not a non-empty string",
                    self.tenant_label
                )));
            }
            None => {
                return Err(SessionError::IdentityResolution(format!(
                    "profile has no '{}' label",
                    self.tenant_label
                )));
            }
        };
        Ok(Identity::new(tenant, is_admin))
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, SessionError> {
        let body = json!({"jsonrpc": "2.0", "method": "get"});
        let response = with_retry(&RetryConfig::new(2), || {
            self.client
                .post(&self.url)
                .bearer_auth(bearer_token)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&body)
                .send()
        })
        .await
        .into_result()
        .map_err(|e| SessionError::IdentityResolution(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SessionError::IdentityResolution(format!(
                "profile service returned {}",
                response.status()
            )));
        }

        let profile: ProfileResponse = response
            .json()
            .await
            .map_err(|e| SessionError::IdentityResolution(format!("malformed profile: {e}")))?;

        let identity = self.identity_from_labels(&profile.result.labels)?;
        tracing::debug!(tenant = %identity.tenant_id, admin = identity.is_admin, "resolved identity");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> HttpIdentityResolver {
        HttpIdentityResolver::new(&IdentityConfig::default()).unwrap()
    }

    fn labels(json: &str) -> HashMap<String, Value> {
        let profile: ProfileResponse = serde_json::from_str(json).unwrap();
        profile.result.labels
    }

    #[test]
    fn test_admin_label_presence() {
        let identity = resolver()
            .identity_from_labels(&labels(
                r#"{"result":{"labels":{"customer":"acme","straightdocs-admin":""}}}"#,
            ))
            .unwrap();
        assert_eq!(identity, Identity::new("acme", true));
    }

    #[test]
    fn test_regular_user() {
        let identity = resolver()
            .identity_from_labels(&labels(r#"{"result":{"labels":{"customer":"acme"}}}"#))
            .unwrap();
        assert!(!identity.is_admin);
    }

    #[test]
    fn test_missing_tenant_label_fails() {
        let err = resolver()
            .identity_from_labels(&labels(r#"{"result":{"labels":{"straightdocs-admin":""}}}"#))
            .unwrap_err();
        assert!(matches!(err, SessionError::IdentityResolution(_)));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(serde_json::from_str::<ProfileResponse>(r#"{"error":"nope"}"#).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_auth_failure() {
        let config = IdentityConfig {
            url: "http://127.0.0.1:9/user/profile".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let err = HttpIdentityResolver::new(&config)
            .unwrap()
            .resolve("token")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::IdentityResolution(_)));
    }
}
