//! Ephemeral credential exchange with the token collaborator.
//!
//! One-shot HTTP call returning a short-lived client secret plus the
//! WebSocket endpoint it authorizes. The credential is owned exclusively
//! by the gateway and never persisted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use super::GatewayError;

/// Short-lived credential authorizing one streaming connection.
#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralCredential {
    /// The bearer secret for the streaming connection
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    /// Expiry instant, seconds since the Unix epoch
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
    /// The streaming endpoint this credential authorizes
    #[serde(rename = "websocketUrl")]
    pub websocket_url: String,
    /// Subprotocols to advertise during the handshake
    #[serde(rename = "protocols", default)]
    pub protocols: Vec<String>,
}

impl EphemeralCredential {
    /// Whether the expiry instant has passed (with a small safety margin).
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now + 5 >= self.expires_at
    }
}

/// Timeout for the credential exchange.
const CREDENTIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch a fresh credential from the token collaborator.
pub async fn fetch_credential(
    client: &reqwest::Client,
    token_url: &str,
) -> Result<EphemeralCredential, GatewayError> {
    let response = client
        .post(token_url)
        .timeout(CREDENTIAL_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout("credential fetch timed out".to_string())
            } else {
                GatewayError::CredentialDenied(e.to_string())
            }
        })?;

    if !response.status().is_success() {
        return Err(GatewayError::CredentialDenied(format!(
            "token endpoint returned {}",
            response.status()
        )));
    }

    let credential: EphemeralCredential = response
        .json()
        .await
        .map_err(|e| GatewayError::CredentialDenied(format!("invalid credential body: {}", e)))?;

    if credential.client_secret.is_empty() {
        return Err(GatewayError::CredentialDenied(
            "token endpoint returned an empty secret".to_string(),
        ));
    }

    tracing::debug!(
        expires_at = credential.expires_at,
        "obtained ephemeral credential"
    );
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn far_future() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600
    }

    #[tokio::test]
    async fn test_fetch_credential_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "clientSecret": "ek_test_123",
                "expiresAt": far_future(),
                "websocketUrl": "wss://example.test/v1/realtime",
                "protocols": ["realtime", "bearer.ek_test_123"],
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let cred = fetch_credential(&client, &format!("{}/token", server.uri()))
            .await
            .unwrap();
        assert_eq!(cred.client_secret, "ek_test_123");
        assert_eq!(cred.protocols.len(), 2);
        assert!(!cred.is_expired());
    }

    #[tokio::test]
    async fn test_fetch_credential_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_credential(&client, &format!("{}/token", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CredentialDenied(_)));
    }

    #[tokio::test]
    async fn test_fetch_credential_empty_secret_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "clientSecret": "",
                "expiresAt": far_future(),
                "websocketUrl": "wss://example.test/v1/realtime",
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_credential(&client, &format!("{}/token", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CredentialDenied(_)));
    }

    #[test]
    fn test_expired_credential() {
        let cred = EphemeralCredential {
            client_secret: "ek".to_string(),
            expires_at: 1,
            websocket_url: "wss://example.test".to_string(),
            protocols: vec![],
        };
        assert!(cred.is_expired());
    }
}
