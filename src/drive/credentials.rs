//! Google service-account keys and the JWT-bearer token exchange.

use std::fmt;
use std::fs;
use std::path::Path;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::errors::ChatError;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account JSON key this service needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Reads the key file; every failure is an authentication failure.
    pub fn from_file(path: Option<&Path>) -> Result<Self, ChatError> {
        let path = path.ok_or_else(|| {
            ChatError::Auth(
                "service account key not configured (set GOOGLE_SERVICE_ACCOUNT_FILE)".to_string(),
            )
        })?;
        if !path.exists() {
            return Err(ChatError::Auth(format!(
                "service account key not found at {}",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            ChatError::Auth(format!(
                "cannot read service account key {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ChatError> {
        let key: ServiceAccountKey = serde_json::from_str(contents)
            .map_err(|e| ChatError::Auth(format!("invalid service account key: {}", e)))?;
        if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
            return Err(ChatError::Auth(
                "service account key is missing client_email or private_key".to_string(),
            ));
        }
        Ok(key)
    }

    /// Signs the RS256 assertion sent to the token endpoint.
    pub fn signed_assertion(&self, scope: &str, now: i64) -> Result<String, ChatError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| ChatError::Auth(format!("invalid service account private key: {}", e)))?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ChatError::Auth(format!("failed to sign token assertion: {}", e)))
    }

    /// Exchanges a fresh assertion for an OAuth access token.
    pub async fn access_token(&self, client: &Client, scope: &str) -> Result<String, ChatError> {
        let assertion = self.signed_assertion(scope, chrono::Utc::now().timestamp())?;

        let res = client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| ChatError::Transfer(format!("token endpoint unreachable: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Auth(format!(
                "token exchange rejected ({}): {}",
                status, text
            )));
        }

        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| ChatError::Auth(format!("malformed token response: {}", e)))?;
        Ok(token.access_token)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}
