//! Bearer-token verification against trusted OIDC issuers.
//!
//! Keys are discovered through each issuer's OIDC configuration document
//! and cached per issuer; a token with an unknown `kid` refreshes the
//! issuer's key set once before being rejected. When the client allow-list
//! is non-empty, the `clientId` (or `azp`) claim must match one entry.

use quasar_core::config::SecurityConfig;

use std::collections::HashMap;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token has no key id")]
    MissingKeyId,

    #[error("token signing key is not known to any trusted issuer")]
    UnknownKey,

    #[error("invalid token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("client is not allow-listed")]
    ClientNotAllowed,

    #[error("issuer discovery failed: {0}")]
    DiscoveryFailed(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
pub struct Claims {
    pub iss: String,

    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,

    #[serde(default)]
    pub azp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
}

pub struct TokenVerifier {
    issuers: Vec<String>,
    clients: Vec<String>,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, JwkSet>>,
}

impl TokenVerifier {
    pub fn new(security: &SecurityConfig) -> Self {
        Self {
            issuers: security.trusted_issuers.clone(),
            clients: security.trusted_clients.clone(),
            http: reqwest::Client::new(),
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(AuthError::InvalidToken)?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;

        for issuer in &self.issuers {
            let jwk = match self.find_key(issuer, &kid).await {
                Ok(Some(jwk)) => jwk,
                Ok(None) => continue,
                Err(e) => {
                    warn!(msg = "skipping unreachable issuer", issuer, %e);
                    continue;
                }
            };
            let key = DecodingKey::from_jwk(&jwk).map_err(AuthError::InvalidToken)?;
            let mut validation = Validation::new(header.alg);
            validation.set_issuer(std::slice::from_ref(issuer));
            let data = decode::<Claims>(token, &key, &validation).map_err(AuthError::InvalidToken)?;
            if !client_allowed(&data.claims, &self.clients) {
                return Err(AuthError::ClientNotAllowed);
            }
            return Ok(data.claims);
        }
        Err(AuthError::UnknownKey)
    }

    /// Look up `kid` in the issuer's cached key set, refreshing the set
    /// once when the key is unknown (key rotation).
    async fn find_key(&self, issuer: &str, kid: &str) -> Result<Option<Jwk>, AuthError> {
        if let Some(jwks) = self.keys.read().await.get(issuer) {
            if let Some(jwk) = jwks.find(kid) {
                return Ok(Some(jwk.clone()));
            }
        }

        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!(msg = "refreshing issuer keys", issuer);
        let discovery: OidcDiscovery = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .map_err(AuthError::DiscoveryFailed)?
            .json()
            .await
            .map_err(AuthError::DiscoveryFailed)?;
        let jwks: JwkSet = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(AuthError::DiscoveryFailed)?
            .json()
            .await
            .map_err(AuthError::DiscoveryFailed)?;

        let jwk = jwks.find(kid).cloned();
        self.keys.write().await.insert(issuer.to_string(), jwks);
        Ok(jwk)
    }
}

fn client_allowed(claims: &Claims, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    claims
        .client_id
        .as_deref()
        .or(claims.azp.as_deref())
        .is_some_and(|client| allowed.iter().any(|a| a == client))
}
