use anyhow::{anyhow, Context, Result};
use jsonwebtoken::DecodingKey;
use rand::RngCore;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::OidcSettings;

/// Tokens returned by the identity provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kty: String,
    #[serde(default)]
    kid: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
    #[serde(default, rename = "use")]
    public_use: String,
}

pub fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// OAuth 2.0 client for the authorization-code and refresh-token grants.
pub struct OidcClient {
    http: Client,
    settings: OidcSettings,
}

impl OidcClient {
    pub fn new(settings: OidcSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }

    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.settings.authorize_url)
            .with_context(|| format!("invalid authorize url {}", self.settings.authorize_url))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid profile email")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.settings.redirect_uri),
        ])
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", &self.settings.client_id),
            ("client_secret", &self.settings.client_secret),
        ];
        form.extend_from_slice(params);

        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token request failed with {status}: {body}"));
        }

        Ok(response.json().await?)
    }

    /// Fetch the provider's published RSA signing keys.
    pub async fn fetch_jwks(&self) -> Result<Vec<(Option<String>, DecodingKey)>> {
        let jwks: JwkSet = self
            .http
            .get(&self.settings.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut keys = Vec::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if !jwk.public_use.is_empty() && jwk.public_use != "sig" {
                continue;
            }
            let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
                .with_context(|| format!("invalid RSA components for key {}", jwk.kid))?;
            let kid = (!jwk.kid.is_empty()).then_some(jwk.kid);
            keys.push((kid, key));
        }

        if keys.is_empty() {
            return Err(anyhow!(
                "no usable signing keys at {}",
                self.settings.jwks_url
            ));
        }

        Ok(keys)
    }
}
