use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the cookie carrying the sealed session tokens.
pub const SESSION_COOKIE: &str = "grasp_session";
/// Name of the short lived cookie carrying the login state nonce.
pub const STATE_COOKIE: &str = "grasp_oauth_state";
/// Audience of locally issued tokens when no identity provider is configured.
pub const LOCAL_AUDIENCE: &str = "grasp";

const STATE_EXPIRY_MINUTES: i64 = 10;

/// Identity claims of an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid,
        }
    }
}

struct VerifierKey {
    kid: Option<String>,
    key: DecodingKey,
}

/// Validates access tokens, either against the identity provider's published
/// RSA keys or against the local secret when no provider is configured.
pub struct TokenVerifier {
    keys: Vec<VerifierKey>,
    algorithm: Algorithm,
    audience: String,
}

impl TokenVerifier {
    pub fn rs256(keys: Vec<(Option<String>, DecodingKey)>, audience: &str) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|(kid, key)| VerifierKey { kid, key })
                .collect(),
            algorithm: Algorithm::RS256,
            audience: audience.to_string(),
        }
    }

    pub fn hs256(secret: &str) -> Self {
        Self {
            keys: vec![VerifierKey {
                kid: None,
                key: DecodingKey::from_secret(secret.as_bytes()),
            }],
            algorithm: Algorithm::HS256,
            audience: LOCAL_AUDIENCE.to_string(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<UserClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[self.audience.clone()]);

        let header = decode_header(token).map_err(|_| TokenError::Invalid)?;
        let matching: Vec<&VerifierKey> = match header.kid.as_deref() {
            Some(kid) if self.keys.iter().any(|key| key.kid.as_deref() == Some(kid)) => self
                .keys
                .iter()
                .filter(|key| key.kid.as_deref() == Some(kid))
                .collect(),
            _ => self.keys.iter().collect(),
        };

        let mut last_error = TokenError::Invalid;
        for key in matching {
            match decode::<UserClaims>(token, &key.key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(err) => {
                    last_error = TokenError::from(err);
                    if last_error == TokenError::Expired {
                        return Err(TokenError::Expired);
                    }
                }
            }
        }

        Err(last_error)
    }
}

/// Access and refresh tokens sealed into the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateClaims {
    pub state: String,
    #[serde(default)]
    pub next: String,
    pub iat: usize,
    pub exp: usize,
}

/// Seals and opens the signed cookies used by the login flow.
#[derive(Clone)]
pub struct SessionService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

impl SessionService {
    pub fn new(secret: &str, expiry_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::minutes(expiry_minutes),
        }
    }

    pub fn seal(&self, access_token: &str, refresh_token: &str) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            access_token: access_token.to_owned(),
            refresh_token: refresh_token.to_owned(),
            iat: now.timestamp() as usize,
            exp: (now + self.expiry).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn open(&self, token: &str) -> Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.validate_aud = false;
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn seal_state(&self, state: &str, next: &str) -> Result<String> {
        let now = Utc::now();
        let claims = StateClaims {
            state: state.to_owned(),
            next: next.to_owned(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::minutes(STATE_EXPIRY_MINUTES)).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn open_state(&self, token: &str) -> Result<StateClaims> {
        let mut validation = Validation::default();
        validation.validate_aud = false;
        let data = decode::<StateClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Issue a local identity token. Used when no identity provider is
    /// configured, e.g. in development setups.
    pub fn issue_local_token(&self, username: &str, fullname: &str) -> Result<String> {
        let now = Utc::now();
        let claims = LocalClaims {
            sub: username.to_owned(),
            name: fullname.to_owned(),
            aud: LOCAL_AUDIENCE.to_owned(),
            iat: now.timestamp() as usize,
            exp: (now + self.expiry).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalClaims {
    sub: String,
    name: String,
    aud: String,
    iat: usize,
    exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_token_round_trips_through_verifier() {
        let sessions = SessionService::new("test-secret", 60);
        let token = sessions.issue_local_token("psimmerl", "Paul Simmerling").unwrap();
        let verifier = TokenVerifier::hs256("test-secret");
        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, "psimmerl");
        assert_eq!(claims.name, "Paul Simmerling");
    }

    #[test]
    fn verifier_rejects_wrong_secret() {
        let sessions = SessionService::new("test-secret", 60);
        let token = sessions.issue_local_token("psimmerl", "Paul Simmerling").unwrap();
        let verifier = TokenVerifier::hs256("other-secret");
        assert_eq!(verifier.verify(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn session_cookie_round_trips() {
        let sessions = SessionService::new("test-secret", 60);
        let sealed = sessions.seal("access-abc", "refresh-def").unwrap();
        let claims = sessions.open(&sealed).unwrap();
        assert_eq!(claims.access_token, "access-abc");
        assert_eq!(claims.refresh_token, "refresh-def");
    }

    #[test]
    fn state_cookie_round_trips() {
        let sessions = SessionService::new("test-secret", 60);
        let sealed = sessions.seal_state("nonce123", "/samples").unwrap();
        let claims = sessions.open_state(&sealed).unwrap();
        assert_eq!(claims.state, "nonce123");
        assert_eq!(claims.next, "/samples");
    }
}
