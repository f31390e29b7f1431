pub mod jwt;
pub mod oidc;
pub mod roles;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};

use crate::{config::AppConfig, error::AppError, state::AppState};

use jwt::{TokenError, UserClaims, SESSION_COOKIE, STATE_COOKIE};
use roles::Role;

/// The user attached to a request after authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub fullname: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role >= role {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "user {} with role {} is not allowed to perform this action",
                self.username, self.role
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(AppError::unauthorized)
    }
}

/// Authentication middleware: a bearer token is accepted as-is, a session
/// cookie additionally gets an expired access token refreshed. Anything else
/// is redirected to the login flow.
pub async fn authenticate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(request.headers()) {
        match state.verifier.verify(&token) {
            Ok(claims) => return run_as(state, claims, request, next, None).await,
            // There is no refresh token to fall back on for header auth.
            Err(TokenError::Expired) => {}
            Err(TokenError::Invalid) => return AppError::unauthorized().into_response(),
        }
    }

    if let Some(sealed) = cookie_value(request.headers(), SESSION_COOKIE) {
        if let Ok(session) = state.sessions.open(&sealed) {
            match state.verifier.verify(&session.access_token) {
                Ok(claims) => return run_as(state, claims, request, next, None).await,
                Err(TokenError::Expired) => {
                    if let Some((claims, cookie)) = refresh_session(&state, &session).await {
                        return run_as(state, claims, request, next, Some(cookie)).await;
                    }
                }
                Err(TokenError::Invalid) => {}
            }
        }
    }

    login_redirect(&request)
}

async fn run_as(
    state: AppState,
    claims: UserClaims,
    mut request: Request,
    next: Next,
    set_cookie: Option<String>,
) -> Response {
    let user = match user_from_claims(&state, claims) {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    request.extensions_mut().insert(user);
    let mut response = next.run(request).await;
    if let Some(cookie) = set_cookie {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

/// Swap an expired access token for a fresh one via the refresh grant and
/// seal the new pair into a replacement cookie.
async fn refresh_session(
    state: &AppState,
    session: &jwt::SessionClaims,
) -> Option<(UserClaims, String)> {
    let oidc = state.oidc.as_ref()?;
    if session.refresh_token.is_empty() {
        return None;
    }

    let tokens = match oidc.refresh(&session.refresh_token).await {
        Ok(tokens) => tokens,
        Err(err) => {
            tracing::debug!(error = %err, "token refresh failed");
            return None;
        }
    };

    let claims = state.verifier.verify(&tokens.access_token).ok()?;
    let refresh_token = if tokens.refresh_token.is_empty() {
        session.refresh_token.clone()
    } else {
        tokens.refresh_token.clone()
    };
    let sealed = state
        .sessions
        .seal(&tokens.access_token, &refresh_token)
        .ok()?;

    Some((claims, session_cookie(&state.config, &sealed)))
}

fn user_from_claims(state: &AppState, claims: UserClaims) -> Result<AuthenticatedUser, AppError> {
    let mut conn = state.db()?;
    let role = state.roles.role_for(&mut conn, &claims.sub)?;
    Ok(AuthenticatedUser {
        username: claims.sub,
        fullname: claims.name,
        role,
    })
}

fn login_redirect(request: &Request) -> Response {
    let next = request.uri().to_string();
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", &next)
        .finish();
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("/api/oauth2/auth?{query}"))],
    )
        .into_response()
}

/// A token from the Authorization header: a proper Bearer value, or a bare
/// value that looks like a JWT.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.trim();
    token.starts_with("eyJ").then(|| token.to_string())
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

pub fn session_cookie(config: &AppConfig, value: &str) -> String {
    build_cookie(config, SESSION_COOKIE, value, None)
}

pub fn state_cookie(config: &AppConfig, value: &str) -> String {
    build_cookie(config, STATE_COOKIE, value, Some(600))
}

pub fn expired_cookie(config: &AppConfig, name: &str) -> String {
    build_cookie(config, name, "", Some(0))
}

fn build_cookie(config: &AppConfig, name: &str, value: &str, max_age: Option<i64>) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=None");
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if config.session_cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_accepts_header_and_raw_forms() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer eyJabc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("eyJabc.def.ghi".to_string()));

        // Any well formed Bearer value counts, JWT shaped or not.
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-jwt"),
        );
        assert_eq!(bearer_token(&headers), Some("not-a-jwt".to_string()));

        // A bare value is only taken when it looks like a JWT.
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("eyJabc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("eyJabc.def.ghi".to_string()));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn cookie_value_picks_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; grasp_session=abc.def.ghi; last=2"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
