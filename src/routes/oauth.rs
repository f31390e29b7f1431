use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::jwt::{SESSION_COOKIE, STATE_COOKIE};
use crate::auth::oidc::{random_state, OidcClient};
use crate::auth::{cookie_value, expired_cookie, session_cookie, state_cookie};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

fn oidc_client(state: &AppState) -> Result<&OidcClient, AppError> {
    state.oidc.as_deref().ok_or_else(|| {
        AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Authentication is not configured",
        )
    })
}

fn redirect_with_cookies(location: &str, cookies: Vec<String>) -> AppResult<Response> {
    let mut response =
        (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response();
    for cookie in cookies {
        let value = HeaderValue::from_str(&cookie).map_err(AppError::internal)?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginArgs {
    #[serde(default)]
    pub next: String,
}

/// Start the login flow: remember where the user was headed in a signed
/// state cookie and send them to the identity provider.
pub async fn login(
    State(state): State<AppState>,
    Query(args): Query<LoginArgs>,
) -> AppResult<Response> {
    let oidc = oidc_client(&state)?;
    let login_state = random_state();
    let sealed = state.sessions.seal_state(&login_state, &args.next)?;
    let url = oidc.authorize_url(&login_state)?;
    redirect_with_cookies(&url, vec![state_cookie(&state.config, &sealed)])
}

#[derive(Debug, Deserialize)]
pub struct CallbackArgs {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// Finish the login flow: check the state cookie, trade the code for
/// tokens and seal them into the session cookie.
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(args): Query<CallbackArgs>,
) -> AppResult<Response> {
    let oidc = oidc_client(&state)?;
    let sealed_state = cookie_value(&headers, STATE_COOKIE)
        .ok_or_else(|| AppError::bad_request("Missing login state cookie"))?;
    let login = state
        .sessions
        .open_state(&sealed_state)
        .map_err(|_| AppError::bad_request("Invalid login state"))?;
    if login.state != args.state || args.code.is_empty() {
        return Err(AppError::bad_request("Login state mismatch"));
    }

    let next = if login.next.is_empty() {
        "/".to_string()
    } else {
        login.next.clone()
    };
    match oidc.exchange_code(&args.code).await {
        Ok(tokens) => {
            let sealed = state
                .sessions
                .seal(&tokens.access_token, &tokens.refresh_token)?;
            info!("login completed");
            redirect_with_cookies(
                &next,
                vec![
                    session_cookie(&state.config, &sealed),
                    expired_cookie(&state.config, STATE_COOKIE),
                ],
            )
        }
        Err(err) => {
            warn!(error = %err, "code exchange failed");
            redirect_with_cookies("/", vec![expired_cookie(&state.config, STATE_COOKIE)])
        }
    }
}

pub async fn logout(State(state): State<AppState>) -> AppResult<Response> {
    redirect_with_cookies("/", vec![expired_cookie(&state.config, SESSION_COOKIE)])
}
