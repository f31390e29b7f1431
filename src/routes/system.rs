use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::history;
use crate::response::{ok, ApiResponse};
use crate::state::AppState;

/// Identity and role of the caller, resolved by the auth middleware.
pub async fn user_info(user: AuthenticatedUser) -> Json<ApiResponse<Value>> {
    ok(json!({
        "name": user.fullname,
        "username": user.username,
        "role": user.role.name(),
        "role_index": user.role.index(),
    }))
}

pub async fn all_history(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<Value>>>> {
    info!("getting action history");
    let mut conn = state.db()?;
    Ok(ok(history::list_actions(&mut conn, None)?))
}

pub async fn user_history(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Value>>>> {
    info!(username, "getting action history");
    let mut conn = state.db()?;
    Ok(ok(history::list_actions(&mut conn, Some(&username))?))
}
