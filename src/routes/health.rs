use axum::Json;
use serde_json::{json, Value};

use crate::response::{ok, ApiResponse};

pub async fn health_check() -> Json<ApiResponse<Value>> {
    ok(json!({ "status": "ok" }))
}
