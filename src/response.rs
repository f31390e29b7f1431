use axum::Json;
use serde::Serialize;

/// Envelope shared by every endpoint: the payload under `response`, a
/// `success` flag and a `message` that is empty unless something went wrong.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub response: T,
    pub success: bool,
    pub message: String,
}

pub fn ok<T: Serialize>(response: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        response,
        success: true,
        message: String::new(),
    })
}
