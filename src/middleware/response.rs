use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::ApiError;

/// Successful payload, sent as `{"success": true, "data": ...}`
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { data }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    data: &'a T,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let envelope = Envelope {
            success: true,
            data: &self.data,
        };
        match serde_json::to_vec(&envelope) {
            Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                ApiError::internal_server_error("Failed to serialize response data").into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;
