use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Outcome of a rejected admission, mapped onto the API status codes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
}

impl AdmissionError {
    pub fn code(&self) -> u16 {
        match self {
            AdmissionError::BadRequest(_) => 400,
            AdmissionError::NotFound(_) => 404,
            AdmissionError::Forbidden(_) => 403,
            AdmissionError::Internal(_) => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::BadRequest(_) => "BadRequest",
            AdmissionError::NotFound(_) => "NotFound",
            AdmissionError::Forbidden(_) => "Forbidden",
            AdmissionError::Internal(_) => "InternalError",
        }
    }
}

/// Failures while building the review response itself.
#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("patch serialization failed: {0}")]
    Patch(#[from] kube::core::admission::SerializePatchError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({"error": self.to_string()}));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
