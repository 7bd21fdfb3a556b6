use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tortuga_core::payment::ProviderError;
use tortuga_core::repository::StoreError;
use tortuga_order::{BookingError, CheckoutError, ReconcileError};

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    UpstreamError(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::UpstreamError(msg) => {
                tracing::error!("Payment provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Payment provider unavailable".to_string())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::InternalServerError(e.to_string())
    }
}

impl From<BookingError> for AppError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::DepartureNotFound(_) => AppError::NotFoundError(e.to_string()),
            BookingError::Store(inner) => inner.into(),
            BookingError::Validation(_)
            | BookingError::DepartureStarted(_)
            | BookingError::Inventory(_)
            | BookingError::Pricing(_) => AppError::ValidationError(e.to_string()),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::NotFound(_) => AppError::NotFoundError(e.to_string()),
            ReconcileError::Store(inner) => inner.into(),
            ReconcileError::Cancelled(_) | ReconcileError::Inventory(_) | ReconcileError::Transition(_) => {
                AppError::ConflictError(e.to_string())
            }
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::NotFound(_) => AppError::NotFoundError(e.to_string()),
            CheckoutError::NotPayable { .. } => AppError::ConflictError(e.to_string()),
            CheckoutError::ProviderDisabled(_) => AppError::ValidationError(e.to_string()),
            CheckoutError::Provider(ProviderError::NotConfigured(msg)) => AppError::InternalServerError(msg),
            CheckoutError::Provider(inner) => AppError::UpstreamError(inner.to_string()),
            CheckoutError::Store(inner) => inner.into(),
        }
    }
}
