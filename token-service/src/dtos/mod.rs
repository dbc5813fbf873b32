pub mod auth;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body rendered by `service_core::error::AppError`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Unauthorized")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
