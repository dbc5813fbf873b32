//! Principal model - the identity a token set is issued for.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Principal as seen by the token service: identity only, never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Principal {
    pub principal_id: Uuid,
    pub email: String,
    pub created_utc: DateTime<Utc>,
}

impl Principal {
    pub fn new(email: String) -> Self {
        Self {
            principal_id: Uuid::new_v4(),
            email,
            created_utc: Utc::now(),
        }
    }
}
