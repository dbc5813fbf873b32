//! Role model - named roles and their assignment to principals.

use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub role_name: String,
}

impl Role {
    pub fn new(role_name: String) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            role_name,
        }
    }
}

/// Many-to-many link between principals and roles. Read-only for this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRow)]
pub struct RoleAssignment {
    pub principal_id: Uuid,
    pub role_id: Uuid,
}
