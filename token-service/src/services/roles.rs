use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use super::store::RoleAssignmentStore;

/// Reads the roles currently assigned to a principal.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn RoleAssignmentStore>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn RoleAssignmentStore>) -> Self {
        Self { store }
    }

    /// Current role names, de-duplicated and sorted.
    pub async fn roles_for(&self, principal_id: Uuid) -> Result<Vec<String>, AuthError> {
        let names = self.store.find_role_names(principal_id).await?;
        Ok(names
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryStore;

    #[tokio::test]
    async fn test_roles_reflect_current_assignments() {
        let store = Arc::new(InMemoryStore::new());
        let principal = store.add_principal("ada@example.com");
        store.assign_role(principal.principal_id, "reviewer");
        store.assign_role(principal.principal_id, "admin");
        store.assign_role(principal.principal_id, "reviewer");

        let resolver = RoleResolver::new(store.clone());
        let roles = resolver.roles_for(principal.principal_id).await.unwrap();
        assert_eq!(roles, vec!["admin".to_string(), "reviewer".to_string()]);

        store.unassign_role(principal.principal_id, "admin");
        let roles = resolver.roles_for(principal.principal_id).await.unwrap();
        assert_eq!(roles, vec!["reviewer".to_string()]);
    }

    #[tokio::test]
    async fn test_principal_without_roles() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = RoleResolver::new(store);
        assert!(resolver.roles_for(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
