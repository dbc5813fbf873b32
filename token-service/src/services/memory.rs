//! In-process storage used by tests and local development.
//!
//! Every trait method runs inside one critical section, which gives the same
//! atomicity the PostgreSQL adapter gets from row locks and transactions. The
//! lock is never held across an `.await`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{
    HealthCheck, OtpStore, PrincipalDirectory, RefreshTokenStore, RoleAssignmentStore,
};
use crate::models::{OneTimePasscode, Principal, RefreshToken, Revocation, Role, RoleAssignment};

#[derive(Default)]
struct Inner {
    principals: HashMap<Uuid, Principal>,
    roles: HashMap<Uuid, Role>,
    assignments: Vec<RoleAssignment>,
    passcodes: HashMap<Uuid, OneTimePasscode>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_principal(&self, email: &str) -> Principal {
        let principal = Principal::new(email.to_string());
        self.inner()
            .principals
            .insert(principal.principal_id, principal.clone());
        principal
    }

    /// Assign a role by name, creating the role on first use.
    pub fn assign_role(&self, principal_id: Uuid, role_name: &str) {
        let mut inner = self.inner();
        let existing = inner
            .roles
            .values()
            .find(|r| r.role_name == role_name)
            .map(|r| r.role_id);
        let role_id = match existing {
            Some(role_id) => role_id,
            None => {
                let role = Role::new(role_name.to_string());
                let role_id = role.role_id;
                inner.roles.insert(role_id, role);
                role_id
            }
        };

        let assignment = RoleAssignment {
            principal_id,
            role_id,
        };
        if !inner.assignments.contains(&assignment) {
            inner.assignments.push(assignment);
        }
    }

    pub fn unassign_role(&self, principal_id: Uuid, role_name: &str) {
        let mut inner = self.inner();
        let role_id = inner
            .roles
            .values()
            .find(|r| r.role_name == role_name)
            .map(|r| r.role_id);
        if let Some(role_id) = role_id {
            inner
                .assignments
                .retain(|a| !(a.principal_id == principal_id && a.role_id == role_id));
        }
    }

    pub fn passcodes_for(&self, principal_id: Uuid) -> Vec<OneTimePasscode> {
        self.inner()
            .passcodes
            .values()
            .filter(|p| p.principal_id == principal_id)
            .cloned()
            .collect()
    }

    pub fn refresh_tokens_for(&self, principal_id: Uuid) -> Vec<RefreshToken> {
        let mut tokens: Vec<RefreshToken> = self
            .inner()
            .refresh_tokens
            .values()
            .filter(|t| t.principal_id == principal_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.issued_utc);
        tokens
    }
}

#[async_trait]
impl HealthCheck for InMemoryStore {
    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryStore {
    async fn find_principal_by_id(&self, principal_id: Uuid) -> anyhow::Result<Option<Principal>> {
        Ok(self.inner().principals.get(&principal_id).cloned())
    }

    async fn find_principal_by_email(&self, email: &str) -> anyhow::Result<Option<Principal>> {
        Ok(self
            .inner()
            .principals
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

#[async_trait]
impl RoleAssignmentStore for InMemoryStore {
    async fn find_role_names(&self, principal_id: Uuid) -> anyhow::Result<Vec<String>> {
        let inner = self.inner();
        let mut names: Vec<String> = inner
            .assignments
            .iter()
            .filter(|a| a.principal_id == principal_id)
            .filter_map(|a| inner.roles.get(&a.role_id))
            .map(|r| r.role_name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl OtpStore for InMemoryStore {
    async fn replace_otp(&self, otp: &OneTimePasscode) -> anyhow::Result<()> {
        let mut inner = self.inner();
        inner
            .passcodes
            .retain(|_, p| p.principal_id != otp.principal_id);
        inner.passcodes.insert(otp.otp_id, otp.clone());
        Ok(())
    }

    async fn find_otp_for_principal(
        &self,
        principal_id: Uuid,
    ) -> anyhow::Result<Option<OneTimePasscode>> {
        Ok(self
            .inner()
            .passcodes
            .values()
            .find(|p| p.principal_id == principal_id)
            .cloned())
    }

    async fn consume_otp(&self, otp_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.inner().passcodes.remove(&otp_id).is_some())
    }

    async fn record_failed_otp_attempt(
        &self,
        otp_id: Uuid,
        max_attempts: i32,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner();
        let Some(passcode) = inner.passcodes.get_mut(&otp_id) else {
            return Ok(false);
        };

        passcode.attempt_count += 1;
        if passcode.attempt_count >= max_attempts {
            inner.passcodes.remove(&otp_id);
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> anyhow::Result<()> {
        let mut inner = self.inner();
        if inner
            .refresh_tokens
            .values()
            .any(|t| t.token_hash == token.token_hash)
        {
            anyhow::bail!("duplicate refresh token hash");
        }
        inner.refresh_tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<RefreshToken>> {
        Ok(self
            .inner()
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn find_refresh_token_by_id(
        &self,
        token_id: Uuid,
    ) -> anyhow::Result<Option<RefreshToken>> {
        Ok(self.inner().refresh_tokens.get(&token_id).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        presented_id: Uuid,
        revocation: &Revocation,
        successor: &RefreshToken,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner();
        match inner.refresh_tokens.get_mut(&presented_id) {
            Some(presented) if !presented.is_revoked() => {
                presented.revoke(revocation, Some(successor.token_id));
            }
            _ => return Ok(false),
        }
        inner
            .refresh_tokens
            .insert(successor.token_id, successor.clone());
        Ok(true)
    }

    async fn revoke_refresh_token(
        &self,
        token_id: Uuid,
        revocation: &Revocation,
    ) -> anyhow::Result<bool> {
        match self.inner().refresh_tokens.get_mut(&token_id) {
            Some(token) if !token.is_revoked() => {
                token.revoke(revocation, None);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(
        &self,
        principal_id: Uuid,
        revocation: &Revocation,
    ) -> anyhow::Result<u64> {
        let mut revoked = 0;
        for token in self
            .inner()
            .refresh_tokens
            .values_mut()
            .filter(|t| t.principal_id == principal_id && t.is_active_at(revocation.revoked_utc))
        {
            token.revoke(revocation, None);
            revoked += 1;
        }
        Ok(revoked)
    }
}
