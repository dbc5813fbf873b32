pub mod otp_code;
pub mod principal;
pub mod refresh_token;
pub mod role;

pub use otp_code::OneTimePasscode;
pub use principal::Principal;
pub use refresh_token::{RefreshToken, Revocation};
pub use role::{Role, RoleAssignment};

use sha2::{Digest, Sha256};

/// SHA-256 hex digest used to store codes and tokens at rest.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
