use serde::{Deserialize, Serialize};

/// JWT payload carried by every authenticated request.
///
/// `sub` is the user id, `exp` a unix timestamp, and `admin` mirrors the
/// issuing user's admin flag so purely claim-based checks can skip a
/// database round trip. Role checks that matter consult the users table.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
    pub admin: bool,
}

/// Verified claims, inserted into request extensions by the auth guards.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);
