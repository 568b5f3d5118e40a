use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::identity::{Identity, Role};
use crate::ids::UserId;

/// Why a connection attempt was refused. Verification either completes or
/// rejects before any other event on the connection is processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("no token provided")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
}

impl AuthRejection {
    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Claims carried by the portal's bearer tokens.
#[derive(Debug, Deserialize)]
struct Claims {
    id: i64,
    role: Role,
    #[allow(dead_code)]
    exp: usize,
}

/// Validates an opaque bearer token against the portal's shared secret and
/// yields the identity it was issued to. Expired or tampered tokens are
/// rejected without distinguishing the two to the caller.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: Option<&str>) -> Result<Identity, AuthRejection> {
        let token = token.ok_or(AuthRejection::MissingToken)?;
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| AuthRejection::InvalidToken)?;
        Ok(Identity::new(UserId::new(data.claims.id), data.claims.role))
    }
}
