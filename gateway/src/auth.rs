//! Token verification for the two client protocols: bearer header for SSE,
//! query parameter for the WebSocket pre-upgrade handshake. The core only
//! verifies tokens that some external issuer minted; it never mints them.
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub tenant_id: Uuid,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
}

pub fn verify(token: &str, secret: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}

/// Extracts the bearer token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(header_value: Option<&str>) -> Result<&str, AuthError> {
    header_value
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(secret: &str, claims: &Claims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn round_trips_valid_token() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let token = token_for("secret", &claims);
        let verified = verify(&token, "secret").unwrap();
        assert_eq!(verified.sub, claims.sub);
    }

    #[test]
    fn rejects_token_signed_with_a_different_secret() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let token = token_for("secret", &claims);
        assert!(verify(&token, "other-secret").is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            exp: chrono::Utc::now().timestamp() - 10,
        };
        let token = token_for("secret", &claims);
        assert!(verify(&token, "secret").is_err());
    }

    #[test]
    fn bearer_token_requires_the_prefix() {
        assert!(bearer_token(Some("Bearer abc")).is_ok());
        assert!(bearer_token(Some("abc")).is_err());
        assert!(bearer_token(None).is_err());
    }
}
