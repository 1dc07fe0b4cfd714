use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::model::Id;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Not authenticated, Login again to perform actions.")]
    InvalidToken,
    #[error("Not authenticated, Login again to perform action.")]
    TokenRevoked,
    #[error("User Not Found")]
    UnknownUser,
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

pub fn hash_password(password: &str) -> Result<String, SecurityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| SecurityError::Hashing(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, SecurityError> {
    let parsed = PasswordHash::new(hash).map_err(|e| SecurityError::Hashing(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Id, SecurityError> {
        Uuid::parse_str(&self.sub).map_err(|_| SecurityError::InvalidToken)
    }
}

/// Identity attached to a request once its bearer token checks out.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Id,
    pub email: String,
    pub token: String,
}

/// Issues and verifies HS256 session tokens.
pub struct TokenService {
    secret: SecretString,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// `ttl_hours` is clamped to `SecurityConfig::MAX_TOKEN_TTL_HOURS`.
    pub fn new(secret: SecretString, ttl_hours: u64) -> Self {
        let hours = ttl_hours.min(SecurityConfig::MAX_TOKEN_TTL_HOURS) as i64;
        Self {
            secret,
            ttl: Duration::hours(hours),
        }
    }

    pub fn issue(&self, user_id: Id, email: &str) -> Result<String, SecurityError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .map_err(|e| SecurityError::TokenGeneration(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, SecurityError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|_| SecurityError::InvalidToken)
    }
}
