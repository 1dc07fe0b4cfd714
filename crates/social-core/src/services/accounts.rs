use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::model::{Id, RevokedToken, User};
use crate::security::{hash_password, verify_password, AuthContext, SecurityError, TokenService};
use crate::store::Store;
use crate::validation::{
    is_reserved_username, is_strong_password, is_valid_email, is_valid_name, is_valid_username,
    normalize_email,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Sign-up, login, logout and bearer-token authentication.
#[derive(Clone)]
pub struct AccountService {
    store: Store,
    tokens: Arc<TokenService>,
}

impl AccountService {
    pub fn new(store: Store, tokens: Arc<TokenService>) -> Self {
        Self { store, tokens }
    }

    /// Creates the account and returns its id with a fresh session token.
    pub fn register(&self, req: SignupRequest) -> Result<(Id, String)> {
        let email = normalize_email(&req.email);
        let username = req.username.trim().to_lowercase();
        let name = req.name.trim().to_string();

        if !is_valid_name(&name)
            || !is_valid_email(&email)
            || !is_valid_username(&username)
            || !is_strong_password(&req.password)
        {
            return Err(CoreError::invalid_input());
        }

        self.store.read(|db| {
            if db.email_taken(&email) {
                return Err(CoreError::Conflict("Email exists already".into()));
            }
            if db.username_taken(&username) {
                return Err(CoreError::Conflict("Username exists already".into()));
            }
            Ok(())
        })?;
        if is_reserved_username(&username) {
            return Err(CoreError::validation("This username is not allowed"));
        }

        let hash = hash_password(&req.password)?;
        let user = User::new(name, email, username, hash);
        let (id, email) = (user.id, user.email.clone());
        // insert_user re-checks uniqueness under the write lock
        self.store.write(|db| db.insert_user(user))?;

        let token = self.tokens.issue(id, &email)?;
        info!(user_id = %id, "User signed up");
        Ok((id, token))
    }

    pub fn login(&self, req: LoginRequest) -> Result<String> {
        let email = normalize_email(&req.email);
        if !is_valid_email(&email) || !is_strong_password(&req.password) {
            return Err(CoreError::invalid_input());
        }

        let (id, hash) = self
            .store
            .read(|db| db.user_by_email(&email).map(|u| (u.id, u.password_hash.clone())))
            .ok_or_else(|| {
                CoreError::BadRequest("Could not find any user with the particular email id".into())
            })?;

        if !verify_password(&req.password, &hash)? {
            warn!(user_id = %id, "Rejected login with wrong password");
            return Err(CoreError::Forbidden("Password Incorrect".into()));
        }

        let token = self.tokens.issue(id, &email)?;
        info!(user_id = %id, "User logged in");
        Ok(token)
    }

    /// Revokes the session token. Expired revocations are pruned on the way.
    pub fn logout(&self, auth: &AuthContext) -> Result<()> {
        let expires_at = self
            .tokens
            .verify(&auth.token)
            .ok()
            .and_then(|c| Utc.timestamp_opt(c.exp, 0).single())
            .unwrap_or_else(Utc::now);

        self.store.write(|db| {
            if db.revoked_tokens.contains_key(&auth.token) {
                return Err(CoreError::unauthorized(
                    "Logout already executed for this User",
                ));
            }
            let now = Utc::now();
            db.revoked_tokens.retain(|_, t| t.expires_at > now);
            db.revoked_tokens.insert(
                auth.token.clone(),
                RevokedToken {
                    token: auth.token.clone(),
                    revoked_at: now,
                    expires_at,
                },
            );
            Ok(())
        })?;
        info!(user_id = %auth.user_id, "User logged out");
        Ok(())
    }

    /// Resolves a bearer token to a live, non-revoked user.
    pub fn authenticate(&self, token: &str) -> Result<AuthContext> {
        let claims = self.tokens.verify(token)?;
        let user_id = claims.user_id()?;

        self.store.read(|db| {
            if db.revoked_tokens.contains_key(token) {
                return Err(SecurityError::TokenRevoked);
            }
            if db.find_user(&user_id).is_none() {
                return Err(SecurityError::UnknownUser);
            }
            Ok(())
        })?;

        Ok(AuthContext {
            user_id,
            email: claims.email,
            token: token.to_string(),
        })
    }
}
