#![cfg(feature = "web")]

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::error::AuthError;

/// How long an issued token stays valid.
pub const SESSION_DURATION: Duration = Duration::from_secs(60 * 60);

/// Credential data for login
///
/// Used to receive the JSON login body from the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
}

/// The only role a token can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
}

/// An authenticated admin session
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// The configured admin credential pair.
///
/// The password is kept only as an Argon2 hash computed at startup.
pub struct AdminCredentials {
    username: String,
    password_hash: String,
}

impl AdminCredentials {
    pub fn new(username: &str, password: &str) -> Result<Self, AuthError> {
        Ok(AdminCredentials {
            username: username.to_string(),
            password_hash: hash_password(password)?,
        })
    }

    /// True only if both fields match. The password hash is checked even
    /// when the username is wrong, so both failures take the same time.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let password_ok = verify_password(password, &self.password_hash).unwrap_or(false);
        let username_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        password_ok && username_ok
    }
}

/// Hash a password using Argon2
///
/// # Errors
/// * Returns `AuthError::Hashing` if the password hashing fails
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err(AuthError::Hashing),
    }
}

/// Verify a password against a stored hash
///
/// # Returns
/// * `Result<bool, AuthError>` - True if the password matches, false if not
fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::Hashing)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Issued bearer tokens and the sessions they stand for.
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Session>>,
    duration: Duration,
}

impl Default for SessionTable {
    fn default() -> Self {
        SessionTable::new(SESSION_DURATION)
    }
}

impl SessionTable {
    pub fn new(duration: Duration) -> Self {
        SessionTable {
            sessions: RwLock::new(HashMap::new()),
            duration,
        }
    }

    /// Create and store a new admin session, returning its token.
    ///
    /// Expired sessions are dropped at the same time.
    pub fn issue(&self) -> String {
        let token = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let session = Session {
            role: Role::Admin,
            expires_at: now + self.duration,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), session);

        token
    }

    /// The role behind `token`, if it exists and has not expired.
    pub fn validate(&self, token: &str) -> Option<Role> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);

        match sessions.get(token) {
            Some(session) if session.expires_at > SystemTime::now() => Some(session.role),
            _ => None,
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(token).is_some()
    }
}

/// Check `username`/`password` against the admin pair and issue a token.
///
/// Any mismatch yields the same [`AuthError::InvalidCredentials`].
pub fn authenticate(
    credentials: &AdminCredentials,
    sessions: &SessionTable,
    username: &str,
    password: &str,
) -> Result<String, AuthError> {
    if !credentials.verify(username, password) {
        warn!("rejected admin login attempt");
        return Err(AuthError::InvalidCredentials);
    }
    info!("admin logged in");
    Ok(sessions.issue())
}
