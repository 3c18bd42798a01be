//! Password hashing.
//!
//! Two schemes are supported. `argon2` stores a PHC string with a per-user
//! salt. `sha256` stores the hex digest of the password concatenated with a
//! deployment-wide salt, which is what existing user tables carry.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use secrecy::{ExposeSecret, Secret};
use service_core::error::{AppError, ErrorKind};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Hashes and verifies user passwords.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AppError>;

    /// Whether `password` produces `stored`. Malformed hashes never verify.
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Hex SHA-256 of password + salt.
pub struct SaltedSha256Hasher {
    salt: Secret<String>,
}

impl SaltedSha256Hasher {
    pub fn new(salt: Secret<String>) -> Self {
        Self { salt }
    }

    fn digest(&self, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(self.salt.expose_secret().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PasswordHasher for SaltedSha256Hasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        Ok(self.digest(password))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let computed = self.digest(password);
        computed.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

/// Argon2id with a random salt per hash.
#[derive(Default)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                AppError::use_case(ErrorKind::Operational, "Failed to hash password")
                    .with_cause(anyhow::anyhow!("{}", e))
            })
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Supported hashing schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Sha256,
    Argon2,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown password hasher: {0}")]
pub struct UnknownScheme(pub String);

impl std::str::FromStr for HashScheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "argon2" => Ok(Self::Argon2),
            _ => Err(UnknownScheme(s.to_string())),
        }
    }
}

pub fn hasher_for(scheme: HashScheme, salt: &Secret<String>) -> Arc<dyn PasswordHasher> {
    match scheme {
        HashScheme::Sha256 => Arc::new(SaltedSha256Hasher::new(Secret::new(
            salt.expose_secret().clone(),
        ))),
        HashScheme::Argon2 => Arc::new(Argon2Hasher),
    }
}
