use crate::error::{AuthError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};

#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 1000,
        }
    }
}

impl PasswordConfig {
    pub fn from_env() -> Self {
        Self {
            min_length: std::env::var("PASSWORD_MIN_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            max_length: std::env::var("PASSWORD_MAX_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        }
    }
}

/// Hashes, verifies, and policy-checks user passwords.
#[derive(Clone)]
pub struct PasswordService {
    config: PasswordConfig,
}

impl PasswordService {
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }

    /// Hash a password with Argon2id for storage.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .to_string();

        Ok(hash)
    }

    /// Verify a submitted password against a stored hash.
    pub fn validate(&self, password: &str, hash: &str) -> Result<()> {
        let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Internal(e.to_string()))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(()),
            Err(argon2::password_hash::Error::Password) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(AuthError::Internal(e.to_string())),
        }
    }

    /// Check if a password may be used for a user at all.
    pub fn ok_for_user(&self, password: &str) -> Result<()> {
        if password.len() < self.config.min_length {
            return Err(AuthError::BadRequest(format!(
                "password must be at least {} characters",
                self.config.min_length
            )));
        }

        if password.len() > self.config.max_length {
            return Err(AuthError::BadRequest(format!(
                "password may not exceed {} characters",
                self.config.max_length
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PasswordService {
        PasswordService::new(PasswordConfig::default())
    }

    #[test]
    fn test_hash_and_validate() {
        let svc = service();
        let hash = svc.hash("swordfish").expect("hash failed");

        assert!(svc.validate("swordfish", &hash).is_ok());
        assert!(matches!(
            svc.validate("swordfish2", &hash),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_hashes_are_salted() {
        let svc = service();
        let a = svc.hash("swordfish").unwrap();
        let b = svc.hash("swordfish").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_length_policy() {
        let svc = service();
        assert!(svc.ok_for_user("short").is_err());
        assert!(svc.ok_for_user("long enough").is_ok());

        let svc = PasswordService::new(PasswordConfig {
            min_length: 1,
            max_length: 10,
        });
        assert!(svc.ok_for_user("this one is too long").is_err());
    }
}
