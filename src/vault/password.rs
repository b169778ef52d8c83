use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::errors::VaultError;

fn argon2_instance() -> Argon2<'static> {
    #[cfg(test)]
    {
        let params = argon2::Params::new(256, 1, 1, None).expect("argon2 test params");
        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
    }
    #[cfg(not(test))]
    {
        Argon2::default()
    }
}

pub fn hash_password(password: &str) -> Result<String, VaultError> {
    let salt = SaltString::generate(&mut OsRng);
    argon2_instance()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VaultError::PasswordHash(e.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> Result<bool, VaultError> {
    let parsed = PasswordHash::new(hash).map_err(|e| VaultError::PasswordHash(e.to_string()))?;
    Ok(argon2_instance()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Runs the hash on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password_blocking(password: String) -> Result<String, VaultError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| VaultError::PasswordHash(e.to_string()))?
}

pub async fn verify_password_blocking(hash: String, password: String) -> Result<bool, VaultError> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &password))
        .await
        .map_err(|e| VaultError::PasswordHash(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("super-secret").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "super-secret").expect("verify ok"));
        assert!(!verify_password(&hash, "wrong").expect("verify wrong"));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_rejects_invalid_hash() {
        assert!(matches!(
            verify_password("not-a-hash", "secret"),
            Err(VaultError::PasswordHash(_))
        ));
    }

    #[tokio::test]
    async fn blocking_wrappers_agree() {
        let hash = hash_password_blocking("pw-123456".to_string()).await.unwrap();
        assert!(verify_password_blocking(hash.clone(), "pw-123456".to_string())
            .await
            .unwrap());
        assert!(!verify_password_blocking(hash, "nope".to_string()).await.unwrap());
    }
}
