use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;
use thiserror::Error;

/// Generates worker secrets and hashes/verifies them with a salted adaptive
/// hash. Stateless: hashing is CPU-bound by design, at a work factor that costs
/// roughly 100ms per operation (SPEC_FULL.md §5), so callers must not hold a
/// lock across a call into this store.
#[derive(Default, Clone, Copy)]
pub struct CredentialStore;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to hash secret: {0}")]
    HashingFailed(String),
    #[error("secret does not match stored hash")]
    Mismatch,
}

impl CredentialStore {
    /// Mints a fresh 128-bit secret, hex-encoded. Returned in plaintext exactly
    /// once by the caller (at first registration); never persisted except as a
    /// hash.
    pub fn generate_secret(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn hash_secret(&self, secret: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::HashingFailed(e.to_string()))
    }

    /// Constant-time verification via argon2's own comparison, which never
    /// short-circuits on a byte mismatch.
    pub fn verify_secret(&self, secret: &str, stored_hash: &str) -> Result<(), CredentialError> {
        let parsed_hash = PasswordHash::new(stored_hash)
            .map_err(|e| CredentialError::HashingFailed(e.to_string()))?;
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed_hash)
            .map_err(|_| CredentialError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn round_trips_secret_through_hash_and_verify() {
        let store = CredentialStore;
        let secret = store.generate_secret();
        let hash = store.hash_secret(&secret).unwrap();

        store.verify_secret(&secret, &hash).expect("secret should verify");
        store
            .verify_secret("not-the-secret", &hash)
            .expect_err("wrong secret must not verify");
    }

    #[test]
    fn generated_secrets_are_128_bits_hex_encoded() {
        let store = CredentialStore;
        let secret = store.generate_secret();
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// SPEC_FULL.md §8: "the plaintext secret is returned at most once"; this
    /// checks the other half of that invariant holds for arbitrary secrets,
    /// not just the one hand-picked pair above - any string other than the
    /// one that was hashed must fail verification. Argon2 is deliberately
    /// slow (~100ms/op), so the case count is kept small.
    #[test]
    fn only_the_hashed_secret_ever_verifies() {
        use proptest::strategy::Strategy;
        use proptest::test_runner::{Config, TestRunner};

        let store = CredentialStore;
        let mut runner = TestRunner::new(Config {
            cases: 8,
            ..Config::default()
        });
        let strategy = ("[a-zA-Z0-9]{1,32}", "[a-zA-Z0-9]{1,32}");

        runner
            .run(&strategy, |(secret, other)| {
                let hash = store.hash_secret(&secret).unwrap();
                store.verify_secret(&secret, &hash).unwrap();
                if other != secret {
                    store
                        .verify_secret(&other, &hash)
                        .expect_err("a different secret must never verify");
                }
                Ok(())
            })
            .unwrap();
    }
}
