//! Password hashing — argon2id with PHC-string storage.

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
  password_hash::SaltString,
};
use rand_core::OsRng;

use crate::{Error, Result};

/// Hash a plaintext password into a PHC string, e.g. `$argon2id$v=19$…`.
/// Salts come from the OS RNG; parameters are the argon2 defaults.
pub fn hash_password(password: &str) -> Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|hash| hash.to_string())
    .map_err(|e| Error::PasswordHash(e.to_string()))
}

/// Verify a plaintext password against a stored PHC string.
///
/// Returns `Ok(false)` on mismatch; `Err` only when the stored string itself
/// is not a valid PHC hash.
pub fn verify_password(password: &str, phc: &str) -> Result<bool> {
  let parsed = PasswordHash::new(phc)
    .map_err(|e| Error::PasswordHash(e.to_string()))?;
  Ok(
    Argon2::default()
      .verify_password(password.as_bytes(), &parsed)
      .is_ok(),
  )
}
