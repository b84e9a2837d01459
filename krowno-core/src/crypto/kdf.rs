use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::{KrownoError, Result};

pub const KEY_LEN: usize = 32;

/// KDF cost parameters stored in the archive header (memory in KiB).
pub const OPS: u32 = 3;
pub const MEM_KIB: u32 = 64 * 1024;
const LANES: u32 = 1;

/// Derive a symmetric key from a password with Argon2id.
pub fn derive_key(password: &str, salt: &[u8; 32]) -> Result<[u8; KEY_LEN]> {
    if password.is_empty() {
        return Err(KrownoError::WeakPassword("empty password"));
    }
    let params = Params::new(MEM_KIB, OPS, LANES, Some(KEY_LEN))
        .map_err(|e| KrownoError::EncryptionFailed(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; KEY_LEN];
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| KrownoError::EncryptionFailed(e.to_string()))?;
    Ok(key)
}
