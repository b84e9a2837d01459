use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};

use crate::crypto::kdf;
use crate::crypto::rand::random_bytes;
use crate::error::{KrownoError, Result};

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Password-sealed blob. The serialised form is `salt ‖ nonce ‖ ciphertext`
/// and round-trips byte-exactly; the Poly1305 tag rides at the end of
/// `ciphertext`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(KrownoError::DecryptionFailed(
                "serialised envelope too short".into(),
            ));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[SALT_LEN..SALT_LEN + NONCE_LEN]);
        Ok(Self {
            salt,
            nonce,
            ciphertext: bytes[SALT_LEN + NONCE_LEN..].to_vec(),
        })
    }
}

/// Seal `plaintext` under a password-derived key. Salt and nonce are
/// freshly drawn on every call.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Envelope> {
    let salt = random_bytes::<SALT_LEN>()?;
    let nonce = random_bytes::<NONCE_LEN>()?;
    let key = kdf::derive_key(password, &salt)?;
    let aead = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = aead
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| KrownoError::EncryptionFailed("aead seal failed".into()))?;
    Ok(Envelope {
        salt,
        nonce,
        ciphertext,
    })
}

/// Open an envelope. A wrong password and a tampered ciphertext are
/// indistinguishable here; both fail authentication.
pub fn decrypt(envelope: &Envelope, password: &str) -> Result<Vec<u8>> {
    let key = kdf::derive_key(password, &envelope.salt).map_err(|e| match e {
        KrownoError::WeakPassword(_) => KrownoError::InvalidPassword,
        other => other,
    })?;
    let aead = ChaCha20Poly1305::new(Key::from_slice(&key));
    aead.decrypt(
        Nonce::from_slice(&envelope.nonce),
        envelope.ciphertext.as_ref(),
    )
    .map_err(|_| KrownoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let env = encrypt(b"secret payload", "hunter2").unwrap();
        let plain = decrypt(&env, "hunter2").unwrap();
        assert_eq!(plain, b"secret payload");
    }

    #[test]
    fn wrong_password_fails_auth() {
        let env = encrypt(b"secret", "right").unwrap();
        assert!(matches!(
            decrypt(&env, "wrong"),
            Err(KrownoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let mut env = encrypt(b"secret", "pw").unwrap();
        let last = env.ciphertext.len() - 1;
        env.ciphertext[last] ^= 0x01;
        assert!(matches!(
            decrypt(&env, "pw"),
            Err(KrownoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn serialised_form_round_trips_byte_exact() {
        let env = encrypt(b"bytes", "pw").unwrap();
        let bytes = env.to_bytes();
        let back = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.to_bytes(), bytes);
    }

    #[test]
    fn short_envelope_rejected() {
        assert!(Envelope::from_bytes(&[0u8; 10]).is_err());
    }
}
