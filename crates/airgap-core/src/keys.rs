//! Password-protected private key material
//!
//! Keys are sealed with ChaCha20-Poly1305 under a 32-byte key derived from
//! the wallet password with Argon2id. The text form stored by persistence
//! collaborators is `CIPHERTEXT/NONCE/SALT/M,T,P` (uppercase hex fields,
//! then the KDF memory cost, iterations and lanes).

use crate::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

const FIELD_SEPARATOR: char = '/';
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Iterations
    pub t_cost: u32,
    /// Lanes
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: Params::DEFAULT_M_COST,
            t_cost: Params::DEFAULT_T_COST,
            p_cost: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and constrained devices
    pub const fn light() -> Self {
        Self {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        }
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(KEY_LEN))
            .map_err(|e| Error::Encryption(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key[..])
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(key)
    }
}

/// Encrypted private key in its persisted form
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedPrivateKey {
    ciphertext: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    salt: [u8; SALT_LEN],
    params: KdfParams,
}

impl EncryptedPrivateKey {
    /// Seal `secret` under `password`
    pub fn encrypt(secret: &[u8], password: &str, params: KdfParams) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = params.derive_key(password, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), secret)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(Self {
            ciphertext,
            nonce,
            salt,
            params,
        })
    }

    /// Open the key; fails with [`Error::WrongPassword`] on authentication failure
    pub fn decrypt(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.params.derive_key(password, &self.salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| Error::WrongPassword)
    }

    /// Re-seal under a new password. Pure: the receiver is not modified.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<Self> {
        let secret = self.decrypt(old_password)?;
        Self::encrypt(&secret, new_password, self.params)
    }

    /// KDF parameters this key was sealed with
    pub fn params(&self) -> KdfParams {
        self.params
    }
}

impl fmt::Display for EncryptedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{},{},{}",
            hex::encode_upper(&self.ciphertext),
            hex::encode_upper(self.nonce),
            hex::encode_upper(self.salt),
            self.params.m_cost,
            self.params.t_cost,
            self.params.p_cost,
            sep = FIELD_SEPARATOR,
        )
    }
}

impl fmt::Debug for EncryptedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPrivateKey")
            .field("len", &self.ciphertext.len())
            .field("params", &self.params)
            .finish()
    }
}

impl FromStr for EncryptedPrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(FIELD_SEPARATOR).collect();
        if fields.len() != 4 {
            return Err(Error::InvalidKey(format!(
                "expected 4 fields, got {}",
                fields.len()
            )));
        }

        let ciphertext =
            hex::decode(fields[0]).map_err(|e| Error::InvalidKey(format!("ciphertext: {}", e)))?;
        let nonce = decode_fixed::<NONCE_LEN>(fields[1], "nonce")?;
        let salt = decode_fixed::<SALT_LEN>(fields[2], "salt")?;

        let costs: Vec<u32> = fields[3]
            .split(',')
            .map(|c| c.parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InvalidKey(format!("kdf params: {}", e)))?;
        let [m_cost, t_cost, p_cost] = costs.as_slice() else {
            return Err(Error::InvalidKey("kdf params: expected 3 values".to_string()));
        };

        Ok(Self {
            ciphertext,
            nonce,
            salt,
            params: KdfParams {
                m_cost: *m_cost,
                t_cost: *t_cost,
                p_cost: *p_cost,
            },
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(field).map_err(|e| Error::InvalidKey(format!("{}: {}", what, e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("{}: wrong length", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let sealed = EncryptedPrivateKey::encrypt(b"secret key", "pw", KdfParams::light()).unwrap();
        assert_eq!(sealed.decrypt("pw").unwrap().as_slice(), b"secret key");
        assert!(matches!(sealed.decrypt("nope"), Err(Error::WrongPassword)));
    }

    #[test]
    fn test_change_password_is_pure() {
        let sealed = EncryptedPrivateKey::encrypt(b"k", "old", KdfParams::light()).unwrap();
        let before = sealed.to_string();

        let resealed = sealed.change_password("old", "new").unwrap();
        assert_eq!(sealed.to_string(), before);
        assert_eq!(resealed.decrypt("new").unwrap().as_slice(), b"k");
        assert!(resealed.decrypt("old").is_err());

        assert!(sealed.change_password("wrong", "new").is_err());
    }

    #[test]
    fn test_text_form_roundtrip() {
        let sealed = EncryptedPrivateKey::encrypt(b"abc", "pw", KdfParams::light()).unwrap();
        let text = sealed.to_string();
        assert_eq!(text.split('/').count(), 4);
        assert!(text.ends_with("/256,1,1"));

        let parsed: EncryptedPrivateKey = text.parse().unwrap();
        assert_eq!(parsed, sealed);
        assert_eq!(parsed.decrypt("pw").unwrap().as_slice(), b"abc");
    }

    #[test]
    fn test_text_form_rejects_garbage() {
        assert!("AB/CD".parse::<EncryptedPrivateKey>().is_err());
        assert!("AB/00/00/1,1,1".parse::<EncryptedPrivateKey>().is_err());
        let sealed = EncryptedPrivateKey::encrypt(b"abc", "pw", KdfParams::light()).unwrap();
        let text = sealed.to_string().replace("256,1,1", "256,x,1");
        assert!(text.parse::<EncryptedPrivateKey>().is_err());
    }
}
