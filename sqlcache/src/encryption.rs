use crate::Error;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use parking_lot::RwLock;

/// Writes allowed on one key before a fresh key is generated.
const WRITES_PER_KEY: u64 = 1 << 20;

const NONCE_LEN: usize = 24;

/// A rotating set of XChaCha20-Poly1305 keys.
///
/// Encryption always uses the newest key and returns its generation id with
/// the ciphertext; decryption selects the key by the stored id, so rows
/// written under older generations remain readable without re-encryption.
/// Keys live only in process memory; the cache they protect is disposable.
pub struct KeyChain {
    inner: RwLock<Inner>,
}

struct Inner {
    keys: Vec<Key>,
    active_uses: u64,
}

impl KeyChain {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                keys: vec![XChaCha20Poly1305::generate_key(&mut OsRng)],
                active_uses: 0,
            }),
        }
    }

    /// Returns `(ciphertext, nonce, key_id)`.
    pub fn encrypt(&self, data: &[u8]) -> Result<(Vec<u8>, Vec<u8>, u32), Error> {
        let mut inner = self.inner.write();
        if inner.active_uses >= WRITES_PER_KEY {
            inner.keys.push(XChaCha20Poly1305::generate_key(&mut OsRng));
            inner.active_uses = 0;
            tracing::debug!(generation = inner.keys.len() - 1, "rotated encryption key");
        }
        let kid = inner.keys.len() - 1;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = XChaCha20Poly1305::new(&inner.keys[kid])
            .encrypt(&nonce, data)
            .map_err(|_| Error::Encrypt("sealing failed".to_string()))?;
        inner.active_uses += 1;
        Ok((ciphertext, nonce.to_vec(), kid as u32))
    }

    pub fn decrypt(&self, data: &[u8], nonce: &[u8], kid: u32) -> Result<Vec<u8>, Error> {
        if nonce.len() != NONCE_LEN {
            return Err(Error::Decrypt(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        let inner = self.inner.read();
        let key = inner
            .keys
            .get(kid as usize)
            .ok_or(Error::UnknownKey(kid))?;
        XChaCha20Poly1305::new(key)
            .decrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| Error::Decrypt("ciphertext authentication failed".to_string()))
    }
}

impl Default for KeyChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let keychain = KeyChain::new();
        let (ciphertext, nonce, kid) = keychain.encrypt(b"some object bytes").unwrap();
        assert_ne!(ciphertext, b"some object bytes");
        assert_eq!(kid, 0);
        assert_eq!(
            keychain.decrypt(&ciphertext, &nonce, kid).unwrap(),
            b"some object bytes"
        );
    }

    #[test]
    fn unknown_key_id_is_a_hard_error() {
        let keychain = KeyChain::new();
        let (ciphertext, nonce, _) = keychain.encrypt(b"x").unwrap();
        assert!(matches!(
            keychain.decrypt(&ciphertext, &nonce, 7),
            Err(Error::UnknownKey(7))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let keychain = KeyChain::new();
        let (mut ciphertext, nonce, kid) = keychain.encrypt(b"x").unwrap();
        ciphertext[0] ^= 0xff;
        assert!(matches!(
            keychain.decrypt(&ciphertext, &nonce, kid),
            Err(Error::Decrypt(_))
        ));
    }

    #[test]
    fn nonces_are_unique_per_encryption() {
        let keychain = KeyChain::new();
        let (_, nonce_a, _) = keychain.encrypt(b"x").unwrap();
        let (_, nonce_b, _) = keychain.encrypt(b"x").unwrap();
        assert_ne!(nonce_a, nonce_b);
    }
}
