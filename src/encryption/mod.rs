//! Application-level at-rest encryption.
//!
//! Implements the exact construction this crate specifies rather than
//! reusing either teacher reference's AES-256-GCM (both `sync::cloud` and
//! `elisplash-paw`'s `engine/engram/encryption.rs` encrypt with AES-GCM):
//! a PBKDF2-HMAC-SHA256 derived key, then an HMAC-SHA256-keystream stream
//! cipher run in counter mode, with an HMAC-SHA256 tag over
//! `nonce || ciphertext`. Record format on disk is
//! `nonce(16B) || ciphertext || tag(32B)`.
//!
//! The general shape — a persisted random salt, selective field
//! encryption so structured columns stay queryable, nonce-prefixed
//! records — is grounded on those same two references.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{MeshError, Result};

const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// A key derived from a passphrase and a persisted salt, ready to
/// encrypt/decrypt records.
#[derive(Clone)]
pub struct EncryptionKey {
    key: [u8; KEY_LEN],
}

impl EncryptionKey {
    /// Derive a key from `passphrase` and `salt` using PBKDF2-HMAC-SHA256
    /// with 100,000 iterations.
    pub fn derive(passphrase: &str, salt: &[u8; SALT_LEN]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        Self { key }
    }

    /// Generate a fresh random salt. Callers persist this once per store
    /// and reuse it for every subsequent open.
    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    fn keystream(&self, nonce: &[u8; NONCE_LEN], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut counter: u64 = 0;
        while out.len() < len {
            let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
            mac.update(nonce);
            mac.update(&counter.to_be_bytes());
            let block = mac.finalize().into_bytes();
            out.extend_from_slice(&block);
            counter += 1;
        }
        out.truncate(len);
        out
    }

    fn tag(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(nonce);
        mac.update(ciphertext);
        mac.finalize().into_bytes().into()
    }

    /// Encrypt `plaintext`, producing `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let keystream = self.keystream(&nonce, plaintext.len());
        let ciphertext: Vec<u8> = plaintext.iter().zip(keystream.iter()).map(|(p, k)| p ^ k).collect();
        let tag = self.tag(&nonce, &ciphertext);

        let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        record.extend_from_slice(&tag);
        record
    }

    /// Decrypt a `nonce || ciphertext || tag` record, verifying the tag
    /// in constant time before returning the plaintext.
    pub fn decrypt(&self, record: &[u8]) -> Result<Vec<u8>> {
        if record.len() < NONCE_LEN + TAG_LEN {
            return Err(MeshError::Encryption("encrypted record is too short".to_string()));
        }
        let (nonce_bytes, rest) = record.split_at(NONCE_LEN);
        let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let expected_tag = self.tag(&nonce, ciphertext);
        if !constant_time_eq(&expected_tag, tag_bytes) {
            return Err(MeshError::Encryption(
                "authentication tag mismatch: record is corrupt or the passphrase is wrong".to_string(),
            ));
        }

        let keystream = self.keystream(&nonce, ciphertext.len());
        Ok(ciphertext.iter().zip(keystream.iter()).map(|(c, k)| c ^ k).collect())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let salt = EncryptionKey::generate_salt();
        let key = EncryptionKey::derive("correct horse battery staple", &salt);
        let plaintext = b"a memory worth keeping secret";
        let record = key.encrypt(plaintext);
        let decrypted = key.decrypt(&record).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_tag_verification() {
        let salt = EncryptionKey::generate_salt();
        let key = EncryptionKey::derive("passphrase", &salt);
        let mut record = key.encrypt(b"payload");
        let mutate_at = SALT_LEN; // inside the ciphertext region
        record[mutate_at] ^= 0xff;
        assert!(key.decrypt(&record).is_err());
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let salt = EncryptionKey::generate_salt();
        let key = EncryptionKey::derive("right passphrase", &salt);
        let wrong_key = EncryptionKey::derive("wrong passphrase", &salt);
        let record = key.encrypt(b"payload");
        assert!(wrong_key.decrypt(&record).is_err());
    }

    #[test]
    fn same_plaintext_encrypts_differently_each_time() {
        let salt = EncryptionKey::generate_salt();
        let key = EncryptionKey::derive("passphrase", &salt);
        let r1 = key.encrypt(b"payload");
        let r2 = key.encrypt(b"payload");
        assert_ne!(r1, r2);
    }
}
