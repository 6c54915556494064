#![deny(unsafe_code)]

//! Transfer memo encryption.
//!
//! A memo is encrypted between the sender's memo key and the recipient's memo
//! key. Either side can decrypt it with its own private key and the other
//! side's public key, since both derive the same ECDH secret.
//!
//! Key schedule:
//!
//! ```text
//! secret = sha512(ecdh_x(private, public))
//! seed   = sha512(decimal(nonce) || hex(secret))
//! key    = seed[0..32], iv = seed[32..48]
//! body   = sha256(plaintext)[0..4] || plaintext     (AES-256-CBC, PKCS#7)
//! ```

use aes::{
    cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes256,
};
use gph_crypto_keys::{PrivateKey, PublicKey};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Length of the plaintext checksum prefix.
const CHECKSUM_LENGTH: usize = 4;

/// Memo decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Ciphertext is not a whole number of blocks or has bad padding")]
    Decrypt,

    #[error("Ciphertext too short")]
    Truncated,

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Memo is not valid UTF-8")]
    InvalidUtf8,
}

/// Draw a fresh random nonce for a new memo.
pub fn random_nonce() -> u64 {
    rand::random()
}

/// Encrypt `plaintext` from `sender` to `recipient`.
pub fn encrypt(sender: &PrivateKey, recipient: &PublicKey, nonce: u64, plaintext: &str) -> Vec<u8> {
    let (mut key, mut iv) = derive_cipher_key(sender, recipient, nonce);

    let mut body = Vec::with_capacity(CHECKSUM_LENGTH + plaintext.len());
    body.extend_from_slice(&Sha256::digest(plaintext.as_bytes())[..CHECKSUM_LENGTH]);
    body.extend_from_slice(plaintext.as_bytes());

    let ciphertext =
        Aes256CbcEnc::new((&key).into(), (&iv).into()).encrypt_padded_vec_mut::<Pkcs7>(&body);

    key.zeroize();
    iv.zeroize();
    body.zeroize();
    ciphertext
}

/// Decrypt a memo with the local private key and the counterparty's public key.
pub fn decrypt(
    local: &PrivateKey,
    counterparty: &PublicKey,
    nonce: u64,
    ciphertext: &[u8],
) -> Result<String, Error> {
    let (mut key, mut iv) = derive_cipher_key(local, counterparty, nonce);
    let decrypted = Aes256CbcDec::new((&key).into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext);
    key.zeroize();
    iv.zeroize();

    let body = decrypted.map_err(|_| Error::Decrypt)?;
    if body.len() < CHECKSUM_LENGTH {
        return Err(Error::Truncated);
    }

    let (checksum, message) = body.split_at(CHECKSUM_LENGTH);
    if Sha256::digest(message)[..CHECKSUM_LENGTH] != *checksum {
        return Err(Error::ChecksumMismatch);
    }
    String::from_utf8(message.to_vec()).map_err(|_| Error::InvalidUtf8)
}

/// Hex-encoding convenience matching the on-chain `message` field.
pub fn encrypt_hex(sender: &PrivateKey, recipient: &PublicKey, nonce: u64, plaintext: &str) -> String {
    hex::encode(encrypt(sender, recipient, nonce, plaintext))
}

/// Decrypt a hex-encoded on-chain `message` field.
pub fn decrypt_hex(
    local: &PrivateKey,
    counterparty: &PublicKey,
    nonce: u64,
    message: &str,
) -> Result<String, Error> {
    let ciphertext = hex::decode(message).map_err(|_| Error::Decrypt)?;
    decrypt(local, counterparty, nonce, &ciphertext)
}

fn derive_cipher_key(local: &PrivateKey, other: &PublicKey, nonce: u64) -> ([u8; 32], [u8; 16]) {
    let mut secret = local.shared_secret(other);

    let mut hasher = Sha512::new();
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(hex::encode(secret).as_bytes());
    let seed = hasher.finalize();
    secret.zeroize();

    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&seed[..32]);
    iv.copy_from_slice(&seed[32..48]);
    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_both_directions() {
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate();
        let nonce = random_nonce();

        let ciphertext = encrypt(&sender, &recipient.public_key(), nonce, "hello");

        // The recipient decrypts with the sender's public key...
        assert_eq!(
            decrypt(&recipient, &sender.public_key(), nonce, &ciphertext).unwrap(),
            "hello"
        );
        // ...and the sender can read its own memo back with the recipient's.
        assert_eq!(
            decrypt(&sender, &recipient.public_key(), nonce, &ciphertext).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_block_aligned_ciphertext() {
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate();

        for text in ["", "a", "exactly twelve", "a somewhat longer memo spanning blocks"] {
            let ciphertext = encrypt(&sender, &recipient.public_key(), 1, text);
            assert_eq!(ciphertext.len() % 16, 0);
            assert_eq!(decrypt(&recipient, &sender.public_key(), 1, &ciphertext).unwrap(), text);
        }
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate();
        let ciphertext = encrypt(&sender, &recipient.public_key(), 42, "hello");

        assert!(decrypt(&recipient, &sender.public_key(), 43, &ciphertext).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate();
        let stranger = PrivateKey::generate();
        let ciphertext = encrypt(&sender, &recipient.public_key(), 7, "hello");

        assert!(decrypt(&stranger, &sender.public_key(), 7, &ciphertext).is_err());
    }

    #[test]
    fn test_corrupt_ciphertext_fails() {
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate();
        let mut ciphertext = encrypt(&sender, &recipient.public_key(), 7, "hello");
        ciphertext.truncate(ciphertext.len() - 1);

        assert_eq!(
            decrypt(&recipient, &sender.public_key(), 7, &ciphertext),
            Err(Error::Decrypt)
        );
    }

    #[test]
    fn test_hex_helpers() {
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate();
        let message = encrypt_hex(&sender, &recipient.public_key(), 9, "hi there");

        assert!(message.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            decrypt_hex(&recipient, &sender.public_key(), 9, &message).unwrap(),
            "hi there"
        );
        assert!(decrypt_hex(&recipient, &sender.public_key(), 9, "zz").is_err());
    }
}
