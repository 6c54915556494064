#![deny(unsafe_code)]

//! secp256k1 key support for Graphene-family chains.
//!
//! Graphene nodes exchange keys in two text forms:
//!
//! - private keys as WIF: `base58(0x80 || secret || sha256d(...)[..4])`
//! - public keys as `PREFIX + base58(compressed || ripemd160(compressed)[..4])`, where the
//!   prefix depends on the chain (`BTS`, `TEST`, ...)
//!
//! Transactions are signed with 65-byte compact recoverable signatures that
//! must be "canonical" (neither `r` nor `s` may look negative or padded),
//! otherwise the node rejects them.
//!
//! # Examples
//!
//! ```
//! use gph_crypto_keys::PrivateKey;
//!
//! let key = PrivateKey::generate();
//! let public = key.public_key().to_prefixed("TEST");
//! assert!(public.starts_with("TEST"));
//!
//! let signature = key.sign_compact(&[7u8; 32]).unwrap();
//! assert_eq!(signature.len(), 65);
//! ```

use k256::ecdsa::{
    signature::hazmat::RandomizedPrehashSigner, RecoveryId, Signature, SigningKey, VerifyingKey,
};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};
use std::{fmt, str::FromStr};
use zeroize::ZeroizeOnDrop;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid base58 encoding: {0}")]
    Base58(String),

    #[error("Invalid WIF: {0}")]
    InvalidWif(&'static str),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Expected public key prefix {expected}")]
    PrefixMismatch { expected: String },

    #[error("Signing failed: {0}")]
    SigningError(String),
}

/// Version byte of a mainnet WIF private key.
const WIF_VERSION: u8 = 0x80;

/// Upper bound on signing attempts while searching for a canonical signature.
///
/// Each attempt uses fresh randomness, so roughly one in four attempts
/// produces a canonical result.
const MAX_SIGNING_ATTEMPTS: usize = 256;

/// Compressed SEC1 public key length.
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Compact recoverable signature length (recovery header + r + s).
pub const SIGNATURE_LENGTH: usize = 65;

/// A secp256k1 private key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct PrivateKey {
    #[zeroize(skip)] // SigningKey implements its own zeroization
    signing_key: SigningKey,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey {{ public: {} }}", hex::encode(self.public_key().to_bytes()))
    }
}

impl PrivateKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Create a key from raw 32-byte secret bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| Error::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Decode a WIF string.
    ///
    /// Accepts both the plain 37-byte payload and the 38-byte "compressed"
    /// variant with a trailing `0x01` flag.
    pub fn from_wif(wif: &str) -> Result<Self, Error> {
        let raw = bs58::decode(wif.trim())
            .into_vec()
            .map_err(|e| Error::Base58(e.to_string()))?;

        if raw.len() != 37 && raw.len() != 38 {
            return Err(Error::InvalidWif("unexpected length"));
        }
        let (payload, checksum) = raw.split_at(raw.len() - 4);
        if double_sha256(payload)[..4] != *checksum {
            return Err(Error::ChecksumMismatch);
        }
        if payload[0] != WIF_VERSION {
            return Err(Error::InvalidWif("unexpected version byte"));
        }
        if payload.len() == 34 && payload[33] != 0x01 {
            return Err(Error::InvalidWif("unexpected compression flag"));
        }

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&payload[1..33]);
        let key = Self::from_bytes(&secret);
        zeroize::Zeroize::zeroize(&mut secret);
        key
    }

    /// Encode as an uncompressed-flag WIF string, the form Graphene wallets export.
    pub fn to_wif(&self) -> String {
        let mut payload = Vec::with_capacity(37);
        payload.push(WIF_VERSION);
        payload.extend_from_slice(&self.signing_key.to_bytes());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        let wif = bs58::encode(&payload).into_string();
        zeroize::Zeroize::zeroize(&mut payload);
        wif
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key().clone(),
        }
    }

    /// Sign a 32-byte digest, returning a canonical compact signature.
    ///
    /// Layout: `31 + recovery_id || r (32) || s (32)`.
    pub fn sign_compact(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LENGTH], Error> {
        for _ in 0..MAX_SIGNING_ATTEMPTS {
            let signature: Signature = self
                .signing_key
                .sign_prehash_with_rng(&mut OsRng, digest)
                .map_err(|e| Error::SigningError(e.to_string()))?;
            let signature = signature.normalize_s().unwrap_or(signature);

            let recovery_id = RecoveryId::trial_recovery_from_prehash(
                self.signing_key.verifying_key(),
                digest,
                &signature,
            )
            .map_err(|e| Error::SigningError(e.to_string()))?;

            let mut compact = [0u8; SIGNATURE_LENGTH];
            compact[0] = 31 + recovery_id.to_byte();
            compact[1..].copy_from_slice(&signature.to_bytes());

            if is_canonical(&compact) {
                return Ok(compact);
            }
        }
        Err(Error::SigningError("no canonical signature found".to_string()))
    }

    /// ECDH shared secret with `other`, hashed the way Graphene memos expect:
    /// SHA-512 over the x-coordinate of the shared point.
    pub fn shared_secret(&self, other: &PublicKey) -> [u8; 64] {
        let shared = k256::ecdh::diffie_hellman(
            self.signing_key.as_nonzero_scalar(),
            other.verifying_key.as_affine(),
        );
        Sha512::digest(shared.raw_secret_bytes()).into()
    }
}

/// A secp256k1 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl PublicKey {
    /// Parse SEC1 bytes (compressed or uncompressed).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| Error::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Compressed SEC1 encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let point = self.verifying_key.to_encoded_point(true);
        let mut result = [0u8; PUBLIC_KEY_LENGTH];
        result.copy_from_slice(point.as_bytes());
        result
    }

    /// Parse `PREFIX + base58(key || ripemd160(key)[..4])`.
    pub fn from_prefixed(text: &str, prefix: &str) -> Result<Self, Error> {
        let encoded = text.strip_prefix(prefix).ok_or_else(|| Error::PrefixMismatch {
            expected: prefix.to_string(),
        })?;
        let raw = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| Error::Base58(e.to_string()))?;
        if raw.len() != PUBLIC_KEY_LENGTH + 4 {
            return Err(Error::InvalidPublicKey);
        }

        let (key, checksum) = raw.split_at(PUBLIC_KEY_LENGTH);
        if Ripemd160::digest(key)[..4] != *checksum {
            return Err(Error::ChecksumMismatch);
        }
        Self::from_bytes(key)
    }

    /// Encode with the given chain prefix.
    pub fn to_prefixed(&self, prefix: &str) -> String {
        let key = self.to_bytes();
        let mut payload = Vec::with_capacity(PUBLIC_KEY_LENGTH + 4);
        payload.extend_from_slice(&key);
        payload.extend_from_slice(&Ripemd160::digest(key)[..4]);
        format!("{}{}", prefix, bs58::encode(payload).into_string())
    }

    /// Recover the signer of a compact signature.
    pub fn recover(digest: &[u8; 32], signature: &[u8; SIGNATURE_LENGTH]) -> Result<Self, Error> {
        let header = signature[0]
            .checked_sub(27)
            .ok_or(Error::InvalidPublicKey)?;
        let recovery_id = RecoveryId::from_byte(header & 0x03).ok_or(Error::InvalidPublicKey)?;
        let sig = Signature::from_slice(&signature[1..]).map_err(|_| Error::InvalidPublicKey)?;
        let verifying_key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
            .map_err(|_| Error::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }
}

impl FromStr for PrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wif(s)
    }
}

/// Whether a compact signature is accepted by Graphene nodes.
pub fn is_canonical(signature: &[u8; SIGNATURE_LENGTH]) -> bool {
    let r = &signature[1..33];
    let s = &signature[33..65];
    r[0] & 0x80 == 0
        && !(r[0] == 0 && r[1] & 0x80 == 0)
        && s[0] & 0x80 == 0
        && !(s[0] == 0 && s[1] & 0x80 == 0)
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known WIF test vector (DO NOT USE IN PRODUCTION)
    const TEST_WIF: &str = "5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTJ";
    const TEST_SECRET: &str = "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d";

    #[test]
    fn test_wif_decode_known_vector() {
        let key = PrivateKey::from_wif(TEST_WIF).unwrap();
        let secret: [u8; 32] = hex::decode(TEST_SECRET).unwrap().try_into().unwrap();
        let expected = PrivateKey::from_bytes(&secret).unwrap();
        assert_eq!(key.public_key(), expected.public_key());
    }

    #[test]
    fn test_wif_encode_known_vector() {
        let secret: [u8; 32] = hex::decode(TEST_SECRET).unwrap().try_into().unwrap();
        let key = PrivateKey::from_bytes(&secret).unwrap();
        assert_eq!(key.to_wif(), TEST_WIF);
    }

    #[test]
    fn test_wif_rejects_bad_checksum() {
        let mut tampered = TEST_WIF.to_string();
        tampered.pop();
        tampered.push('K');
        assert!(PrivateKey::from_wif(&tampered).is_err());
    }

    #[test]
    fn test_prefixed_public_key_roundtrip() {
        let key = PrivateKey::generate();
        let text = key.public_key().to_prefixed("TEST");
        assert!(text.starts_with("TEST"));

        let parsed = PublicKey::from_prefixed(&text, "TEST").unwrap();
        assert_eq!(parsed, key.public_key());
    }

    #[test]
    fn test_prefixed_public_key_wrong_prefix() {
        let key = PrivateKey::generate();
        let text = key.public_key().to_prefixed("BTS");
        assert_eq!(
            PublicKey::from_prefixed(&text, "TEST"),
            Err(Error::PrefixMismatch {
                expected: "TEST".to_string()
            })
        );
    }

    #[test]
    fn test_prefixed_public_key_checksum() {
        let key = PrivateKey::generate();
        let mut raw = key.public_key().to_bytes().to_vec();
        raw.extend_from_slice(&[0, 0, 0, 0]);
        let text = format!("TEST{}", bs58::encode(raw).into_string());
        assert_eq!(
            PublicKey::from_prefixed(&text, "TEST"),
            Err(Error::ChecksumMismatch)
        );
    }

    #[test]
    fn test_sign_compact_is_canonical_and_recoverable() {
        let key = PrivateKey::generate();
        for i in 0..16u8 {
            let digest: [u8; 32] = Sha256::digest([i]).into();
            let signature = key.sign_compact(&digest).unwrap();

            assert!(is_canonical(&signature));
            assert!((31..=34).contains(&signature[0]));
            assert_eq!(PublicKey::recover(&digest, &signature).unwrap(), key.public_key());
        }
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate();
        assert_eq!(
            alice.shared_secret(&bob.public_key()),
            bob.shared_secret(&alice.public_key())
        );
    }

    #[test]
    fn test_canonical_rules() {
        let mut signature = [0x11u8; SIGNATURE_LENGTH];
        assert!(is_canonical(&signature));

        signature[1] = 0x80;
        assert!(!is_canonical(&signature));

        signature[1] = 0x00;
        signature[2] = 0x01;
        assert!(!is_canonical(&signature));

        signature[2] = 0x80;
        assert!(is_canonical(&signature));
    }
}
