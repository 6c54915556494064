//! Locally held private keys.

use gph_crypto_keys::{PrivateKey, PublicKey};
use std::collections::HashMap;

/// Private keys indexed by their compressed public key.
#[derive(Clone, Default)]
pub struct KeyStore {
    keys: HashMap<[u8; 33], PrivateKey>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyStore {{ {} keys }}", self.keys.len())
    }
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from WIF strings.
    pub fn from_wifs<'a>(wifs: impl IntoIterator<Item = &'a str>) -> Result<Self, gph_crypto_keys::Error> {
        let mut store = Self::new();
        for wif in wifs {
            store.insert(PrivateKey::from_wif(wif)?);
        }
        Ok(store)
    }

    pub fn insert(&mut self, key: PrivateKey) {
        self.keys.insert(key.public_key().to_bytes(), key);
    }

    pub fn get(&self, public: &PublicKey) -> Option<&PrivateKey> {
        self.keys.get(&public.to_bytes())
    }

    /// Look up a key given in the chain's prefixed text form.
    ///
    /// Keys that do not parse with `prefix` are simply not ours.
    pub fn find_prefixed(&self, text: &str, prefix: &str) -> Option<&PrivateKey> {
        let public = PublicKey::from_prefixed(text, prefix).ok()?;
        self.get(&public)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
