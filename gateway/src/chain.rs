//! Known chains and their address parameters.

use serde::{Deserialize, Serialize};

/// BitShares main net.
pub const BITSHARES_CHAIN_ID: &str =
    "4018d7844c78f6a6c41c6a552b898022310fc5dec06da467ee7905a8dad512c8";

/// BitShares public test net.
pub const TESTNET_CHAIN_ID: &str =
    "39f5e2ede1f8bc1a3a54a7914414e3779e33193f1f5693510e73cb7a87617447";

/// Network-specific parameters selected by chain id during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Hex chain id, as reported by `get_chain_properties`.
    pub chain_id: String,

    /// Public key prefix, e.g. `BTS`.
    pub prefix: String,

    /// Symbol of the core asset.
    pub core_symbol: String,
}

impl ChainParams {
    pub fn new(chain_id: &str, prefix: &str, core_symbol: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            prefix: prefix.to_string(),
            core_symbol: core_symbol.to_string(),
        }
    }

    /// Raw chain id bytes, prepended to every signing digest.
    pub fn chain_id_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.chain_id)
    }
}

/// The set of chains a connection accepts.
#[derive(Debug, Clone)]
pub struct KnownChains {
    chains: Vec<ChainParams>,
}

impl Default for KnownChains {
    fn default() -> Self {
        Self {
            chains: vec![
                ChainParams::new(BITSHARES_CHAIN_ID, "BTS", "BTS"),
                ChainParams::new(TESTNET_CHAIN_ID, "TEST", "TEST"),
            ],
        }
    }
}

impl KnownChains {
    /// Built-in chains plus `extra`; an extra entry replaces a built-in one with the same id.
    pub fn with_extra(extra: impl IntoIterator<Item = ChainParams>) -> Self {
        let mut known = Self::default();
        for chain in extra {
            known.chains.retain(|c| c.chain_id != chain.chain_id);
            known.chains.push(chain);
        }
        known
    }

    pub fn find(&self, chain_id: &str) -> Option<&ChainParams> {
        self.chains
            .iter()
            .find(|c| c.chain_id.eq_ignore_ascii_case(chain_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_chains() {
        let known = KnownChains::default();
        assert_eq!(known.find(BITSHARES_CHAIN_ID).unwrap().prefix, "BTS");
        assert_eq!(known.find(TESTNET_CHAIN_ID).unwrap().prefix, "TEST");
        assert!(known.find("00").is_none());
    }

    #[test]
    fn test_extra_chain_overrides() {
        let known = KnownChains::with_extra([
            ChainParams::new(TESTNET_CHAIN_ID, "TST", "TST"),
            ChainParams::new("abcd", "GPH", "CORE"),
        ]);
        assert_eq!(known.find(TESTNET_CHAIN_ID).unwrap().prefix, "TST");
        assert_eq!(known.find("ABCD").unwrap().core_symbol, "CORE");
    }

    #[test]
    fn test_chain_id_bytes() {
        let params = ChainParams::new(TESTNET_CHAIN_ID, "TEST", "TEST");
        assert_eq!(params.chain_id_bytes().unwrap().len(), 32);
    }
}
