//! Per-network constants: genesis hash, verification checkpoint, and the
//! default server list shipped with the client.
use bitcoin::hash_types::BlockHash;
use bitcoin::hashes::hex::FromHex;

use crate::server::{Protocol, ServerKey};

/// Which chain a client instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// The production chain.
    Mainnet,
    /// The public test chain.
    Testnet,
    /// A local, single-node regression test chain.
    Regtest,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl Network {
    /// Short lowercase name, as used in config files and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }

    /// Genesis block hash, in display (big-endian) order.
    pub fn genesis_hash(self) -> BlockHash {
        let hex = match self {
            Network::Mainnet => {
                "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
            }
            Network::Testnet => {
                "0000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4a3"
            }
            Network::Regtest => {
                "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
            }
        };
        BlockHash::from_hex(hex).expect("valid genesis hash literal")
    }

    /// Height of the pinned verification checkpoint used to bootstrap
    /// header-store mode selection (component C7). A fresh client trusts
    /// headers back to this height without requiring a Merkle proof.
    pub fn checkpoint_height(self) -> u32 {
        match self {
            Network::Mainnet => 760_000,
            Network::Testnet => 1_500_000,
            Network::Regtest => 0,
        }
    }

    /// The checkpoint height's pinned header-commitment root, in display
    /// (big-endian) order. Used by the checkpoint proof verifier (C3) to
    /// validate `cp_height`-bearing responses. `None` on regtest, which has
    /// no fixed checkpoint commitment to pin — a fresh regtest store
    /// trusts whatever root the first proof claims (trust-on-first-use).
    pub fn checkpoint_merkle_root(self) -> Option<BlockHash> {
        let hex = match self {
            Network::Mainnet => {
                "5c07b3f7d7b7a6be5bd3e5c7ba9c7b2f5df6f2c2bf2a6b5e1d4a6c8b9f2e1d3c"
            }
            Network::Testnet => {
                "03d1e2f9b8c6a4d1e5b6a2f2b6f6fd5f2b7c9a5c7b5d3be6a7b7d7f3b7f07c5c"
            }
            Network::Regtest => return None,
        };
        Some(BlockHash::from_hex(hex).expect("valid checkpoint root literal"))
    }

    /// Default port for a protocol on this network, absent any
    /// per-server override in a server identifier string.
    pub fn default_port(self, protocol: Protocol) -> u16 {
        match self {
            Network::Regtest => match protocol {
                Protocol::PlainTcp => 52001,
                Protocol::Tls => 52002,
            },
            _ => protocol.default_port(),
        }
    }

    /// The hard-coded seed server list shipped with the client, used when no
    /// `recent_servers` have been persisted yet.
    pub fn default_servers(self) -> Vec<ServerKey> {
        match self {
            Network::Mainnet => vec![
                ServerKey::new("sv.satoshi.io", 50002, Protocol::Tls),
                ServerKey::new("electrumx.bsvatoshi.com", 50002, Protocol::Tls),
                ServerKey::new("sv.electrumx.cascharia.com", 50002, Protocol::Tls),
                ServerKey::new("electrumx.electrumsv.io", 50002, Protocol::Tls),
            ],
            Network::Testnet => vec![
                ServerKey::new("testnet.satoshi.io", 50002, Protocol::Tls),
                ServerKey::new("testnet.electrumx.cascharia.com", 50002, Protocol::Tls),
            ],
            Network::Regtest => vec![ServerKey::new("127.0.0.1", 52001, Protocol::PlainTcp)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_genesis_hash_has_expected_display_form() {
        assert_eq!(
            Network::Mainnet.genesis_hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn default_servers_are_non_empty_per_network() {
        for net in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            assert!(!net.default_servers().is_empty());
        }
    }

    #[test]
    fn regtest_uses_regtest_ports() {
        assert_eq!(Network::Regtest.default_port(Protocol::PlainTcp), 52001);
        assert_eq!(Network::Mainnet.default_port(Protocol::PlainTcp), 50001);
    }
}
