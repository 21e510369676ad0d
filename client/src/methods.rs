//! Electrum-protocol method name constants shared by the header-sync
//! driver and the request/response multiplexer.
pub const SERVER_VERSION: &str = "server.version";
pub const SERVER_BANNER: &str = "server.banner";
pub const SERVER_DONATION_ADDRESS: &str = "server.donation_address";
pub const SERVER_PEERS_SUBSCRIBE: &str = "server.peers.subscribe";
pub const SERVER_PING: &str = "server.ping";
pub const BLOCKCHAIN_RELAYFEE: &str = "blockchain.relayfee";
pub const BLOCKCHAIN_HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
pub const BLOCKCHAIN_BLOCK_HEADER: &str = "blockchain.block.header";
pub const BLOCKCHAIN_BLOCK_HEADERS: &str = "blockchain.block.headers";
pub const BLOCKCHAIN_SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
pub const BLOCKCHAIN_TRANSACTION_BROADCAST: &str = "blockchain.transaction.broadcast";
pub const BLOCKCHAIN_TRANSACTION_GET_MERKLE: &str = "blockchain.transaction.get_merkle";
pub const BLOCKCHAIN_SCRIPTHASH_GET_HISTORY: &str = "blockchain.scripthash.get_history";

/// Methods that are handled internally by the driver/multiplexer *and*
/// still forwarded to any registered callback, per the dispatch rules.
pub const INTERNALLY_HANDLED_AND_FORWARDED: &[&str] = &[
    SERVER_VERSION,
    SERVER_BANNER,
    SERVER_DONATION_ADDRESS,
    SERVER_PEERS_SUBSCRIBE,
    BLOCKCHAIN_RELAYFEE,
    BLOCKCHAIN_HEADERS_SUBSCRIBE,
    BLOCKCHAIN_BLOCK_HEADER,
    BLOCKCHAIN_BLOCK_HEADERS,
];
