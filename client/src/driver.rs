//! Per-interface header-sync state driver (component C7).
//!
//! Pure transition logic: every function here takes the interface, the
//! header store, and an inbound [`Delivery`], and returns a
//! [`DriverOutcome`] telling the pool manager what to do next. No socket
//! I/O happens here — `send_requests`/`feed` on the interface are the pool
//! manager's job, keeping wire framing and state-machine transition in
//! separate modules.
use bitcoin::hash_types::BlockHash;
use bitcoin::hashes::hex::FromHex;
use serde_json::Value;

use svnet_chain::{merkle, CheckpointProof, Header, HeaderStore};
use svnet_common::time::LocalTime;
use svnet_common::Height;
use svnet_net::interface::{ChunkRequest, PendingRequest};
use svnet_net::{Delivery, Frame, Interface, Mode};

use crate::methods;

/// What the driver needs the pool manager to do after processing one
/// delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    /// Nothing beyond what the driver already did to the interface.
    Continue,
    /// Tear the interface down; not a blacklist offence (socket error,
    /// protocol violation, unsolicited message, or a disconnect-only
    /// proof failure).
    Disconnect,
    /// Tear the interface down *and* add it to `blacklisted`: a
    /// checkpoint proof was requested and failed, or the chain the peer
    /// offered fails proof-of-work outright.
    Blacklist,
    /// CATCH_UP completed: the fork's height advanced and the interface
    /// returned to DEFAULT. The pool manager should emit `updated`.
    Updated,
}

/// Begin VERIFICATION on a freshly connected interface: announce our
/// version, then either request the checkpoint window the store still
/// needs, or subscribe to new tips.
pub fn start(iface: &mut Interface, store: &HeaderStore, next_id: &mut impl FnMut() -> u64, now: LocalTime) {
    iface.queue_request(
        methods::SERVER_VERSION,
        vec![Value::from("svnet"), Value::from("1.4")],
        next_id(),
        now,
    );
    if store.needs_checkpoint_headers() {
        let (base, count) = store.required_checkpoint_headers();
        request_chunk(iface, store, base, count, next_id, now);
    } else {
        iface.queue_request(methods::BLOCKCHAIN_HEADERS_SUBSCRIBE, vec![], next_id(), now);
    }
}

/// Process one delivered frame, advancing `iface`'s mode and `store`'s
/// contents as needed.
pub fn handle_delivery(
    iface: &mut Interface,
    store: &mut HeaderStore,
    delivery: Delivery,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let Some(frame) = delivery.frame else {
        return DriverOutcome::Disconnect;
    };
    match frame {
        Frame::Response { result, .. } => {
            let Some(request) = delivery.request else {
                return DriverOutcome::Disconnect;
            };
            handle_response(iface, store, &request, result, next_id, now)
        }
        Frame::Notification { method, params } => {
            handle_notification(iface, store, &method, &params, next_id, now)
        }
    }
}

fn handle_response(
    iface: &mut Interface,
    store: &mut HeaderStore,
    request: &PendingRequest,
    result: Result<Value, svnet_net::RpcError>,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    match request.method.as_str() {
        methods::SERVER_VERSION => DriverOutcome::Continue,
        methods::BLOCKCHAIN_HEADERS_SUBSCRIBE => match result {
            Ok(v) => handle_tip(iface, store, v, next_id, now),
            Err(_) => DriverOutcome::Disconnect,
        },
        methods::BLOCKCHAIN_BLOCK_HEADERS => match result {
            Ok(v) => handle_chunk(iface, store, request, v, next_id, now),
            Err(_) => DriverOutcome::Disconnect,
        },
        methods::BLOCKCHAIN_BLOCK_HEADER => match result {
            Ok(v) => handle_single_header(iface, store, request, v, next_id, now),
            Err(_) => DriverOutcome::Disconnect,
        },
        _ => DriverOutcome::Continue,
    }
}

fn handle_notification(
    iface: &mut Interface,
    store: &mut HeaderStore,
    method: &str,
    params: &[Value],
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    if method == methods::BLOCKCHAIN_HEADERS_SUBSCRIBE {
        if iface.mode == Mode::Default {
            let tip = params.first().cloned().unwrap_or(Value::Null);
            return handle_tip(iface, store, tip, next_id, now);
        }
        // A push arriving outside DEFAULT is logged and ignored: the
        // driver is mid-reconciliation and will re-subscribe once it
        // returns to DEFAULT.
        log::debug!("ignoring headers push for {} outside DEFAULT mode", iface.server_key);
    }
    DriverOutcome::Continue
}

fn handle_tip(
    iface: &mut Interface,
    store: &mut HeaderStore,
    tip: Value,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let Some(obj) = tip.as_object() else {
        return DriverOutcome::Disconnect;
    };
    let Some(height) = obj.get("height").and_then(Value::as_u64) else {
        return DriverOutcome::Disconnect;
    };
    let height = height as Height;
    let Some(hex) = obj.get("hex").and_then(Value::as_str) else {
        return DriverOutcome::Disconnect;
    };
    let Ok(header) = Header::from_hex(hex) else {
        return DriverOutcome::Disconnect;
    };

    // Boundary case: a peer whose tip is at or below the checkpoint is
    // defective — we trust the checkpoint outright and need headers
    // strictly above it.
    if height <= store.checkpoint_height() {
        return DriverOutcome::Disconnect;
    }

    iface.tip_height = Some(height);
    iface.tip_raw_header = Some(header.to_bytes());
    if iface.mode == Mode::Verification {
        let _ = iface.set_mode(Mode::Default);
    }
    connect_tip(iface, store, next_id, now)
}

fn connect_tip(
    iface: &mut Interface,
    store: &mut HeaderStore,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let height = iface.tip_height.expect("tip recorded before connect_tip");
    let raw = iface.tip_raw_header.expect("tip recorded before connect_tip");
    let Ok(header) = Header::from_bytes(&raw) else {
        return DriverOutcome::Disconnect;
    };

    match store.connect(height, header, false) {
        Ok((_, fork_id)) => {
            iface.blockchain = Some(fork_id);
            iface.good = Some(height);
            DriverOutcome::Continue
        }
        Err(svnet_chain::Error::MissingHeader(_)) => {
            let longest = store.longest().map(|f| (f.id, f.tip_height()));
            match longest {
                Some((_, longest_tip)) if longest_tip > store.checkpoint_height() => {
                    iface.bad = Some(height);
                    let _ = iface.set_mode(Mode::Backward);
                    let probe = longest_tip.min(height.saturating_sub(1));
                    request_single(iface, store, probe, next_id, now);
                    DriverOutcome::Continue
                }
                Some((longest_id, _)) => {
                    if store.try_claim_catch_up(longest_id, iface.server_key.clone()) {
                        iface.blockchain = Some(longest_id);
                        iface.good = Some(store.checkpoint_height());
                        let _ = iface.set_mode(Mode::CatchUp);
                        advance_catch_up(iface, store, next_id, now);
                    }
                    // Another interface already owns this fork's
                    // catch-up slot: abort and stay idle in VERIFICATION
                    // until it re-announces.
                    DriverOutcome::Continue
                }
                None => DriverOutcome::Continue,
            }
        }
        Err(svnet_chain::Error::IncorrectBits(_)) | Err(svnet_chain::Error::InsufficientPoW(_)) => {
            DriverOutcome::Blacklist
        }
        Err(_) => DriverOutcome::Disconnect,
    }
}

fn handle_single_header(
    iface: &mut Interface,
    store: &mut HeaderStore,
    request: &PendingRequest,
    result: Value,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let Some(height) = request.params.first().and_then(Value::as_u64) else {
        return DriverOutcome::Disconnect;
    };
    let height = height as Height;
    let cp_requested = request.params.get(1).is_some();

    let Some((header, proof)) = parse_single_header(&result) else {
        return DriverOutcome::Disconnect;
    };

    if cp_requested {
        match proof {
            Some(proof) if verify_checkpoint_proof(store, header.block_hash(), &proof, height) => {}
            Some(_) => return DriverOutcome::Blacklist,
            None => return DriverOutcome::Disconnect,
        }
    }

    match iface.mode {
        Mode::Backward => handle_backward_header(iface, store, height, header, next_id, now),
        Mode::Binary => handle_binary_header(iface, store, height, header, next_id, now),
        Mode::CatchUp => handle_catchup_single(iface, store, height, header, next_id, now),
        _ => {
            log::debug!("ignoring header at {height} for {} in mode {:?}", iface.server_key, iface.mode);
            DriverOutcome::Continue
        }
    }
}

fn handle_backward_header(
    iface: &mut Interface,
    store: &mut HeaderStore,
    height: Height,
    header: Header,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let tip = iface.tip_height.unwrap_or(height);
    let hash = header.block_hash();
    let connected = match store.connect(height, header, false) {
        Ok((_, fork_id)) => Some(fork_id),
        // Already on a tracked fork: the probed ancestor connects locally,
        // which is exactly as good a signal as a fresh `connect`.
        Err(svnet_chain::Error::DuplicateHeader(_)) => store.locate(&hash).map(|(fork_id, _)| fork_id),
        Err(svnet_chain::Error::MissingHeader(_)) => None,
        Err(svnet_chain::Error::IncorrectBits(_)) | Err(svnet_chain::Error::InsufficientPoW(_)) => {
            return DriverOutcome::Blacklist;
        }
        Err(_) => return DriverOutcome::Disconnect,
    };
    match connected {
        Some(fork_id) => {
            iface.blockchain = Some(fork_id);
            iface.good = Some(height);
            let _ = iface.set_mode(Mode::Binary);
            let bad = iface.bad.unwrap_or(height);
            let next = (height + bad) / 2;
            if next == height {
                enter_catch_up(iface, store, next_id, now)
            } else {
                request_single(iface, store, next, next_id, now);
                DriverOutcome::Continue
            }
        }
        None => {
            iface.bad = Some(height);
            let delta = tip.saturating_sub(height);
            let floor = store.checkpoint_height() + 1;
            let next = floor.max(tip.saturating_sub(2 * delta));
            if next <= store.checkpoint_height() {
                // BACKWARD must never probe at or below the checkpoint.
                return DriverOutcome::Disconnect;
            }
            request_single(iface, store, next, next_id, now);
            DriverOutcome::Continue
        }
    }
}

fn handle_binary_header(
    iface: &mut Interface,
    store: &mut HeaderStore,
    height: Height,
    header: Header,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let good = iface.good.unwrap_or(store.checkpoint_height());
    let bad = iface.bad.unwrap_or(height);
    let hash = header.block_hash();
    let connected = match store.connect(height, header, false) {
        Ok((_, fork_id)) => Some(fork_id),
        // Already on a tracked fork — the bisection has walked back onto a
        // header we already hold, which is just as conclusive as connecting
        // a fresh one.
        Err(svnet_chain::Error::DuplicateHeader(_)) => store.locate(&hash).map(|(fork_id, _)| fork_id),
        Err(svnet_chain::Error::MissingHeader(_)) => None,
        Err(svnet_chain::Error::IncorrectBits(_)) | Err(svnet_chain::Error::InsufficientPoW(_)) => {
            return DriverOutcome::Blacklist;
        }
        Err(_) => return DriverOutcome::Disconnect,
    };
    match connected {
        Some(fork_id) => {
            iface.blockchain = Some(fork_id);
            let next = (height + bad) / 2;
            iface.good = Some(height);
            if next == height {
                enter_catch_up(iface, store, next_id, now)
            } else {
                request_single(iface, store, next, next_id, now);
                DriverOutcome::Continue
            }
        }
        None => {
            let next = (good + height) / 2;
            iface.bad = Some(height);
            if next == good {
                enter_catch_up(iface, store, next_id, now)
            } else {
                request_single(iface, store, next, next_id, now);
                DriverOutcome::Continue
            }
        }
    }
}

fn handle_catchup_single(
    iface: &mut Interface,
    store: &mut HeaderStore,
    height: Height,
    header: Header,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    match store.connect(height, header, false) {
        Ok((_, fork_id)) => {
            iface.blockchain = Some(fork_id);
            iface.good = Some(height);
            if height >= iface.tip_height.unwrap_or(height) {
                complete_catch_up(iface, store)
            } else {
                advance_catch_up(iface, store, next_id, now);
                DriverOutcome::Continue
            }
        }
        Err(svnet_chain::Error::IncorrectBits(_)) | Err(svnet_chain::Error::InsufficientPoW(_)) => {
            DriverOutcome::Blacklist
        }
        Err(_) => DriverOutcome::Disconnect,
    }
}

fn handle_chunk(
    iface: &mut Interface,
    store: &mut HeaderStore,
    request: &PendingRequest,
    result: Value,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let base = match request.params.first().and_then(Value::as_u64) {
        Some(v) => v as Height,
        None => return DriverOutcome::Disconnect,
    };
    let requested_count = match request.params.get(1).and_then(Value::as_u64) {
        Some(v) => v as u32,
        None => return DriverOutcome::Disconnect,
    };
    let cp_requested = request.params.get(2).is_some();
    iface.requested_chunks.remove(&ChunkRequest {
        base_height: base,
        count: requested_count,
        cp_height: cp_requested.then_some(store.checkpoint_height()),
    });

    let Some((headers, proof)) = parse_chunk(&result) else {
        return DriverOutcome::Disconnect;
    };
    if headers.is_empty() || headers.len() as u32 > requested_count {
        // Zero headers or more than requested is a server fault; a short
        // tail-of-chain reply is fine.
        return DriverOutcome::Disconnect;
    }

    if cp_requested {
        let leaf = headers.last().expect("checked non-empty above").block_hash();
        match proof {
            Some(proof) if verify_checkpoint_proof(store, leaf, &proof, base + headers.len() as Height - 1) => {}
            Some(_) => return DriverOutcome::Blacklist,
            None => return DriverOutcome::Disconnect,
        }
    }

    if store.needs_checkpoint_headers() && base + (requested_count as Height) <= store.checkpoint_height() + 1 {
        return match store.import_checkpoint_window(base, &headers) {
            Ok(()) => {
                iface.queue_request(methods::BLOCKCHAIN_HEADERS_SUBSCRIBE, vec![], next_id(), now);
                DriverOutcome::Continue
            }
            Err(_) => DriverOutcome::Disconnect,
        };
    }

    match store.connect_chunk(base, &headers, cp_requested) {
        Ok(fork_id) => {
            iface.blockchain = Some(fork_id);
            iface.good = Some(base + headers.len() as Height - 1);
            if iface.mode == Mode::CatchUp {
                if iface.good.unwrap_or(0) >= iface.tip_height.unwrap_or(0) {
                    complete_catch_up(iface, store)
                } else {
                    advance_catch_up(iface, store, next_id, now);
                    DriverOutcome::Continue
                }
            } else {
                DriverOutcome::Continue
            }
        }
        Err(svnet_chain::Error::IncorrectBits(_)) | Err(svnet_chain::Error::InsufficientPoW(_)) => {
            DriverOutcome::Blacklist
        }
        Err(_) => DriverOutcome::Disconnect,
    }
}

fn enter_catch_up(
    iface: &mut Interface,
    store: &mut HeaderStore,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) -> DriverOutcome {
    let Some(fork_id) = iface.blockchain else {
        return DriverOutcome::Disconnect;
    };
    if !store.try_claim_catch_up(fork_id, iface.server_key.clone()) {
        // Another interface is already replaying this fork forward.
        return DriverOutcome::Continue;
    }
    let _ = iface.set_mode(Mode::CatchUp);
    advance_catch_up(iface, store, next_id, now);
    DriverOutcome::Continue
}

/// Issue the next CATCH_UP request: a 1000-wide chunk while far from the
/// tip, a single header once close.
fn advance_catch_up(iface: &mut Interface, store: &HeaderStore, next_id: &mut impl FnMut() -> u64, now: LocalTime) {
    let good = iface.good.unwrap_or(store.checkpoint_height());
    let tip = iface.tip_height.unwrap_or(good);
    if good >= tip {
        return;
    }
    let remaining = tip - good;
    if remaining >= 1000 {
        request_chunk(iface, store, good + 1, 1000, next_id, now);
    } else {
        request_single(iface, store, good + 1, next_id, now);
    }
}

fn complete_catch_up(iface: &mut Interface, store: &mut HeaderStore) -> DriverOutcome {
    if let Some(fork_id) = iface.blockchain {
        store.release_catch_up(fork_id);
    }
    let _ = iface.set_mode(Mode::Default);
    DriverOutcome::Updated
}

fn request_chunk(
    iface: &mut Interface,
    store: &HeaderStore,
    base: Height,
    count: u32,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) {
    let cp_height = checkpoint_era(store, base, count);
    let mut params = vec![Value::from(base), Value::from(count)];
    if let Some(cp) = cp_height {
        params.push(Value::from(cp));
    }
    iface.requested_chunks.insert(ChunkRequest {
        base_height: base,
        count,
        cp_height,
    });
    iface.queue_request(methods::BLOCKCHAIN_BLOCK_HEADERS, params, next_id(), now);
}

fn request_single(
    iface: &mut Interface,
    store: &HeaderStore,
    height: Height,
    next_id: &mut impl FnMut() -> u64,
    now: LocalTime,
) {
    let mut params = vec![Value::from(height)];
    if height <= store.checkpoint_height() {
        params.push(Value::from(store.checkpoint_height()));
    }
    iface.queue_request(methods::BLOCKCHAIN_BLOCK_HEADER, params, next_id(), now);
}

/// Whether a `(base, count)` chunk request falls entirely at or below the
/// checkpoint and must therefore carry `cp_height`.
fn checkpoint_era(store: &HeaderStore, base: Height, count: u32) -> Option<Height> {
    if base + count as Height <= store.checkpoint_height() + 1 {
        Some(store.checkpoint_height())
    } else {
        None
    }
}

fn verify_checkpoint_proof(store: &HeaderStore, leaf: BlockHash, proof: &CheckpointProof, leaf_height: Height) -> bool {
    let mut indexed = proof.clone();
    indexed.index = leaf_height;
    merkle::verify(leaf, &indexed, store.checkpoint_merkle_root())
}

fn parse_single_header(value: &Value) -> Option<(Header, Option<CheckpointProof>)> {
    match value {
        Value::String(hex) => Header::from_hex(hex).ok().map(|h| (h, None)),
        Value::Object(obj) => {
            let hex = obj.get("header")?.as_str()?;
            let header = Header::from_hex(hex).ok()?;
            Some((header, parse_proof(obj)))
        }
        _ => None,
    }
}

fn parse_chunk(value: &Value) -> Option<(Vec<Header>, Option<CheckpointProof>)> {
    let obj = value.as_object()?;
    let hex = obj.get("hex")?.as_str()?;
    let headers = headers_from_concat_hex(hex)?;
    Some((headers, parse_proof(obj)))
}

fn headers_from_concat_hex(hex: &str) -> Option<Vec<Header>> {
    if hex.len() % 160 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(hex.len() / 160);
    for chunk in hex.as_bytes().chunks(160) {
        let s = std::str::from_utf8(chunk).ok()?;
        out.push(Header::from_hex(s).ok()?);
    }
    Some(out)
}

fn parse_proof(obj: &serde_json::Map<String, Value>) -> Option<CheckpointProof> {
    let root = BlockHash::from_hex(obj.get("root")?.as_str()?).ok()?;
    let branch_vals = obj.get("branch")?.as_array()?;
    let mut branch = Vec::with_capacity(branch_vals.len());
    for v in branch_vals {
        branch.push(BlockHash::from_hex(v.as_str()?).ok()?);
    }
    Some(CheckpointProof { root, branch, index: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::block::BlockHeader;
    use bitcoin_hashes::hex::ToHex;
    use bitcoin_hashes::Hash;
    use svnet_common::{Network, Protocol, ServerKey};
    use svnet_net::Interface as NetInterface;

    fn easy_bits() -> u32 {
        0x207fffff
    }

    fn raw_header(prev: BlockHash, bits: u32) -> Header {
        Header {
            inner: BlockHeader {
                version: 1,
                prev_blockhash: prev,
                merkle_root: Default::default(),
                time: 0,
                bits,
                nonce: 0,
            },
        }
    }

    fn seeded_store() -> (HeaderStore, BlockHash) {
        let mut store = HeaderStore::new(Network::Regtest);
        let (base, count) = store.required_checkpoint_headers();
        let mut headers = Vec::new();
        let mut prev = BlockHash::from_inner([0u8; 32]);
        for _ in 0..count {
            let h = raw_header(prev, easy_bits());
            prev = h.block_hash();
            headers.push(h);
        }
        store.import_checkpoint_window(base, &headers).unwrap();
        (store, prev)
    }

    fn key() -> ServerKey {
        ServerKey::new("host", 50002, Protocol::Tls)
    }

    #[test]
    fn tip_at_or_below_checkpoint_is_disconnected() {
        let (mut store, _) = seeded_store();
        let mut iface = NetInterface::new(key());
        let mut id = 0u64;
        let tip = serde_json::json!({"height": store.checkpoint_height(), "hex": "00"});
        let outcome = handle_tip(&mut iface, &mut store, tip, &mut || { id += 1; id }, LocalTime::EPOCH);
        assert_eq!(outcome, DriverOutcome::Disconnect);
    }

    #[test]
    fn connectable_tip_attaches_blockchain_directly() {
        let (mut store, checkpoint_tip) = seeded_store();
        let mut iface = NetInterface::new(key());
        let header = raw_header(checkpoint_tip, easy_bits());
        let height = store.checkpoint_height() + 1;
        let tip = serde_json::json!({
            "height": height,
            "hex": header.to_bytes().to_hex(),
        });
        let mut id = 0u64;
        let outcome = handle_tip(&mut iface, &mut store, tip, &mut || { id += 1; id }, LocalTime::EPOCH);
        assert_eq!(outcome, DriverOutcome::Continue);
        assert!(iface.blockchain.is_some());
        assert_eq!(iface.good, Some(height));
    }

    #[test]
    fn missing_parent_with_no_existing_fork_starts_catch_up() {
        let (mut store, checkpoint_tip) = seeded_store();
        let mut iface = NetInterface::new(key());
        // Tip far ahead with an unrelated previous hash: connect() fails
        // with MissingHeader, and since no fork exists yet the driver
        // should bind CATCH_UP to... nothing (None longest) and stay put.
        let _ = checkpoint_tip;
        let unrelated = raw_header(BlockHash::from_inner([0xAB; 32]), easy_bits());
        let height = store.checkpoint_height() + 50;
        let tip = serde_json::json!({"height": height, "hex": unrelated.to_bytes().to_hex()});
        let mut id = 0u64;
        let outcome = handle_tip(&mut iface, &mut store, tip, &mut || { id += 1; id }, LocalTime::EPOCH);
        assert_eq!(outcome, DriverOutcome::Continue);
        assert_eq!(iface.mode, Mode::Verification);
    }

    #[test]
    fn missing_parent_against_existing_fork_enters_backward() {
        let (mut store, checkpoint_tip) = seeded_store();
        // Seed a short existing fork above the checkpoint so `longest()`
        // is Some and its tip is above the checkpoint.
        let a1 = raw_header(checkpoint_tip, easy_bits());
        store.connect(store.checkpoint_height() + 1, a1, false).unwrap();

        let mut iface = NetInterface::new(key());
        let unrelated = raw_header(BlockHash::from_inner([0xCD; 32]), easy_bits());
        let height = store.checkpoint_height() + 500;
        let tip = serde_json::json!({"height": height, "hex": unrelated.to_bytes().to_hex()});
        let mut id = 0u64;
        let outcome = handle_tip(&mut iface, &mut store, tip, &mut || { id += 1; id }, LocalTime::EPOCH);
        assert_eq!(outcome, DriverOutcome::Continue);
        assert_eq!(iface.mode, Mode::Backward);
        assert_eq!(iface.bad, Some(height));
    }
}
