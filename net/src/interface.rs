//! One TCP/TLS session to an Electrum-protocol server (component C4).
//!
//! An [`Interface`] owns the outbound request queue, the inbound byte
//! buffer, and the per-peer header-sync state machine fields. It never
//! touches a socket directly — [`Interface::send_requests`] and
//! [`Interface::feed`] are driven by the pool manager's event loop against
//! whatever transport the connection opener handed back.
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;

use serde_json::Value;

use svnet_common::time::LocalTime;
use svnet_common::{Height, ServerKey};

use crate::codec::{self, Frame, Request};
use crate::error::Error;

/// A request that has been queued but not yet necessarily sent.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// RPC method name.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
    /// Message id this request was assigned by the multiplexer.
    pub message_id: u64,
}

/// A fully parsed frame, canonicalised to carry the originating request
/// alongside it when one was found.
#[derive(Debug)]
pub struct Delivery {
    /// The request this response answers, if the id matched one we sent.
    /// `None` for unsolicited notifications.
    pub request: Option<PendingRequest>,
    /// The decoded frame. `None` when the socket closed or a line failed
    /// to parse as JSON at all — the pool manager treats this the same as
    /// a remote close.
    pub frame: Option<Frame>,
}

/// The header-sync state machine's current phase for one interface.
///
/// Initial value is always [`Mode::Verification`]. Transitions are driven
/// by `svnet-client`'s header-sync driver (component C7); this type only
/// carries the data and the legality check, not the transition logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Just connected: establishing the peer's protocol version and tip.
    Verification,
    /// Walking backward from the peer's tip looking for a connectable
    /// ancestor.
    Backward,
    /// Bisecting between a known-good and known-bad height.
    Binary,
    /// Replaying headers forward from the fork point to the peer's tip.
    CatchUp,
    /// Steady state: the peer's tip connects directly to our local chain.
    Default,
}

impl Mode {
    /// Whether moving from `self` to `to` is one of the legal transitions
    /// listed in the header-sync state driver (§4.7).
    pub fn can_transition_to(self, to: Mode) -> bool {
        use Mode::*;
        matches!(
            (self, to),
            (Verification, Default)
                | (Default, Backward)
                | (Default, CatchUp)
                | (Default, Default)
                | (Backward, Binary)
                | (Backward, Backward)
                | (Binary, Binary)
                | (Binary, CatchUp)
                | (CatchUp, CatchUp)
                | (CatchUp, Default)
        )
    }
}

/// An in-flight chunk request, tracked so a reply can be matched against
/// what was actually asked for (tail-of-chain short reads are fine, a
/// server sending back more headers than requested is not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRequest {
    /// First height requested.
    pub base_height: Height,
    /// Number of headers requested.
    pub count: u32,
    /// The checkpoint height carried in the request, if this was a
    /// checkpoint-era request requiring a Merkle proof.
    pub cp_height: Option<Height>,
}

/// One live session plus its header-sync bookkeeping.
pub struct Interface {
    /// The server this session is connected to.
    pub server_key: ServerKey,
    /// Current header-sync phase.
    pub mode: Mode,
    /// Highest height the peer has announced via
    /// `blockchain.headers.subscribe`.
    pub tip_height: Option<Height>,
    /// Raw 80-byte header bytes for `tip_height`.
    pub tip_raw_header: Option<[u8; 80]>,
    /// The local fork this peer's tip currently connects to, once known.
    pub blockchain: Option<u64>,
    /// Known-good height during BACKWARD/BINARY search.
    pub good: Option<Height>,
    /// Known-bad height during BACKWARD/BINARY search.
    pub bad: Option<Height>,
    /// Chunk requests in flight, so responses can be matched and
    /// over-large replies rejected.
    pub requested_chunks: HashSet<ChunkRequest>,
    /// Requests sent but not yet answered.
    pub unanswered_request_count: u32,
    /// When the most recent request was sent.
    pub last_request_time: Option<LocalTime>,
    /// When the most recent `server.ping` (or any traffic) was sent.
    pub last_ping_time: Option<LocalTime>,

    pending_requests: VecDeque<PendingRequest>,
    in_flight: HashMap<u64, PendingRequest>,
    out_buf: Vec<u8>,
    in_buf: Vec<u8>,
}

/// A request outstanding longer than this tears the interface down.
pub const REQUEST_TIMEOUT_SECS: f64 = 20.0;
/// Ping if nothing has been sent in this long.
pub const PING_INTERVAL_SECS: f64 = 60.0;

impl Interface {
    /// Construct a freshly connected interface in [`Mode::Verification`].
    pub fn new(server_key: ServerKey) -> Self {
        Self {
            server_key,
            mode: Mode::Verification,
            tip_height: None,
            tip_raw_header: None,
            blockchain: None,
            good: None,
            bad: None,
            requested_chunks: HashSet::new(),
            unanswered_request_count: 0,
            last_request_time: None,
            last_ping_time: None,
            pending_requests: VecDeque::new(),
            in_flight: HashMap::new(),
            out_buf: Vec::new(),
            in_buf: Vec::new(),
        }
    }

    /// Attempt a mode transition, validating it against
    /// [`Mode::can_transition_to`].
    pub fn set_mode(&mut self, to: Mode) -> Result<(), Error> {
        if !self.mode.can_transition_to(to) {
            return Err(Error::IllegalModeTransition {
                from: self.mode,
                to,
            });
        }
        self.mode = to;
        Ok(())
    }

    /// Append a request to the outbound queue and bump the "unanswered"
    /// counter. Does not touch the socket — call [`Self::send_requests`]
    /// once the socket is writable.
    pub fn queue_request(
        &mut self,
        method: impl Into<String>,
        params: Vec<Value>,
        message_id: u64,
        now: LocalTime,
    ) {
        self.pending_requests.push_back(PendingRequest {
            method: method.into(),
            params,
            message_id,
        });
        self.unanswered_request_count += 1;
        self.last_request_time = Some(now);
        self.last_ping_time = Some(now);
    }

    /// Flush as much of the outbound queue as the writer accepts.
    ///
    /// Requests that are fully serialised and accepted move from the
    /// pending queue into the in-flight table, where they wait to be
    /// paired with a response.
    pub fn send_requests(&mut self, writer: &mut impl Write) -> Result<(), Error> {
        while let Some(pending) = self.pending_requests.pop_front() {
            let req = Request::new(pending.message_id, pending.method.clone(), pending.params.clone());
            let line = req.to_line().map_err(Error::Codec)?;
            self.out_buf.extend_from_slice(&line);
            self.in_flight.insert(pending.message_id, pending);
        }
        if !self.out_buf.is_empty() {
            let n = writer.write(&self.out_buf)?;
            self.out_buf.drain(..n);
        }
        Ok(())
    }

    /// Append raw bytes read off the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.in_buf.extend_from_slice(bytes);
    }

    /// Parse as many complete `\n`-terminated frames as the buffer holds.
    ///
    /// A response whose id matches an in-flight request is paired with
    /// it; if the response is missing `method`/`params` the request's own
    /// method/params are adopted (canonicalisation). Unsolicited
    /// notifications carry `request: None`.
    pub fn get_responses(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        loop {
            let Some(pos) = self.in_buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.in_buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            let Ok(text) = std::str::from_utf8(line) else {
                out.push(Delivery {
                    request: None,
                    frame: None,
                });
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            match codec::decode_line(text) {
                Ok(Frame::Response { id, result }) => {
                    self.unanswered_request_count = self.unanswered_request_count.saturating_sub(1);
                    let request = self.in_flight.remove(&id);
                    out.push(Delivery {
                        request,
                        frame: Some(Frame::Response { id, result }),
                    });
                }
                Ok(frame @ Frame::Notification { .. }) => out.push(Delivery {
                    request: None,
                    frame: Some(frame),
                }),
                Err(_) => out.push(Delivery {
                    request: None,
                    frame: None,
                }),
            }
        }
        out
    }

    /// True once a request has been outstanding longer than
    /// [`REQUEST_TIMEOUT_SECS`].
    pub fn has_timed_out(&self, now: LocalTime) -> bool {
        match self.last_request_time {
            Some(sent) if self.unanswered_request_count > 0 => {
                now.duration_since(sent).as_secs_f64() > REQUEST_TIMEOUT_SECS
            }
            _ => false,
        }
    }

    /// True once the session has been idle longer than
    /// [`PING_INTERVAL_SECS`], meaning a `server.ping` should be queued to
    /// keep the connection alive.
    pub fn ping_required(&self, now: LocalTime) -> bool {
        match self.last_ping_time {
            Some(last) => now.duration_since(last).as_secs_f64() > PING_INTERVAL_SECS,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svnet_common::Protocol;

    fn key() -> ServerKey {
        ServerKey::new("host", 50002, Protocol::Tls)
    }

    #[test]
    fn fresh_interface_starts_in_verification() {
        let iface = Interface::new(key());
        assert_eq!(iface.mode, Mode::Verification);
    }

    #[test]
    fn rejects_illegal_mode_transition() {
        let mut iface = Interface::new(key());
        assert!(iface.set_mode(Mode::CatchUp).is_err());
        assert_eq!(iface.mode, Mode::Verification);
    }

    #[test]
    fn legal_transition_chain() {
        let mut iface = Interface::new(key());
        iface.set_mode(Mode::Default).unwrap();
        iface.set_mode(Mode::Backward).unwrap();
        iface.set_mode(Mode::Binary).unwrap();
        iface.set_mode(Mode::CatchUp).unwrap();
        iface.set_mode(Mode::Default).unwrap();
    }

    #[test]
    fn queue_and_flush_round_trips_through_a_buffer() {
        let mut iface = Interface::new(key());
        iface.queue_request("server.version", vec![], 1, LocalTime::EPOCH);
        let mut buf = Vec::new();
        iface.send_requests(&mut buf).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("server.version"));
        assert_eq!(iface.unanswered_request_count, 1);
    }

    #[test]
    fn get_responses_pairs_request_by_id() {
        let mut iface = Interface::new(key());
        iface.queue_request("server.version", vec![], 42, LocalTime::EPOCH);
        let mut sink = Vec::new();
        iface.send_requests(&mut sink).unwrap();

        iface.feed(b"{\"id\":42,\"result\":\"1.4\"}\n");
        let deliveries = iface.get_responses();
        assert_eq!(deliveries.len(), 1);
        let d = &deliveries[0];
        assert_eq!(d.request.as_ref().unwrap().method, "server.version");
        assert_eq!(iface.unanswered_request_count, 0);
    }

    #[test]
    fn has_timed_out_after_threshold() {
        let mut iface = Interface::new(key());
        iface.queue_request("server.ping", vec![], 1, LocalTime::EPOCH);
        assert!(!iface.has_timed_out(LocalTime::from_secs(5.0)));
        assert!(iface.has_timed_out(LocalTime::from_secs(21.0)));
    }

    #[test]
    fn ping_required_when_never_sent() {
        let iface = Interface::new(key());
        assert!(iface.ping_required(LocalTime::EPOCH));
    }
}
