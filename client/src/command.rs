//! Inbound commands the event loop drains from callers, replacing the
//! re-entrant interface lock with message passing.
//!
//! Per the design notes: the loop owns a `crossbeam_channel` receiver of
//! these and mutates [`crate::state::NetworkState`] without ever taking a
//! lock a callback might re-enter; outbound notifications go back out
//! through the [`crate::events::EventBus`] instead.
use std::sync::Arc;

use serde_json::Value;

use svnet_net::RpcError;

/// Opaque handle identifying one registered request callback, so
/// [`Command::Unsubscribe`] can name it without requiring `Callback` to be
/// comparable.
pub type CallbackId = u64;

/// The result a queued request eventually settles to.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// The server answered successfully.
    Ok(Value),
    /// The server's `error` field was populated.
    Err(RpcError),
    /// No response arrived before the request's deadline.
    Timeout,
}

/// A caller-supplied response handler. Invoked synchronously on the event
/// loop thread; must not block.
pub type Callback = Arc<dyn Fn(RequestOutcome) + Send + Sync>;

/// One command accepted from any thread via the network handle's command
/// channel.
pub enum Command {
    /// Enqueue one or more `(method, params)` pairs atomically, all
    /// sharing one callback.
    Send {
        /// The requests to send, in order.
        messages: Vec<(String, Vec<Value>)>,
        /// The id this registration was assigned, for later
        /// [`Command::Unsubscribe`].
        callback_id: CallbackId,
        /// Invoked once per response (more than once for a subscription).
        callback: Callback,
    },
    /// Remove `callback_id` from every subscription list. Server-side
    /// subscriptions are not cancelled; later pushes are silently
    /// discarded.
    Unsubscribe {
        /// The id returned when the subscription was registered.
        callback_id: CallbackId,
    },
    /// Stop the event loop: close every socket, drop every queue, and
    /// exit. No further commands are accepted after this is drained.
    Stop,
}
