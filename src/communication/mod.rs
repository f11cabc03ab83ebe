//! Communication primitives: wire message formats, and the `Transport`
//! boundary the consensus core sends and receives them through.

pub mod message;

use crate::error::*;
use crate::view::Host;

pub use message::{CommitMessage, ConsensusMessage, MessageKind, PrePrepareMessage, PrepareMessage};

/// A change in the liveness of a point-to-point channel to a peer.
///
/// `Up` is reported both for the initial connection and for a successful
/// reconnect; `Down`/`Failed` both lead to a `ReconnectTimer(host)` being
/// scheduled by `consensus::Replica` — this module makes no distinction
/// between a graceful close and a dial failure at the policy level.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionEvent {
    Up(Host),
    Down(Host),
    Failed(Host),
}

/// The authenticated point-to-point channel the consensus core sends
/// `ConsensusMessage`s over.
///
/// Deliberately narrow: this crate's transport concern is "deliver this
/// signed message to that host, and tell me when the channel goes up or
/// down" — the TLS/TCP socket plumbing behind an implementation of this
/// trait is an out-of-scope external collaborator (see SPEC_FULL §1),
/// mirroring the teacher's `Node`/`NodeConfig` at the channel boundary
/// without carrying its socket/TLS internals into this crate.
pub trait Transport: Send + Sync {
    /// Sends `msg` to `host`. Errors surface as `ErrorKind::Transport` and
    /// are handled by the caller scheduling a `ReconnectTimer`; this
    /// method never retries internally.
    fn send(&self, msg: ConsensusMessage, host: Host) -> Result<()>;

    /// Broadcasts `msg` to every member of `hosts` other than `self_host`.
    fn broadcast(&self, msg: ConsensusMessage, hosts: &[Host], self_host: Host) -> Result<()> {
        for &host in hosts {
            if host == self_host {
                continue;
            }
            if let Err(e) = self.send(msg.clone(), host) {
                tracing::warn!(?host, error = ?e, "failed to send to peer");
            }
        }
        Ok(())
    }
}
