//! The upcall/downcall surface between the consensus core and the
//! embedding application.

use crate::crypto::signature::Signature;
use crate::view::Host;

/// A client request submitted by the application to be ordered.
///
/// `timestamp` is an opaque, monotonically-increasing client tag used
/// purely for deduplication at `OpsMap` — the engine never interprets it
/// beyond that.
#[derive(Debug, Clone)]
pub struct ProposeRequest {
    block: Vec<u8>,
    timestamp: u64,
}

impl ProposeRequest {
    /// Builds a new `ProposeRequest`.
    pub fn new(block: Vec<u8>, timestamp: u64) -> Self {
        Self { block, timestamp }
    }

    /// The opaque payload to be ordered.
    pub fn block(&self) -> &[u8] {
        &self.block
    }

    /// The client-supplied deduplication tag.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// The three upcalls the consensus core delivers to the embedding
/// application (SPEC_FULL §4.10), plus a hook for the leader-suspicion
/// trigger (§4.8, §9 open question 3 — the view-change subprotocol itself
/// is not implemented, only the trigger).
///
/// Narrowed from the teacher's `Service`/`Executor` (which also carries
/// state-machine replies and checkpoint state) since this spec's upcall
/// surface has no reply/state concept — the application decides entirely
/// what to do with a committed payload.
pub trait Application: Send + Sync {
    /// Emitted once, after the channel to peers is open.
    fn on_initial(&self, this: Host, channel_id: u32) {
        let _ = (this, channel_id);
    }

    /// Emitted once at init ("install first view") and on every successful
    /// view installation thereafter.
    fn on_view_change(&self, members: &[Host], view_number: u32) {
        let _ = (members, view_number);
    }

    /// Emitted once per slot, in the order commit-quorum is reached at
    /// this replica — which is not necessarily slot order across slots,
    /// see SPEC_FULL §9 open question 5.
    fn on_committed(&self, payload: &[u8], signature: &Signature);

    /// Called when this replica suspects the current leader has gone
    /// silent (§4.8's leader-liveness check). The view-change subprotocol
    /// itself (new-view construction, prepared-slot carryover) is left
    /// unspecified — see SPEC_FULL §9 open question 3 — so the default
    /// implementation only logs.
    fn on_suspect_leader(&self, view_number: u32) {
        tracing::warn!(view_number, "suspect leader, no view-change subprotocol wired up");
    }
}
