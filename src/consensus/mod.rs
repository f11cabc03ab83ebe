//! The PBFT three-phase state machine: the engine's core.
//!
//! Generalizes the teacher's `Consensus`/`ProtoPhase` dispatch-table shape
//! (match on phase, then on message kind) down to this spec's
//! single-slot-at-a-time core: no batching, no out-of-order (`TboQueue`)
//! reordering across consensus instances, no CST. A slot's lifecycle lives
//! entirely in one `SlotEntry` inside `MessageBatch`; there is no separate
//! `ProtoPhase` enum because the entry's own booleans/counters already are
//! the phase.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::communication::message::{CommitMessage as CommitMsg, PrePrepareMessage as PrePrepareMsg, PrepareMessage as PrepareMsg};
use crate::communication::{ConnectionEvent, ConsensusMessage, Transport};
use crate::crypto::hash::Digest;
use crate::crypto::signature::{self, KeyPair};
use crate::crypto::truststore::Truststore;
use crate::error::*;
use crate::executable::{Application, ProposeRequest};
use crate::log::{BatchKey, MessageBatch};
use crate::ops::{OpsMap, OpsMapKey};
use crate::ordering::SeqN;
use crate::timeouts::{TimeoutEvent, TimeoutKind, Timeouts};
use crate::view::{Host, View};

/// The engine's core PBFT state machine: owns the replica's mutable state
/// and drives it to completion one handler invocation at a time.
///
/// Per SPEC_FULL §5, all state mutation happens in handler bodies and only
/// one handler runs at a time (the `run` event loop's `select!`), so none
/// of this state needs a lock.
pub struct Replica<T, A> {
    self_host: Host,
    key_pair: KeyPair,
    truststore: Box<dyn Truststore>,
    transport: T,
    application: A,
    view: View,
    current_seq_n: SeqN,
    highest_seq_n: SeqN,
    ops_map: OpsMap,
    mb: MessageBatch,
    last_leader_op: Instant,
    reconnect_time: Duration,
    leader_timeout: Duration,
    noop_timer: Option<JoinHandle<()>>,
    timeouts: Option<Timeouts>,
}

impl<T, A> Replica<T, A>
where
    T: Transport,
    A: Application,
{
    /// Builds a new `Replica` and delivers the initial upcalls
    /// (`InitialNotification`, then `ViewChange` for "install first view").
    pub fn new(
        self_host: Host,
        key_pair: KeyPair,
        truststore: Box<dyn Truststore>,
        transport: T,
        application: A,
        view: View,
        reconnect_time: Duration,
        leader_timeout: Duration,
    ) -> Self {
        let leader = view.members()[0];
        let current_seq_n = SeqN::zero(leader);

        // `Transport` (an external collaborator, see its doc comment) models
        // only send/broadcast — there is no transport-channel concept this
        // crate can hand back as `channel_id`, so `on_initial` always sees
        // 0 here. An embedding application that needs a real channel id
        // must source one from its own `Transport` implementation.
        application.on_initial(self_host, 0);
        application.on_view_change(view.members(), view.view_number());

        Self {
            self_host,
            key_pair,
            truststore,
            transport,
            application,
            view,
            current_seq_n,
            highest_seq_n: current_seq_n,
            ops_map: OpsMap::new(),
            mb: MessageBatch::new(),
            last_leader_op: Instant::now(),
            reconnect_time,
            leader_timeout,
            noop_timer: None,
            timeouts: None,
        }
    }

    fn is_leader(&self) -> bool {
        self.view.is_leader(self.self_host)
    }

    /// Drives the replica for the rest of its life, dispatching each
    /// inbound event to completion before polling for the next one.
    ///
    /// Realizes the single `tokio::select!` loop described in SPEC_FULL
    /// §5.1, over one channel per event source — mirroring the teacher's
    /// channel-per-concern shape (`MessageChannelTx`/`MessageChannelRx`)
    /// without its batching/CST branches.
    pub async fn run(
        mut self,
        mut inbound: UnboundedReceiver<(Host, ConsensusMessage)>,
        mut requests: UnboundedReceiver<ProposeRequest>,
        mut timeouts: UnboundedReceiver<TimeoutEvent>,
        mut conn_events: UnboundedReceiver<ConnectionEvent>,
    ) {
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some((from, msg)) => self.handle_message(from, msg),
                    None => return,
                },
                req = requests.recv() => match req {
                    Some(req) => self.handle_propose(req),
                    None => return,
                },
                ev = timeouts.recv() => match ev {
                    Some(ev) => self.handle_timeout(ev),
                    None => return,
                },
                ev = conn_events.recv() => match ev {
                    Some(ev) => self.handle_connection_event(ev),
                    None => return,
                },
            }
        }
    }

    /// Handles a `ProposeRequest` downcall from the application.
    pub fn handle_propose(&mut self, request: ProposeRequest) {
        if !self.is_leader() {
            tracing::warn!(self_host = ?self.self_host, "dropping propose request, not the leader");
            return;
        }

        let request_hash = Digest::of(request.block());
        let ops_key = OpsMapKey::new(request.timestamp(), request_hash);
        let ops_hash = ops_key.ops_hash();

        if self.ops_map.contains_op(ops_hash) {
            tracing::warn!(?ops_hash, "dropping duplicate propose request");
            return;
        }

        self.current_seq_n = self.current_seq_n.increment(self.self_host);
        let key = BatchKey::new(ops_hash, self.current_seq_n, self.view.view_number());

        if let Err(e) = self.ops_map.add_op(ops_hash, request.block().to_vec()) {
            tracing::warn!(error = ?e, "failed to store proposed payload");
            return;
        }
        if let Err(e) = self.mb.add_message(&key) {
            tracing::warn!(error = ?e, "failed to open slot for proposed payload");
            return;
        }

        let msg = PrePrepareMsg::new(key, request.block().to_vec(), self.crypto_name(), &self.key_pair);
        self.broadcast(ConsensusMessage::PrePrepare(msg));
    }

    fn handle_message(&mut self, from: Host, msg: ConsensusMessage) {
        if let Err(e) = msg.verify(&*self.truststore) {
            tracing::error!(?from, error = ?e, "signature verification failed, dropping message");
            return;
        }

        match msg {
            ConsensusMessage::PrePrepare(m) => self.handle_pre_prepare(from, m),
            ConsensusMessage::Prepare(m) => self.handle_prepare(from, m),
            ConsensusMessage::Commit(m) => self.handle_commit(from, m),
        }
    }

    fn handle_pre_prepare(&mut self, from: Host, msg: crate::communication::message::PrePrepareMessage) {
        let key = *msg.batch_key();

        if let Err(e) = self.mb.bind_ops_hash(&key) {
            tracing::warn!(?from, ?key, error = ?e, "dropping equivocating pre-prepare");
            return;
        }

        if self.mb.contains_message(&key) {
            tracing::warn!(?from, ?key, "dropping pre-prepare for an already-open slot");
            return;
        }

        let ops_hash = key.ops_hash();
        if let Err(e) = self.ops_map.add_op(ops_hash, msg.operation().to_vec()) {
            tracing::warn!(?from, error = ?e, "dropping pre-prepare, conflicting payload");
            return;
        }
        if let Err(e) = self.mb.add_message(&key) {
            tracing::warn!(?from, error = ?e, "failed to open slot");
            return;
        }

        self.last_leader_op = Instant::now();

        let prepare = PrepareMsg::new(key, self.crypto_name(), &self.key_pair);
        self.broadcast(ConsensusMessage::Prepare(prepare));

        if let Err(e) = self.mb.add_prepare_message(&key) {
            tracing::warn!(?key, error = ?e, "failed to self-count prepare");
            return;
        }
        let _ = self.mb.mark_prepare_sent(&key);
    }

    fn handle_prepare(&mut self, from: Host, msg: crate::communication::message::PrepareMessage) {
        let key = *msg.batch_key();

        let count = match self.mb.add_prepare_message(&key) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(?from, ?key, error = ?e, "prepare for unknown slot");
                return;
            }
        };

        let already_sent = self.mb.entry(&key).map(|e| e.commit_sent()).unwrap_or(true);
        if count as usize == self.view.prepare_quorum() && !already_sent {
            let commit = CommitMsg::new(key, self.crypto_name(), &self.key_pair);
            self.broadcast(ConsensusMessage::Commit(commit));
            let _ = self.mb.mark_commit_sent(&key);
        }
    }

    fn handle_commit(&mut self, from: Host, msg: crate::communication::message::CommitMessage) {
        let key = *msg.batch_key();

        let msg_seq_n = key.seq_n();
        if msg_seq_n < self.highest_seq_n {
            tracing::warn!(?from, ?key, "dropping commit for a stale slot");
            return;
        }
        if msg_seq_n > self.highest_seq_n {
            self.highest_seq_n = msg_seq_n;
        }

        let count = match self.mb.add_commit_message(&key) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(?from, ?key, error = ?e, "commit for unknown slot");
                return;
            }
        };

        let already_committed = self.mb.entry(&key).map(|e| e.committed()).unwrap_or(true);
        if count as usize == self.view.commit_quorum() && !already_committed {
            if let Some(handle) = self.noop_timer.take() {
                handle.abort();
            }

            let payload = match self.ops_map.get_op(key.ops_hash()) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(?key, error = ?e, "commit quorum reached but payload missing");
                    return;
                }
            };
            let signature = signature::sign(&payload, &self.key_pair);
            self.application.on_committed(&payload, &signature);
            let _ = self.mb.mark_committed(&key);

            self.last_leader_op = Instant::now();
        }
    }

    fn handle_timeout(&mut self, ev: TimeoutEvent) {
        match ev.kind {
            TimeoutKind::Leader => {
                if !self.is_leader() && self.last_leader_op.elapsed() > self.leader_timeout {
                    tracing::warn!(view_number = self.view.view_number(), "leader timeout expired");
                    self.application.on_suspect_leader(self.view.view_number());
                }
            }
            TimeoutKind::NoOp => {
                if self.is_leader() {
                    tracing::debug!("sending NOOP (not sent on the wire, see known defect)");
                }
            }
            TimeoutKind::Reconnect(host) => {
                tracing::info!(?host, "reconnect timer expired, deferring to transport");
            }
        }
    }

    fn handle_connection_event(&mut self, ev: ConnectionEvent) {
        match ev {
            ConnectionEvent::Up(host) => {
                tracing::info!(?host, "connection up");
            }
            ConnectionEvent::Down(host) | ConnectionEvent::Failed(host) => {
                tracing::warn!(?host, "connection down, scheduling reconnect");
                match &self.timeouts {
                    Some(timeouts) => {
                        timeouts.timeout(self.reconnect_time, TimeoutKind::Reconnect(host));
                    }
                    None => {
                        tracing::warn!(?host, "no Timeouts handle installed, reconnect timer not scheduled");
                    }
                }
            }
        }
    }

    /// Installs `timeouts` as this replica's timer handle and registers the
    /// periodic `LeaderTimer` and, if this replica is the leader, the
    /// periodic `NoOpTimer`. Must be called before any `ConnectionEvent`
    /// can schedule a `ReconnectTimer`.
    pub fn schedule_timers(&mut self, timeouts: Timeouts) {
        timeouts.periodic(
            self.leader_timeout,
            self.leader_timeout / 3,
            TimeoutKind::Leader,
        );
        if self.is_leader() {
            let noop_interval = self.leader_timeout / 2;
            self.noop_timer = Some(timeouts.periodic(noop_interval, noop_interval, TimeoutKind::NoOp));
        }
        self.timeouts = Some(timeouts);
    }

    fn crypto_name(&self) -> String {
        format!("{}", self.self_host)
    }

    fn broadcast(&self, msg: ConsensusMessage) {
        if let Err(e) = self.transport.broadcast(msg, self.view.members(), self.self_host) {
            tracing::warn!(error = ?e, "broadcast failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn host(port: u16) -> Host {
        Host::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn members() -> Vec<Host> {
        vec![host(1), host(2), host(3), host(4)]
    }

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<ConsensusMessage>>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, msg: ConsensusMessage, _host: Host) -> Result<()> {
            self.sent.lock().push(msg);
            Ok(())
        }
    }

    struct RecordingApplication {
        committed: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Application for RecordingApplication {
        fn on_committed(&self, payload: &[u8], _signature: &crate::crypto::signature::Signature) {
            self.committed.lock().push(payload.to_vec());
        }
    }

    fn build_replica(self_port: u16, truststore: crate::crypto::truststore::MemoryTruststore) -> (
        Replica<RecordingTransport, RecordingApplication>,
        Arc<Mutex<Vec<ConsensusMessage>>>,
        Arc<Mutex<Vec<Vec<u8>>>>,
    ) {
        let (_doc, kp) = KeyPair::generate().unwrap();
        let view = View::new(members(), 0).unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let committed = Arc::new(Mutex::new(Vec::new()));
        let app = RecordingApplication { committed: committed.clone() };
        let transport = RecordingTransport { sent: sent.clone() };
        let replica = Replica::new(
            host(self_port),
            kp,
            Box::new(truststore),
            transport,
            app,
            view,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        (replica, sent, committed)
    }

    #[test]
    fn leader_proposes_pre_prepare_on_propose_request() {
        let ts = crate::crypto::truststore::MemoryTruststore::new();
        let (mut replica, sent, _committed) = build_replica(1, ts);
        replica.handle_propose(ProposeRequest::new(b"x".to_vec(), 1));
        // broadcast to the other 3 members of a 4-node view
        assert_eq!(sent.lock().len(), 3);
        assert!(sent.lock().iter().all(|m| matches!(m, ConsensusMessage::PrePrepare(_))));
    }

    #[test]
    fn non_leader_drops_propose_request() {
        let ts = crate::crypto::truststore::MemoryTruststore::new();
        let (mut replica, sent, _committed) = build_replica(2, ts);
        replica.handle_propose(ProposeRequest::new(b"x".to_vec(), 1));
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn duplicate_propose_request_is_dropped() {
        let ts = crate::crypto::truststore::MemoryTruststore::new();
        let (mut replica, sent, _committed) = build_replica(1, ts);
        replica.handle_propose(ProposeRequest::new(b"x".to_vec(), 1));
        replica.handle_propose(ProposeRequest::new(b"x".to_vec(), 1));
        assert_eq!(sent.lock().len(), 3);
    }

    #[test]
    fn pre_prepare_triggers_signed_prepare_broadcast() {
        let (_doc, leader_kp) = KeyPair::generate().unwrap();
        let mut replica_ts = crate::crypto::truststore::MemoryTruststore::new();
        replica_ts.insert(format!("{}", host(1)), leader_kp.public_key());

        let (mut replica, sent, _committed) = build_replica(2, replica_ts);

        let key = BatchKey::new(Digest::of(b"x"), SeqN::new(1, host(1)), 0);
        let pre_prepare = PrePrepareMsg::new(key, b"x".to_vec(), format!("{}", host(1)), &leader_kp);

        replica.handle_message(host(1), ConsensusMessage::PrePrepare(pre_prepare));

        assert_eq!(sent.lock().len(), 3);
        assert!(sent.lock().iter().all(|m| matches!(m, ConsensusMessage::Prepare(_))));
        assert!(replica.mb.entry(&key).unwrap().prepare_sent());
        assert_eq!(replica.mb.entry(&key).unwrap().prepare_count(), 1);
    }

    #[test]
    fn forged_pre_prepare_signature_opens_no_slot() {
        let ts = crate::crypto::truststore::MemoryTruststore::new();
        let (mut replica, sent, _committed) = build_replica(2, ts);

        let (_doc, unregistered_kp) = KeyPair::generate().unwrap();
        let key = BatchKey::new(Digest::of(b"x"), SeqN::new(1, host(1)), 0);
        let pre_prepare = PrePrepareMsg::new(key, b"x".to_vec(), format!("{}", host(1)), &unregistered_kp);

        replica.handle_message(host(1), ConsensusMessage::PrePrepare(pre_prepare));

        assert!(sent.lock().is_empty());
        assert!(!replica.mb.contains_message(&key));
    }

    #[test]
    fn equivocating_pre_prepare_is_rejected() {
        let (_doc, leader_kp) = KeyPair::generate().unwrap();
        let mut replica_ts = crate::crypto::truststore::MemoryTruststore::new();
        replica_ts.insert(format!("{}", host(1)), leader_kp.public_key());

        let (mut replica, sent, _committed) = build_replica(2, replica_ts);

        let key1 = BatchKey::new(Digest::of(b"x"), SeqN::new(1, host(1)), 0);
        let pre_prepare1 = PrePrepareMsg::new(key1, b"x".to_vec(), format!("{}", host(1)), &leader_kp);
        replica.handle_message(host(1), ConsensusMessage::PrePrepare(pre_prepare1));
        assert_eq!(sent.lock().len(), 3);
        assert!(replica.mb.contains_message(&key1));

        // same (seqN, view), different opsHash: the leader equivocating
        let key2 = BatchKey::new(Digest::of(b"y"), SeqN::new(1, host(1)), 0);
        let pre_prepare2 = PrePrepareMsg::new(key2, b"y".to_vec(), format!("{}", host(1)), &leader_kp);
        replica.handle_message(host(1), ConsensusMessage::PrePrepare(pre_prepare2));

        // no new broadcast, and no second slot opened for the conflicting key
        assert_eq!(sent.lock().len(), 3);
        assert!(!replica.mb.contains_message(&key2));
    }

    #[test]
    fn commit_quorum_triggers_committed_notification() {
        let (_doc, kp1) = KeyPair::generate().unwrap();
        let (_doc, kp2) = KeyPair::generate().unwrap();
        let mut ts = crate::crypto::truststore::MemoryTruststore::new();
        ts.insert(format!("{}", host(1)), kp1.public_key());
        ts.insert(format!("{}", host(2)), kp2.public_key());

        let (mut replica, _sent, committed) = build_replica(1, ts);

        let key = BatchKey::new(Digest::of(b"x"), SeqN::new(1, host(1)), 0);
        replica.ops_map.add_op(key.ops_hash(), b"x".to_vec()).unwrap();
        replica.mb.add_message(&key).unwrap();
        // simulate prepare quorum already reached by an earlier phase
        for _ in 0..replica.view.prepare_quorum() {
            replica.mb.add_prepare_message(&key).unwrap();
        }

        let commit1 = CommitMsg::new(key, format!("{}", host(1)), &kp1);
        let commit2 = CommitMsg::new(key, format!("{}", host(2)), &kp2);

        replica.handle_message(host(1), ConsensusMessage::Commit(commit1));
        assert!(committed.lock().is_empty());

        replica.handle_message(host(2), ConsensusMessage::Commit(commit2));
        assert_eq!(committed.lock().len(), 1);
        assert_eq!(committed.lock()[0], b"x".to_vec());
    }
}
