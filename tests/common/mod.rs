//! Shared harness for the end-to-end scenario tests: wires a handful of
//! `Replica`s together over in-process channels instead of real sockets.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use castra::communication::{ConsensusMessage, Transport};
use castra::consensus::Replica;
use castra::crypto::signature::{KeyPair, Signature};
use castra::crypto::truststore::MemoryTruststore;
use castra::executable::{Application, ProposeRequest};
use castra::timeouts::Timeouts;
use castra::view::{Host, View};

pub fn host(port: u16) -> Host {
    Host::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

pub fn crypto_name(h: Host) -> String {
    format!("{}", h)
}

pub fn four_hosts() -> Vec<Host> {
    vec![host(20001), host(20002), host(20003), host(20004)]
}

/// Records every commit and every suspect-leader firing, keyed by nothing
/// in particular — one instance lives inside exactly one replica.
pub struct RecordingApplication {
    pub committed: Arc<Mutex<Vec<Vec<u8>>>>,
    pub suspect_leader_count: Arc<AtomicU32>,
}

impl RecordingApplication {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(Mutex::new(Vec::new())),
            suspect_leader_count: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Application for RecordingApplication {
    fn on_committed(&self, payload: &[u8], _signature: &Signature) {
        self.committed.lock().push(payload.to_vec());
    }

    fn on_suspect_leader(&self, _view_number: u32) {
        self.suspect_leader_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A rule deciding whether a message addressed to `host` should be
/// silently dropped instead of delivered — models a lossy link or a
/// partition without touching the replica under test.
pub type DropRule = Arc<dyn Fn(Host, &ConsensusMessage) -> bool + Send + Sync>;

pub fn never_drop() -> DropRule {
    Arc::new(|_, _| false)
}

struct TestTransport {
    self_host: Host,
    peers: HashMap<Host, UnboundedSender<(Host, ConsensusMessage)>>,
    drop_rule: DropRule,
}

impl Transport for TestTransport {
    fn send(&self, msg: ConsensusMessage, host: Host) -> castra::error::Result<()> {
        if (self.drop_rule)(host, &msg) {
            return Ok(());
        }
        let tx = self.peers.get(&host).expect("every host is wired into every other host's peer map");
        let _ = tx.send((self.self_host, msg));
        Ok(())
    }
}

/// A spawned 4-replica network plus the handles needed to drive and
/// observe it from a test.
pub struct Harness {
    pub hosts: Vec<Host>,
    pub view: View,
    pub propose_tx: HashMap<Host, UnboundedSender<ProposeRequest>>,
    pub inbound_tx: HashMap<Host, UnboundedSender<(Host, ConsensusMessage)>>,
    pub committed: HashMap<Host, Arc<Mutex<Vec<Vec<u8>>>>>,
    pub suspect_leader_count: HashMap<Host, Arc<AtomicU32>>,
}

impl Harness {
    pub fn leader(&self) -> Host {
        self.view.leader()
    }
}

/// Spawns a 4-replica network (`n=4, f=1`) with `leader_timeout` and
/// `reconnect_time` tuned short enough for a test to observe timer
/// firings without a long sleep.
pub fn spawn_network(drop_rule: DropRule, leader_timeout: Duration) -> Harness {
    let hosts = four_hosts();
    let view = View::new(hosts.clone(), 0).unwrap();

    let mut keys = HashMap::new();
    let mut truststore = MemoryTruststore::new();
    for &h in &hosts {
        let (_doc, kp) = KeyPair::generate().unwrap();
        truststore.insert(crypto_name(h), kp.public_key());
        keys.insert(h, kp);
    }

    let mut inbound_tx = HashMap::new();
    let mut inbound_rx = HashMap::new();
    for &h in &hosts {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        inbound_tx.insert(h, tx);
        inbound_rx.insert(h, rx);
    }

    let mut propose_tx = HashMap::new();
    let mut committed = HashMap::new();
    let mut suspect_leader_count = HashMap::new();

    for &self_host in &hosts {
        let key_pair = keys.remove(&self_host).unwrap();
        let mut host_truststore = MemoryTruststore::new();
        for &h in &hosts {
            host_truststore.insert(crypto_name(h), truststore.lookup(&crypto_name(h)).unwrap());
        }

        let transport = TestTransport {
            self_host,
            peers: inbound_tx.clone(),
            drop_rule: drop_rule.clone(),
        };
        let application = RecordingApplication::new();
        committed.insert(self_host, application.committed.clone());
        suspect_leader_count.insert(self_host, application.suspect_leader_count.clone());

        let mut replica = Replica::new(
            self_host,
            key_pair,
            Box::new(host_truststore),
            transport,
            application,
            view.clone(),
            Duration::from_millis(50),
            leader_timeout,
        );

        let (timeout_tx, timeout_rx) = tokio::sync::mpsc::unbounded_channel();
        let timeouts = Timeouts::new(timeout_tx);
        replica.schedule_timers(timeouts);

        let (req_tx, req_rx) = tokio::sync::mpsc::unbounded_channel();
        let (_conn_tx, conn_rx) = tokio::sync::mpsc::unbounded_channel();
        propose_tx.insert(self_host, req_tx);
        let this_inbound_rx = inbound_rx.remove(&self_host).unwrap();

        tokio::spawn(async move {
            replica.run(this_inbound_rx, req_rx, timeout_rx, conn_rx).await;
        });
    }

    Harness {
        hosts,
        view,
        propose_tx,
        inbound_tx,
        committed,
        suspect_leader_count,
    }
}
