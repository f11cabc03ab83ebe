//! Shared scaffolding for the demos: an in-process `Transport` wiring
//! several replicas together over `mpsc` channels instead of real sockets,
//! since socket/TLS plumbing is this crate's external collaborator (see
//! SPEC_FULL §1) rather than something it implements itself.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use castra::communication::{ConsensusMessage, Transport};
use castra::crypto::signature::KeyPair;
use castra::crypto::truststore::MemoryTruststore;
use castra::view::Host;

pub fn host(port: u16) -> Host {
    Host::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

pub fn crypto_name(h: Host) -> String {
    format!("{}", h)
}

/// Generates one key pair per host and a truststore every replica can
/// share, so each replica can verify every other replica's signature.
pub fn generate_keys(hosts: &[Host]) -> (HashMap<Host, KeyPair>, MemoryTruststore) {
    let mut keys = HashMap::new();
    let mut truststore = MemoryTruststore::new();
    for &h in hosts {
        let (_doc, kp) = KeyPair::generate().unwrap();
        truststore.insert(crypto_name(h), kp.public_key());
        keys.insert(h, kp);
    }
    (keys, truststore)
}

/// A `Transport` that hands messages directly to the destination
/// replica's inbound channel, skipping the network entirely.
pub struct ChannelTransport {
    self_host: Host,
    peers: HashMap<Host, tokio::sync::mpsc::UnboundedSender<(Host, ConsensusMessage)>>,
}

impl ChannelTransport {
    pub fn new(
        self_host: Host,
        peers: HashMap<Host, tokio::sync::mpsc::UnboundedSender<(Host, ConsensusMessage)>>,
    ) -> Self {
        Self { self_host, peers }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, msg: ConsensusMessage, host: Host) -> castra::error::Result<()> {
        let tx = self
            .peers
            .get(&host)
            .expect("demo wires every member into every other member's peer map");
        let _ = tx.send((self.self_host, msg));
        Ok(())
    }
}

/// An `Application` that just prints what it's told and records commits.
pub struct PrintingApplication {
    pub committed: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
}

impl PrintingApplication {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }
}

impl castra::executable::Application for PrintingApplication {
    fn on_committed(&self, payload: &[u8], _signature: &castra::crypto::signature::Signature) {
        println!("committed: {}", String::from_utf8_lossy(payload));
        self.committed.lock().push(payload.to_vec());
    }
}
