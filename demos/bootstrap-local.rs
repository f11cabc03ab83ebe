//! Bootstraps a 4-replica view in-process, proposes one request on the
//! leader, and waits for every replica to report the commit.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use castra::async_runtime as rt;
use castra::consensus::Replica;
use castra::executable::ProposeRequest;
use castra::timeouts::Timeouts;
use castra::view::View;
use castra::{init, InitConfig};

use common::{crypto_name, generate_keys, host, ChannelTransport, PrintingApplication};

fn main() {
    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = init(conf).unwrap();
    let runtime = rt::init(num_cpus::get()).unwrap();
    runtime.block_on(async_main());
}

async fn async_main() {
    let hosts = vec![host(10001), host(10002), host(10003), host(10004)];
    let (mut keys, truststore) = generate_keys(&hosts);
    let view = View::new(hosts.clone(), 0).unwrap();

    let mut inbound_txs = HashMap::new();
    let mut inbound_rxs = HashMap::new();
    for &h in &hosts {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        inbound_txs.insert(h, tx);
        inbound_rxs.insert(h, rx);
    }

    let mut propose_tx = None;
    for &self_host in &hosts {
        let key_pair = keys.remove(&self_host).unwrap();
        let transport = ChannelTransport::new(self_host, inbound_txs.clone());
        let application = PrintingApplication::new();

        let mut replica = Replica::new(
            self_host,
            key_pair,
            Box::new(clone_truststore(&truststore, &hosts)),
            transport,
            application,
            view.clone(),
            Duration::from_millis(500),
            Duration::from_secs(2),
        );

        let (timeout_tx, timeout_rx) = tokio::sync::mpsc::unbounded_channel();
        let timeouts = Timeouts::new(timeout_tx);
        replica.schedule_timers(timeouts);

        let (req_tx, req_rx) = tokio::sync::mpsc::unbounded_channel();
        let (_conn_tx, conn_rx) = tokio::sync::mpsc::unbounded_channel();
        let inbound_rx = inbound_rxs.remove(&self_host).unwrap();

        if view.is_leader(self_host) {
            propose_tx = Some(req_tx);
            println!("leader is {}", crypto_name(self_host));
        }

        rt::spawn(async move {
            replica.run(inbound_rx, req_rx, timeout_rx, conn_rx).await;
        });
    }

    let propose_tx = propose_tx.expect("view always has a leader");
    propose_tx
        .send(ProposeRequest::new(b"hello, castra".to_vec(), 1))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// `generate_keys` populates one shared truststore with every host's key;
/// each replica needs its own owned `Box<dyn Truststore>`, so this clones
/// the relevant entries out of it per replica.
fn clone_truststore(
    shared: &castra::crypto::truststore::MemoryTruststore,
    hosts: &[castra::view::Host],
) -> castra::crypto::truststore::MemoryTruststore {
    let mut ts = castra::crypto::truststore::MemoryTruststore::new();
    for &h in hosts {
        if let Ok(pk) = shared.lookup(&crypto_name(h)) {
            ts.insert(crypto_name(h), pk);
        }
    }
    ts
}
