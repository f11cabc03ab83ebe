//! Schedules a handful of one-shot timers of increasing delay and prints
//! each as it fires.

use std::time::Duration;

use castra::timeouts::{TimeoutKind, Timeouts};
use castra::view::Host;
use castra::{init, InitConfig};

fn main() {
    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = init(conf).unwrap();
    let runtime = castra::async_runtime::init(num_cpus::get()).unwrap();
    runtime.block_on(async_main());
}

async fn async_main() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let timeouts = Timeouts::new(tx);

    for i in 1..=5u64 {
        println!("created timeout of {} seconds", i);
        let dur = Duration::from_secs(i);
        timeouts.timeout(
            dur,
            TimeoutKind::Reconnect(Host::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 10000 + i as u16)),
        );
    }

    for _ in 0..5 {
        let ev = rx.recv().await.unwrap();
        println!("received timeout: {:?}", ev.kind);
    }
}
