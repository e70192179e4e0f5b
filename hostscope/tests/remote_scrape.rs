//! Scrape a live peer over HTTP and check the samples it produces.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hostscope::devices::{LocalMemory, Remote};
use hostscope::{DeviceError, MetricSet, MetricsSink, RemoteTarget};

#[tokio::test]
async fn scrape_merges_peer_metrics() {
    let set = Arc::new(MetricSet::new());
    let recv = Arc::new(AtomicU64::new(100));
    let r = Arc::clone(&recv);
    set.gauge("cpu_0".into(), Box::new(|| 42.5));
    set.gauge("cpu_avg".into(), Box::new(|| 10.0));
    set.gauge("memory_total_Main".into(), Box::new(|| 1000.0));
    set.gauge("memory_used_Main".into(), Box::new(|| 500.0));
    set.counter(
        "net_eth0_recv".into(),
        Box::new(move || r.load(Ordering::Relaxed) as f64),
    );
    let addr = common::serve(Arc::clone(&set)).await;

    let mut remote =
        Remote::new(RemoteTarget::new("peer", format!("http://{addr}/metrics"))).unwrap();
    remote.update().await.unwrap();
    assert_eq!(remote.cpu().per_core, vec![42.5]);
    assert_eq!(remote.cpu().average, 10.0);
    assert_eq!(remote.memory()["Main"].used_percent, 50.0);
    assert_eq!(remote.network().recent_bytes_recv, 0);

    recv.store(150, Ordering::Relaxed);
    let reader = remote.subscribe_network();
    remote.update().await.unwrap();
    assert_eq!(reader.borrow().recent_bytes_recv, 50);
}

#[tokio::test]
async fn local_exports_round_trip_through_a_peer() {
    let mut mem = LocalMemory::new().unwrap();
    if mem.update().is_err() {
        return;
    }
    let set = Arc::new(MetricSet::new());
    mem.enable_metrics(set.as_ref());
    let addr = common::serve(Arc::clone(&set)).await;

    let mut remote =
        Remote::new(RemoteTarget::new("self", format!("http://{addr}/metrics"))).unwrap();
    remote.update().await.unwrap();
    assert_eq!(remote.memory()["Main"].total, mem.sample()["Main"].total);
    assert_eq!(remote.memory()["Main"].used, mem.sample()["Main"].used);
}

#[tokio::test]
async fn non_200_is_an_update_failure() {
    let addr = common::serve(Arc::new(MetricSet::new())).await;
    let mut remote =
        Remote::new(RemoteTarget::new("peer", format!("http://{addr}/nothing-here"))).unwrap();
    let err = remote.update().await.unwrap_err();
    match err {
        DeviceError::Status { status, .. } => assert_eq!(status.as_u16(), 404),
        other => panic!("expected status error, got {other}"),
    }
}
