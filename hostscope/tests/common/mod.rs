//! An in-process peer exporting a `MetricSet` the way the agent does.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use hostscope::MetricSet;

pub async fn serve(set: Arc<MetricSet>) -> SocketAddr {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let set = Arc::clone(&set);
            async move { set.render() }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind peer");
    let addr = listener.local_addr().expect("peer addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}
