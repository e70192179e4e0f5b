//! HTTP export: `/metrics` in text form for other instances to scrape, and
//! `/snapshot` with the latest samples as JSON.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use hostscope::snapshot::SampleReader;
use hostscope::types::{
    BatterySample, CpuSample, DiskSample, MemorySample, NetworkSample, TemperatureSample,
};
use hostscope::{MetricSet, SampleReaders};
use serde::Serialize;
use tracing::info;

#[derive(Clone)]
struct AppState {
    metrics: Arc<MetricSet>,
    readers: SampleReaders,
    hostname: String,
}

#[derive(Debug, Serialize)]
struct Snapshot {
    hostname: String,
    cpu: Vec<CpuSample>,
    memory: Vec<MemorySample>,
    disk: Vec<DiskSample>,
    network: Vec<NetworkSample>,
    temperature: Vec<TemperatureSample>,
    battery: Vec<BatterySample>,
}

fn latest<T: Clone>(readers: &[SampleReader<T>]) -> Vec<T> {
    readers.iter().map(|r| T::clone(&r.borrow())).collect()
}

impl Snapshot {
    fn collect(state: &AppState) -> Self {
        let r = &state.readers;
        Self {
            hostname: state.hostname.clone(),
            cpu: latest(&r.cpu),
            memory: latest(&r.memory),
            disk: latest(&r.disk),
            network: latest(&r.network),
            temperature: latest(&r.temperature),
            battery: latest(&r.battery),
        }
    }
}

pub fn router(metrics: Arc<MetricSet>, readers: SampleReaders) -> Router {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into());
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/snapshot", get(snapshot_handler))
        .with_state(AppState {
            metrics,
            readers,
            hostname,
        })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

async fn snapshot_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(Snapshot::collect(&state))
}

/// Serve until Ctrl-C.
pub async fn serve(port: u16, metrics: Arc<MetricSet>, readers: SampleReaders) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("hostscope agent exporting at http://{addr}/metrics");
    axum::serve(listener, router(metrics, readers))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("metrics server")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostscope::snapshot::Published;
    use hostscope::MetricsSink;

    #[tokio::test]
    async fn serves_metrics_and_snapshot() {
        let metrics = Arc::new(MetricSet::new());
        metrics.gauge("cpu_avg".into(), Box::new(|| 12.5));

        let mut cpu = Published::new(CpuSample::new("CPU"));
        cpu.value.set_all(&[10.0, 15.0]);
        cpu.publish();
        let readers = SampleReaders {
            cpu: vec![cpu.subscribe()],
            ..SampleReaders::default()
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(metrics, readers)).await;
        });

        let base = format!("http://{addr}");
        let text = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
        assert!(text.contains("# TYPE cpu_avg gauge\ncpu_avg 12.5\n"));

        let body = reqwest::get(format!("{base}/snapshot")).await.unwrap().text().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["cpu"][0]["per_core"][1], 15.0);
        assert_eq!(v["cpu"][0]["average"], 12.5);
    }
}
