//! End-to-end: real listener, real sampler, WebSocket client.
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use sysmon_agent::config::{AgentConfig, ProbeConfig, ProbeKindConfig};
use sysmon_agent::metrics::StaticCpu;
use sysmon_agent::sampler::spawn_sampler;
use sysmon_agent::serial::fake::FakeTransport;
use sysmon_agent::state::AppState;
use sysmon_agent::ws::router;

async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("json");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn viewer_gets_configuration_then_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::default();
    config.data_dir = Some(dir.path().to_path_buf());
    config.tick_ms = 100;
    config.probes.push(ProbeConfig::new(
        "temp",
        ProbeKindConfig::Sensor {
            key: "temp".into(),
            device: None,
            baud: None,
        },
    ));

    let fake = FakeTransport::new(vec![">", "temp:21.5", "<"]);
    let state = AppState::from_config(&config, Arc::new(fake), || {
        Box::new(StaticCpu {
            cores: vec![20.0, 40.0],
        })
    })
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, router(state.clone())).into_future());
    let _sampler = spawn_sampler(state.clone(), config.tick());

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let greeting = next_json(&mut ws).await;
    let configuration = &greeting["configuration"];
    assert_eq!(configuration["cpu"]["valueCount"], 2);
    assert_eq!(configuration["cpu_total"]["valueCount"], 1);
    assert_eq!(configuration["temp"]["name"], "temp");
    assert_eq!(configuration["temp"]["extent"], serde_json::json!([0.0, 100.0]));

    let data = next_json(&mut ws).await;
    let data = &data["data"];
    assert_eq!(data["cpu"]["values"], serde_json::json!([20.0, 40.0]));
    assert_eq!(data["cpu_total"]["values"], serde_json::json!([30.0]));
    assert_eq!(data["temp"]["values"], serde_json::json!([21.5]));
    assert!(data["temp"]["timestamp"].as_i64().unwrap() > 0);
    assert_eq!(state.subscribers.len(), 1);

    drop(ws);
    // The handler notices the close and unregisters.
    for _ in 0..50 {
        if state.subscribers.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(state.subscribers.is_empty());
}

#[tokio::test]
async fn root_path_also_upgrades() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::default();
    config.data_dir = Some(dir.path().to_path_buf());
    let state = AppState::from_config(&config, Arc::new(FakeTransport::new(Vec::<String>::new())), || {
        Box::new(StaticCpu { cores: vec![1.0] })
    })
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, router(state)).into_future());

    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    let greeting = next_json(&mut ws).await;
    assert!(greeting["configuration"].get("cpu").is_some());
}
