//! End-to-end tests for the sending pipeline.
//!
//! A throw-away axum collector decodes payloads exactly like a production
//! receiver would and stores them through `MetricService`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use pulse::agent::transport::UPDATES_PATH;
use pulse::agent::{AgentBuilder, HttpTransport, MetricSender, TransportError};
use pulse::codec::{self, PayloadDecoder, PayloadEncoder, SIGNATURE_HEADER};
use pulse::config::AgentConfig;
use pulse::model::{MetricKind, MetricRecord};
use pulse::service::MetricService;
use pulse::storage::MemoryStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const PUBLIC_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/test_public_key.pem");
const PRIVATE_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/test_private_key.pem");

// =============================================================================
// Test Helpers
// =============================================================================

struct Receiver {
    decoder: PayloadDecoder,
    service: MetricService<MemoryStore>,
}

async fn receive_updates(
    State(receiver): State<Arc<Receiver>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let records = match receiver.decoder.decode(&body, signature) {
        Ok(records) => records,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    match receiver.service.update_metrics(&records).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Start a collector and return its address and shared state.
async fn start_collector(decoder: PayloadDecoder) -> (String, Arc<Receiver>) {
    let receiver = Arc::new(Receiver {
        decoder,
        service: MetricService::new(MemoryStore::new()),
    });
    let router = Router::new()
        .route(UPDATES_PATH, post(receive_updates))
        .with_state(Arc::clone(&receiver));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Address without scheme, as operators usually configure it.
    (addr.to_string(), receiver)
}

async fn wait_for_counter(receiver: &Receiver, name: &str) -> Option<MetricRecord> {
    for _ in 0..100 {
        if let Some(record) = receiver
            .service
            .get_metric(MetricKind::Counter, name)
            .await
            .unwrap()
        {
            return Some(record);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

// =============================================================================
// Transport Tests
// =============================================================================

#[tokio::test]
async fn test_signed_encrypted_delivery() {
    let decoder = PayloadDecoder::new()
        .with_signing_key("secret")
        .with_private_key(codec::load_private_key(PRIVATE_KEY).unwrap());
    let (addr, receiver) = start_collector(decoder).await;

    let encoder = PayloadEncoder::new()
        .with_signing_key("secret")
        .with_public_key(codec::load_public_key(PUBLIC_KEY).unwrap());
    let transport = HttpTransport::new(&addr, encoder).unwrap();
    assert_eq!(transport.url(), format!("http://{addr}{UPDATES_PATH}"));

    // Large enough to span several RSA chunks once compressed.
    let mut records: Vec<MetricRecord> = (0..200)
        .map(|i| MetricRecord::gauge(format!("gauge_{i}"), f64::from(i) * 1.5))
        .collect();
    records.push(MetricRecord::counter("PollCount", 4));

    transport.send(&records).await.unwrap();
    transport
        .send(&[MetricRecord::counter("PollCount", 6)])
        .await
        .unwrap();

    let service = &receiver.service;
    assert_eq!(
        service.get_metric(MetricKind::Counter, "PollCount").await.unwrap(),
        Some(MetricRecord::counter("PollCount", 10))
    );
    assert_eq!(
        service.get_metric(MetricKind::Gauge, "gauge_199").await.unwrap(),
        Some(MetricRecord::gauge("gauge_199", 298.5))
    );
    assert_eq!(service.list_metrics().await.unwrap().len(), 201);
}

#[tokio::test]
async fn test_wrong_signing_key_rejected() {
    let (addr, receiver) = start_collector(PayloadDecoder::new().with_signing_key("secret")).await;

    let transport =
        HttpTransport::new(&addr, PayloadEncoder::new().with_signing_key("other")).unwrap();
    let err = transport
        .send(&[MetricRecord::gauge("Alloc", 1.0)])
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Status { status: 400, .. }));
    assert!(!err.is_recoverable());
    assert!(receiver.service.list_metrics().await.unwrap().is_empty());
}

// =============================================================================
// Agent Pipeline Tests
// =============================================================================

#[tokio::test]
async fn test_agent_delivers_poll_count() {
    let (addr, receiver) = start_collector(PayloadDecoder::new().with_signing_key("secret")).await;

    let config = AgentConfig {
        address: addr,
        poll_interval: Duration::from_millis(50),
        report_interval: Duration::from_millis(200),
        rate_limit: 2,
        key: Some("secret".to_string()),
        ..AgentConfig::default()
    };

    let cancel = CancellationToken::new();
    let agent = AgentBuilder::new(config)
        .host_metrics(false)
        .start(cancel.clone())
        .unwrap();
    assert_eq!(agent.jobs().len(), 1);

    let poll_count = wait_for_counter(&receiver, "PollCount").await;
    assert!(matches!(poll_count, Some(MetricRecord { delta: Some(n), .. }) if n > 0));

    let random = receiver
        .service
        .get_metric(MetricKind::Gauge, "RandomValue")
        .await
        .unwrap()
        .and_then(|r| r.value)
        .unwrap();
    assert!((0.0..1.0).contains(&random));

    agent.shutdown().await.unwrap();
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn test_agent_shutdown_with_unreachable_collector() {
    let config = AgentConfig {
        // Nothing listens on port 1.
        address: "127.0.0.1:1".to_string(),
        poll_interval: Duration::from_millis(20),
        report_interval: Duration::from_millis(50),
        rate_limit: 1,
        ..AgentConfig::default()
    };

    let cancel = CancellationToken::new();
    let agent = AgentBuilder::new(config)
        .host_metrics(false)
        .start(cancel.clone())
        .unwrap();

    // Let a delivery fail and enter its backoff wait.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = std::time::Instant::now();
    agent
        .shutdown_with_timeout(Duration::from_secs(2))
        .await
        .unwrap();
    // Cancellation interrupts the 1s backoff instead of waiting it out.
    assert!(started.elapsed() < Duration::from_secs(1));
}
