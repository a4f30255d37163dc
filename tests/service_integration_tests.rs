//! End-to-end scenarios running a full service against the in-memory
//! transport: a test client subscribes to downstream topics and injects
//! jobs exactly as a remote peer would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use microcore::{
    response_key_of, InMemoryTransport, JobError, MicrocoreError, Service, ServiceConfig,
    Transport, TransportConfig, ERROR_TOPIC, RESULT_SEND_OPTIONS, STATUS_TOPIC,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn work_config(id: &str, interval_ms: u64) -> ServiceConfig {
    ServiceConfig {
        id: id.to_string(),
        service_type: "workprocessor".to_string(),
        transport: TransportConfig::InMemory,
        result_key: "result".to_string(),
        status_report_interval_ms: interval_ms,
    }
}

#[tokio::test]
async fn test_rejects_missing_config_values() {
    let mut config = work_config("workservice", 30_000);
    config.id = String::new();

    let err = Service::builder(config).start().await.unwrap_err();
    assert!(matches!(err, MicrocoreError::Configuration(_)));
}

#[tokio::test]
async fn test_service_reports_status_with_own_config() {
    let transport = Arc::new(InMemoryTransport::new());
    let mut status = transport.subscribe(STATUS_TOPIC).await.unwrap();

    let config = ServiceConfig {
        id: "testservice".to_string(),
        service_type: "testprocessor".to_string(),
        transport: TransportConfig::InMemory,
        result_key: "test".to_string(),
        status_report_interval_ms: 500,
    };
    let inits = Arc::new(AtomicUsize::new(0));
    let inits_hook = Arc::clone(&inits);
    let service = Service::builder(config.clone())
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .on_init(move || {
            let inits = Arc::clone(&inits_hook);
            async move {
                inits.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start()
        .await
        .unwrap();
    assert_eq!(inits.load(Ordering::SeqCst), 1);

    let delivery = timeout(RECV_TIMEOUT, status.deliveries.recv())
        .await
        .expect("no status report")
        .unwrap();
    let reported: ServiceConfig = serde_json::from_value(delivery.payload).unwrap();
    assert_eq!(reported.id, config.id);
    assert_eq!(reported.service_type, config.service_type);
    assert_eq!(reported.result_key, config.result_key);
    assert_eq!(
        reported.status_report_interval_ms,
        config.status_report_interval_ms
    );

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handles_simple_job() {
    let transport = Arc::new(InMemoryTransport::new());
    let mut results = transport.subscribe("result").await.unwrap();
    let test_data = json!({"a": 1, "b": 2});

    let expected = test_data.clone();
    let service = Service::builder(work_config("workservice", 30_000))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .on_job(move |job, completion| {
            let expected = expected.clone();
            async move {
                assert_eq!(job, expected, "correct data payload");
                let mut result = job;
                result["done"] = json!(true);
                completion.success(result).await.unwrap();
            }
        })
        .start()
        .await
        .unwrap();

    transport
        .send("workservice", &test_data, RESULT_SEND_OPTIONS)
        .await
        .unwrap();

    let delivery = timeout(RECV_TIMEOUT, results.deliveries.recv())
        .await
        .expect("no result")
        .unwrap();
    assert_eq!(delivery.payload, json!({"a": 1, "b": 2, "done": true}));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_replies_to_custom_response_key() {
    let transport = Arc::new(InMemoryTransport::new());
    let mut responses = transport.subscribe("response").await.unwrap();
    let test_data = json!({"a": 1, "b": 2, "responseKey": "response"});

    let service = Service::builder(work_config("workservice", 30_000))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .on_job(|job, completion| async move {
            let mut result = job.clone();
            result["done"] = json!(true);
            match response_key_of(&job) {
                Some(response_key) => completion.success_to(result, response_key).await.unwrap(),
                None => completion.success(result).await.unwrap(),
            }
        })
        .start()
        .await
        .unwrap();

    transport
        .send("workservice", &test_data, RESULT_SEND_OPTIONS)
        .await
        .unwrap();

    let delivery = timeout(RECV_TIMEOUT, responses.deliveries.recv())
        .await
        .expect("no reply on the override key")
        .unwrap();
    assert_eq!(delivery.payload["done"], json!(true));

    service.shutdown().await.unwrap();
    // The default result key saw no traffic.
    assert!(transport.sent_to("result").await.is_empty());
}

#[tokio::test]
async fn test_routes_handler_error_to_error_topic() {
    let transport = Arc::new(InMemoryTransport::new());
    let mut errors = transport.subscribe(ERROR_TOPIC).await.unwrap();
    let test_data = json!({"a": 1, "b": 2});

    let service = Service::builder(work_config("workservice", 30_000))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .on_job(|_job, completion| async move {
            completion
                .failure(JobError::new("Error", "test error"))
                .await
                .unwrap();
        })
        .start()
        .await
        .unwrap();

    transport
        .send("workservice", &test_data, RESULT_SEND_OPTIONS)
        .await
        .unwrap();

    let delivery = timeout(RECV_TIMEOUT, errors.deliveries.recv())
        .await
        .expect("no error report")
        .unwrap();
    assert_eq!(delivery.payload["error"]["name"], "Error");
    assert_eq!(delivery.payload["error"]["message"], "test error");
    assert_eq!(delivery.payload["source"], "workservice");
    assert_eq!(delivery.payload["data"], test_data);

    service.shutdown().await.unwrap();
    assert!(transport.sent_to("result").await.is_empty());
}

#[tokio::test]
async fn test_no_reply_outcome_acks_silently() {
    let transport = Arc::new(InMemoryTransport::new());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let service = Service::builder(work_config("workservice", 30_000))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .on_job(move |_job, completion| {
            let done_tx = done_tx.clone();
            async move {
                completion.no_reply().await.unwrap();
                let _ = done_tx.send(());
            }
        })
        .start()
        .await
        .unwrap();

    transport
        .send("workservice", &json!({"a": 1}), RESULT_SEND_OPTIONS)
        .await
        .unwrap();
    timeout(RECV_TIMEOUT, done_rx.recv())
        .await
        .expect("job never processed")
        .unwrap();

    // The delivery was acknowledged but nothing was published downstream.
    assert_eq!(transport.acked().await.len(), 1);
    assert!(transport.sent_to("result").await.is_empty());
    assert!(transport.sent_to(ERROR_TOPIC).await.is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_triggers_cleanup_exactly_once() {
    let transport = Arc::new(InMemoryTransport::new());
    let cleanups = Arc::new(AtomicUsize::new(0));
    let cleanups_hook = Arc::clone(&cleanups);

    let service = Service::builder(work_config("workservice", 30_000))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .on_cleanup(move || {
            let cleanups = Arc::clone(&cleanups_hook);
            async move {
                cleanups.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start()
        .await
        .unwrap();

    service.shutdown().await.unwrap();
    service.shutdown().await.unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_no_new_jobs_after_shutdown() {
    let transport = Arc::new(InMemoryTransport::new());
    let handled = Arc::new(AtomicUsize::new(0));
    let handled_hook = Arc::clone(&handled);

    let service = Service::builder(work_config("workservice", 30_000))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .on_job(move |_job, completion| {
            let handled = Arc::clone(&handled_hook);
            async move {
                handled.fetch_add(1, Ordering::SeqCst);
                completion.no_reply().await.unwrap();
            }
        })
        .start()
        .await
        .unwrap();

    service.shutdown().await.unwrap();
    transport
        .send("workservice", &json!({"late": true}), RESULT_SEND_OPTIONS)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}
