//! Concurrent access to one shared client.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

use telemetryflow::export::in_memory::InMemoryExporterFactory;
use telemetryflow::{AttributeMap, SpanKind, TelemetryBuilder, TelemetryClient};

fn shared_client(factory: Arc<InMemoryExporterFactory>) -> Arc<TelemetryClient> {
    let client = TelemetryBuilder::new()
        .with_api_key("tfk_concurrent", "tfs_concurrent")
        .with_endpoint("collector.example.com:4317")
        .with_service("concurrent-service", None)
        .with_exporter_factory(factory)
        .build()
        .unwrap();
    client.initialize().unwrap();
    Arc::new(client)
}

#[test]
fn concurrent_spans_get_distinct_ids() {
    let factory = Arc::new(InMemoryExporterFactory::new());
    let client = shared_client(factory.clone());
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let client = client.clone();
            let seen = seen.clone();
            thread::spawn(move || {
                let span = client
                    .start_span(&format!("op-{i}"), SpanKind::Internal, AttributeMap::new())
                    .unwrap();
                let id = span.id().unwrap();
                seen.lock().unwrap().insert(id);
                span.end().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(seen.lock().unwrap().len(), 100);
    assert_eq!(factory.spans_started(), 100);
    assert_eq!(factory.spans_ended(), 100);
    assert_eq!(client.status().unwrap().spans_sent, 100);
    assert_eq!(client.status().unwrap().active_spans, 0);
}

#[test]
fn concurrent_counter_recordings_share_one_instrument() {
    let factory = Arc::new(InMemoryExporterFactory::new());
    let client = shared_client(factory.clone());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    client
                        .increment_counter("requests_total", 1, AttributeMap::new())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(factory.counters_created(), 1);
    assert_eq!(factory.counter_adds(), 400);
    assert_eq!(client.status().unwrap().metrics_sent, 400);
}

#[test]
fn shutdown_races_with_recording_without_errors() {
    let factory = Arc::new(InMemoryExporterFactory::new());
    let client = shared_client(factory);

    let recorder = {
        let client = client.clone();
        thread::spawn(move || {
            // after shutdown wins the race these return NotInitialized,
            // which is the expected strict-facade behavior
            for _ in 0..200 {
                let _ = client.increment_counter("requests_total", 1, AttributeMap::new());
            }
        })
    };
    let stopper = {
        let client = client.clone();
        thread::spawn(move || client.shutdown(None))
    };

    recorder.join().unwrap();
    stopper.join().unwrap().unwrap();
    assert!(!client.is_initialized());
}
