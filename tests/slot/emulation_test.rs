//! Emulated slots: synthetic results installed without the transport.

use bytes::Bytes;
use chmux::slot::{EnvelopeOverrides, Multiplexer, SlotStatus, SlotValue, Wait};
use chmux::transport::{Metadata, RequestDescriptor, ScriptedTransport, Transport};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_emulate_with_status_override() {
    let transport = ScriptedTransport::new();
    let mut mux = Multiplexer::new(transport.clone());

    mux.emulate("x", "hello", EnvelopeOverrides::default().status(404));

    assert_eq!(mux.fetch_results(Some("x")).unwrap(), SlotValue::from("hello"));
    let envelope = mux.envelope("x").unwrap();
    assert_eq!(envelope.status(), 404);
    assert_eq!(envelope.metadata()["status"], json!(404));
    assert_eq!(mux.check("x"), Some(SlotStatus::Success));
    assert!(transport.submitted().is_empty());
    assert!(!transport.is_connected());
}

#[test]
fn test_emulate_defaults() {
    let mut mux = Multiplexer::new(ScriptedTransport::new());
    mux.emulate("x", "", EnvelopeOverrides::default());

    let envelope = mux.envelope("x").unwrap();
    assert_eq!(envelope.status(), 200);
    assert_eq!(envelope.transport_error(), "");
    assert!(envelope.header_lines().is_empty());
    assert_eq!(mux.handle("x"), None);
    assert_eq!(mux.wait_ready(Some("x")), Wait::Resolved(SlotStatus::Success));
}

#[test]
fn test_emulate_round_trips_bytes() {
    let mut mux = Multiplexer::new(ScriptedTransport::new());
    let payload: Vec<u8> = (0u8..=255).chain([0, 0xff, b'\n']).collect();

    mux.emulate("blob", payload.clone(), EnvelopeOverrides::default());

    let value = mux.fetch_results(Some("blob")).unwrap();
    assert_eq!(value.as_bytes(), Some(&payload[..]));
    assert_eq!(mux.envelope("blob").unwrap().body(), &Bytes::from(payload));
}

#[test]
fn test_emulate_all_overrides() {
    let mut mux = Multiplexer::new(ScriptedTransport::new());
    let mut metadata = Metadata::new();
    metadata.insert("total_time".to_string(), json!(0.25));

    mux.emulate(
        "x",
        json!({"rows": 1}),
        EnvelopeOverrides::default()
            .status(500)
            .transport_error("synthetic failure")
            .header("X-ClickHouse-Query-Id: abc")
            .metadata(metadata.clone()),
    );

    let envelope = mux.envelope("x").unwrap();
    assert_eq!(envelope.status(), 500);
    assert_eq!(envelope.transport_error(), "synthetic failure");
    assert_eq!(envelope.header("x-clickhouse-query-id"), Some("abc"));
    assert_eq!(envelope.metadata(), &metadata);
    assert_eq!(envelope.body(), &Bytes::from(r#"{"rows":1}"#));
    assert_eq!(
        mux.fetch_results(Some("x")).unwrap(),
        SlotValue::from(json!({"rows": 1}))
    );
}

#[test]
fn test_emulate_replaces_running_slot() {
    let transport = ScriptedTransport::new();
    let mut mux = Multiplexer::new(transport.clone());
    mux.start("Slow", RequestDescriptor::query("SELECT sleep(3)"), vec![])
        .unwrap();
    let id = mux.handle("slow").unwrap();

    mux.emulate("SLOW", "cached", EnvelopeOverrides::default());

    assert_eq!(transport.closed(), vec![id]);
    assert_eq!(transport.running(), 0);
    assert_eq!(mux.len(), 1);
    assert_eq!(mux.fetch_results(Some("slow")).unwrap(), SlotValue::from("cached"));
}

#[test]
fn test_emulate_is_chainable() {
    let mut mux = Multiplexer::new(ScriptedTransport::new());
    mux.emulate("a", "1", EnvelopeOverrides::default())
        .emulate("b", "2", EnvelopeOverrides::default())
        .mark_read_target("b");

    assert_eq!(mux.fetch_results(None).unwrap(), SlotValue::from("2"));
    assert_eq!(mux.erase_all(false), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_erased_emulated_slot_is_unknown() {
    let mut mux = Multiplexer::new(ScriptedTransport::new());
    assert!(mux.fetch_results(Some("nope")).unwrap_err().is_unknown());

    mux.emulate("s", "body", EnvelopeOverrides::default());
    mux.erase("s", false).unwrap();

    assert!(mux.fetch_results(Some("s")).unwrap_err().is_unknown());
}
