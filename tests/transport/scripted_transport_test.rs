//! The scripted transport used to drive multiplexer tests.

use std::time::Duration;

use bytes::Bytes;
use chmux::transport::{
    codes, Completion, OperationId, Readiness, Reply, RequestDescriptor, ScriptedTransport,
    Transport, TransportFailure,
};
use pretty_assertions::assert_eq;

#[test]
fn test_submit_assigns_increasing_ids() {
    let mut transport = ScriptedTransport::new();
    let a = transport.submit(RequestDescriptor::query("SELECT 1")).unwrap();
    let b = transport.submit(RequestDescriptor::query("SELECT 2")).unwrap();

    assert!(a < b);
    assert_eq!(transport.running(), 2);
    assert_eq!(transport.contexts_created(), 1);
    assert_eq!(a.to_string(), "op#1");
}

#[test]
fn test_drain_reports_only_running_operations() {
    let mut transport = ScriptedTransport::new();
    let id = transport.submit(RequestDescriptor::query("SELECT 1")).unwrap();
    transport.complete(OperationId(99), 200, "stray");
    transport.complete(id, 200, "1\n");

    let drained = transport.drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].id, id);
    assert_eq!(drained[0].body, Bytes::from("1\n"));
    assert_eq!(transport.running(), 0);
    assert!(transport.drain().is_empty());
}

#[test]
fn test_wait_reports_readiness() {
    let mut transport = ScriptedTransport::new();
    let id = transport.submit(RequestDescriptor::query("SELECT 1")).unwrap();
    assert_eq!(transport.wait(Duration::from_millis(1)), Readiness::Unsupported);

    transport.fail(id, TransportFailure::new(codes::OPERATION_TIMEDOUT, "slow"));
    assert_eq!(transport.wait(Duration::from_millis(1)), Readiness::Ready);

    let drained = transport.drain();
    let failure = drained[0].outcome.clone().unwrap_err();
    assert!(failure.is_timeout());
}

#[test]
fn test_close_discards_queued_completion() {
    let mut transport = ScriptedTransport::new();
    let id = transport.submit(RequestDescriptor::query("SELECT 1")).unwrap();
    transport.queue(Completion::success(id, 200, "late"));

    transport.close(id);

    assert!(transport.drain().is_empty());
    assert_eq!(transport.closed(), vec![id]);
    assert_eq!(transport.running(), 0);
}

#[test]
fn test_reject_next_fails_once() {
    let mut transport = ScriptedTransport::new();
    transport.reject_next(TransportFailure::new(codes::FAILED_INIT, "no context"));

    let err = transport.submit(RequestDescriptor::query("SELECT 1")).unwrap_err();
    assert_eq!(err.code, codes::FAILED_INIT);
    assert!(transport.submitted().is_empty());
    assert!(transport.submit(RequestDescriptor::query("SELECT 1")).is_ok());
}

#[test]
fn test_teardown_and_reconnect() {
    let mut transport = ScriptedTransport::new();
    transport.submit(RequestDescriptor::query("SELECT 1")).unwrap();
    assert!(transport.is_connected());

    transport.teardown();
    assert!(!transport.is_connected());
    assert_eq!(transport.running(), 0);

    transport.submit(RequestDescriptor::query("SELECT 1")).unwrap();
    assert_eq!(transport.contexts_created(), 2);
}

#[test]
fn test_responder_sees_request() {
    let mut transport = ScriptedTransport::with_responder(|request| match request.sql.as_str() {
        "SELECT 1" => Reply::Respond(200, Bytes::from_static(b"1\n")),
        _ => Reply::Hold,
    });
    let quick = transport
        .submit(RequestDescriptor::query("SELECT 1").database("events"))
        .unwrap();
    transport.submit(RequestDescriptor::query("SELECT sleep(3)")).unwrap();

    let drained = transport.drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].id, quick);
    assert_eq!(transport.running(), 1);

    let submitted = transport.submitted();
    let (_, request) = &submitted[0];
    assert_eq!(
        request.params,
        vec![("database".to_string(), "events".to_string())]
    );
}
