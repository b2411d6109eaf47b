//! Hook pipelines: on-complete side effects, finishers and transforms.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chmux::config::MultiplexerSettings;
use chmux::slot::{
    hook, EnvelopeOverrides, Hook, HookBatch, HookError, Multiplexer, SlotError, SlotStatus,
    SlotValue, Step,
};
use chmux::transport::{codes, RequestDescriptor, ScriptedTransport, TransportFailure};
use pretty_assertions::assert_eq;
use serde_json::json;

fn setup() -> (ScriptedTransport, Multiplexer) {
    let transport = ScriptedTransport::new();
    let settings = MultiplexerSettings {
        select_timeout_ms: 1,
        drain_budget_ms: 50,
        idle_sleep_ms: 0,
    };
    let mux = Multiplexer::with_settings(transport.clone(), settings);
    (transport, mux)
}

fn double() -> Hook {
    Hook::transform(|value| {
        let n = value.as_i64().ok_or_else(|| HookError::new("not a number"))?;
        Ok(SlotValue::from(n * 2))
    })
}

fn increment() -> Hook {
    Hook::transform(|value| {
        let n = value.as_i64().ok_or_else(|| HookError::new("not a number"))?;
        Ok(SlotValue::from(n + 1))
    })
}

fn counting_hook(counter: &Rc<Cell<u32>>) -> Hook {
    let counter = counter.clone();
    Hook::on_complete(move |_, _, _| counter.set(counter.get() + 1))
}

#[test]
fn test_transforms_compose_in_push_order() {
    let (_, mut mux) = setup();
    mux.emulate("five", 5i64, EnvelopeOverrides::default());

    mux.push_hook("five", vec![double(), increment()]).unwrap();

    assert_eq!(mux.fetch_results(Some("five")).unwrap(), SlotValue::from(11i64));
    // Hooks are consumed; the stored value is returned as is
    assert_eq!(mux.fetch_results(Some("five")).unwrap(), SlotValue::from(11i64));
}

#[test]
fn test_transforms_apply_to_raw_payload() {
    let (transport, mut mux) = setup();
    mux.start("n", RequestDescriptor::query("SELECT 5"), vec![increment(), double()])
        .unwrap();
    transport.complete(mux.handle("n").unwrap(), 200, "5\n");

    assert_eq!(mux.fetch_results(Some("n")).unwrap(), SlotValue::from(12i64));
}

#[test]
fn test_hooks_pushed_later_extend_the_pipeline() {
    let (transport, mut mux) = setup();
    mux.start("n", RequestDescriptor::query("SELECT 5"), double()).unwrap();
    transport.complete(mux.handle("n").unwrap(), 200, "5");
    mux.wait_ready(Some("n"));

    mux.push_hook("n", increment()).unwrap();
    assert_eq!(mux.fetch_results(Some("n")).unwrap(), SlotValue::from(11i64));

    // Applied after the first fetch, on top of the stored value
    mux.push_hook("n", double()).unwrap();
    assert_eq!(mux.fetch_results(Some("n")).unwrap(), SlotValue::from(22i64));
}

#[test]
fn test_on_complete_fires_once_before_fetch() {
    let (transport, mut mux) = setup();
    let fired = Rc::new(Cell::new(0));
    mux.start("a", RequestDescriptor::query("SELECT 1"), counting_hook(&fired))
        .unwrap();
    assert_eq!(fired.get(), 0);

    transport.complete(mux.handle("a").unwrap(), 200, "1\n");
    mux.wait_ready(None);
    assert_eq!(fired.get(), 1);

    mux.fetch_results(Some("a")).unwrap();
    mux.fetch_results(Some("a")).unwrap();
    mux.wait_ready(Some("a"));
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_on_complete_pushed_after_completion_never_fires() {
    let (transport, mut mux) = setup();
    let fired = Rc::new(Cell::new(0));
    mux.start("a", RequestDescriptor::query("SELECT 1"), vec![]).unwrap();
    transport.complete(mux.handle("a").unwrap(), 200, "1\n");
    mux.wait_ready(Some("a"));

    mux.push_hook("a", vec![counting_hook(&fired), increment()]).unwrap();

    assert_eq!(mux.fetch_results(Some("a")).unwrap(), SlotValue::from(2i64));
    assert_eq!(fired.get(), 0);
}

#[test]
fn test_on_complete_receives_name_and_param() {
    let (transport, mut mux) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let hook = Hook::on_complete_with(
        move |mux, name, par| {
            log.borrow_mut()
                .push((name.to_string(), mux.check(name), par.cloned()));
        },
        json!({"tag": "nightly"}),
    );
    mux.start("Daily", RequestDescriptor::query("SELECT 1"), hook).unwrap();
    transport.complete(mux.handle("daily").unwrap(), 200, "");

    mux.wait_ready(Some("daily"));

    assert_eq!(
        *seen.borrow(),
        vec![(
            "daily".to_string(),
            Some(SlotStatus::Success),
            Some(json!({"tag": "nightly"}))
        )]
    );
}

#[test]
fn test_on_complete_fires_for_transport_failures() {
    let (transport, mut mux) = setup();
    let fired = Rc::new(Cell::new(0));
    mux.start("a", RequestDescriptor::query("SELECT 1"), counting_hook(&fired))
        .unwrap();
    transport.fail(
        mux.handle("a").unwrap(),
        TransportFailure::new(codes::COULDNT_CONNECT, "connection refused"),
    );

    mux.wait_ready(Some("a"));
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_on_complete_can_annotate_result() {
    let (transport, mut mux) = setup();
    let annotate = Hook::on_complete(|mux, name, _| {
        if let Some(result) = mux.result_mut(name) {
            let rows = result.to_text().lines().count() as i64;
            *result = SlotValue::from(json!({"rows": rows}));
        }
    });
    mux.start("a", RequestDescriptor::query("SELECT number FROM numbers(3)"), annotate)
        .unwrap();
    transport.complete(mux.handle("a").unwrap(), 200, "0\n1\n2\n");

    assert_eq!(
        mux.fetch_results(Some("a")).unwrap(),
        SlotValue::from(json!({"rows": 3}))
    );
}

#[test]
fn test_on_complete_can_start_follow_up_slot() {
    let (transport, mut mux) = setup();
    let follow_up = Hook::on_complete(|mux, name, _| {
        let sql = format!("SELECT 'after {}'", name);
        mux.start("follow", RequestDescriptor::query(sql), vec![]).unwrap();
    });
    mux.start("first", RequestDescriptor::query("SELECT 1"), follow_up).unwrap();
    transport.complete(mux.handle("first").unwrap(), 200, "");

    mux.wait_ready(Some("first"));

    assert_eq!(mux.check("follow"), Some(SlotStatus::Pending));
    assert_eq!(transport.submitted()[1].1.sql, "SELECT 'after first'");
}

#[test]
fn test_finisher_runs_through_suspensions() {
    let (transport, mut mux) = setup();
    let resumed = Rc::new(Cell::new(0));
    let counter = resumed.clone();
    let finisher = Hook::incremental(move |value| {
        let text = value.to_text().trim().to_uppercase();
        Step::suspend(move || {
            counter.set(counter.get() + 1);
            Step::Done(SlotValue::from(text))
        })
    });
    mux.start("s", RequestDescriptor::query("SELECT 'abc'"), finisher).unwrap();
    transport.complete(mux.handle("s").unwrap(), 200, "abc\n");

    assert_eq!(mux.fetch_results(Some("s")).unwrap(), SlotValue::from("ABC"));
    assert_eq!(resumed.get(), 1);
}

#[test]
fn test_stock_json_and_field_hooks() {
    let (transport, mut mux) = setup();
    mux.start(
        "report",
        RequestDescriptor::query("SELECT 1 AS x FORMAT JSON"),
        vec![hook::json(), hook::field("data")],
    )
    .unwrap();
    transport.complete(
        mux.handle("report").unwrap(),
        200,
        r#"{"meta": [{"name": "x"}], "data": [{"x": 1}], "rows": 1}"#,
    );

    assert_eq!(
        mux.fetch_results(Some("report")).unwrap(),
        SlotValue::from(json!([{"x": 1}]))
    );
}

#[test]
fn test_failing_hook_keeps_earlier_work() {
    let (_, mut mux) = setup();
    mux.emulate("five", 5i64, EnvelopeOverrides::default());
    let fail = Hook::transform(|_| Err(HookError::new("boom")));
    mux.push_hook("five", vec![double(), fail, increment()]).unwrap();

    let err = mux.fetch_results(Some("five")).unwrap_err();
    assert_eq!(
        err,
        SlotError::HookFailed {
            name: "five".to_string(),
            message: "boom".to_string()
        }
    );

    // The failed hook is consumed; the rest of the queue continues
    assert_eq!(mux.fetch_results(Some("five")).unwrap(), SlotValue::from(11i64));
}

#[test]
fn test_json_hook_rejects_non_json_payload() {
    let (transport, mut mux) = setup();
    mux.start("a", RequestDescriptor::query("SELECT 1"), hook::json()).unwrap();
    transport.complete(mux.handle("a").unwrap(), 200, "not json");

    let err = mux.fetch_results(Some("a")).unwrap_err();
    assert!(matches!(err, SlotError::HookFailed { .. }));
    assert_eq!(mux.fetch_results(Some("a")).unwrap(), SlotValue::from("not json"));
}

#[test]
fn test_rejected_batch_leaves_queue_untouched() {
    let (_, mut mux) = setup();
    mux.emulate("five", 5i64, EnvelopeOverrides::default());

    let mut fed = chmux::slot::Incremental::new(Step::Done);
    fed.feed(SlotValue::default()).unwrap();
    let batch = HookBatch::new().push(double()).push(Hook::Incremental(fed));

    let err = mux.push_hook("five", batch).unwrap_err();
    assert!(matches!(err, SlotError::MalformedHook(_)));
    assert_eq!(mux.fetch_results(Some("five")).unwrap(), SlotValue::from(5i64));
}

#[test]
fn test_log_completion_hook_is_harmless() {
    let (transport, mut mux) = setup();
    mux.start("a", RequestDescriptor::query("SELECT 1"), hook::log_completion())
        .unwrap();
    transport.complete(mux.handle("a").unwrap(), 200, "1\n");

    mux.wait_ready(Some("a"));
    assert_eq!(mux.fetch_results(Some("a")).unwrap(), SlotValue::from("1\n"));
}
