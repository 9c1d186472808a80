//! Tests for escalation sinks

use prometheus_workqueue::core::{
    build_escalation, EscalationKind, EscalationSink, InMemoryEscalationSink,
    TracingEscalationSink,
};

#[test]
fn test_in_memory_sink_records_in_order() {
    let sink = InMemoryEscalationSink::new(10);
    sink.escalate(build_escalation(
        "ctrl",
        "default/a",
        EscalationKind::GaveUp { attempts: 6 },
        "boom",
    ));
    sink.escalate(build_escalation(
        "ctrl",
        "all namespaces",
        EscalationKind::CacheSyncFailed,
        "list failed",
    ));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject, "default/a");
    assert_eq!(events[0].kind, EscalationKind::GaveUp { attempts: 6 });
    assert_eq!(events[1].kind, EscalationKind::CacheSyncFailed);
    assert!(events[0].created_at_ms > 0);
}

#[test]
fn test_in_memory_sink_is_bounded() {
    let sink = InMemoryEscalationSink::new(2);
    for i in 0..5 {
        sink.escalate(build_escalation(
            "ctrl",
            format!("key-{i}"),
            EscalationKind::GaveUp { attempts: 1 },
            "err",
        ));
    }
    let subjects: Vec<_> = sink.events().into_iter().map(|e| e.subject).collect();
    assert_eq!(subjects, vec!["key-3".to_string(), "key-4".to_string()]);
}

#[test]
fn test_tracing_sink_accepts_every_kind() {
    let sink = TracingEscalationSink;
    sink.escalate(build_escalation("ctrl", "k", EscalationKind::GaveUp { attempts: 2 }, "e"));
    sink.escalate(build_escalation("ctrl", "ns", EscalationKind::CacheSyncFailed, "e"));
}
