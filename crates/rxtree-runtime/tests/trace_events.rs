//! Structured log events emitted by the runtime.
//!
//! A capture layer records the `message` field of every event so tests can
//! assert on the event names the runtime promises.

use std::sync::{Arc, Mutex};

use rxtree_core::{Key, Value};
use rxtree_runtime::{ItemKey, KeyedState, MemoryStorage, PersistentState, State, VerifiedState};
use serde_json::json;
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Clone, Default)]
struct Capture {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Capture {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("capture lock").clone()
    }

    fn saw(&self, name: &str) -> bool {
        self.messages().iter().any(|message| message == name)
    }

    fn count(&self, name: &str) -> usize {
        self.messages().iter().filter(|message| *message == name).count()
    }
}

impl<S> Layer<S> for Capture
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Msg {
            message: Option<String>,
        }
        impl tracing::field::Visit for Msg {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                }
            }
        }
        let mut msg = Msg { message: None };
        event.record(&mut msg);
        if let Some(message) = msg.message {
            self.messages.lock().expect("capture lock").push(message);
        }
    }
}

fn capture() -> (Capture, tracing::subscriber::DefaultGuard) {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

fn by_id(item: &Value) -> ItemKey {
    match item.get(&Key::from("id")) {
        Some(Value::Int(id)) => ItemKey::Num(*id),
        _ => ItemKey::Str(item.to_string()),
    }
}

#[test]
fn equal_write_logs_suppression() {
    let (capture, _guard) = capture();
    let root = State::new(Value::Int(1));
    root.set(Value::Int(1));
    root.replace(Value::Int(1));
    assert_eq!(capture.count("state.suppressed"), 2);
}

#[test]
fn write_into_scalar_logs_rejection() {
    let (capture, _guard) = capture();
    let root = State::new(Value::from("text"));
    root.sub("field").set(Value::Int(1));
    assert!(capture.saw("state.write_rejected"));
}

#[test]
fn write_to_closed_node_logs_ignore() {
    let (capture, _guard) = capture();
    let root = State::new(Value::Int(1));
    root.complete();
    root.set(Value::Int(2));
    assert!(capture.saw("state.write_ignored"));
}

#[test]
fn write_through_vanished_key_logs_missing() {
    let (capture, _guard) = capture();
    let root = State::new(Value::from(json!([{"id": 1, "n": 0}])));
    let keyed = KeyedState::new(&root, by_id);
    let node = keyed.key(1);
    let _sub = node.subscribe(|_| {});
    keyed.set(Value::list(Vec::<Value>::new()));
    node.sub("n").set(Value::Int(5));
    assert!(capture.saw("keyed.key_missing"));
    assert_eq!(root.value(), Some(Value::list(Vec::<Value>::new())));
}

#[test]
fn duplicate_keys_are_logged() {
    let (capture, _guard) = capture();
    let root = State::new(Value::from(json!([{"id": 1}, {"id": 1}])));
    let _keyed = KeyedState::new(&root, by_id);
    assert!(capture.saw("keyed.duplicate_key"));
}

#[test]
fn rejection_logs_bounce() {
    let (capture, _guard) = capture();
    let root = State::new(Value::Int(0));
    let verified = VerifiedState::new(&root, |change| change.value != Some(Value::Int(13)));
    verified.set(Value::Int(13));
    verified.set(Value::Int(12));
    assert_eq!(capture.count("verified.bounce"), 1);
}

#[test]
fn persistence_logs_saves_and_injections() {
    let (capture, _guard) = capture();
    let storage = MemoryStorage::new();
    let root = State::new(Value::Int(0));
    let persistent = PersistentState::new(&root, storage.clone());
    let _sub = persistent.subscribe(|_| {});
    root.set(Value::Int(1));
    storage.push(Value::Int(2));
    assert_eq!(capture.count("persistent.save"), 2);
    assert_eq!(capture.count("persistent.inject"), 1);
}
