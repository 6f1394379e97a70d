//! Bridge behavior: constructors, typed assignment, views, round-trips.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use forma_compiler::bridge::{MessageType, MessageValue, SharedRegistry};
use forma_script::eval::builtins;
use forma_script::value::{CallArgs, NativeObject};
use forma_script::{EvalErrorKind, Evaluator, Value};
use forma_schema::{parser, FieldValue, TypeRegistry};

const PROTO: &str = "\
syntax = \"proto3\";

message Server {
    enum Mode { OFF = 0; ACTIVE = 1; STANDBY = 2; }
    message Endpoint {
        string host = 1;
        uint32 port = 2;
    }
    string name = 1;
    uint32 port = 2;
    Mode mode = 3;
    repeated string tags = 4;
    map<string, int64> limits = 5;
    Endpoint endpoint = 6;
    double weight = 7;
}
";

fn registry() -> SharedRegistry {
    let mut registry = TypeRegistry::new();
    let raw = parser::parse_file(PROTO, "server.proto").unwrap();
    registry.ingest_file(&raw, "server.proto").unwrap();
    Rc::new(RefCell::new(registry))
}

fn constructor(registry: &SharedRegistry, name: &str) -> Value {
    let descriptor = registry.borrow().message(name).unwrap();
    Value::native(MessageType::new(descriptor, registry.clone()))
}

fn evaluator() -> Evaluator<'static> {
    Evaluator::new(builtins::universe())
}

fn kwargs(entries: &[(&str, Value)]) -> CallArgs {
    CallArgs {
        positional: Vec::new(),
        keywords: entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<IndexMap<_, _>>(),
    }
}

fn as_message(value: &Value) -> MessageValue {
    let Value::Native(n) = value else {
        panic!("not a native value");
    };
    n.as_any()
        .downcast_ref::<MessageValue>()
        .expect("not a message")
        .clone()
}

#[test]
fn test_constructor_with_kwargs() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();

    let server = eval
        .call_value(
            &ctor,
            kwargs(&[
                ("name", Value::str("api")),
                ("port", Value::Int(8080)),
            ]),
        )
        .unwrap();
    let msg = as_message(&server).to_message().unwrap();
    assert_eq!(msg.get("name"), Some(&FieldValue::String("api".into())));
    assert_eq!(msg.get("port"), Some(&FieldValue::U32(8080)));
}

#[test]
fn test_constructor_rejects_positional() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let err = eval
        .call_value(&ctor, CallArgs::positional(vec![Value::str("x")]))
        .unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Arity);
}

#[test]
fn test_round_trip_preserves_descriptor() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval
        .call_value(&ctor, kwargs(&[("name", Value::str("api"))]))
        .unwrap();
    let value = as_message(&server);
    let msg = value.to_message().unwrap();
    assert!(Rc::ptr_eq(value.descriptor(), msg.descriptor()));
}

#[test]
fn test_enum_accepts_symbol_and_int() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();

    let by_symbol = eval
        .call_value(&ctor, kwargs(&[("mode", Value::str("ACTIVE"))]))
        .unwrap();
    let msg = as_message(&by_symbol).to_message().unwrap();
    assert_eq!(msg.get("mode"), Some(&FieldValue::Enum(1)));

    let by_int = eval
        .call_value(&ctor, kwargs(&[("mode", Value::Int(2))]))
        .unwrap();
    let msg = as_message(&by_int).to_message().unwrap();
    assert_eq!(msg.get("mode"), Some(&FieldValue::Enum(2)));

    let err = eval
        .call_value(&ctor, kwargs(&[("mode", Value::str("NOPE"))]))
        .unwrap_err();
    assert!(err.message.contains("unknown enum symbol"));
}

#[test]
fn test_enum_reads_back_symbolically() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval
        .call_value(&ctor, kwargs(&[("mode", Value::Int(1))]))
        .unwrap();
    let value = as_message(&server);
    let mode = value.get_attr("mode").unwrap();
    assert!(mode.equals(&Value::str("ACTIVE")));
}

#[test]
fn test_unset_scalar_reads_default() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval.call_value(&ctor, CallArgs::default()).unwrap();
    let value = as_message(&server);
    assert!(value.get_attr("name").unwrap().equals(&Value::str("")));
    assert!(value.get_attr("port").unwrap().equals(&Value::Int(0)));
    assert!(value.get_attr("weight").unwrap().equals(&Value::Float(0.0)));
    assert!(value.get_attr("mode").unwrap().equals(&Value::str("OFF")));

    // Reading a default does not mark the field set.
    let msg = value.to_message().unwrap();
    assert!(msg.get("name").is_none());
}

#[test]
fn test_unknown_field_read_and_write() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval.call_value(&ctor, CallArgs::default()).unwrap();
    let value = as_message(&server);

    let err = value.get_attr("nameX").unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Attribute);
    assert!(err.message.contains("unknown field `nameX`"));

    let err = value.set_attr("nameX", Value::str("x")).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Attribute);
}

#[test]
fn test_scalar_type_checks() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval.call_value(&ctor, CallArgs::default()).unwrap();
    let value = as_message(&server);

    let err = value.set_attr("name", Value::Int(1)).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Type);

    let err = value.set_attr("port", Value::Int(-1)).unwrap_err();
    assert!(err.message.contains("out of range"));

    // Ints widen into floating-point fields.
    value.set_attr("weight", Value::Int(3)).unwrap();
    let msg = value.to_message().unwrap();
    assert_eq!(msg.get("weight"), Some(&FieldValue::F64(3.0)));

    // Strings and bytes stay distinct.
    let err = value
        .set_attr("name", Value::Bytes(b"x".as_slice().into()))
        .unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Type);
}

#[test]
fn test_repeated_view_writes_through() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval.call_value(&ctor, CallArgs::default()).unwrap();
    let value = as_message(&server);

    value
        .set_attr("tags", Value::list(vec![Value::str("a")]))
        .unwrap();
    let view = value.get_attr("tags").unwrap();
    let append = eval.attr_get(&view, "append").unwrap();
    eval.call_value(&append, CallArgs::positional(vec![Value::str("b")]))
        .unwrap();

    let msg = value.to_message().unwrap();
    assert_eq!(
        msg.get("tags"),
        Some(&FieldValue::List(vec![
            FieldValue::String("a".into()),
            FieldValue::String("b".into()),
        ]))
    );

    // Element type checks apply on append.
    let err = eval
        .call_value(&append, CallArgs::positional(vec![Value::Int(1)]))
        .unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Type);
}

#[test]
fn test_map_view_key_enforcement() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval.call_value(&ctor, CallArgs::default()).unwrap();
    let value = as_message(&server);

    let limits = value.get_attr("limits").unwrap();
    let Value::Native(view) = &limits else {
        panic!("expected a native map view");
    };
    view.index_set(Value::str("qps"), Value::Int(100)).unwrap();

    let err = view.index_set(Value::Int(1), Value::Int(2)).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Type);

    assert!(view.contains(&Value::str("qps")).unwrap());
    let got = view.index_get(&Value::str("qps")).unwrap();
    assert!(got.equals(&Value::Int(100)));

    let msg = value.to_message().unwrap();
    let Some(FieldValue::Map(entries)) = msg.get("limits") else {
        panic!("limits not set");
    };
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_nested_constructor_attribute() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();

    let Value::Native(server_type) = &ctor else {
        panic!("expected native");
    };
    let endpoint_type = server_type.get_attr("Endpoint").unwrap();
    let endpoint = eval
        .call_value(
            &endpoint_type,
            kwargs(&[("host", Value::str("h")), ("port", Value::Int(1))]),
        )
        .unwrap();
    let msg = as_message(&endpoint).to_message().unwrap();
    assert_eq!(msg.descriptor().full_name, "Server.Endpoint");

    let err = server_type.get_attr("Missing").unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::Attribute);
}

#[test]
fn test_submessage_descriptor_mismatch() {
    let registry = registry();
    let server_ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval.call_value(&server_ctor, CallArgs::default()).unwrap();
    let other = eval.call_value(&server_ctor, CallArgs::default()).unwrap();

    // A Server is not an Endpoint.
    let err = as_message(&server)
        .set_attr("endpoint", other)
        .unwrap_err();
    assert!(err.message.contains("expected message `Server.Endpoint`"));
}

#[test]
fn test_from_message_wraps_for_validators() {
    let registry = registry();
    let ctor = constructor(&registry, "Server");
    let mut eval = evaluator();
    let server = eval
        .call_value(
            &ctor,
            kwargs(&[
                ("name", Value::str("api")),
                ("tags", Value::list(vec![Value::str("a")])),
            ]),
        )
        .unwrap();
    let msg = as_message(&server).to_message().unwrap();

    let wrapper = MessageValue::from_message(&msg, registry.clone());
    assert!(wrapper.get_attr("name").unwrap().equals(&Value::str("api")));
    let tags = wrapper.get_attr("tags").unwrap();
    assert_eq!(tags.length().unwrap(), 1);

    // The wrapper is a copy: mutating it leaves the original message alone.
    wrapper.set_attr("name", Value::str("changed")).unwrap();
    assert_eq!(msg.get("name"), Some(&FieldValue::String("api".into())));
}
