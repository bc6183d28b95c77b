//! Unit tests for definitions, stubs and message payloads.

use crate::error::NetronError;
use crate::protocol::definition::{CapabilityDescriptor, Definition};
use crate::protocol::message::{self, GetRequest, Hello, Reply, Value};
use crate::protocol::stub::{CallResult, Context, Stub};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

struct Thermostat {
    target: AtomicI64,
}

impl Thermostat {
    fn new() -> Self {
        Self {
            target: AtomicI64::new(20),
        }
    }
}

impl Context for Thermostat {
    fn get(&self, property: &str) -> crate::error::Result<Value> {
        match property {
            "target" => Ok(Value::Int(self.target.load(Ordering::Relaxed))),
            "model" => Ok(Value::Str("TH-100".into())),
            "secret" => Ok(Value::Str("hidden".into())),
            other => Err(NetronError::NotExists(format!("property '{other}'"))),
        }
    }

    fn set(&self, property: &str, value: Value) -> crate::error::Result<()> {
        match property {
            "target" => {
                let v = value
                    .as_i64()
                    .ok_or_else(|| NetronError::NotSupported("target must be an int".into()))?;
                self.target.store(v, Ordering::Relaxed);
                Ok(())
            }
            other => Err(NetronError::NotExists(format!("property '{other}'"))),
        }
    }

    fn call(&self, method: &str, args: Vec<Value>) -> crate::error::Result<CallResult> {
        match method {
            "nudge" => {
                let delta = args.first().and_then(Value::as_i64).unwrap_or(1);
                let new = self.target.fetch_add(delta, Ordering::Relaxed) + delta;
                Ok(Value::Int(new).into())
            }
            other => Err(NetronError::NotExists(format!("method '{other}'"))),
        }
    }
}

fn thermostat_caps() -> CapabilityDescriptor {
    CapabilityDescriptor::new()
        .property("target")
        .readonly_property("model")
        .private_property("secret")
        .method("nudge")
        .event("reached")
}

fn thermostat_stub() -> Stub {
    let caps = thermostat_caps();
    let def = Definition::new(1, None, "thermostat", caps);
    Stub::new(Box::new(Thermostat::new()), def)
}

#[test]
fn descriptor_builder_collects_members() {
    let caps = thermostat_caps();
    assert_eq!(caps.properties.len(), 3);
    assert!(caps.properties["model"].readonly);
    assert!(caps.properties["secret"].private);
    assert!(!caps.methods["nudge"].returns_context);
    assert!(caps.events.contains("reached"));
}

#[test]
fn stub_serves_declared_members() {
    let stub = thermostat_stub();
    assert_eq!(stub.get("target").unwrap(), Value::Int(20));
    stub.set("target", Value::Int(25)).unwrap();
    assert_eq!(stub.get("target").unwrap(), Value::Int(25));
    assert!(stub.call("nudge", vec![Value::Int(3)]).is_ok());
    assert_eq!(stub.get("target").unwrap(), Value::Int(28));
}

#[test]
fn stub_rejects_unknown_members() {
    let stub = thermostat_stub();
    assert!(matches!(
        stub.get("missing").unwrap_err(),
        NetronError::NotExists(_)
    ));
    assert!(matches!(
        stub.set("missing", Value::Null).unwrap_err(),
        NetronError::NotExists(_)
    ));
    assert!(matches!(
        stub.call("missing", vec![]).unwrap_err(),
        NetronError::NotExists(_)
    ));
}

#[test]
fn stub_enforces_readonly_flag() {
    let stub = thermostat_stub();
    let err = stub.set("model", Value::Str("TH-200".into())).unwrap_err();
    assert!(matches!(err, NetronError::InvalidAccess(_)));
    // Reads still work
    assert_eq!(stub.get("model").unwrap(), Value::Str("TH-100".into()));
}

#[test]
fn stub_enforces_private_flag() {
    let stub = thermostat_stub();
    assert!(matches!(
        stub.get("secret").unwrap_err(),
        NetronError::InvalidAccess(_)
    ));
    assert!(matches!(
        stub.set("secret", Value::Null).unwrap_err(),
        NetronError::InvalidAccess(_)
    ));
}

#[test]
fn value_trees_survive_the_wire() {
    let mut map = HashMap::new();
    map.insert("k".to_string(), Value::List(vec![Value::Int(1), Value::Null]));
    let value = Value::Map(map);

    let encoded = message::encode(&value).unwrap();
    let decoded: Value = message::decode(&encoded).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn definition_value_crosses_the_wire() {
    let def = Definition::new(42, Some(7), "child", thermostat_caps());
    let encoded = message::encode(&Value::Definition(def.clone())).unwrap();
    let decoded: Value = message::decode(&encoded).unwrap();
    assert_eq!(decoded, Value::Definition(def));
}

#[test]
fn remote_faults_ride_the_reply_payload() {
    let reply: Reply = Err(NetronError::InvalidAccess("property 'x' is readonly".into()));
    let encoded = message::encode(&reply).unwrap();
    let decoded: Reply = message::decode(&encoded).unwrap();
    match decoded {
        Err(NetronError::InvalidAccess(msg)) => assert_eq!(msg, "property 'x' is readonly"),
        other => panic!("wrong variant after round trip: {other:?}"),
    }
}

#[test]
fn every_error_variant_keeps_its_identity_on_the_wire() {
    let variants = [
        NetronError::Io("socket closed".into()),
        NetronError::Serialization("bad tag".into()),
        NetronError::MalformedPacket,
        NetronError::OversizedPacket(512),
        NetronError::NotExists("context 'calc'".into()),
        NetronError::AlreadyExists("context 'calc'".into()),
        NetronError::InvalidAccess("property 'x' is private".into()),
        NetronError::NotSupported("action code 99".into()),
        NetronError::Timeout,
        NetronError::ConnectionLost,
        NetronError::IllegalState("peer is not online".into()),
        NetronError::ConfigError("bad toml".into()),
    ];

    for original in variants {
        let expected = format!("{original:?}");
        let reply: Reply = Err(original);
        let encoded = message::encode(&reply).unwrap();
        let decoded: Reply = message::decode(&encoded).unwrap();
        let err = decoded.expect_err("fault must stay on the Err arm");
        assert_eq!(format!("{err:?}"), expected);
    }
}

#[test]
fn get_request_distinguishes_read_from_call() {
    let read = GetRequest {
        def_id: 1,
        member: "target".into(),
        args: None,
    };
    let call = GetRequest {
        def_id: 1,
        member: "nudge".into(),
        args: Some(vec![Value::Int(2)]),
    };

    let read2: GetRequest = message::decode(&message::encode(&read).unwrap()).unwrap();
    let call2: GetRequest = message::decode(&message::encode(&call).unwrap()).unwrap();
    assert!(read2.args.is_none());
    assert_eq!(call2.args.unwrap().len(), 1);
}

#[test]
fn hello_carries_named_definitions() {
    let mut definitions = HashMap::new();
    definitions.insert(
        "thermostat".to_string(),
        Definition::new(1, None, "thermostat", thermostat_caps()),
    );
    let hello = Hello {
        uid: 0xFEED,
        definitions,
    };

    let decoded: Hello = message::decode(&message::encode(&hello).unwrap()).unwrap();
    assert_eq!(decoded.uid, 0xFEED);
    assert!(decoded.definitions["thermostat"].has_event("reached"));
}
