//! End-to-end tests over the in-process bus.
//!
//! A server is bound and spawned on a `MemoryBus`, then driven by one or
//! more clients through the public API only.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tinybus_core::marshal::{self, CallPattern};
use tinybus_core::{
    BusError, Client, ErrorKind, MemoryBus, MemoryTransport, ProtocolNames, Server, SignalEvent,
    Value,
};
use tokio::sync::mpsc;

const SERVICE: &str = "org.tinybus.Test";
const INTERFACE: &str = "org.tinybus.Test";
const EVENTS: &str = "org.tinybus.Events";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Bind a demo server, subscribe it to `EVENTS`, and spawn its loop.
async fn spawn_server(bus: &MemoryBus) -> mpsc::UnboundedReceiver<SignalEvent> {
    let connection = bus.connect().await.expect("server connection");
    let mut server = Server::bind(connection, SERVICE, INTERFACE)
        .await
        .expect("bind");

    server
        .register_method("call_x_1", CallPattern::X1, |_args| {
            Ok(vec![
                Value::U64(now_secs()),
                Value::U32(0),
                Value::U32(1),
                Value::Str("call_x_1 OK".to_string()),
                Value::F64(123.456),
            ])
        })
        .unwrap();
    server
        .register_method("call_x_2", CallPattern::X2, |_args| {
            Ok(vec![
                Value::U64(2),
                Value::Str("one".to_string()),
                Value::Str("two".to_string()),
                Value::Str("three".to_string()),
                Value::F64(1.0),
                Value::F64(2.0),
                Value::F64(3.0),
                Value::F64(4.0),
            ])
        })
        .unwrap();
    server
        .register_method("call_x_3", CallPattern::X3, |args| {
            let total: u64 = args.iter().map(|v| v.to_string().len() as u64).sum();
            Ok(vec![
                Value::U32(args.len() as u32),
                Value::U64(total),
                Value::U64(0),
                Value::U64(u64::MAX),
            ])
        })
        .unwrap();
    server
        .register_method("call_string", CallPattern::StringToString, |args| {
            Ok(vec![Value::Str(format!("got {}", args[0]))])
        })
        .unwrap();

    server.register_signal(EVENTS).await.expect("register signal");
    let (tx, rx) = mpsc::unbounded_channel();
    server.on_signal(move |event| {
        let _ = tx.send(event);
    });

    tokio::spawn(async move { server.serve().await });
    rx
}

async fn client(bus: &MemoryBus) -> Client<MemoryTransport> {
    Client::new(bus.connect().await.expect("client connection"))
}

fn x1_request() -> Vec<Value> {
    vec![
        Value::U32(1),
        Value::U32(2),
        Value::Str("a".to_string()),
        Value::Str("b".to_string()),
    ]
}

#[tokio::test]
async fn test_x1_call_roundtrip() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    let before = now_secs();
    let reply = client
        .invoke(CallPattern::X1, SERVICE, INTERFACE, "call_x_1", x1_request())
        .await
        .unwrap();

    match reply[0] {
        Value::U64(t) => assert!(t >= before),
        ref other => panic!("unexpected first field {other:?}"),
    }
    assert_eq!(
        reply[1..],
        [
            Value::U32(0),
            Value::U32(1),
            Value::Str("call_x_1 OK".to_string()),
            Value::F64(123.456),
        ]
    );
    assert_eq!(client.connection().pending_stats().outstanding(), 0);
}

#[tokio::test]
async fn test_typed_x1_call() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    client
        .call_typed(
            SERVICE,
            INTERFACE,
            "call_x_1",
            (1u32, 2u32, "a".to_string(), "b".to_string()),
        )
        .await
        .unwrap();
    let (_time, zero, one, text, value): (u64, u32, u32, String, f64) =
        client.receive_typed().await.unwrap();

    assert_eq!((zero, one), (0, 1));
    assert_eq!(text, "call_x_1 OK");
    assert_eq!(value, 123.456);
}

#[tokio::test]
async fn test_other_patterns() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    let reply = client
        .invoke(CallPattern::X2, SERVICE, INTERFACE, "call_x_2", vec![])
        .await
        .unwrap();
    assert_eq!(reply.len(), 8);
    assert_eq!(reply[3], Value::Str("three".to_string()));

    let reply = client
        .invoke(
            CallPattern::X3,
            SERVICE,
            INTERFACE,
            "call_x_3",
            vec![
                Value::Str("ab".to_string()),
                Value::Str(String::new()),
                Value::Str("c".to_string()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(
        reply,
        vec![Value::U32(3), Value::U64(3), Value::U64(0), Value::U64(u64::MAX)]
    );

    let reply = client
        .invoke(
            CallPattern::StringToString,
            SERVICE,
            "",
            "call_string",
            vec![Value::Str("ping".to_string())],
        )
        .await
        .unwrap();
    assert_eq!(reply, vec![Value::Str("got ping".to_string())]);
}

#[tokio::test]
async fn test_unknown_method_is_remote_error() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    let err = client
        .invoke(CallPattern::VoidToString, SERVICE, INTERFACE, "call_nothing", vec![])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    assert_eq!(err.remote_reason(), Some("unknown method"));

    // the client is usable again afterwards
    let reply = client
        .invoke(CallPattern::X1, SERVICE, INTERFACE, "call_x_1", x1_request())
        .await
        .unwrap();
    assert_eq!(reply.len(), 5);
}

#[tokio::test]
async fn test_wrong_arguments_are_remote_marshal_error() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    let err = client
        .invoke(
            CallPattern::StringToString,
            SERVICE,
            INTERFACE,
            "call_x_1",
            vec![Value::Str("x".to_string())],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(err.remote_reason().unwrap_or_default().contains("Marshal error"));
}

#[tokio::test]
async fn test_introspection_over_the_bus() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    let reply = client
        .invoke(
            CallPattern::VoidToString,
            SERVICE,
            ProtocolNames::INTROSPECTABLE_INTERFACE,
            ProtocolNames::INTROSPECT_MEMBER,
            vec![],
        )
        .await
        .unwrap();

    let document = reply[0].to_string();
    assert!(document.contains(&format!("<interface name=\"{}\">", INTERFACE)));
    assert!(document.contains("<method name=\"call_x_3\">"));
    assert!(document.contains(&format!("<interface name=\"{}\"/>", EVENTS)));
}

#[tokio::test]
async fn test_invalid_service_is_rejected_locally() {
    let bus = MemoryBus::new();
    let mut client = client(&bus).await;

    let err = client
        .call("noDotHere", INTERFACE, "call_x_1", marshal::X1_REQUEST, x1_request())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(client.connection().pending_stats().opened, 0);
}

#[tokio::test]
async fn test_unowned_service_is_remote_error() {
    let bus = MemoryBus::new();
    let mut client = client(&bus).await;

    let err = client
        .invoke(CallPattern::VoidToString, "org.tinybus.Nobody", "", "ping", vec![])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(err
        .remote_reason()
        .unwrap_or_default()
        .contains("org.tinybus.Nobody"));
}

#[tokio::test]
async fn test_second_server_cannot_take_the_name() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;

    let connection = bus.connect().await.unwrap();
    let err = Server::bind(connection, SERVICE, INTERFACE).await.err().unwrap();
    assert!(matches!(err, BusError::NameOwnership { .. }));
}

#[tokio::test]
async fn test_signal_reaches_subscribed_server() {
    let bus = MemoryBus::new();
    let mut signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    let serial = client
        .signal("/org/tinybus/Events", EVENTS, "tick", "hello")
        .await
        .unwrap();
    assert_eq!(serial, 0);

    let event = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("signal delivered in time")
        .expect("server still running");
    assert_eq!(event.payload, "hello");
    assert_eq!(event.member, "tick");
    assert_eq!(event.interface, EVENTS);
    assert_eq!(event.sender.as_deref(), Some(client.connection().unique_name()));
}

#[tokio::test]
async fn test_signal_on_other_interface_is_not_delivered() {
    let bus = MemoryBus::new();
    let mut signals = spawn_server(&bus).await;
    let mut client = client(&bus).await;

    client
        .signal("/org/tinybus/Other", "org.tinybus.Other", "tick", "ignored")
        .await
        .unwrap();
    client
        .signal("/org/tinybus/Events", EVENTS, "tock", "seen")
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.payload, "seen");
}

#[tokio::test]
async fn test_many_clients_share_one_server() {
    let bus = MemoryBus::new();
    let _signals = spawn_server(&bus).await;

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let mut client = client(&bus).await;
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                let reply = client
                    .invoke(
                        CallPattern::StringToString,
                        SERVICE,
                        INTERFACE,
                        "call_string",
                        vec![Value::Str(i.to_string())],
                    )
                    .await
                    .unwrap();
                assert_eq!(reply, vec![Value::Str(format!("got {}", i))]);
            }
            client.connection().pending_stats()
        }));
    }

    for task in tasks {
        let stats = task.await.unwrap();
        assert_eq!(stats.opened, 5);
        assert_eq!(stats.outstanding(), 0);
    }
}
