//! Demo service answering one method per call pattern.

use chrono::Utc;
use tinybus_core::{CallPattern, Result, Server, Transport, Value};

pub const CALL_VOID: &str = "call_void";
pub const CALL_STRING: &str = "call_string";
pub const CALL_X_1: &str = "call_x_1";
pub const CALL_X_2: &str = "call_x_2";
pub const CALL_X_3: &str = "call_x_3";

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

fn text(value: &Value) -> String {
    value.to_string()
}

/// Register every demo method on `server`.
pub fn register<T: Transport>(server: &mut Server<T>) -> Result<()> {
    server.register_method(CALL_VOID, CallPattern::VoidToString, |_| {
        Ok(vec![Value::Str(format!("{} OK", CALL_VOID))])
    })?;

    server.register_method(CALL_STRING, CallPattern::StringToString, |args| {
        let input = args.first().map(text).unwrap_or_default();
        Ok(vec![Value::Str(format!("{} OK: {}", CALL_STRING, input))])
    })?;

    server.register_method(CALL_X_1, CallPattern::X1, |_| {
        Ok(vec![
            Value::U64(now_secs()),
            Value::U32(0),
            Value::U32(1),
            Value::Str(format!("{} OK", CALL_X_1)),
            Value::F64(123.456),
        ])
    })?;

    server.register_method(CALL_X_2, CallPattern::X2, |_| {
        let now = Utc::now();
        Ok(vec![
            Value::U64(now_secs()),
            Value::Str(format!("{} OK", CALL_X_2)),
            Value::Str(now.format("%Y-%m-%d").to_string()),
            Value::Str(now.format("%H:%M:%S").to_string()),
            Value::F64(1.0),
            Value::F64(2.0),
            Value::F64(3.0),
            Value::F64(4.0),
        ])
    })?;

    server.register_method(CALL_X_3, CallPattern::X3, |args| {
        if args.iter().all(|a| text(a).is_empty()) {
            return Err(format!("{}: all arguments empty", CALL_X_3));
        }
        let lengths: Vec<u64> = args.iter().map(|a| text(a).len() as u64).collect();
        Ok(vec![
            Value::U32(args.len() as u32),
            Value::U64(lengths.first().copied().unwrap_or_default()),
            Value::U64(lengths.get(1).copied().unwrap_or_default()),
            Value::U64(lengths.get(2).copied().unwrap_or_default()),
        ])
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinybus_core::{Client, ErrorKind, MemoryBus, ServiceDefaults};

    async fn demo_bus() -> MemoryBus {
        let bus = MemoryBus::new();
        let connection = bus.connect().await.unwrap();
        let mut server = Server::bind(connection, ServiceDefaults::SERVICE, ServiceDefaults::INTERFACE)
            .await
            .unwrap();
        register(&mut server).unwrap();
        tokio::spawn(async move { server.serve().await });
        bus
    }

    #[tokio::test]
    async fn test_x1_reply() {
        let bus = demo_bus().await;
        let mut client = Client::new(bus.connect().await.unwrap());

        let args = vec![
            Value::U32(1),
            Value::U32(2),
            Value::Str("a".to_string()),
            Value::Str("b".to_string()),
        ];
        let reply = client
            .invoke(
                CallPattern::X1,
                ServiceDefaults::SERVICE,
                ServiceDefaults::INTERFACE,
                CALL_X_1,
                args,
            )
            .await
            .unwrap();

        assert_eq!(reply[1..], [
            Value::U32(0),
            Value::U32(1),
            Value::Str("call_x_1 OK".to_string()),
            Value::F64(123.456),
        ]);
    }

    #[tokio::test]
    async fn test_x3_rejects_all_empty() {
        let bus = demo_bus().await;
        let mut client = Client::new(bus.connect().await.unwrap());

        let empty = vec![Value::Str(String::new()); 3];
        let err = client
            .invoke(
                CallPattern::X3,
                ServiceDefaults::SERVICE,
                ServiceDefaults::INTERFACE,
                CALL_X_3,
                empty,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(err.remote_reason(), Some("call_x_3: all arguments empty"));
    }

    #[tokio::test]
    async fn test_string_and_void() {
        let bus = demo_bus().await;
        let mut client = Client::new(bus.connect().await.unwrap());

        let reply = client
            .invoke(
                CallPattern::StringToString,
                ServiceDefaults::SERVICE,
                "",
                CALL_STRING,
                vec![Value::Str("hi".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(reply, vec![Value::Str("call_string OK: hi".to_string())]);

        let reply = client
            .invoke(
                CallPattern::VoidToString,
                ServiceDefaults::SERVICE,
                "",
                CALL_VOID,
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(reply, vec![Value::Str("call_void OK".to_string())]);
    }
}
