mod common;

use common::{connect, read_until_contains, send, spawn_server};
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn set_then_get_roundtrips() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["SET", "name", "mikka"]).await;
    let reply = read_until_contains(&mut stream, "+OK", 2_000).await;
    assert_eq!(reply, "+OK\r\n");

    send(&mut stream, &["GET", "name"]).await;
    let reply = read_until_contains(&mut stream, "mikka", 2_000).await;
    assert_eq!(reply, "$5\r\nmikka\r\n");
}

#[tokio::test]
async fn get_on_missing_key_is_nil() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["GET", "nosuchkey"]).await;
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"$-1\r\n");
}

#[tokio::test]
async fn set_with_px_expires_the_key() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["SET", "temp", "v", "PX", "20"]).await;
    let _ = read_until_contains(&mut stream, "+OK", 2_000).await;

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    send(&mut stream, &["GET", "temp"]).await;
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"$-1\r\n");
}

#[tokio::test]
async fn incr_on_new_key_starts_at_one_and_errors_on_non_integer() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["INCR", "counter"]).await;
    let reply = read_until_contains(&mut stream, ":1", 2_000).await;
    assert_eq!(reply, ":1\r\n");

    send(&mut stream, &["SET", "notanumber", "abc"]).await;
    let _ = read_until_contains(&mut stream, "+OK", 2_000).await;
    send(&mut stream, &["INCR", "notanumber"]).await;
    let reply = read_until_contains(&mut stream, "not an integer", 2_000).await;
    assert!(reply.contains("ERR value is not an integer or out of range"));
}

#[tokio::test]
async fn type_reports_string_stream_and_none() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["SET", "s", "v"]).await;
    let _ = read_until_contains(&mut stream, "+OK", 2_000).await;
    send(&mut stream, &["TYPE", "s"]).await;
    let reply = read_until_contains(&mut stream, "string", 2_000).await;
    assert_eq!(reply, "+string\r\n");

    send(&mut stream, &["XADD", "events", "1-1", "a", "b"]).await;
    let _ = read_until_contains(&mut stream, "1-1", 2_000).await;
    send(&mut stream, &["TYPE", "events"]).await;
    let reply = read_until_contains(&mut stream, "stream", 2_000).await;
    assert_eq!(reply, "+stream\r\n");

    send(&mut stream, &["TYPE", "nope"]).await;
    let reply = read_until_contains(&mut stream, "none", 2_000).await;
    assert_eq!(reply, "+none\r\n");
}

#[tokio::test]
async fn keys_includes_both_string_and_stream_only_keys() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["SET", "astring", "v"]).await;
    let _ = read_until_contains(&mut stream, "+OK", 2_000).await;
    send(&mut stream, &["XADD", "astream", "1-1", "a", "b"]).await;
    let _ = read_until_contains(&mut stream, "1-1", 2_000).await;

    send(&mut stream, &["KEYS", "*"]).await;
    let reply = read_until_contains(&mut stream, "astream", 2_000).await;
    assert!(reply.contains("astring"));
    assert!(reply.contains("astream"));
}

#[tokio::test]
async fn config_get_unknown_key_errors() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["CONFIG", "GET", "maxmemory"]).await;
    let reply = read_until_contains(&mut stream, "Unknown config", 2_000).await;
    assert!(reply.starts_with("-ERR Unknown config"));
}

#[tokio::test]
async fn command_docs_replies_not_implemented() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    send(&mut stream, &["COMMAND", "DOCS"]).await;
    let reply = read_until_contains(&mut stream, "not_implemented", 2_000).await;
    assert_eq!(reply, "+not_implemented\r\n");
}
