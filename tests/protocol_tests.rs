mod common;

use common::{connect, spawn_server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn pipelined_commands_in_one_write_both_get_replies() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    // Two full RESP arrays written in a single syscall — the framer
    // must split them into two frames rather than treating the whole
    // buffer as one.
    let mut payload = Vec::new();
    payload.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");
    payload.extend_from_slice(b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");
    stream.write_all(&payload).await.unwrap();

    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n$2\r\nhi\r\n");
}

#[tokio::test]
async fn command_split_across_two_writes_is_still_parsed() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    stream.write_all(b"*2\r\n$4\r\nECHO\r\n$3\r\nabc").await.unwrap();
    // the writer pauses mid-frame, with no trailing CRLF yet
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    stream.write_all(b"\r\n").await.unwrap();

    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"$3\r\nabc\r\n");
}

#[tokio::test]
async fn inline_ping_command_is_accepted() {
    let addr = spawn_server(None).await;
    let mut stream = connect(addr).await;

    stream.write_all(b"PING\r\n").await.unwrap();

    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n");
}
