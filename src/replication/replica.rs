use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ReplicaOf;
use crate::error::ReplicationError;
use crate::eval;
use crate::proto::{self, Frame, Framer};
use crate::state::ServerState;

/// Performs the outbound handshake against a configured master:
/// `PING` → `REPLCONF listening-port` → `REPLCONF capa psync2` →
/// `PSYNC ? -1` → `FULLRESYNC` + the bootstrap RDB. Once connected,
/// stays in a loop applying the replication stream until the
/// connection drops, then the caller is expected to retry.
pub async fn connect_to_master(
    state: Arc<ServerState>,
    master: ReplicaOf,
    own_port: u16,
) -> Result<(), ReplicationError> {
    let stream = TcpStream::connect((master.host.as_str(), master.port)).await?;
    let (mut read_half, mut write_half) = stream.into_split();
    let mut framer = Framer::new();

    send_and_expect_line(&mut write_half, &mut read_half, &mut framer, &[b"PING".to_vec()]).await?;
    send_and_expect_line(
        &mut write_half,
        &mut read_half,
        &mut framer,
        &[
            b"REPLCONF".to_vec(),
            b"listening-port".to_vec(),
            own_port.to_string().into_bytes(),
        ],
    )
    .await?;
    send_and_expect_line(
        &mut write_half,
        &mut read_half,
        &mut framer,
        &[b"REPLCONF".to_vec(), b"capa".to_vec(), b"psync2".to_vec()],
    )
    .await?;

    write_half
        .write_all(&proto::encode_command(&[b"PSYNC".to_vec(), b"?".to_vec(), b"-1".to_vec()]))
        .await?;
    let fullresync_line = read_line_frame(&mut read_half, &mut framer).await?;
    let fullresync = String::from_utf8_lossy(&fullresync_line).to_string();
    let replid = fullresync
        .trim_start_matches('+')
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ReplicationError::Handshake("malformed FULLRESYNC reply".into()))?
        .to_string();

    read_rdb_bootstrap(&mut read_half, &mut framer).await?;

    tracing::info!(%replid, "replica bootstrap complete, applying replication stream");
    if let Some(replica_state) = state.as_replica() {
        *replica_state.master_replid.lock().unwrap() = Some(replid);
        *replica_state.master_writer.lock().await = Some(write_half);
    }

    apply_loop(state, read_half, framer).await
}

async fn send_and_expect_line(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    framer: &mut Framer,
    args: &[Vec<u8>],
) -> Result<(), ReplicationError> {
    write_half.write_all(&proto::encode_command(args)).await?;
    read_line_frame(read_half, framer).await?;
    Ok(())
}

/// Reads bytes off the socket until the framer can produce a complete
/// `Frame::Line` (a handshake reply such as `+PONG` or `+FULLRESYNC ...`).
async fn read_line_frame(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    framer: &mut Framer,
) -> Result<Vec<u8>, ReplicationError> {
    loop {
        if let Some(parsed) = framer.next_frame().map_err(ReplicationError::Protocol)? {
            match parsed.frame {
                Frame::Line(line) => return Ok(line),
                Frame::Array(_) => {
                    return Err(ReplicationError::Handshake("expected a line reply, got an array".into()))
                }
            }
        }
        let mut buf = [0u8; 4096];
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return Err(ReplicationError::Handshake("master closed connection during handshake".into()));
        }
        framer.push(&buf[..n]);
    }
}

/// The RDB bulk after `FULLRESYNC` is framed as `$<len>\r\n<raw bytes>`
/// with no trailing CRLF, unlike every other bulk string in the
/// protocol — it has to be read directly rather than through the
/// framer's usual bulk-string parsing.
async fn read_rdb_bootstrap(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    framer: &mut Framer,
) -> Result<(), ReplicationError> {
    // Drain whatever the framer already buffered back out so we can
    // scan for the "$<len>\r\n" header by hand.
    let mut pending = framer.take_buffer();
    loop {
        if let Some(pos) = find_crlf(&pending) {
            if pending.first() != Some(&b'$') {
                return Err(ReplicationError::Handshake("expected RDB bulk length header".into()));
            }
            let len: usize = std::str::from_utf8(&pending[1..pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ReplicationError::Handshake("invalid RDB bulk length".into()))?;
            let mut body = pending.split_off(pos + 2);
            while body.len() < len {
                let mut buf = [0u8; 8192];
                let n = read_half.read(&mut buf).await?;
                if n == 0 {
                    return Err(ReplicationError::Handshake("master closed connection during RDB transfer".into()));
                }
                body.extend_from_slice(&buf[..n]);
            }
            let remainder = body.split_off(len);
            framer.push(&remainder);
            return Ok(());
        }
        let mut buf = [0u8; 4096];
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return Err(ReplicationError::Handshake("master closed connection before RDB header".into()));
        }
        pending.extend_from_slice(&buf[..n]);
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Replays the master's write stream forever, tracking the applied
/// offset by raw bytes consumed per frame and answering
/// `REPLCONF GETACK` directly on the master socket.
async fn apply_loop(
    state: Arc<ServerState>,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    mut framer: Framer,
) -> Result<(), ReplicationError> {
    let replica_state = state.as_replica();
    loop {
        while let Some(parsed) = framer.next_frame().map_err(ReplicationError::Protocol)? {
            let raw_len = parsed.raw_len;
            if let Frame::Array(args) = parsed.frame {
                if let Some(first) = args.first() {
                    if first.eq_ignore_ascii_case(b"REPLCONF")
                        && args.get(1).map(|a| a.eq_ignore_ascii_case(b"GETACK")).unwrap_or(false)
                    {
                        if let Some(ref rs) = replica_state {
                            // The ACK reports bytes processed up to but not
                            // including this GETACK frame itself.
                            let offset = rs.applied_offset();
                            let ack = proto::encode_command(&[
                                b"REPLCONF".to_vec(),
                                b"ACK".to_vec(),
                                offset.to_string().into_bytes(),
                            ]);
                            let mut guard = rs.master_writer.lock().await;
                            if let Some(writer) = guard.as_mut() {
                                let _ = writer.write_all(&ack).await;
                            }
                            drop(guard);
                            rs.advance(raw_len);
                        }
                        continue;
                    }
                }
                eval::apply_replicated(&state, &args);
                if let Some(ref rs) = replica_state {
                    rs.advance(raw_len);
                }
            }
        }
        let mut buf = [0u8; 8192];
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return Err(ReplicationError::Handshake("connection to master closed".into()));
        }
        framer.push(&buf[..n]);
    }
}

/// Reconnect loop: keeps retrying the handshake with backoff so a
/// transiently unreachable master doesn't take the replica process
/// down.
pub async fn run(state: Arc<ServerState>, master: ReplicaOf, own_port: u16) {
    loop {
        match connect_to_master(state.clone(), master.clone(), own_port).await {
            Ok(()) => {}
            Err(err) => tracing::warn!(%err, "replication link to master failed, retrying"),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
