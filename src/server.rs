use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::ProtocolError;
use crate::events::{Event, Listener};
use crate::eval::{self, ConnContext, Outcome};
use crate::proto::{Frame, Framer};
use crate::rdb;
use crate::replication::master::ReplicationManager;
use crate::state::ServerState;

/// Forwards `ReplicaConnected`/`ReplicaCapabilities` events into the
/// replication engine, so the connection server never has to hold a
/// direct reference to `ReplicationManager` — it only ever talks to
/// the event bus.
pub struct ReplicaRegistrar {
    master: Arc<ReplicationManager>,
}

impl ReplicaRegistrar {
    pub fn new(master: Arc<ReplicationManager>) -> Self {
        ReplicaRegistrar { master }
    }
}

impl Listener for ReplicaRegistrar {
    fn on_event(&self, event: &Event) {
        match event {
            Event::ReplicaConnected { addr, writer } => {
                self.master.register(*addr, writer.clone());
            }
            Event::ReplicaCapabilities { addr, listening_port: Some(port) } => {
                self.master.set_listening_port(*addr, *port);
            }
            Event::ReplicaCapabilities { .. } => {}
        }
    }
}

pub async fn run(state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", state.config.port)).await?;
    tracing::info!(port = state.config.port, "accepting connections");
    loop {
        let (socket, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(state, socket, addr).await {
                tracing::debug!(%addr, %err, "connection closed");
            }
        });
    }
}

pub async fn handle_connection(
    state: Arc<ServerState>,
    socket: TcpStream,
    addr: std::net::SocketAddr,
) -> Result<(), ProtocolError> {
    let (mut read_half, write_half) = socket.into_split();
    let writer = Arc::new(AsyncMutex::new(write_half));
    let mut framer = Framer::new();
    let mut conn = ConnContext::new(addr);
    let mut is_replica_sink = false;

    loop {
        while let Some(parsed) = framer.next_frame()? {
            let args = match parsed.frame {
                Frame::Array(args) => args,
                Frame::Line(line) => crate::proto::inline_to_args(&line),
            };
            if args.is_empty() {
                continue;
            }

            let outcome = eval::dispatch(&state, &mut conn, args).await;
            match outcome {
                Outcome::Reply(reply) => {
                    let bytes = reply.to_bytes();
                    if !bytes.is_empty() {
                        let mut guard = writer.lock().await;
                        if guard.write_all(&bytes).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Outcome::Suppressed => {}
                Outcome::Psync { replid, offset } => {
                    let mut guard = writer.lock().await;
                    let header = format!("+FULLRESYNC {replid} {offset}\r\n");
                    if guard.write_all(header.as_bytes()).await.is_err() {
                        return Ok(());
                    }
                    let rdb_bytes = rdb::empty_rdb_bytes();
                    let bulk_header = format!("${}\r\n", rdb_bytes.len());
                    if guard.write_all(bulk_header.as_bytes()).await.is_err() {
                        return Ok(());
                    }
                    if guard.write_all(&rdb_bytes).await.is_err() {
                        return Ok(());
                    }
                    drop(guard);
                    state.events.emit(Event::ReplicaConnected {
                        addr,
                        writer: writer.clone(),
                    });
                    is_replica_sink = true;
                }
            }
        }

        let mut buf = [0u8; 8192];
        let n = read_half.read(&mut buf).await.map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if n == 0 {
            if is_replica_sink {
                tracing::info!(%addr, "replica disconnected");
            }
            return Ok(());
        }
        framer.push(&buf[..n]);
    }
}
