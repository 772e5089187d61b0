use std::net::SocketAddr;
use std::sync::Arc;

use mikkadb::config::{Config, ReplicaOf};
use mikkadb::state::ServerState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Starts a server on an ephemeral port and returns its address. The
/// accept loop runs in a background task for the lifetime of the test
/// process (tests are short-lived, so nothing tears it down).
pub async fn spawn_server(replicaof: Option<ReplicaOf>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Config {
        dir: std::env::temp_dir(),
        dbfilename: format!("nonexistent-{}.rdb", addr.port()),
        port: addr.port(),
        replicaof: replicaof.clone(),
    };
    let state = Arc::new(ServerState::new(config));
    state.datastore.load_rdb(&state.config.dir, &state.config.dbfilename).unwrap();

    if let Some(master) = state.as_master() {
        state
            .events
            .on(Arc::new(mikkadb::server::ReplicaRegistrar::new(master)));
    }

    if let Some(replicaof) = replicaof {
        let replica_state = state.clone();
        let own_port = addr.port();
        tokio::spawn(async move {
            mikkadb::replication::replica::run(replica_state, replicaof, own_port).await;
        });
    }

    tokio::spawn(async move {
        loop {
            let (socket, peer) = listener.accept().await.unwrap();
            let state = state.clone();
            tokio::spawn(async move {
                let _ = serve_one(state, socket, peer).await;
            });
        }
    });

    // give the spawned accept task a tick to start listening for connects
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    addr
}

async fn serve_one(
    state: Arc<ServerState>,
    socket: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    // Reuses the library's own connection pump so integration tests
    // exercise exactly the code path a real client hits.
    mikkadb::server::handle_connection(state, socket, peer).await?;
    Ok(())
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

pub async fn send(stream: &mut TcpStream, args: &[&str]) {
    let owned: Vec<Vec<u8>> = args.iter().map(|s| s.as_bytes().to_vec()).collect();
    stream.write_all(&mikkadb::proto::encode_command(&owned)).await.unwrap();
}

pub async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

/// Reads until `expected` appears in what's been read so far, or
/// panics after the timeout. Useful for replies whose exact length
/// isn't known up front (arrays, bulk strings with variable content).
pub async fn read_until_contains(stream: &mut TcpStream, expected: &str, timeout_ms: u64) -> String {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    let mut collected = Vec::new();
    loop {
        let mut buf = [0u8; 4096];
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            panic!("timed out waiting for {expected:?}, got {:?}", String::from_utf8_lossy(&collected));
        }
        match tokio::time::timeout(remaining, stream.read(&mut buf)).await {
            Ok(Ok(0)) => panic!("connection closed while waiting for {expected:?}"),
            Ok(Ok(n)) => {
                collected.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&collected).to_string();
                if text.contains(expected) {
                    return text;
                }
            }
            Ok(Err(e)) => panic!("read error: {e}"),
            Err(_) => panic!("timed out waiting for {expected:?}"),
        }
    }
}
