use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;

use crate::events::ReplicaWriter;

struct ReplicaHandle {
    writer: ReplicaWriter,
    listening_port: Option<u16>,
    acked_offset: AtomicU64,
}

/// Master-side replication bookkeeping: which replicas are attached,
/// how far each has acknowledged, and the running count of bytes
/// propagated (`master_repl_offset`).
pub struct ReplicationManager {
    pub master_replid: String,
    offset: AtomicU64,
    replicas: DashMap<SocketAddr, ReplicaHandle>,
    // `REPLCONF listening-port` always arrives before the `PSYNC` that
    // creates the `replicas` entry, so the port has to be held here
    // until `register` can attach it.
    pending_ports: DashMap<SocketAddr, u16>,
}

impl ReplicationManager {
    pub fn new() -> Self {
        ReplicationManager {
            master_replid: generate_replid(),
            offset: AtomicU64::new(0),
            replicas: DashMap::new(),
            pending_ports: DashMap::new(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn register(&self, addr: SocketAddr, writer: ReplicaWriter) {
        let listening_port = self.pending_ports.remove(&addr).map(|(_, port)| port);
        self.replicas.insert(
            addr,
            ReplicaHandle {
                writer,
                listening_port,
                acked_offset: AtomicU64::new(0),
            },
        );
        tracing::info!(%addr, ?listening_port, "replica attached");
    }

    pub fn set_listening_port(&self, addr: SocketAddr, port: u16) {
        if let Some(mut replica) = self.replicas.get_mut(&addr) {
            replica.listening_port = Some(port);
        } else {
            self.pending_ports.insert(addr, port);
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// `(addr, listening_port)` for every attached replica, for `INFO`'s
    /// `slaveN:ip=...,port=...` lines.
    pub fn connected_replicas(&self) -> Vec<(SocketAddr, Option<u16>)> {
        self.replicas.iter().map(|e| (*e.key(), e.listening_port)).collect()
    }

    pub fn record_ack(&self, addr: SocketAddr, offset: u64) {
        if let Some(replica) = self.replicas.get(&addr) {
            replica.acked_offset.store(offset, Ordering::SeqCst);
        }
    }

    /// Writes `bytes` (the canonical re-encoding of a write command) to
    /// every attached replica and advances `master_repl_offset` by its
    /// length — unconditionally, even with zero replicas attached, so
    /// the offset always reflects what has actually been propagated.
    pub async fn propagate(&self, bytes: &[u8]) {
        self.offset.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        let addrs: Vec<SocketAddr> = self.replicas.iter().map(|e| *e.key()).collect();
        for addr in addrs {
            let writer = match self.replicas.get(&addr) {
                Some(r) => r.writer.clone(),
                None => continue,
            };
            let mut guard = writer.lock().await;
            if let Err(err) = guard.write_all(bytes).await {
                tracing::warn!(%addr, %err, "failed writing to replica, dropping it");
                drop(guard);
                self.replicas.remove(&addr);
            }
        }
    }

    async fn send_getack(&self) {
        let cmd = crate::proto::encode_command(&[b"REPLCONF".to_vec(), b"GETACK".to_vec(), b"*".to_vec()]);
        self.propagate(&cmd).await;
    }

    /// Polls attached replicas' acknowledged offsets until at least
    /// `numreplicas` have caught up to the offset as of the call, or
    /// `timeout_ms` elapses (`0` means wait indefinitely).
    pub async fn wait(&self, numreplicas: i64, timeout_ms: i64) -> i64 {
        let target_offset = self.offset();
        if target_offset == 0 {
            return self.replica_count() as i64;
        }
        self.send_getack().await;
        let deadline = if timeout_ms > 0 {
            Some(tokio::time::Instant::now() + Duration::from_millis(timeout_ms as u64))
        } else {
            None
        };
        loop {
            let count = self
                .replicas
                .iter()
                .filter(|e| e.acked_offset.load(Ordering::SeqCst) >= target_offset)
                .count() as i64;
            if count >= numreplicas {
                return count;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return count;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn generate_replid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| {
            let c = rng.gen_range(0..36u8);
            if c < 10 {
                (b'0' + c) as char
            } else {
                (b'a' + (c - 10)) as char
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replid_is_forty_alnum_chars() {
        let id = generate_replid();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn wait_with_no_writes_returns_replica_count_immediately() {
        let manager = ReplicationManager::new();
        let result = manager.wait(0, 100).await;
        assert_eq!(result, 0);
    }
}
