use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::Config;
use crate::events::EventBus;
use crate::replication::master::ReplicationManager;
use crate::store::Datastore;

/// Replica-side bookkeeping: what it learned from the master during
/// the handshake, how far it has applied the replication stream, and
/// the socket it writes `REPLCONF ACK` replies back on.
pub struct ReplicaState {
    pub master_replid: std::sync::Mutex<Option<String>>,
    applied_offset: AtomicU64,
    pub master_writer: AsyncMutex<Option<OwnedWriteHalf>>,
}

impl ReplicaState {
    pub fn new() -> Self {
        ReplicaState {
            master_replid: std::sync::Mutex::new(None),
            applied_offset: AtomicU64::new(0),
            master_writer: AsyncMutex::new(None),
        }
    }

    pub fn applied_offset(&self) -> u64 {
        self.applied_offset.load(Ordering::SeqCst)
    }

    /// Advances the applied offset by the raw bytes a frame consumed
    /// off the wire — never by the length of a re-encoded copy, which
    /// would drift whenever a value re-serializes differently.
    pub fn advance(&self, raw_len: usize) {
        self.applied_offset.fetch_add(raw_len as u64, Ordering::SeqCst);
    }
}

pub enum Role {
    Master(Arc<ReplicationManager>),
    Replica(Arc<ReplicaState>),
}

pub struct ServerState {
    pub config: Config,
    pub datastore: Arc<Datastore>,
    pub events: Arc<EventBus>,
    pub role: std::sync::RwLock<Role>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        let role = if config.is_replica() {
            Role::Replica(Arc::new(ReplicaState::new()))
        } else {
            Role::Master(Arc::new(ReplicationManager::new()))
        };
        ServerState {
            config,
            datastore: Arc::new(Datastore::new()),
            events: Arc::new(EventBus::new()),
            role: std::sync::RwLock::new(role),
        }
    }

    pub fn is_replica(&self) -> bool {
        matches!(&*self.role.read().unwrap(), Role::Replica(_))
    }

    pub fn as_master(&self) -> Option<Arc<ReplicationManager>> {
        match &*self.role.read().unwrap() {
            Role::Master(m) => Some(m.clone()),
            Role::Replica(_) => None,
        }
    }

    pub fn as_replica(&self) -> Option<Arc<ReplicaState>> {
        match &*self.role.read().unwrap() {
            Role::Replica(r) => Some(r.clone()),
            Role::Master(_) => None,
        }
    }
}
