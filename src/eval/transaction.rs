use std::net::SocketAddr;

/// Per-connection `MULTI`/`EXEC`/`DISCARD` buffering. While `Open`,
/// every command other than `MULTI`/`EXEC`/`DISCARD` is queued
/// uniformly — no exceptions for read-only commands — so `EXEC`
/// always replays exactly what the client queued.
pub enum TransactionState {
    Idle,
    Open(Vec<Vec<Vec<u8>>>),
}

pub struct ConnContext {
    pub addr: SocketAddr,
    pub tx: TransactionState,
}

impl ConnContext {
    pub fn new(addr: SocketAddr) -> Self {
        ConnContext {
            addr,
            tx: TransactionState::Idle,
        }
    }
}
