use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

pub type ReplicaWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

/// The closed set of events the connection server and replication
/// engine pass between each other, so neither owns the other.
#[derive(Clone)]
pub enum Event {
    ReplicaConnected {
        addr: SocketAddr,
        writer: ReplicaWriter,
    },
    ReplicaCapabilities {
        addr: SocketAddr,
        listening_port: Option<u16>,
    },
}

pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Synchronous, in-process publish/subscribe used only to decouple the
/// connection server from the replication engine. Listeners fire in
/// registration order.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, listener: Arc<dyn Listener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn emit(&self, event: Event) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        order: Arc<Mutex<Vec<usize>>>,
        id: usize,
    }

    impl Listener for CountingListener {
        fn on_event(&self, _event: &Event) {
            self.order.lock().unwrap().push(self.id);
        }
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            bus.on(Arc::new(CountingListener {
                order: order.clone(),
                id,
            }));
        }
        let (_tx, _rx) = tokio::sync::mpsc::channel::<()>(1);
        let counter = AtomicUsize::new(0);
        let addr: SocketAddr = "127.0.0.1:6380".parse().unwrap();
        let _ = counter.load(Ordering::Relaxed);
        // ReplicaCapabilities carries no non-Send state, easiest to emit in a unit test.
        bus.emit(Event::ReplicaCapabilities {
            addr,
            listening_port: Some(6380),
        });
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
