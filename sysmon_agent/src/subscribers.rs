//! Connected viewers. Each subscriber is a bounded queue drained by its socket task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

pub type SubscriberId = u64;

pub const DEFAULT_QUEUE: usize = 32;

pub struct SubscriberRegistry {
    members: Mutex<HashMap<SubscriberId, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    queue: usize,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE)
    }
}

impl SubscriberRegistry {
    pub fn new(queue: usize) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue: queue.max(1),
        }
    }

    /// Register a viewer. `greeting` is queued before the viewer becomes visible to
    /// `broadcast`, so it is always the first message received.
    pub fn join(&self, greeting: Arc<str>) -> (SubscriberId, mpsc::Receiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue);
        // Fresh channel with capacity >= 1: cannot fail.
        let _ = tx.try_send(greeting);
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        (id, rx)
    }

    pub fn leave(&self, id: SubscriberId) -> bool {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.members.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send to everyone registered when the call starts. A full queue skips this message for
    /// that viewer; a closed one removes the viewer. Returns how many queues accepted it.
    pub fn broadcast(&self, message: Arc<str>) -> usize {
        let members: Vec<(SubscriberId, mpsc::Sender<Arc<str>>)> = self
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in members {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => debug!(subscriber = id, "viewer lagging; snapshot dropped"),
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }
        if !gone.is_empty() {
            let mut members = self.members.lock().unwrap_or_else(PoisonError::into_inner);
            for id in gone {
                debug!(subscriber = id, "viewer queue closed; removing");
                members.remove(&id);
            }
        }
        delivered
    }
}

/// Removes the subscriber when the connection handler ends, however it ends.
pub struct SubscriberGuard {
    registry: Arc<SubscriberRegistry>,
    id: SubscriberId,
}

impl SubscriberGuard {
    pub fn new(registry: Arc<SubscriberRegistry>, id: SubscriberId) -> Self {
        Self { registry, id }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.registry.leave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_comes_first_then_broadcasts() {
        let reg = SubscriberRegistry::new(4);
        reg.broadcast(Arc::from("before"));
        let (_, mut rx) = reg.join(Arc::from("hello"));
        assert_eq!(reg.broadcast(Arc::from("tick")), 1);
        assert_eq!(rx.try_recv().unwrap().as_ref(), "hello");
        assert_eq!(rx.try_recv().unwrap().as_ref(), "tick");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receivers_are_removed() {
        let reg = SubscriberRegistry::new(4);
        let (_, rx) = reg.join(Arc::from("hi"));
        let (_, _keep) = reg.join(Arc::from("hi"));
        drop(rx);
        assert_eq!(reg.broadcast(Arc::from("x")), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn full_queue_drops_message_but_keeps_member() {
        let reg = SubscriberRegistry::new(1);
        let (_, mut rx) = reg.join(Arc::from("hi"));
        assert_eq!(reg.broadcast(Arc::from("lost")), 0);
        assert_eq!(reg.len(), 1);
        assert_eq!(rx.try_recv().unwrap().as_ref(), "hi");
        assert_eq!(reg.broadcast(Arc::from("kept")), 1);
        assert_eq!(rx.try_recv().unwrap().as_ref(), "kept");
    }

    #[test]
    fn guard_leaves_on_drop() {
        let reg = Arc::new(SubscriberRegistry::default());
        let (id, _rx) = reg.join(Arc::from("hi"));
        {
            let _guard = SubscriberGuard::new(reg.clone(), id);
            assert_eq!(reg.len(), 1);
        }
        assert!(reg.is_empty());
        assert!(!reg.leave(id));
    }
}
