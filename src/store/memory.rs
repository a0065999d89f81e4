// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{self, BoxFuture};
use tracing::debug;

use crate::descriptor::Document;
use crate::errors::{RelayError, Result};

use super::{DescriptorStore, NotificationSender, StoreNotification, Subscription};

#[derive(Debug, Default)]
struct MemoryInner {
    doc: Document,
    subscribers: HashMap<u64, NotificationSender>,
    next_subscriber: u64,
    subscribe_count: u64,
    unsubscribe_count: u64,
    /// Every `update` made through the trait (i.e. by the controller).
    writes: Vec<Document>,
    fail_writes: bool,
    fail_reads: bool,
}

impl MemoryInner {
    fn broadcast(&mut self, notification: StoreNotification) {
        self.subscribers
            .retain(|_, tx| tx.send(notification.clone()).is_ok());
    }
}

/// In-memory descriptor store.
///
/// Every write notifies all current subscribers with a fresh snapshot.
/// Writes made through [`DescriptorStore::update`] are recorded so callers
/// can inspect exactly what the controller reported; "operator" writes go
/// through [`MemoryDescriptorStore::set_fields`] and are not recorded.
#[derive(Debug, Clone, Default)]
pub struct MemoryDescriptorStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: Document) -> Self {
        let store = Self::default();
        store.lock().doc = doc;
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current document.
    pub fn document(&self) -> Document {
        self.lock().doc.clone()
    }

    /// Operator-side write: merge `fields` and notify subscribers.
    pub fn set_fields(&self, fields: Document) {
        let mut inner = self.lock();
        inner.doc.extend(fields);
        let snapshot = inner.doc.clone();
        inner.broadcast(StoreNotification::Changed(snapshot));
    }

    /// Deliver an arbitrary snapshot without changing the document, e.g. a
    /// duplicate or out-of-order notification.
    pub fn push_notification(&self, snapshot: Document) {
        self.lock()
            .broadcast(StoreNotification::Changed(snapshot));
    }

    /// Deliver a subscription error.
    pub fn push_error(&self, message: impl Into<String>) {
        self.lock()
            .broadcast(StoreNotification::Failed(message.into()));
    }

    /// Make subsequent `update` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make subsequent `fetch` calls fail.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Controller writes, oldest first.
    pub fn writes(&self) -> Vec<Document> {
        self.lock().writes.clone()
    }

    pub fn subscribe_count(&self) -> u64 {
        self.lock().subscribe_count
    }

    pub fn unsubscribe_count(&self) -> u64 {
        self.lock().unsubscribe_count
    }

    pub fn active_subscribers(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl MemoryDescriptorStore {
    fn fetch_now(&self) -> Result<Document> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(RelayError::Store("simulated read failure".to_string()));
        }
        Ok(inner.doc.clone())
    }

    fn update_now(&self, fields: Document) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(RelayError::Store("simulated write failure".to_string()));
        }
        inner.writes.push(fields.clone());
        inner.doc.extend(fields);
        let snapshot = inner.doc.clone();
        inner.broadcast(StoreNotification::Changed(snapshot));
        Ok(())
    }
}

impl DescriptorStore for MemoryDescriptorStore {
    fn fetch(&self) -> BoxFuture<'_, Result<Document>> {
        Box::pin(future::ready(self.fetch_now()))
    }

    fn update(&self, fields: Document) -> BoxFuture<'_, Result<()>> {
        Box::pin(future::ready(self.update_now(fields)))
    }

    fn subscribe(&self, tx: NotificationSender) -> Result<Subscription> {
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribe_count += 1;
        inner.subscribers.insert(id, tx);
        debug!(subscriber = id, "memory store subscription added");

        Ok(Subscription::new(MemorySubscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }))
    }
}

struct MemorySubscription {
    id: u64,
    inner: Weak<Mutex<MemoryInner>>,
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.subscribers.remove(&self.id);
            inner.unsubscribe_count += 1;
            debug!(subscriber = self.id, "memory store subscription dropped");
        }
    }
}
