// src/store/mod.rs

//! Descriptor store abstraction.
//!
//! The controller talks to a [`DescriptorStore`] instead of a concrete
//! backend:
//! - [`FileDescriptorStore`] keeps the document in a JSON file and turns
//!   filesystem events into change notifications (production).
//! - [`MemoryDescriptorStore`] keeps it in memory and notifies on every
//!   write (tests, embedding).
//!
//! Delivery is at-least-once with no ordering guarantee; consumers must
//! re-derive behaviour from snapshot content, never from notification order.
//! A new subscription only reports later changes; callers read the current
//! document with [`DescriptorStore::fetch`].

use std::fmt::Debug;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::descriptor::{CommandDescriptor, Document};
use crate::errors::Result;

pub mod file;
pub mod memory;

pub use file::FileDescriptorStore;
pub use memory::MemoryDescriptorStore;

/// A single change notification.
#[derive(Debug, Clone)]
pub enum StoreNotification {
    /// The document changed; carries the snapshot read at delivery time.
    Changed(Document),
    /// The store could not produce a snapshot (read or watch error).
    Failed(String),
}

pub type NotificationSender = mpsc::UnboundedSender<StoreNotification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<StoreNotification>;

/// Abstract descriptor document store.
///
/// Reads and writes are async so backends doing blocking I/O can move it off
/// the runtime's worker threads.
pub trait DescriptorStore: Send + Sync + Debug {
    /// Read the current document. A missing document reads as empty.
    fn fetch(&self) -> BoxFuture<'_, Result<Document>>;

    /// Read-modify-write: merge `fields` into the document, leaving every
    /// other field untouched.
    fn update(&self, fields: Document) -> BoxFuture<'_, Result<()>>;

    /// Start delivering change notifications to `tx`. Dropping the returned
    /// [`Subscription`] stops delivery.
    fn subscribe(&self, tx: NotificationSender) -> Result<Subscription>;

    /// Live read of the `enabled` flag.
    fn read_enabled(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let doc = self.fetch().await?;
            Ok(CommandDescriptor::from_document(&doc).enabled)
        })
    }
}

/// Keeps a subscription alive; dropping it unsubscribes.
pub struct Subscription {
    _guard: Box<dyn Send>,
}

impl Subscription {
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
