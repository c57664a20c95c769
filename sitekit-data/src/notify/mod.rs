//! Error classification and notification registry
//!
//! Per-datapoint service errors are mapped to the alerts the dashboard shows.
//! The registry records each kind once per lifetime (one page load in the
//! dashboard) and tells subscribers when a new kind appears.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::ServiceError;

/// Alerts the UI layer can show for failed datapoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NotificationKind {
    /// The OAuth grant lacks a required scope or has been revoked.
    AuthScopeError,
    /// The connected account can't access the requested property.
    PermissionError,
    /// The module must be reconnected.
    ReconnectRequired,
}

/// Maps a service error to the notifications it calls for.
///
/// Several kinds can apply at once, e.g. a forbidden error that also carries
/// a reconnect URL.
pub fn classify(error: &ServiceError) -> BTreeSet<NotificationKind> {
    let mut kinds = BTreeSet::new();

    match error.reason() {
        Some("authError") | Some("insufficientPermissions") => {
            kinds.insert(NotificationKind::AuthScopeError);
        }
        Some("forbidden") => {
            kinds.insert(NotificationKind::PermissionError);
        }
        _ => {}
    }

    if error.reconnect_url().is_some() {
        kinds.insert(NotificationKind::ReconnectRequired);
    }

    kinds
}

const CHANNEL_CAPACITY: usize = 16;

/// Idempotent registry of active notifications.
///
/// Cheap to clone; clones share state, so the UI layer can hold one while
/// clients register into it.
///
/// # Example
///
/// ```
/// use sitekit_data::notify::{NotificationKind, NotificationRegistry};
///
/// let registry = NotificationRegistry::new();
/// assert!(registry.add(NotificationKind::PermissionError));
/// assert!(!registry.add(NotificationKind::PermissionError));
/// assert_eq!(registry.total(), 1);
/// ```
#[derive(Clone)]
pub struct NotificationRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    kinds: DashSet<NotificationKind>,
    total: AtomicUsize,
    sender: broadcast::Sender<NotificationKind>,
}

impl NotificationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                kinds: DashSet::new(),
                total: AtomicUsize::new(0),
                sender,
            }),
        }
    }

    /// Registers one kind. Returns `true` if it was not registered before.
    pub fn add(&self, kind: NotificationKind) -> bool {
        let added = self.insert(kind);
        if added {
            self.inner.total.fetch_add(1, Ordering::SeqCst);
        }
        added
    }

    /// Registers every kind and bumps the total once by the number of new
    /// ones. Returns that number.
    pub fn register(&self, kinds: impl IntoIterator<Item = NotificationKind>) -> usize {
        let added = kinds.into_iter().filter(|kind| self.insert(*kind)).count();
        if added > 0 {
            self.inner.total.fetch_add(added, Ordering::SeqCst);
        }
        added
    }

    /// Returns `true` if `kind` is registered.
    pub fn contains(&self, kind: NotificationKind) -> bool {
        self.inner.kinds.contains(&kind)
    }

    /// Returns the registered kinds in a stable order.
    pub fn kinds(&self) -> Vec<NotificationKind> {
        let kinds: BTreeSet<NotificationKind> =
            self.inner.kinds.iter().map(|kind| *kind).collect();
        kinds.into_iter().collect()
    }

    /// Returns the number of notifications registered so far.
    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }

    /// Subscribes to kinds registered from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationKind> {
        self.inner.sender.subscribe()
    }

    fn insert(&self, kind: NotificationKind) -> bool {
        let added = self.inner.kinds.insert(kind);
        if added {
            log::info!("Registered {:?} notification", kind);
            // No receivers is fine.
            let _ = self.inner.sender.send(kind);
        }
        added
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistry")
            .field("kinds", &self.kinds())
            .field("total", &self.total())
            .finish()
    }
}
