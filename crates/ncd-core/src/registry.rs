#![forbid(unsafe_code)]

//! Bidirectional link bookkeeping between connections and notifications.
//!
//! # Design
//!
//! A notification keeps an insertion-ordered list of the connections linked
//! to it; a connection keeps the set of notifications it is linked to. Both
//! sides hold only `Weak` references keyed by a process-unique id, so neither
//! side owns the other and lifetimes end in any order.
//!
//! Linking and unlinking are two-phase and symmetric: the initiating side
//! updates its own entry first, then asks the peer to update the reverse
//! entry only if the reverse entry still disagrees. The peer's request finds
//! the initiator already updated and stops, so a mutual call settles after a
//! single round trip.
//!
//! # Teardown
//!
//! `Drop` on either base detaches the complete local list before touching any
//! peer, then asks each surviving peer that still references the dying object
//! to drop that one entry. Peers that are themselves mid-drop fail to upgrade
//! and are skipped, which is safe because their own teardown already removed
//! everything they held.
//!
//! # Invariants
//!
//! 1. A connection id is in a notification's list iff that notification's id
//!    is in the connection's set, whenever control is back in user code.
//! 2. A notification's list holds each connection id at most once.
//! 3. Once either side is dropped, no surviving peer references it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::guard::StateGuard;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Stable identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(next_id())
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cnt#{}", self.0)
    }
}

/// Stable identity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(u64);

impl NotificationId {
    pub(crate) fn next() -> Self {
        Self(next_id())
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ntf#{}", self.0)
    }
}

/// Anything that carries a [`ConnectionBase`].
pub(crate) trait ConnectionEndpoint {
    fn links(&self) -> &ConnectionBase;
}

/// Type-erased view of a notification, as seen from a connection.
pub(crate) trait NotificationEndpoint {
    fn holds(&self, connection: ConnectionId) -> bool;
    fn release(&self, connection: ConnectionId) -> bool;
}

// ---------------------------------------------------------------------------
// ConnectionBase
// ---------------------------------------------------------------------------

/// Connection half of the registry: mute flag plus linked notifications.
pub(crate) struct ConnectionBase {
    id: ConnectionId,
    muted: Cell<bool>,
    notifications: RefCell<HashMap<NotificationId, Weak<dyn NotificationEndpoint>>>,
}

impl ConnectionBase {
    pub(crate) fn new() -> Self {
        Self {
            id: ConnectionId::next(),
            muted: Cell::new(false),
            notifications: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn has_connected_notifications(&self) -> bool {
        !self.notifications.borrow().is_empty()
    }

    pub(crate) fn notification_count(&self) -> usize {
        self.notifications.borrow().len()
    }

    pub(crate) fn is_connected(&self, notification: NotificationId) -> bool {
        self.notifications.borrow().contains_key(&notification)
    }

    /// Record the local half of a link.
    pub(crate) fn attach(&self, peer: Weak<dyn NotificationEndpoint>, id: NotificationId) {
        self.notifications.borrow_mut().insert(id, peer);
    }

    /// Unlink from one notification. Returns `false` if it was not linked.
    pub(crate) fn disconnect(&self, notification: NotificationId) -> bool {
        let unlinked = self.unlink(notification);
        #[cfg(feature = "tracing")]
        if unlinked {
            trace!(connection = %self.id, notification = %notification, "connection unlinked");
        }
        unlinked
    }

    /// Unlink from every notification.
    pub(crate) fn disconnect_all(&self) {
        let _count = self.unlink_all();
        #[cfg(feature = "tracing")]
        if _count > 0 {
            trace!(connection = %self.id, count = _count, "connection unlinked from all");
        }
    }

    /// Unlink from every notification without emitting events.
    ///
    /// Runs from `Drop`, possibly inside a thread-local destructor where a
    /// subscriber's own thread-locals are already gone.
    pub(crate) fn teardown(&self) {
        self.unlink_all();
    }

    fn unlink(&self, notification: NotificationId) -> bool {
        let removed = self.notifications.borrow_mut().remove(&notification);
        let Some(peer) = removed else {
            return false;
        };
        if let Some(peer) = peer.upgrade() {
            if peer.holds(self.id) {
                peer.release(self.id);
            }
        }
        true
    }

    fn unlink_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.notifications.borrow_mut());
        let count = drained.len();
        for peer in drained.into_values() {
            if let Some(peer) = peer.upgrade() {
                if peer.holds(self.id) {
                    peer.release(self.id);
                }
            }
        }
        count
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.muted.get()
    }

    pub(crate) fn set_mute_state(&self, muted: bool) -> bool {
        self.muted.replace(muted)
    }

    pub(crate) fn mute(&self) -> StateGuard<'_> {
        StateGuard::engage(&self.muted)
    }
}

impl Drop for ConnectionBase {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for ConnectionBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBase")
            .field("id", &self.id)
            .field("muted", &self.muted.get())
            .field("notifications", &self.notification_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// NotificationBase
// ---------------------------------------------------------------------------

/// One entry of a notification's connection list.
pub(crate) struct Link<C: ?Sized> {
    pub(crate) id: ConnectionId,
    pub(crate) target: Weak<C>,
}

impl<C: ?Sized> Clone for Link<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target: Weak::clone(&self.target),
        }
    }
}

/// Marks a notification as mid-fan-out for as long as it lives.
pub(crate) struct FiringScope<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for FiringScope<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Notification half of the registry: block flag plus ordered connections.
pub(crate) struct NotificationBase<C: ?Sized + ConnectionEndpoint> {
    id: NotificationId,
    blocked: Cell<bool>,
    firing: Cell<u32>,
    connections: RefCell<Vec<Link<C>>>,
}

impl<C: ?Sized + ConnectionEndpoint> NotificationBase<C> {
    pub(crate) fn new() -> Self {
        Self {
            id: NotificationId::next(),
            blocked: Cell::new(false),
            firing: Cell::new(0),
            connections: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> NotificationId {
        self.id
    }

    pub(crate) fn has_connections(&self) -> bool {
        !self.connections.borrow().is_empty()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }

    pub(crate) fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.borrow().iter().any(|l| l.id == connection)
    }

    /// Ids in fan-out order.
    pub(crate) fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.borrow().iter().map(|l| l.id).collect()
    }

    /// Record the local half of a link, moving an existing entry to the tail.
    pub(crate) fn attach(&self, target: Weak<C>, id: ConnectionId) {
        self.check_quiescent();
        let mut connections = self.connections.borrow_mut();
        connections.retain(|l| l.id != id);
        connections.push(Link { id, target });
        #[cfg(feature = "tracing")]
        trace!(notification = %self.id, connection = %id, position = connections.len() - 1, "connection linked");
    }

    fn detach(&self, connection: ConnectionId) -> Option<Weak<C>> {
        let mut connections = self.connections.borrow_mut();
        let index = connections.iter().position(|l| l.id == connection)?;
        self.check_quiescent();
        Some(connections.remove(index).target)
    }

    /// Unlink one connection. Returns `false` if it was not linked.
    pub(crate) fn remove_connection(&self, connection: ConnectionId) -> bool {
        let unlinked = self.unlink(connection);
        #[cfg(feature = "tracing")]
        if unlinked {
            trace!(notification = %self.id, connection = %connection, "connection removed");
        }
        unlinked
    }

    /// Unlink every connection.
    pub(crate) fn remove_all_connections(&self) {
        if self.has_connections() {
            self.check_quiescent();
        }
        let _count = self.unlink_all();
        #[cfg(feature = "tracing")]
        if _count > 0 {
            trace!(notification = %self.id, count = _count, "all connections removed");
        }
    }

    /// Unlink every connection without emitting events. Used by `Drop`.
    pub(crate) fn teardown(&self) {
        self.unlink_all();
    }

    fn unlink(&self, connection: ConnectionId) -> bool {
        let Some(target) = self.detach(connection) else {
            return false;
        };
        if let Some(target) = target.upgrade() {
            let links = target.links();
            if links.is_connected(self.id) {
                links.unlink(self.id);
            }
        }
        true
    }

    fn unlink_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.connections.borrow_mut());
        let count = drained.len();
        for link in drained {
            if let Some(target) = link.target.upgrade() {
                let links = target.links();
                if links.is_connected(self.id) {
                    links.unlink(self.id);
                }
            }
        }
        count
    }

    /// Copy of the current list, used to iterate without holding a borrow.
    pub(crate) fn snapshot(&self) -> Vec<Link<C>> {
        self.connections.borrow().clone()
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocked.get()
    }

    pub(crate) fn set_blocked_state(&self, blocked: bool) -> bool {
        self.blocked.replace(blocked)
    }

    pub(crate) fn block(&self) -> StateGuard<'_> {
        StateGuard::engage(&self.blocked)
    }

    pub(crate) fn is_firing(&self) -> bool {
        self.firing.get() > 0
    }

    pub(crate) fn enter_fire(&self) -> FiringScope<'_> {
        self.firing.set(self.firing.get() + 1);
        FiringScope {
            depth: &self.firing,
        }
    }

    fn check_quiescent(&self) {
        #[cfg(all(feature = "strict", debug_assertions))]
        debug_assert!(
            !self.is_firing(),
            "link set of {} mutated during its own fan-out",
            self.id
        );
    }
}

impl<C: ?Sized + ConnectionEndpoint> NotificationEndpoint for NotificationBase<C> {
    fn holds(&self, connection: ConnectionId) -> bool {
        self.is_connected(connection)
    }

    fn release(&self, connection: ConnectionId) -> bool {
        self.unlink(connection)
    }
}

impl<C: ?Sized + ConnectionEndpoint> Drop for NotificationBase<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<C: ?Sized + ConnectionEndpoint> fmt::Debug for NotificationBase<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBase")
            .field("id", &self.id)
            .field("blocked", &self.blocked.get())
            .field("connections", &self.connection_ids())
            .finish()
    }
}
