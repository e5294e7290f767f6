#![forbid(unsafe_code)]

//! Event sources: an ordered set of connections fired together.
//!
//! # Fan-out
//!
//! [`Notification::notify`] takes a snapshot of the link list and walks it
//! in insertion order. Before each call the link is re-checked, so a
//! connection removed (or dropped) by an earlier callback is skipped. A
//! connection added during a fan-out is first invoked on the next one.
//!
//! # Sender Restriction
//!
//! [`SenderNotification<S, A>`] only accepts `&S` as the sender of a direct
//! notify and exposes a relay connection, so other notifications can be
//! chained into it. [`OwnedNotification<S, A>`] additionally fixes the
//! sender to the object that owns it.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use ncd_core::{Connection, Delegate, Notification};
//!
//! struct Adder {
//!     total: Cell<i32>,
//! }
//!
//! impl Adder {
//!     fn add(&self, (a, b): (i32, i32)) {
//!         self.total.set(self.total.get() + a + b);
//!     }
//! }
//!
//! let adder = Rc::new(Adder { total: Cell::new(0) });
//! let changed = Notification::<(i32, i32)>::new();
//! let _sink = Connection::with_notification(&changed, Delegate::const_method(&adder, Adder::add));
//!
//! changed.notify_anonymous((3, 4));
//! assert_eq!(adder.total.get(), 7);
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{AddAssign, Deref, SubAssign};
use std::rc::{Rc, Weak};

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::connection::{Connection, ConnectionCore};
use crate::delegate::Delegate;
use crate::guard::NotificationBlocker;
use crate::registry::{
    ConnectionEndpoint, ConnectionId, NotificationBase, NotificationEndpoint, NotificationId,
};

pub(crate) type NotificationCore<A> = NotificationBase<ConnectionCore<A>>;

/// Deliver `args` to every linked connection of `core`, in link order.
pub(crate) fn fire<A: Clone + 'static>(core: &NotificationCore<A>, sender: &dyn Any, args: A) {
    if core.is_blocked() {
        #[cfg(feature = "tracing")]
        trace!(notification = %core.id(), "notify suppressed by block");
        return;
    }
    let _scope = core.enter_fire();
    let links = core.snapshot();
    #[cfg(feature = "tracing")]
    trace!(notification = %core.id(), fanout = links.len(), "notify");
    for link in links {
        let Some(connection) = link.target.upgrade() else {
            continue;
        };
        // Unlinked by an earlier callback of this fan-out.
        if !connection.links().is_connected(core.id()) {
            continue;
        }
        connection.invoke(sender, args.clone());
    }
}

/// An event source with an ordered set of linked [`Connection<A>`]s.
///
/// Not `Clone`: a notification is an identity, and links are keyed by it.
pub struct Notification<A> {
    core: Rc<NotificationCore<A>>,
}

impl<A: 'static> Notification<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Rc::new(NotificationBase::new()),
        }
    }

    /// Stable identity of this notification.
    #[must_use]
    pub fn id(&self) -> NotificationId {
        self.core.id()
    }

    /// Link `connection`, appending it to the fan-out order.
    ///
    /// Re-adding a linked connection moves it to the tail.
    pub fn add_connection(&self, connection: &Connection<A>) {
        self.core.attach(connection.downgrade(), connection.id());
        if !connection.is_connected(self) {
            connection.connect(self);
        }
    }

    /// Unlink `connection`. Returns `false` if it was not linked.
    pub fn remove_connection(&self, connection: &Connection<A>) -> bool {
        self.core.remove_connection(connection.id())
    }

    /// Unlink every connection.
    pub fn remove_all_connections(&self) {
        self.core.remove_all_connections();
    }

    #[must_use]
    pub fn is_connected(&self, connection: &Connection<A>) -> bool {
        self.core.is_connected(connection.id())
    }

    #[must_use]
    pub fn has_connections(&self) -> bool {
        self.core.has_connections()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.core.connection_count()
    }

    /// Linked connection ids in fan-out order.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.core.connection_ids()
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.core.is_blocked()
    }

    /// Set the block flag, returning the previous value.
    pub fn set_blocked_state(&self, blocked: bool) -> bool {
        self.core.set_blocked_state(blocked)
    }

    /// Block until the returned guard is released or dropped.
    pub fn block(&self) -> NotificationBlocker<'_> {
        self.core.block()
    }

    /// Whether a fan-out of this notification is on the stack.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.core.is_firing()
    }

    pub(crate) fn core(&self) -> &Rc<NotificationCore<A>> {
        &self.core
    }

    pub(crate) fn endpoint(&self) -> Weak<dyn NotificationEndpoint> {
        let weak: Weak<NotificationCore<A>> = Rc::downgrade(&self.core);
        weak
    }
}

impl<A: Clone + 'static> Notification<A> {
    /// Fire with `sender`. Does nothing while blocked.
    pub fn notify<S: Any>(&self, sender: &S, args: A) {
        fire(&self.core, sender, args);
    }

    /// Fire with the unit sender.
    pub fn notify_anonymous(&self, args: A) {
        fire(&self.core, &(), args);
    }
}

impl<A: 'static> Default for Notification<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> AddAssign<&Connection<A>> for Notification<A> {
    fn add_assign(&mut self, connection: &Connection<A>) {
        self.add_connection(connection);
    }
}

impl<A: 'static> SubAssign<&Connection<A>> for Notification<A> {
    fn sub_assign(&mut self, connection: &Connection<A>) {
        self.remove_connection(connection);
    }
}

impl<A> Drop for Notification<A> {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

impl<A> fmt::Debug for Notification<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.core, f)
    }
}

// ---------------------------------------------------------------------------
// SenderNotification
// ---------------------------------------------------------------------------

/// Re-fire `core` from a chained source, keeping the incoming sender.
fn relay<A: Clone + 'static>(core: &NotificationCore<A>, sender: &dyn Any, args: A) {
    if core.is_firing() {
        // Chain cycle; the outer fan-out already covers these links.
        #[cfg(feature = "tracing")]
        trace!(notification = %core.id(), "relay re-entry skipped");
        return;
    }
    fire(core, sender, args);
}

/// A notification whose direct sender must be an `&S`, with a relay
/// connection for chaining.
///
/// Linking [`notify_connection`](Self::notify_connection) into another
/// notification makes every fire of that source re-fire this one with the
/// source's sender.
pub struct SenderNotification<S, A: 'static> {
    notification: Notification<A>,
    forward: Connection<A>,
    _sender: PhantomData<fn(&S)>,
}

impl<S: Any, A: Clone + 'static> SenderNotification<S, A> {
    #[must_use]
    pub fn new() -> Self {
        let notification = Notification::new();
        let forward = Connection::new(Delegate::forwarding(notification.core(), relay::<A>));
        Self {
            notification,
            forward,
            _sender: PhantomData,
        }
    }

    /// Fire with `sender`.
    pub fn notify(&self, sender: &S, args: A) {
        self.notification.notify(sender, args);
    }

    /// The relay connection; link it into a source to chain that source here.
    #[must_use]
    pub fn notify_connection(&self) -> &Connection<A> {
        &self.forward
    }

    /// The underlying notification, for linking connections.
    #[must_use]
    pub fn as_notification(&self) -> &Notification<A> {
        &self.notification
    }
}

impl<S: Any, A: Clone + 'static> Default for SenderNotification<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A: 'static> Deref for SenderNotification<S, A> {
    type Target = Notification<A>;

    fn deref(&self) -> &Notification<A> {
        &self.notification
    }
}

impl<S, A: 'static> fmt::Debug for SenderNotification<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderNotification")
            .field("sender", &std::any::type_name::<S>())
            .field("notification", &self.notification)
            .field("forward", &self.forward.id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// OwnedNotification
// ---------------------------------------------------------------------------

struct OwnerRelay<S, A: 'static> {
    notification: Weak<NotificationCore<A>>,
    owner: Weak<S>,
}

impl<S: Any, A: Clone + 'static> OwnerRelay<S, A> {
    /// Re-fire with the owner as sender, dropping the event if it is gone.
    fn relay(&self, args: A) {
        let (Some(core), Some(owner)) = (self.notification.upgrade(), self.owner.upgrade()) else {
            return;
        };
        relay(&core, &*owner, args);
    }
}

/// A [`SenderNotification`] whose sender is always its owning object.
///
/// Construct it inside [`Rc::new_cyclic`] so it can hold a `Weak` to the
/// owner:
///
/// ```
/// use std::rc::Rc;
/// use ncd_core::OwnedNotification;
///
/// struct Button {
///     clicked: OwnedNotification<Button, ()>,
/// }
///
/// let button = Rc::new_cyclic(|me| Button {
///     clicked: OwnedNotification::new(me.clone()),
/// });
/// button.clicked.notify(());
/// ```
pub struct OwnedNotification<S, A: 'static> {
    base: SenderNotification<S, A>,
    relay: Rc<OwnerRelay<S, A>>,
}

impl<S: Any, A: Clone + 'static> OwnedNotification<S, A> {
    #[must_use]
    pub fn new(owner: Weak<S>) -> Self {
        let base = SenderNotification::new();
        let relay = Rc::new(OwnerRelay {
            notification: Rc::downgrade(base.notification.core()),
            owner,
        });
        // Chained sources re-fire with the owner, not their own sender.
        base.forward
            .init(Delegate::const_method(&relay, OwnerRelay::relay));
        Self { base, relay }
    }

    /// Fire with the owner as sender. Does nothing once the owner is gone.
    pub fn notify(&self, args: A) {
        if let Some(owner) = self.relay.owner.upgrade() {
            self.base.notify(&*owner, args);
        }
    }

    /// The owning object, while it is alive.
    #[must_use]
    pub fn owner(&self) -> Option<Rc<S>> {
        self.relay.owner.upgrade()
    }
}

impl<S, A: 'static> Deref for OwnedNotification<S, A> {
    type Target = SenderNotification<S, A>;

    fn deref(&self) -> &SenderNotification<S, A> {
        &self.base
    }
}

impl<S, A: 'static> fmt::Debug for OwnedNotification<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedNotification")
            .field("base", &self.base)
            .field("owner_alive", &(self.relay.owner.strong_count() > 0))
            .finish()
    }
}
