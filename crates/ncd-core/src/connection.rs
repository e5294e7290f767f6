#![forbid(unsafe_code)]

//! Event sinks: a link-registry participant bound to one [`Delegate`].
//!
//! A [`Connection<A>`] is usually a field of the receiver whose method it
//! binds, so the receiver and its connection die together. Dropping a
//! connection unlinks it from every notification before it disappears.
//!
//! # Re-initialisation
//!
//! [`Connection::init`] swaps the delegate wholesale and disconnects every
//! notification first, so a re-bound connection never inherits the links of
//! its previous binding.

use std::any::Any;
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::delegate::Delegate;
use crate::guard::ConnectionMuter;
use crate::notification::Notification;
use crate::registry::{ConnectionBase, ConnectionEndpoint, ConnectionId};

/// Shared interior for [`Connection<A>`].
pub(crate) struct ConnectionCore<A> {
    links: ConnectionBase,
    delegate: RefCell<Delegate<A>>,
}

impl<A> ConnectionEndpoint for ConnectionCore<A> {
    fn links(&self) -> &ConnectionBase {
        &self.links
    }
}

impl<A> ConnectionCore<A> {
    /// Forward to the delegate unless muted or null.
    pub(crate) fn invoke(&self, sender: &dyn Any, args: A) {
        if self.links.is_muted() {
            #[cfg(feature = "tracing")]
            trace!(connection = %self.links.id(), "invoke suppressed by mute");
            return;
        }
        // Cloned so the callback may re-init this connection.
        let delegate = self.delegate.borrow().clone();
        if delegate.is_null() {
            return;
        }
        if let Err(_err) = delegate.dispatch(sender, args) {
            #[cfg(feature = "tracing")]
            debug!(connection = %self.links.id(), error = %_err, "dispatch skipped");
        }
    }
}

/// An event sink bound to one delegate and linked to any number of
/// [`Notification<A>`]s.
///
/// Not `Clone`: a connection is an identity, and links are keyed by it.
pub struct Connection<A> {
    core: Rc<ConnectionCore<A>>,
}

impl<A: 'static> Connection<A> {
    /// Create an unlinked connection bound to `delegate`.
    #[must_use]
    pub fn new(delegate: Delegate<A>) -> Self {
        Self {
            core: Rc::new(ConnectionCore {
                links: ConnectionBase::new(),
                delegate: RefCell::new(delegate),
            }),
        }
    }

    /// Create a connection bound to `delegate` and link it to `notification`.
    #[must_use]
    pub fn with_notification(notification: &Notification<A>, delegate: Delegate<A>) -> Self {
        let connection = Self::new(delegate);
        connection.connect(notification);
        connection
    }

    /// Stable identity of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.core.links.id()
    }

    /// Replace the delegate. Every existing link is dropped first.
    pub fn init(&self, delegate: Delegate<A>) {
        self.core.links.disconnect_all();
        *self.core.delegate.borrow_mut() = delegate;
        #[cfg(feature = "tracing")]
        trace!(connection = %self.id(), "connection re-initialised");
    }

    /// Replace the delegate, then link to `notification`.
    pub fn init_with(&self, notification: &Notification<A>, delegate: Delegate<A>) {
        self.init(delegate);
        self.connect(notification);
    }

    /// Link to `notification`. Does nothing if already linked.
    pub fn connect(&self, notification: &Notification<A>) {
        let id = notification.id();
        if self.core.links.is_connected(id) {
            return;
        }
        self.core.links.attach(notification.endpoint(), id);
        if !notification.core().is_connected(self.id()) {
            notification.add_connection(self);
        }
    }

    /// Unlink from `notification`. Returns `false` if it was not linked.
    pub fn disconnect(&self, notification: &Notification<A>) -> bool {
        self.core.links.disconnect(notification.id())
    }

    /// Unlink from every notification.
    pub fn disconnect_all(&self) {
        self.core.links.disconnect_all();
    }

    /// Whether this connection is linked to `notification`.
    #[must_use]
    pub fn is_connected(&self, notification: &Notification<A>) -> bool {
        self.core.links.is_connected(notification.id())
    }

    /// Whether this connection is linked to any notification.
    #[must_use]
    pub fn has_connected_notifications(&self) -> bool {
        self.core.links.has_connected_notifications()
    }

    /// Number of linked notifications.
    #[must_use]
    pub fn notification_count(&self) -> usize {
        self.core.links.notification_count()
    }

    /// A copy of the bound delegate.
    #[must_use]
    pub fn delegate(&self) -> Delegate<A> {
        self.core.delegate.borrow().clone()
    }

    /// Forward `args` to the delegate. Silent no-op when muted or null.
    pub fn invoke<S: Any>(&self, sender: &S, args: A) {
        self.core.invoke(sender, args);
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.core.links.is_muted()
    }

    /// Set the mute flag, returning the previous value.
    pub fn set_mute_state(&self, muted: bool) -> bool {
        self.core.links.set_mute_state(muted)
    }

    /// Mute until the returned guard is released or dropped.
    pub fn mute(&self) -> ConnectionMuter<'_> {
        self.core.links.mute()
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionCore<A>> {
        Rc::downgrade(&self.core)
    }
}

impl<A: 'static> Default for Connection<A> {
    fn default() -> Self {
        Self::new(Delegate::null())
    }
}

impl<A> Drop for Connection<A> {
    fn drop(&mut self) {
        // A fan-out in progress may still hold the core; unlink now anyway.
        self.core.links.teardown();
    }
}

impl<A> fmt::Debug for Connection<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("links", &self.core.links)
            .field("delegate", &*self.core.delegate.borrow())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LazyConnection
// ---------------------------------------------------------------------------

/// A connection bound on first use, for `thread_local!` statics.
///
/// The delegate factory runs exactly once, on the first access.
///
/// ```
/// use ncd_core::{Delegate, LazyConnection, Notification};
///
/// fn on_shutdown(_: ()) {}
///
/// thread_local! {
///     static SHUTDOWN: LazyConnection<()> =
///         const { LazyConnection::new(|| Delegate::function(on_shutdown)) };
/// }
///
/// let quit = Notification::<()>::new();
/// SHUTDOWN.with(|c| c.connect(&quit));
/// quit.notify_anonymous(());
/// ```
pub struct LazyConnection<A> {
    cell: OnceCell<Connection<A>>,
    init: fn() -> Delegate<A>,
}

impl<A: 'static> LazyConnection<A> {
    /// Create an uninitialised slot.
    #[must_use]
    pub const fn new(init: fn() -> Delegate<A>) -> Self {
        Self {
            cell: OnceCell::new(),
            init,
        }
    }

    /// The connection, binding it on first call.
    pub fn get(&self) -> &Connection<A> {
        self.cell.get_or_init(|| {
            #[cfg(feature = "tracing")]
            debug!("lazy connection initialised");
            Connection::new((self.init)())
        })
    }

    /// Whether the connection has been bound yet.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<A: 'static> Deref for LazyConnection<A> {
    type Target = Connection<A>;

    fn deref(&self) -> &Connection<A> {
        self.get()
    }
}

impl<A> fmt::Debug for LazyConnection<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyConnection")
            .field("connection", &self.cell.get())
            .finish()
    }
}
