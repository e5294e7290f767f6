#![forbid(unsafe_code)]

//! Chaining many source notifications into one master notification.

use std::any::Any;

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::connection::Connection;
use crate::notification::{Notification, OwnedNotification, SenderNotification};

/// A notification that can be re-fired by other notifications.
pub trait Chainable<A> {
    /// The connection that re-fires this notification when invoked.
    fn notify_connection(&self) -> &Connection<A>;
}

impl<S: Any, A: Clone + 'static> Chainable<A> for SenderNotification<S, A> {
    fn notify_connection(&self) -> &Connection<A> {
        SenderNotification::notify_connection(self)
    }
}

impl<S: Any, A: Clone + 'static> Chainable<A> for OwnedNotification<S, A> {
    fn notify_connection(&self) -> &Connection<A> {
        (**self).notify_connection()
    }
}

/// Link `master`'s relay connection into every source, in order.
///
/// Each fire of a source then re-fires `master`.
pub fn connect_notifications<A, M>(master: &M, sources: &[&Notification<A>])
where
    A: 'static,
    M: Chainable<A> + ?Sized,
{
    let relay = master.notify_connection();
    for source in sources {
        source.add_connection(relay);
    }
    #[cfg(feature = "tracing")]
    trace!(connection = %relay.id(), sources = sources.len(), "notifications chained");
}

/// Unlink `master`'s relay connection from every source.
///
/// Returns how many sources were actually linked.
pub fn disconnect_notifications<A, M>(master: &M, sources: &[&Notification<A>]) -> usize
where
    A: 'static,
    M: Chainable<A> + ?Sized,
{
    let relay = master.notify_connection();
    sources
        .iter()
        .filter(|source| source.remove_connection(relay))
        .count()
}
