#![forbid(unsafe_code)]

//! Core: single-threaded event sources, event sinks, and bound callables.
//!
//! # Role in the crate
//! `ncd-core` connects objects that fire events to objects that react to
//! them without either side owning the other. Either side may be dropped at
//! any time, in any order, and the survivor is left consistent.
//!
//! # Primary responsibilities
//! - **Delegate**: a value-typed callable binding one receiver and one function.
//! - **Connection**: an event sink holding one delegate.
//! - **Notification**: an event source that fires its connections in link order.
//! - **Link registry**: symmetric bookkeeping and order-independent teardown.
//! - **Guards**: scoped block/mute with restore-on-drop.
//!
//! # How it fits together
//! A receiver usually owns a [`Connection`] bound to one of its own methods;
//! a sender owns a [`Notification`]. Linking the two is symmetric, and so is
//! unlinking, whether explicit or on drop. Notifications can be chained into a
//! [`SenderNotification`] or [`OwnedNotification`] through their relay
//! connection.
//!
//! Everything here is `!Send`: links, delegates, and guards live on the thread
//! that created them.

pub mod chain;
pub mod connection;
pub mod delegate;
pub mod guard;
pub mod notification;
pub mod registry;

pub use chain::{Chainable, connect_notifications, disconnect_notifications};
pub use connection::{Connection, LazyConnection};
pub use delegate::{Delegate, DelegateKey, DispatchError};
pub use guard::{ConnectionMuter, NotificationBlocker, StateGuard};
pub use notification::{Notification, OwnedNotification, SenderNotification};
pub use registry::{ConnectionId, NotificationId};
