#![forbid(unsafe_code)]

//! Scoped toggle-and-restore guards for blocking and muting.

use std::cell::Cell;
use std::fmt;

/// RAII guard that forces a flag to `true` and restores its prior value.
///
/// Returned by [`Notification::block`](crate::Notification::block) and
/// [`Connection::mute`](crate::Connection::mute). The prior value is restored
/// exactly once, either by [`release`](Self::release) or on drop. Moving the
/// guard moves the obligation with it.
#[must_use = "the prior state is restored when the guard is dropped"]
pub struct StateGuard<'a> {
    flag: &'a Cell<bool>,
    prior: bool,
    released: bool,
}

/// Guard returned by [`Notification::block`](crate::Notification::block).
pub type NotificationBlocker<'a> = StateGuard<'a>;

/// Guard returned by [`Connection::mute`](crate::Connection::mute).
pub type ConnectionMuter<'a> = StateGuard<'a>;

impl<'a> StateGuard<'a> {
    pub(crate) fn engage(flag: &'a Cell<bool>) -> Self {
        let prior = flag.replace(true);
        Self {
            flag,
            prior,
            released: false,
        }
    }

    /// Restore the captured state. Later calls do nothing.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.flag.set(self.prior);
        }
    }

    /// Whether the prior state has already been restored.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The state captured when the guard was engaged.
    #[must_use]
    pub fn prior(&self) -> bool {
        self.prior
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for StateGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGuard")
            .field("prior", &self.prior)
            .field("released", &self.released)
            .finish()
    }
}
