#![forbid(unsafe_code)]

//! Integration tests for Notification + Connection + Delegate.
//!
//! These tests validate that:
//! - A fired notification reaches a bound method with its arguments
//! - Chained notifications re-fire their master with the source's sender
//! - Either side can be dropped first without leaving dangling links
//! - Block and mute suppress delivery only while their guard lives
//! - A connection may unlink itself from inside its own callback
//! - Receivers that own their connection tear down cleanly
//! - Thread-local connections unlink silently when their thread exits

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ncd_core::{
    Connection, Delegate, LazyConnection, Notification, OwnedNotification, SenderNotification,
    connect_notifications,
};
use tracing::Level;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::TRACE)
        .try_init();
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A receiver that owns the connection bound to its own method.
struct Accumulator {
    calls: u32,
    last: (i32, i32),
}

impl Accumulator {
    fn on_pair(&mut self, (a, b): (i32, i32)) {
        self.calls += 1;
        self.last = (a, b);
    }
}

struct Widget {
    state: Rc<RefCell<Accumulator>>,
    on_changed: Connection<(i32, i32)>,
}

impl Widget {
    fn new() -> Self {
        let state = Rc::new(RefCell::new(Accumulator {
            calls: 0,
            last: (0, 0),
        }));
        let on_changed = Connection::new(Delegate::method(&state, Accumulator::on_pair));
        Self { state, on_changed }
    }
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn notify_reaches_bound_method_once() {
    init_tracing();
    let changed = Notification::<(i32, i32)>::new();
    let widget = Widget::new();
    changed.add_connection(&widget.on_changed);

    changed.notify_anonymous((3, 4));

    let state = widget.state.borrow();
    assert_eq!(state.calls, 1);
    assert_eq!(state.last, (3, 4));
}

#[test]
fn chained_sources_refire_master() {
    init_tracing();
    let master = SenderNotification::<(), (i32, i32)>::new();
    let widget = Widget::new();
    master.add_connection(&widget.on_changed);

    let resized = Notification::<(i32, i32)>::new();
    let moved = Notification::<(i32, i32)>::new();
    connect_notifications(&master, &[&resized, &moved]);

    resized.notify_anonymous((1, 2));
    moved.notify_anonymous((5, 6));
    master.notify(&(), (7, 8));

    let state = widget.state.borrow();
    assert_eq!(state.calls, 3);
    assert_eq!(state.last, (7, 8));
}

/// Sender used by the sender-aware scenarios.
struct Emitter {
    name: &'static str,
}

/// Records the sender name and payload of every call.
struct SenderLog {
    seen: Vec<(&'static str, (i32, i32))>,
}

impl SenderLog {
    fn on_pair_from(&mut self, sender: &Emitter, args: (i32, i32)) {
        self.seen.push((sender.name, args));
    }
}

#[test]
fn notify_with_sender_reaches_every_connection_once() {
    let changed = Notification::<(i32, i32)>::new();
    let log = Rc::new(RefCell::new(SenderLog { seen: Vec::new() }));
    let with_sender = Connection::with_notification(
        &changed,
        Delegate::method_with_sender(&log, SenderLog::on_pair_from),
    );
    let counter = Widget::new();
    changed.add_connection(&counter.on_changed);

    let emitter = Emitter { name: "spinner" };
    changed.notify(&emitter, (3, 4));

    assert_eq!(log.borrow().seen, vec![("spinner", (3, 4))]);
    assert_eq!(counter.state.borrow().calls, 1);
    assert_eq!(counter.state.borrow().last, (3, 4));
    assert_eq!(
        changed.connection_ids(),
        vec![with_sender.id(), counter.on_changed.id()]
    );
}

#[test]
fn chained_master_fires_with_source_sender() {
    let master = SenderNotification::<Emitter, (i32, i32)>::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let on_master = Rc::new(move |sender: &u8, (a, b): (i32, i32)| {
        log.borrow_mut().push((*sender, a, b));
    });
    let _listener = Connection::with_notification(
        master.as_notification(),
        Delegate::callable_with_sender::<u8, _>(&on_master),
    );
    let counter = Widget::new();
    master.add_connection(&counter.on_changed);

    let source = Notification::<(i32, i32)>::new();
    connect_notifications(&master, &[&source]);
    source.notify(&9u8, (3, 4));

    assert_eq!(*seen.borrow(), vec![(9, 3, 4)]);
    assert_eq!(counter.state.borrow().calls, 1);
}

// ---------------------------------------------------------------------------
// Teardown order
// ---------------------------------------------------------------------------

#[test]
fn receiver_dropped_before_notification() {
    let changed = Notification::<(i32, i32)>::new();
    let widget = Widget::new();
    changed.add_connection(&widget.on_changed);
    assert_eq!(changed.connection_count(), 1);

    drop(widget);
    assert!(!changed.has_connections());
    // Nothing left to reach; must not panic.
    changed.notify_anonymous((0, 0));
}

#[test]
fn notification_dropped_before_receiver() {
    let widget = Widget::new();
    let changed = Notification::<(i32, i32)>::new();
    let other = Notification::<(i32, i32)>::new();
    widget.on_changed.connect(&changed);
    widget.on_changed.connect(&other);

    drop(changed);
    assert_eq!(widget.on_changed.notification_count(), 1);
    assert!(widget.on_changed.is_connected(&other));

    other.notify_anonymous((9, 9));
    assert_eq!(widget.state.borrow().calls, 1);
}

#[test]
fn interleaved_teardown_of_many_links() {
    let notifications: Vec<_> = (0..4).map(|_| Notification::<(i32, i32)>::new()).collect();
    let mut widgets: Vec<_> = (0..4).map(|_| Widget::new()).collect();
    for n in &notifications {
        for w in &widgets {
            n.add_connection(&w.on_changed);
        }
    }

    drop(widgets.remove(1));
    for n in &notifications {
        assert_eq!(n.connection_count(), 3);
    }
    let mut notifications = notifications;
    drop(notifications.remove(0));
    for w in &widgets {
        assert_eq!(w.on_changed.notification_count(), 3);
    }
    drop(widgets);
    for n in &notifications {
        assert!(!n.has_connections());
    }
}

// ---------------------------------------------------------------------------
// Block and mute
// ---------------------------------------------------------------------------

#[test]
fn block_and_mute_are_scoped() {
    let changed = Notification::<(i32, i32)>::new();
    let a = Widget::new();
    let b = Widget::new();
    changed.add_connection(&a.on_changed);
    changed.add_connection(&b.on_changed);

    {
        let _blocked = changed.block();
        changed.notify_anonymous((1, 1));
    }
    {
        let _muted = a.on_changed.mute();
        changed.notify_anonymous((2, 2));
    }
    changed.notify_anonymous((3, 3));

    assert_eq!(a.state.borrow().calls, 1);
    assert_eq!(b.state.borrow().calls, 2);
    assert_eq!(b.state.borrow().last, (3, 3));
}

#[test]
fn released_guard_restores_early() {
    let changed = Notification::<(i32, i32)>::new();
    let w = Widget::new();
    changed.add_connection(&w.on_changed);

    let mut blocked = changed.block();
    changed.notify_anonymous((1, 1));
    blocked.release();
    changed.notify_anonymous((2, 2));
    drop(blocked);
    assert_eq!(w.state.borrow().calls, 1);
}

// ---------------------------------------------------------------------------
// Re-entrancy
// ---------------------------------------------------------------------------

/// Disconnects itself from the source the first time it fires.
struct OneShot {
    fired: Cell<u32>,
    source: Rc<Notification<()>>,
    connection: RefCell<Option<Connection<()>>>,
}

impl OneShot {
    fn on_fire(&self, _: ()) {
        self.fired.set(self.fired.get() + 1);
        if let Some(connection) = self.connection.borrow().as_ref() {
            connection.disconnect(&self.source);
        }
    }
}

// Link mutation during a fan-out asserts under `strict`.
#[cfg(not(all(feature = "strict", debug_assertions)))]
#[test]
fn connection_disconnects_itself_mid_fire() {
    init_tracing();
    let source = Rc::new(Notification::<()>::new());
    let one_shot = Rc::new(OneShot {
        fired: Cell::new(0),
        source: Rc::clone(&source),
        connection: RefCell::new(None),
    });
    let connection = Connection::new(Delegate::const_method(&one_shot, OneShot::on_fire));
    source.add_connection(&connection);
    *one_shot.connection.borrow_mut() = Some(connection);

    let later = Rc::new(Cell::new(0));
    let tap = Rc::clone(&later);
    let tail = Rc::new(move |_: ()| tap.set(tap.get() + 1));
    let _tail = Connection::with_notification(&source, Delegate::callable(&tail));

    source.notify_anonymous(());
    source.notify_anonymous(());

    assert_eq!(one_shot.fired.get(), 1);
    assert_eq!(later.get(), 2);
    assert_eq!(source.connection_count(), 1);
    one_shot.connection.borrow_mut().take();
}

#[test]
fn nested_notify_from_callback() {
    let outer = Rc::new(Notification::<u32>::new());
    let inner = Rc::new(Notification::<u32>::new());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let inner_for_cb = Rc::clone(&inner);
    let log = Rc::clone(&seen);
    let forward = Rc::new(move |v: u32| {
        log.borrow_mut().push(("outer", v));
        inner_for_cb.notify_anonymous(v + 1);
    });
    let log = Rc::clone(&seen);
    let leaf = Rc::new(move |v: u32| log.borrow_mut().push(("inner", v)));

    let _a = Connection::with_notification(&outer, Delegate::callable(&forward));
    let _b = Connection::with_notification(&inner, Delegate::callable(&leaf));

    outer.notify_anonymous(1);
    assert!(!outer.is_firing());
    assert_eq!(*seen.borrow(), vec![("outer", 1), ("inner", 2)]);
}

// ---------------------------------------------------------------------------
// Owners and statics
// ---------------------------------------------------------------------------

struct Slider {
    value: Cell<i32>,
    changed: OwnedNotification<Slider, i32>,
}

impl Slider {
    fn new() -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            value: Cell::new(0),
            changed: OwnedNotification::new(me.clone()),
        })
    }

    fn set(&self, v: i32) {
        self.value.set(v);
        self.changed.notify(v);
    }
}

#[test]
fn owned_notification_reports_owner() {
    let slider = Slider::new();
    let seen = Rc::new(Cell::new((0, 0)));
    let tap = Rc::clone(&seen);
    let on_change = Rc::new(move |s: &Slider, v: i32| tap.set((s.value.get(), v)));
    let _c = Connection::with_notification(
        slider.changed.as_notification(),
        Delegate::callable_with_sender::<Slider, _>(&on_change),
    );

    slider.set(42);
    assert_eq!(seen.get(), (42, 42));
}

thread_local! {
    static TOTAL: Cell<i32> = const { Cell::new(0) };
    static ON_TICK: LazyConnection<i32> =
        const { LazyConnection::new(|| Delegate::function(add_to_total)) };
}

fn add_to_total(v: i32) {
    TOTAL.with(|t| t.set(t.get() + v));
}

#[test]
fn lazy_static_connection_receives() {
    let tick = Notification::<i32>::new();
    ON_TICK.with(|c| c.connect(&tick));
    tick.notify_anonymous(2);
    tick.notify_anonymous(3);
    assert_eq!(TOTAL.with(Cell::get), 5);
    drop(tick);
    assert!(!ON_TICK.with(|c| c.has_connected_notifications()));
}

thread_local! {
    static EXIT_TICK: Notification<i32> = Notification::new();
    static ON_EXIT_TICK: LazyConnection<i32> =
        const { LazyConnection::new(|| Delegate::function(add_to_total)) };
}

#[test]
fn thread_local_links_tear_down_at_thread_exit() {
    // Global fmt subscriber: its own thread-local buffer may be gone by the
    // time these destructors run.
    init_tracing();
    let worker = std::thread::spawn(|| {
        EXIT_TICK.with(|tick| {
            ON_EXIT_TICK.with(|c| c.connect(tick));
            tick.notify_anonymous(4);
        });
        TOTAL.with(Cell::get)
    });
    let total = worker.join().ok();
    assert_eq!(total, Some(4));
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

#[cfg(feature = "tracing")]
#[test]
fn link_and_fire_emit_trace_events() {
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct CountingLayer(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for CountingLayer {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let events = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(CountingLayer(Arc::clone(&events)));
    tracing::subscriber::with_default(subscriber, || {
        let changed = Notification::<(i32, i32)>::new();
        let widget = Widget::new();
        changed.add_connection(&widget.on_changed);
        changed.notify_anonymous((1, 1));
    });
    assert!(events.load(Ordering::Relaxed) >= 2);
}

#[test]
fn silent_without_subscriber_interest() {
    // Fires under a subscriber that filters everything; delivery is unaffected.
    let events = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::level_filters::LevelFilter::OFF)
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        let changed = Notification::<(i32, i32)>::new();
        let widget = Widget::new();
        changed.add_connection(&widget.on_changed);
        changed.notify_anonymous((4, 4));
        events.fetch_add(widget.state.borrow().calls as usize, Ordering::Relaxed);
    });
    assert_eq!(events.load(Ordering::Relaxed), 1);
}
