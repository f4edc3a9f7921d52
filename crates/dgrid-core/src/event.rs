#![forbid(unsafe_code)]

//! Per-grid publish/subscribe bus.
//!
//! The bus carries a fixed vocabulary of [`GridEvent`]s. Handlers fire
//! synchronously, in registration order, to everything registered for the
//! event at the moment of notification.
//!
//! # How it works
//!
//! 1. [`GridBus::register`] returns a [`Deregister`] handle.
//! 2. A handler registered with a [`SubscriptionScope`] is released when the
//!    scope drops; otherwise the caller must call [`Deregister::deregister`].
//! 3. [`GridBus::notify`] snapshots the handler list before dispatch, so
//!    handlers may register or deregister freely. A handler removed during
//!    dispatch is not called afterwards.
//! 4. A notification of an event that is already being dispatched further up
//!    the stack is dropped with a warning. Different events may nest.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::row::RowKey;

/// Canonical bus event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridEvent {
    /// Metadata (and the header built from it) was (re)loaded.
    MetadataUpdated,
    /// The row tree changed.
    DataUpdated,
    /// One row's stats were patched after a save.
    StatsUpdated,
    ExtSelectionUpdated,
    ExtCollapseUpdated,
    ExtOrderUpdated,
    ExtColumnsUpdated,
    /// Overlay-only scroll sync.
    BodyHorizontalScroll,
    /// Overlay-only scroll sync.
    BodyVerticalScroll,
}

impl GridEvent {
    /// Every event, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::MetadataUpdated,
        Self::DataUpdated,
        Self::StatsUpdated,
        Self::ExtSelectionUpdated,
        Self::ExtCollapseUpdated,
        Self::ExtOrderUpdated,
        Self::ExtColumnsUpdated,
        Self::BodyHorizontalScroll,
        Self::BodyVerticalScroll,
    ];

    /// Wire name of the event.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MetadataUpdated => "METADATA_UPDATED",
            Self::DataUpdated => "DATA_UPDATED",
            Self::StatsUpdated => "STATS_UPDATED",
            Self::ExtSelectionUpdated => "EXT_SELECTION_UPDATED",
            Self::ExtCollapseUpdated => "EXT_COLLAPSE_UPDATED",
            Self::ExtOrderUpdated => "EXT_ORDER_UPDATED",
            Self::ExtColumnsUpdated => "EXT_COLUMNS_UPDATED",
            Self::BodyHorizontalScroll => "BODY_HORIZONTAL_SCROLL",
            Self::BodyVerticalScroll => "BODY_VERTICAL_SCROLL",
        }
    }
}

impl fmt::Display for GridEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data attached to a notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EventPayload {
    #[default]
    None,
    /// Stats of `row` changed in column `field`.
    Stats { row: RowKey, field: String },
    /// Scroll position of the body.
    Scroll { offset: i32 },
}

type Handler = Rc<dyn Fn(GridEvent, &EventPayload)>;

struct Registration {
    id: u64,
    event: GridEvent,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: Cell<u64>,
    handlers: RefCell<Vec<Registration>>,
    dispatching: RefCell<Vec<GridEvent>>,
}

impl BusInner {
    fn is_registered(&self, id: u64) -> bool {
        self.handlers.borrow().iter().any(|r| r.id == id)
    }

    fn remove(&self, id: u64) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }
}

/// Pops the dispatching marker even if a handler panics.
struct DispatchGuard<'a> {
    stack: &'a RefCell<Vec<GridEvent>>,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

/// Cloneable handle to one grid's event bus.
#[derive(Clone, Default)]
pub struct GridBus {
    inner: Rc<BusInner>,
}

impl fmt::Debug for GridBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridBus")
            .field("handlers", &self.inner.handlers.borrow().len())
            .field("dispatching", &self.inner.dispatching.borrow())
            .finish()
    }
}

impl GridBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`.
    ///
    /// With a scope, the registration is released when the scope drops.
    pub fn register(
        &self,
        event: GridEvent,
        scope: Option<&SubscriptionScope>,
        handler: impl Fn(GridEvent, &EventPayload) + 'static,
    ) -> Deregister {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.handlers.borrow_mut().push(Registration {
            id,
            event,
            handler: Rc::new(handler),
        });
        let handle = Deregister {
            bus: Rc::downgrade(&self.inner),
            id,
        };
        if let Some(scope) = scope {
            scope.adopt(handle.clone());
        }
        handle
    }

    /// Dispatch `event` to its handlers.
    ///
    /// Returns `false` when the notification was dropped because the same
    /// event is already being dispatched.
    pub fn notify(&self, event: GridEvent, payload: &EventPayload) -> bool {
        if self.inner.dispatching.borrow().contains(&event) {
            tracing::warn!(event = event.name(), "re-entrant notification dropped");
            return false;
        }
        self.inner.dispatching.borrow_mut().push(event);
        let _guard = DispatchGuard {
            stack: &self.inner.dispatching,
        };

        let snapshot: Vec<(u64, Handler)> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .filter(|r| r.event == event)
            .map(|r| (r.id, Rc::clone(&r.handler)))
            .collect();
        tracing::trace!(event = event.name(), handlers = snapshot.len(), "notify");

        for (id, handler) in snapshot {
            if self.inner.is_registered(id) {
                handler(event, payload);
            }
        }
        true
    }

    /// Dispatch `event` without a payload.
    pub fn emit(&self, event: GridEvent) -> bool {
        self.notify(event, &EventPayload::None)
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: GridEvent) -> usize {
        self.inner
            .handlers
            .borrow()
            .iter()
            .filter(|r| r.event == event)
            .count()
    }

    /// Total number of registrations.
    #[must_use]
    pub fn total_handlers(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.handlers.borrow_mut());
        tracing::debug!(removed = removed.len(), "event bus cleared");
    }
}

/// Releases one registration.
#[derive(Debug, Clone)]
pub struct Deregister {
    bus: Weak<BusInner>,
    id: u64,
}

impl Deregister {
    /// Remove the registration. Returns `false` if it was already gone.
    pub fn deregister(&self) -> bool {
        self.bus.upgrade().is_some_and(|bus| bus.remove(self.id))
    }

    /// Whether the registration is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.is_registered(self.id))
    }
}

impl fmt::Debug for BusInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

/// Lifetime of a group of registrations.
///
/// Every registration adopted by the scope is released when the scope drops.
#[derive(Debug, Default)]
pub struct SubscriptionScope {
    registrations: RefCell<Vec<Deregister>>,
}

impl SubscriptionScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tie an existing registration to this scope.
    pub fn adopt(&self, handle: Deregister) {
        self.registrations.borrow_mut().push(handle);
    }

    /// Number of registrations still live.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registrations
            .borrow()
            .iter()
            .filter(|h| h.is_active())
            .count()
    }

    /// Release every registration now.
    pub fn release(&self) {
        for handle in self.registrations.borrow_mut().drain(..) {
            handle.deregister();
        }
    }
}

impl Drop for SubscriptionScope {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(GridEvent, &EventPayload)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |tag: &str| -> Box<dyn Fn(GridEvent, &EventPayload)> {
            let sink = Rc::clone(&sink);
            let tag = tag.to_owned();
            Box::new(move |event, _| sink.borrow_mut().push(format!("{tag}:{event}")))
        };
        (log, make)
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = GridBus::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        bus.register(GridEvent::DataUpdated, None, move |e, p| a(e, p));
        bus.register(GridEvent::DataUpdated, None, move |e, p| b(e, p));
        assert!(bus.emit(GridEvent::DataUpdated));
        assert_eq!(*log.borrow(), vec!["a:DATA_UPDATED", "b:DATA_UPDATED"]);
    }

    #[test]
    fn only_matching_event_fires() {
        let bus = GridBus::new();
        let (log, make) = recorder();
        let a = make("a");
        bus.register(GridEvent::MetadataUpdated, None, move |e, p| a(e, p));
        bus.emit(GridEvent::DataUpdated);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn deregister_is_idempotent() {
        let bus = GridBus::new();
        let handle = bus.register(GridEvent::DataUpdated, None, |_, _| {});
        assert!(handle.is_active());
        assert!(handle.deregister());
        assert!(!handle.deregister());
        assert_eq!(bus.handler_count(GridEvent::DataUpdated), 0);
    }

    #[test]
    fn scope_drop_releases_registrations() {
        let bus = GridBus::new();
        {
            let scope = SubscriptionScope::new();
            bus.register(GridEvent::DataUpdated, Some(&scope), |_, _| {});
            bus.register(GridEvent::MetadataUpdated, Some(&scope), |_, _| {});
            bus.register(GridEvent::DataUpdated, None, |_, _| {});
            assert_eq!(scope.active_count(), 2);
            assert_eq!(bus.total_handlers(), 3);
        }
        assert_eq!(bus.total_handlers(), 1);
    }

    #[test]
    fn same_event_reentry_is_dropped() {
        let bus = GridBus::new();
        let count = Rc::new(Cell::new(0));
        let inner_bus = bus.clone();
        let c = Rc::clone(&count);
        let nested = Rc::new(Cell::new(None));
        let nested_out = Rc::clone(&nested);
        bus.register(GridEvent::DataUpdated, None, move |_, _| {
            c.set(c.get() + 1);
            nested_out.set(Some(inner_bus.emit(GridEvent::DataUpdated)));
        });
        assert!(bus.emit(GridEvent::DataUpdated));
        assert_eq!(count.get(), 1);
        assert_eq!(nested.get(), Some(false));
    }

    #[test]
    fn different_events_may_nest() {
        let bus = GridBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let inner_bus = bus.clone();
        let s = Rc::clone(&seen);
        bus.register(GridEvent::DataUpdated, None, move |e, _| {
            s.borrow_mut().push(e);
            inner_bus.emit(GridEvent::ExtCollapseUpdated);
        });
        let s = Rc::clone(&seen);
        bus.register(GridEvent::ExtCollapseUpdated, None, move |e, _| {
            s.borrow_mut().push(e);
        });
        bus.emit(GridEvent::DataUpdated);
        assert_eq!(
            *seen.borrow(),
            vec![GridEvent::DataUpdated, GridEvent::ExtCollapseUpdated]
        );
    }

    #[test]
    fn handler_removed_mid_dispatch_is_skipped() {
        let bus = GridBus::new();
        let fired = Rc::new(Cell::new(false));
        let victim: Rc<RefCell<Option<Deregister>>> = Rc::new(RefCell::new(None));
        let v = Rc::clone(&victim);
        bus.register(GridEvent::DataUpdated, None, move |_, _| {
            if let Some(handle) = v.borrow().as_ref() {
                handle.deregister();
            }
        });
        let f = Rc::clone(&fired);
        let handle = bus.register(GridEvent::DataUpdated, None, move |_, _| f.set(true));
        *victim.borrow_mut() = Some(handle);
        bus.emit(GridEvent::DataUpdated);
        assert!(!fired.get());
    }

    #[test]
    fn payload_reaches_handler() {
        let bus = GridBus::new();
        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        bus.register(GridEvent::StatsUpdated, None, move |_, payload| {
            *g.borrow_mut() = Some(payload.clone());
        });
        let payload = EventPayload::Stats {
            row: RowKey::new(4),
            field: "cpc".into(),
        };
        bus.notify(GridEvent::StatsUpdated, &payload);
        assert_eq!(got.borrow().as_ref(), Some(&payload));
    }

    #[test]
    fn handles_outlive_bus() {
        let handle = {
            let bus = GridBus::new();
            bus.register(GridEvent::DataUpdated, None, |_, _| {})
        };
        assert!(!handle.is_active());
        assert!(!handle.deregister());
    }

    #[test]
    fn event_names_are_canonical() {
        let names: Vec<&str> = GridEvent::ALL.iter().map(|e| e.name()).collect();
        assert!(names.contains(&"EXT_SELECTION_UPDATED"));
        assert_eq!(GridEvent::MetadataUpdated.to_string(), "METADATA_UPDATED");
    }
}
