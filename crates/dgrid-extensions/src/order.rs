#![forbid(unsafe_code)]

//! Single active sort column.
//!
//! The data source's signed order string (`"-cpc"`) is the source of truth.
//! It is mirrored into the header on the first `METADATA_UPDATED` and on every
//! `DATA_UPDATED`, and written back by [`OrderExtension::set_column_order`].
//! Both directions leave at most one column with a non-`None` order.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use dgrid_core::{
    GridBus, GridDataSource, GridError, GridEvent, GridResult, Header, LoadOutcome, PreferenceStore,
    SharedGrid, SortOrder, SubscriptionScope, format_order, parse_order,
};
use futures_util::FutureExt;
use futures_util::future::{LocalBoxFuture, ready};

/// Reset every column, then mark the one whose order key is `field`.
fn apply_order(header: &mut Header, order: Option<&str>) {
    for column in &mut header.columns {
        column.order = SortOrder::None;
    }
    let Some((field, direction)) = order.and_then(parse_order) else {
        return;
    };
    if let Some(column) = header.columns.iter_mut().find(|c| c.order_key() == field) {
        column.order = direction;
    }
}

struct OrderInner {
    grid: SharedGrid,
    bus: GridBus,
    source: Rc<dyn GridDataSource>,
    store: Rc<dyn PreferenceStore>,
    initialized: Cell<bool>,
}

impl OrderInner {
    fn on_metadata_updated(&self) {
        if self.initialized.replace(true) {
            return;
        }
        let stored = self.store.load_order(&self.grid.borrow());
        if let Some(order) = stored {
            tracing::debug!(order = %order, "stored order applied");
            self.source.set_order(Some(order));
        }
        self.sync();
    }

    fn sync(&self) {
        let order = self.source.order();
        apply_order(&mut self.grid.borrow_mut().header, order.as_deref());
    }
}

/// Sort state of one grid.
pub struct OrderExtension {
    inner: Rc<OrderInner>,
    scope: SubscriptionScope,
}

impl fmt::Debug for OrderExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderExtension")
            .field("order", &self.order())
            .field("initialized", &self.inner.initialized.get())
            .field("subscriptions", &self.scope.active_count())
            .finish()
    }
}

impl OrderExtension {
    /// Attach to `grid`, listening on `bus` for as long as the extension lives.
    #[must_use]
    pub fn new(
        grid: SharedGrid,
        bus: GridBus,
        source: Rc<dyn GridDataSource>,
        store: Rc<dyn PreferenceStore>,
    ) -> Self {
        let inner = Rc::new(OrderInner {
            grid,
            bus,
            source,
            store,
            initialized: Cell::new(false),
        });
        let scope = SubscriptionScope::new();

        let weak: Weak<OrderInner> = Rc::downgrade(&inner);
        inner
            .bus
            .register(GridEvent::MetadataUpdated, Some(&scope), move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_metadata_updated();
                }
            });
        let weak: Weak<OrderInner> = Rc::downgrade(&inner);
        inner
            .bus
            .register(GridEvent::DataUpdated, Some(&scope), move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.sync();
                }
            });
        Self { inner, scope }
    }

    /// Signed order string of the header's ordered column.
    #[must_use]
    pub fn order(&self) -> Option<String> {
        self.inner.grid.borrow().header.active_order()
    }

    /// Order by `field` in `direction` (`None` clears the sort) and reload.
    ///
    /// The header, the data source and the preference store are updated
    /// before `EXT_ORDER_UPDATED` is emitted; the returned future is the
    /// reload.
    pub fn set_column_order(
        &self,
        field: &str,
        direction: SortOrder,
    ) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        let order = {
            let mut grid = self.inner.grid.borrow_mut();
            let Some(key) = grid.header.column(field).map(|c| c.order_key().to_owned()) else {
                return ready(Err(GridError::UnknownColumn(field.to_owned()))).boxed_local();
            };
            let order = format_order(&key, direction);
            apply_order(&mut grid.header, order.as_deref());
            order
        };
        tracing::debug!(field, order = ?order, "column order set");
        self.inner.source.set_order(order);
        self.inner.store.save_order(&self.inner.grid.borrow());
        self.inner.bus.emit(GridEvent::ExtOrderUpdated);
        self.inner.source.reload()
    }

    /// Cycle a column's order: unordered columns start at their initial
    /// direction (ascending if none is declared), ordered ones flip.
    pub fn toggle_column_order(&self, field: &str) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        let next = self.inner.grid.borrow().header.column(field).map(|c| match c.order {
            SortOrder::None => match c.data.initial_order {
                SortOrder::None => SortOrder::Asc,
                initial => initial,
            },
            current => current.reversed(),
        });
        match next {
            Some(direction) => self.set_column_order(field, direction),
            None => ready(Err(GridError::UnknownColumn(field.to_owned()))).boxed_local(),
        }
    }
}
