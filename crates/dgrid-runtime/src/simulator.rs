#![forbid(unsafe_code)]

//! Deterministic aggregation endpoint for testing.
//!
//! `ScriptedEndpoint` answers requests from closures, records every request,
//! and can hold responses back until the test releases them, which makes
//! response ordering (and therefore supersession) fully scriptable.
//!
//! # Example
//!
//! ```ignore
//! use dgrid_runtime::simulator::ScriptedEndpoint;
//!
//! let endpoint = ScriptedEndpoint::new(meta).respond_with(|config| {
//!     Ok(vec![NodePayload::root(rows_for(&config.breakdown))])
//! });
//! endpoint.hold(true);
//! let first = source.get_data(None, None);
//! // ...issue more requests...
//! endpoint.release(1);
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::task::{Poll, Waker};

use dgrid_core::{EndpointError, GridRow, MetaData, SaveError, Stats};
use futures_util::FutureExt;
use futures_util::future::{LocalBoxFuture, poll_fn, ready};
use serde_json::Value;

use crate::endpoint::{AggregationEndpoint, EndpointResult, NodePayload, RequestConfig, UpdatedStatFragment};

type Responder = Box<dyn Fn(&RequestConfig) -> EndpointResult<Vec<NodePayload>>>;
type Saver = Box<dyn Fn(&Value, &GridRow, &str) -> Result<UpdatedStatFragment, SaveError>>;

#[derive(Default)]
struct Slot {
    staged: Option<EndpointResult<Vec<NodePayload>>>,
    released: bool,
    waker: Option<Waker>,
}

struct Held {
    index: usize,
    slot: Rc<RefCell<Slot>>,
}

struct ScriptInner {
    meta: RefCell<EndpointResult<MetaData>>,
    meta_calls: Cell<usize>,
    responder: RefCell<Responder>,
    saver: RefCell<Saver>,
    hold: Cell<bool>,
    requests: RefCell<Vec<RequestConfig>>,
    held: RefCell<Vec<Held>>,
    saves: RefCell<Vec<(String, Value)>>,
}

/// Scriptable [`AggregationEndpoint`]. Clones share the same script.
#[derive(Clone)]
pub struct ScriptedEndpoint {
    inner: Rc<ScriptInner>,
}

impl ScriptedEndpoint {
    /// Endpoint serving `meta` and answering every data request with an
    /// empty root node.
    #[must_use]
    pub fn new(meta: MetaData) -> Self {
        Self {
            inner: Rc::new(ScriptInner {
                meta: RefCell::new(Ok(meta)),
                meta_calls: Cell::new(0),
                responder: RefCell::new(Box::new(|_| Ok(vec![NodePayload::root(Vec::new())]))),
                saver: RefCell::new(Box::new(|value, _, field| {
                    Ok(Stats::from([(field.to_owned(), value.clone())]))
                })),
                hold: Cell::new(false),
                requests: RefCell::new(Vec::new()),
                held: RefCell::new(Vec::new()),
                saves: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Answer data requests with `responder`.
    #[must_use]
    pub fn respond_with(
        self,
        responder: impl Fn(&RequestConfig) -> EndpointResult<Vec<NodePayload>> + 'static,
    ) -> Self {
        *self.inner.responder.borrow_mut() = Box::new(responder);
        self
    }

    /// Answer saves with `saver`.
    #[must_use]
    pub fn on_save(
        self,
        saver: impl Fn(&Value, &GridRow, &str) -> Result<UpdatedStatFragment, SaveError> + 'static,
    ) -> Self {
        *self.inner.saver.borrow_mut() = Box::new(saver);
        self
    }

    /// Make metadata requests fail with `error`.
    pub fn fail_meta(&self, error: EndpointError) {
        *self.inner.meta.borrow_mut() = Err(error);
    }

    /// Hold responses until released.
    pub fn hold(&self, hold: bool) {
        self.inner.hold.set(hold);
    }

    /// Release the held response of the request with index `index`
    /// (0-based, in issue order). Returns `false` if nothing is held there.
    pub fn release(&self, index: usize) -> bool {
        let mut held = self.inner.held.borrow_mut();
        let Some(pos) = held.iter().position(|h| h.index == index) else {
            return false;
        };
        let entry = held.remove(pos);
        let waker = {
            let mut slot = entry.slot.borrow_mut();
            slot.released = true;
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Release every held response, oldest first.
    pub fn release_all(&self) {
        let indices: Vec<usize> = self.inner.held.borrow().iter().map(|h| h.index).collect();
        for index in indices {
            self.release(index);
        }
    }

    /// Number of responses still held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.inner.held.borrow().len()
    }

    /// Every data request issued so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RequestConfig> {
        self.inner.requests.borrow().clone()
    }

    /// The most recent data request.
    #[must_use]
    pub fn last_request(&self) -> Option<RequestConfig> {
        self.inner.requests.borrow().last().cloned()
    }

    /// Number of metadata requests.
    #[must_use]
    pub fn meta_calls(&self) -> usize {
        self.inner.meta_calls.get()
    }

    /// `(field, value)` of every save request.
    #[must_use]
    pub fn saves(&self) -> Vec<(String, Value)> {
        self.inner.saves.borrow().clone()
    }
}

impl fmt::Debug for ScriptedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEndpoint")
            .field("requests", &self.inner.requests.borrow().len())
            .field("held", &self.held_count())
            .finish()
    }
}

impl AggregationEndpoint for ScriptedEndpoint {
    fn get_meta_data(&self) -> LocalBoxFuture<'static, EndpointResult<MetaData>> {
        self.inner.meta_calls.set(self.inner.meta_calls.get() + 1);
        ready(self.inner.meta.borrow().clone()).boxed_local()
    }

    fn get_data(&self, config: RequestConfig) -> LocalBoxFuture<'static, EndpointResult<Vec<NodePayload>>> {
        let response = (self.inner.responder.borrow())(&config);
        let index = {
            let mut requests = self.inner.requests.borrow_mut();
            requests.push(config);
            requests.len() - 1
        };
        if !self.inner.hold.get() {
            return ready(response).boxed_local();
        }

        let slot = Rc::new(RefCell::new(Slot {
            staged: Some(response),
            ..Slot::default()
        }));
        self.inner.held.borrow_mut().push(Held {
            index,
            slot: Rc::clone(&slot),
        });
        poll_fn(move |cx| {
            let mut slot = slot.borrow_mut();
            if slot.released {
                Poll::Ready(
                    slot.staged
                        .take()
                        .unwrap_or_else(|| Err(EndpointError::Transport("response already taken".into()))),
                )
            } else {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        })
        .boxed_local()
    }

    fn save_data(
        &self,
        value: Value,
        row: &GridRow,
        field: &str,
    ) -> LocalBoxFuture<'static, Result<UpdatedStatFragment, SaveError>> {
        self.inner
            .saves
            .borrow_mut()
            .push((field.to_owned(), value.clone()));
        let result = (self.inner.saver.borrow())(&value, row, field);
        ready(result).boxed_local()
    }
}
