use std::cell::Cell;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures_channel::oneshot;
use serde_json::Value;

use crate::error::QueryError;
use crate::infinite_query::PaginationSpec;
use crate::query_key::QueryKey;
use crate::query_options::{QueryOptions, SelectFn};
use crate::query_result::QueryResult;

/// Future returned by a [`QueryFn`]. Local so `Rc`-captured state is fine.
pub type QueryFnFuture = LocalBoxFuture<'static, Result<Value, QueryError>>;

/// The fetch operation handed to the engine.
pub type QueryFn = Rc<dyn Fn(QueryFnContext) -> QueryFnFuture>;

/// Everything a query function receives from the engine.
pub struct QueryFnContext {
    /// The derived key being fetched.
    pub key: QueryKey,
    /// Cursor for the page being fetched. `None` outside infinite mode.
    pub page_param: Option<Value>,
    /// Signal flipped when the engine abandons this fetch.
    pub abort: AbortSignal,
}

impl QueryFnContext {
    /// A context for a fresh fetch of `key`.
    pub fn new(key: QueryKey, abort: AbortSignal) -> Self {
        QueryFnContext {
            key,
            page_param: None,
            abort,
        }
    }

    /// Set the page cursor.
    pub fn set_page_param(self, page_param: Option<Value>) -> Self {
        QueryFnContext { page_param, ..self }
    }
}

impl Debug for QueryFnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFnContext")
            .field("key", &self.key)
            .field("page_param", &self.page_param)
            .field("aborted", &self.abort.is_aborted())
            .finish()
    }
}

/// Fetch-abandonment signal passed into query functions.
///
/// [`cancelled`](AbortSignal::cancelled) resolves on abort and also when the
/// paired handle is dropped; [`is_aborted`](AbortSignal::is_aborted)
/// distinguishes the two. Engines typically race the fetch future against
/// `cancelled()`.
pub struct AbortSignal {
    aborted: Rc<Cell<bool>>,
    cancelled: oneshot::Receiver<()>,
}

impl AbortSignal {
    /// True once the engine has abandoned this fetch.
    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    /// Resolves when the fetch is abandoned or the handle is dropped.
    pub async fn cancelled(self) {
        let _ = self.cancelled.await;
    }
}

impl Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.aborted.get())
            .finish()
    }
}

/// Engine-side handle pairing with an [`AbortSignal`].
///
/// The engine keeps the handle alive for the lifetime of the fetch and
/// aborts on unmount, refetch, or explicit cancel.
pub struct AbortHandle {
    aborted: Rc<Cell<bool>>,
    cancel: oneshot::Sender<()>,
}

impl AbortHandle {
    /// Abort the paired fetch.
    pub fn abort(self) {
        self.aborted.set(true);
        if self.cancel.send(()).is_err() {
            log::debug!("abort signal dropped before cancellation was observed");
        }
    }
}

/// A fresh abort pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (cancel, cancelled) = oneshot::channel();
    let aborted = Rc::new(Cell::new(false));
    (
        AbortHandle {
            aborted: aborted.clone(),
            cancel,
        },
        AbortSignal { aborted, cancelled },
    )
}

/// Fully merged instruction handed to [`QueryEngine::observe`].
#[derive(Clone)]
pub struct QuerySpec {
    /// Derived cache key.
    pub key: QueryKey,
    /// Fetch operation, when the definition supplied one.
    pub query_fn: Option<QueryFn>,
    /// Post-fetch transform.
    pub select: Option<SelectFn>,
    /// Whether failures should reach the nearest boundary.
    pub surface_errors: bool,
    /// Freshness window.
    pub stale_time: Option<Duration>,
    /// Engine cache retention.
    pub gc_time: Option<Duration>,
    /// Engine polling interval.
    pub refetch_interval: Option<Duration>,
    /// Pagination config. Present only in infinite mode.
    pub pagination: Option<PaginationSpec>,
}

impl QuerySpec {
    /// A spec from a derived key and merged options.
    pub fn from_options(key: QueryKey, options: &QueryOptions) -> Self {
        QuerySpec {
            key,
            query_fn: options.query_fn.clone(),
            select: options.select.clone(),
            surface_errors: options.effective_surface_errors(),
            stale_time: options.stale_time,
            gc_time: options.gc_time,
            refetch_interval: options.refetch_interval,
            pagination: None,
        }
    }

    /// Set the pagination config.
    pub fn set_pagination(self, pagination: Option<PaginationSpec>) -> Self {
        QuerySpec { pagination, ..self }
    }
}

impl Debug for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("key", &self.key)
            .field("query_fn", &self.query_fn.as_ref().map(|_| ".."))
            .field("select", &self.select.as_ref().map(|_| ".."))
            .field("surface_errors", &self.surface_errors)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("refetch_interval", &self.refetch_interval)
            .field("pagination", &self.pagination)
            .finish()
    }
}

/// The external query-execution engine.
///
/// The engine owns caching, in-flight request lifecycle, retries, and
/// cancellation. This layer derives a [`QuerySpec`] per pass and reads back
/// the engine's current state; it never blocks on the engine.
pub trait QueryEngine {
    /// Observe (and, engine permitting, start) the query described by
    /// `spec`, returning its current state.
    fn observe(&self, spec: QuerySpec) -> QueryResult;

    /// Fetch the next page of an infinite query previously observed under
    /// `key`. Engines without infinite support may ignore this.
    fn fetch_next_page(&self, key: &QueryKey) {
        log::debug!("engine ignored fetch_next_page for {key}");
    }
}
