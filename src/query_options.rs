use std::fmt::{self, Debug};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::QueryError;
use crate::query_engine::{QueryFn, QueryFnContext, QueryFnFuture};

/// Post-fetch transform applied by the engine to resolved data.
pub type SelectFn = Rc<dyn Fn(Value) -> Value>;

/// Execution options for a query definition or invocation.
///
/// Unset fields fall through to the lower layer during
/// [`merge`](QueryOptions::merge); the merge is shallow and right-biased,
/// exactly struct-update semantics. Render concerns (loading node,
/// `has_loading`) live on [`RenderProps`](crate::RenderProps), not here.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// The fetch operation handed to the engine.
    pub query_fn: Option<QueryFn>,
    /// Post-fetch data transform, applied by the engine per observer.
    pub select: Option<SelectFn>,
    /// Surface failures to the nearest boundary.
    /// Defaults to `true` at merge time; only an explicit `false` keeps
    /// errors local to the result.
    pub surface_errors: Option<bool>,
    /// The duration that should pass before resolved data is considered
    /// stale. If no stale_time, data never goes stale.
    /// Stale_time can never be greater than gc_time.
    pub stale_time: Option<Duration>,
    /// The amount of time unused data stays cached by the engine.
    /// If no gc time, data is never evicted.
    pub gc_time: Option<Duration>,
    /// If no refetch interval, the query will never refetch on a timer.
    pub refetch_interval: Option<Duration>,
}

impl QueryOptions {
    /// Empty options; every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query function from an async closure.
    ///
    /// The closure receives a [`QueryFnContext`] and its output is
    /// serialized into a plain JSON value for the engine.
    pub fn set_query_fn<F, Fut, T>(self, query_fn: F) -> Self
    where
        F: Fn(QueryFnContext) -> Fut + 'static,
        Fut: Future<Output = Result<T, QueryError>> + 'static,
        T: Serialize + 'static,
    {
        QueryOptions {
            query_fn: Some(into_query_fn(query_fn)),
            ..self
        }
    }

    /// Set an already-boxed query function.
    pub fn set_raw_query_fn(self, query_fn: QueryFn) -> Self {
        QueryOptions {
            query_fn: Some(query_fn),
            ..self
        }
    }

    /// Set the post-fetch transform.
    pub fn set_select(self, select: impl Fn(Value) -> Value + 'static) -> Self {
        QueryOptions {
            select: Some(Rc::new(select)),
            ..self
        }
    }

    /// Explicitly enable or suppress error surfacing.
    pub fn set_surface_errors(self, surface_errors: Option<bool>) -> Self {
        QueryOptions {
            surface_errors,
            ..self
        }
    }

    /// Set the stale_time.
    pub fn set_stale_time(self, stale_time: Option<Duration>) -> Self {
        QueryOptions { stale_time, ..self }
    }

    /// Set the gc time.
    pub fn set_gc_time(self, gc_time: Option<Duration>) -> Self {
        QueryOptions { gc_time, ..self }
    }

    /// Set the refetch interval.
    pub fn set_refetch_interval(self, refetch_interval: Option<Duration>) -> Self {
        QueryOptions {
            refetch_interval,
            ..self
        }
    }

    /// The surfacing flag after defaulting.
    pub fn effective_surface_errors(&self) -> bool {
        self.surface_errors.unwrap_or(true)
    }

    /// Shallow right-biased merge: fields set on `overrides` win, unset
    /// fields fall through to `defaults`. Provider-level render defaults are
    /// not part of this merge; they apply at render time only.
    pub fn merge(defaults: &QueryOptions, overrides: &QueryOptions) -> QueryOptions {
        QueryOptions {
            query_fn: overrides
                .query_fn
                .clone()
                .or_else(|| defaults.query_fn.clone()),
            select: overrides.select.clone().or_else(|| defaults.select.clone()),
            surface_errors: overrides.surface_errors.or(defaults.surface_errors),
            stale_time: overrides.stale_time.or(defaults.stale_time),
            gc_time: overrides.gc_time.or(defaults.gc_time),
            refetch_interval: overrides.refetch_interval.or(defaults.refetch_interval),
        }
    }

    /// Ensures that gc_time is >= than stale_time.
    pub fn validate(self) -> Self {
        let stale_time = ensure_valid_stale_time(&self.stale_time, &self.gc_time);
        QueryOptions { stale_time, ..self }
    }
}

impl Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query_fn", &self.query_fn.as_ref().map(|_| ".."))
            .field("select", &self.select.as_ref().map(|_| ".."))
            .field("surface_errors", &self.surface_errors)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("refetch_interval", &self.refetch_interval)
            .finish()
    }
}

fn ensure_valid_stale_time(
    stale_time: &Option<Duration>,
    gc_time: &Option<Duration>,
) -> Option<Duration> {
    match (stale_time, gc_time) {
        (Some(ref stale_time), Some(ref gc_time)) => {
            if stale_time > gc_time {
                log::debug!(
                    "stale_time is greater than gc_time. Using gc time instead. stale_time: {}, gc_time: {}",
                    stale_time.as_millis(),
                    gc_time.as_millis()
                );
                Some(*gc_time)
            } else {
                Some(*stale_time)
            }
        }
        (None, Some(ref gc_duration)) => {
            log::debug!(
                "stale_time (infinity) is greater than gc_time. Using gc_time instead. gc_time: {}",
                gc_duration.as_millis()
            );
            *gc_time
        }
        (stale_time, _) => *stale_time,
    }
}

fn into_query_fn<F, Fut, T>(query_fn: F) -> QueryFn
where
    F: Fn(QueryFnContext) -> Fut + 'static,
    Fut: Future<Output = Result<T, QueryError>> + 'static,
    T: Serialize + 'static,
{
    let query_fn = Rc::new(query_fn);
    Rc::new(move |context: QueryFnContext| -> QueryFnFuture {
        let query_fn = query_fn.clone();
        Box::pin(async move {
            let data = query_fn(context).await?;
            serde_json::to_value(data).map_err(QueryError::new)
        })
    })
}

/// Typed adapter for [`SelectFn`].
///
/// Deserializes the raw value into `T`, applies `f`, and serializes the
/// output back. A value that does not fit `T` passes through unchanged with
/// a debug note, keeping resolution total.
pub fn select_as<T, R>(f: impl Fn(T) -> R + 'static) -> SelectFn
where
    T: DeserializeOwned,
    R: Serialize,
{
    Rc::new(
        move |value: Value| match serde_json::from_value::<T>(value.clone()) {
            Ok(data) => match serde_json::to_value(f(data)) {
                Ok(mapped) => mapped,
                Err(err) => {
                    log::debug!("select output failed to serialize: {err}");
                    value
                }
            },
            Err(err) => {
                log::debug!("select input failed to deserialize: {err}");
                value
            }
        },
    )
}
