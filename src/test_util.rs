use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use futures::executor::block_on;
use serde_json::Value;

use crate::infinite_query::{InfiniteData, PaginationSpec};
use crate::query_engine::{abort_pair, QueryEngine, QueryFn, QueryFnContext, QuerySpec};
use crate::query_key::QueryKey;
use crate::query_result::QueryResult;

/// In-memory engine for tests. Serves injected results by canonical key and
/// records every observed spec. In eager mode it also runs query fns to
/// completion on first observation, accumulating infinite pages the way a
/// real engine would.
pub(crate) struct MockEngine {
    eager: bool,
    results: RefCell<HashMap<String, QueryResult>>,
    infinite: RefCell<HashMap<String, InfiniteData>>,
    specs: RefCell<Vec<QuerySpec>>,
    fetches: Cell<usize>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        MockEngine {
            eager: false,
            results: RefCell::new(HashMap::new()),
            infinite: RefCell::new(HashMap::new()),
            specs: RefCell::new(Vec::new()),
            fetches: Cell::new(0),
        }
    }

    pub(crate) fn eager() -> Self {
        MockEngine {
            eager: true,
            ..Self::new()
        }
    }

    /// Inject the result served for `key`.
    pub(crate) fn set_result(&self, key: &QueryKey, result: QueryResult) {
        self.results
            .try_borrow_mut()
            .expect("mock results borrow")
            .insert(key.canonical(), result);
    }

    /// Canonical keys in observation order.
    pub(crate) fn observed(&self) -> Vec<String> {
        let specs = self.specs.try_borrow().expect("mock specs borrow");
        specs.iter().map(|spec| spec.key.canonical()).collect()
    }

    /// Read the most recently observed spec.
    pub(crate) fn last_spec<R>(&self, read: impl FnOnce(&QuerySpec) -> R) -> R {
        let specs = self.specs.try_borrow().expect("mock specs borrow");
        let spec = specs.last().expect("at least one observed spec");
        read(spec)
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    fn run_first_fetch(&self, spec: &QuerySpec, query_fn: QueryFn) -> QueryResult {
        let (_handle, signal) = abort_pair();
        let initial = spec
            .pagination
            .as_ref()
            .and_then(|p| p.initial_page_param.clone());
        let context = QueryFnContext::new(spec.key.clone(), signal).set_page_param(initial);

        match block_on(query_fn(context)) {
            Ok(page) => match &spec.pagination {
                Some(pagination) => {
                    let param = pagination.initial_page_param.clone().unwrap_or(Value::Null);
                    self.store_infinite(&spec.key, pagination, InfiniteData::first(page, param))
                }
                None => QueryResult::success(page),
            },
            Err(error) => QueryResult::error(error),
        }
    }

    fn store_infinite(
        &self,
        key: &QueryKey,
        pagination: &PaginationSpec,
        data: InfiniteData,
    ) -> QueryResult {
        let has_next = data
            .last_page()
            .and_then(|last| (pagination.next_page_param)(last, &data.pages))
            .is_some();
        self.infinite
            .try_borrow_mut()
            .expect("mock infinite borrow")
            .insert(key.canonical(), data.clone());
        QueryResult::success(data.into_value()).set_has_next_page(Some(has_next))
    }
}

impl QueryEngine for MockEngine {
    fn observe(&self, spec: QuerySpec) -> QueryResult {
        let canonical = spec.key.canonical();

        let mut result = {
            let results = self.results.try_borrow().expect("mock results borrow");
            results.get(&canonical).cloned()
        };

        if result.is_none() && self.eager {
            if let Some(query_fn) = spec.query_fn.clone() {
                let computed = self.run_first_fetch(&spec, query_fn);
                self.results
                    .try_borrow_mut()
                    .expect("mock results borrow")
                    .insert(canonical, computed.clone());
                result = Some(computed);
            }
        }

        let mut result = result.unwrap_or_else(QueryResult::pending);
        if let Some(select) = &spec.select {
            if let Some(data) = result.data.take() {
                result.data = Some(select(data));
            }
        }

        self.specs
            .try_borrow_mut()
            .expect("mock specs borrow")
            .push(spec);
        result
    }

    fn fetch_next_page(&self, key: &QueryKey) {
        self.fetches.set(self.fetches.get() + 1);
        let canonical = key.canonical();

        let spec = {
            let specs = self.specs.try_borrow().expect("mock specs borrow");
            specs.iter().rev().find(|spec| spec.key == *key).cloned()
        };
        let data = {
            let infinite = self.infinite.try_borrow().expect("mock infinite borrow");
            infinite.get(&canonical).cloned()
        };

        if let (Some(spec), Some(mut data)) = (spec, data) {
            if let (Some(query_fn), Some(pagination)) = (spec.query_fn.clone(), spec.pagination.clone()) {
                let param = data
                    .last_page()
                    .and_then(|last| (pagination.next_page_param)(last, &data.pages));
                if let Some(param) = param {
                    let (_handle, signal) = abort_pair();
                    let context =
                        QueryFnContext::new(key.clone(), signal).set_page_param(Some(param.clone()));
                    if let Ok(page) = block_on(query_fn(context)) {
                        data.push_page(page, param);
                        let result = self.store_infinite(key, &pagination, data);
                        self.results
                            .try_borrow_mut()
                            .expect("mock results borrow")
                            .insert(canonical, result);
                    }
                }
            }
        }
    }
}
