use std::fmt::{self, Debug};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::define_query::{define_query, QueryDef};
use crate::error::QueryError;
use crate::extensions::{ExtensionBag, ExtensionSpec};
use crate::query_client::QueryClient;
use crate::query_key::{KeyFn, QueryKey, Variables};
use crate::query_options::QueryOptions;
use crate::query_render::RenderProps;
use crate::query_result::QueryResult;

/// Computes the page param for the next fetch from the last page and all
/// pages loaded so far. `None` means no further pages.
pub type NextPageFn = Rc<dyn Fn(&Value, &[Value]) -> Option<Value>>;

/// Pagination config for an infinite query.
#[derive(Clone)]
pub struct PaginationSpec {
    /// Param for the very first fetch. Engines pass `None` through as-is.
    pub initial_page_param: Option<Value>,
    /// Derives the param for the page after the last one loaded.
    pub next_page_param: NextPageFn,
}

impl PaginationSpec {
    /// A spec from its next-page function.
    pub fn new(next_page_param: impl Fn(&Value, &[Value]) -> Option<Value> + 'static) -> Self {
        PaginationSpec {
            initial_page_param: None,
            next_page_param: Rc::new(next_page_param),
        }
    }

    /// A spec from an already shared next-page function.
    pub fn from_rc(next_page_param: NextPageFn) -> Self {
        PaginationSpec {
            initial_page_param: None,
            next_page_param,
        }
    }

    /// Set the first fetch's page param.
    pub fn set_initial_page_param(self, initial_page_param: impl Into<Value>) -> Self {
        PaginationSpec {
            initial_page_param: Some(initial_page_param.into()),
            ..self
        }
    }
}

impl Debug for PaginationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationSpec")
            .field("initial_page_param", &self.initial_page_param)
            .field("next_page_param", &"..")
            .finish()
    }
}

/// Accumulated pages of an infinite query, in fetch order.
///
/// This is the wire shape engines store under the query's key:
/// `{ "pages": [..], "pageParams": [..] }`, params aligned with their pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfiniteData {
    /// Fetched pages, oldest first.
    pub pages: Vec<Value>,
    /// The param each page was fetched with. Null for a param-less first
    /// fetch.
    pub page_params: Vec<Value>,
}

impl InfiniteData {
    /// Data holding a single first page.
    pub fn first(page: Value, param: Value) -> Self {
        InfiniteData {
            pages: vec![page],
            page_params: vec![param],
        }
    }

    /// Append a fetched page.
    pub fn push_page(&mut self, page: Value, param: Value) {
        self.pages.push(page);
        self.page_params.push(param);
    }

    /// The most recently fetched page.
    pub fn last_page(&self) -> Option<&Value> {
        self.pages.last()
    }

    /// Flatten array pages into one item list. Non-array pages pass through
    /// as single items.
    pub fn flatten(&self) -> Vec<Value> {
        let mut items = Vec::new();
        for page in &self.pages {
            match page {
                Value::Array(values) => items.extend(values.iter().cloned()),
                other => items.push(other.clone()),
            }
        }
        items
    }

    /// Parse from the wire shape. `None` when the value has another shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Back to the wire shape.
    pub fn into_value(self) -> Value {
        match serde_json::to_value(&self) {
            Ok(value) => value,
            Err(error) => {
                log::debug!("infinite data failed to serialize: {error}");
                Value::Null
            }
        }
    }
}

/// Define an infinite (paginated) query.
///
/// Identical to [`define_query`] plus a [`PaginationSpec`] the engine uses to
/// chain fetches. Data accumulates under one key as [`InfiniteData`].
pub fn define_infinite_query(options: QueryOptions, pagination: PaginationSpec) -> InfiniteQueryDef {
    InfiniteQueryDef {
        def: define_query(options),
        pagination,
    }
}

/// A reusable infinite query definition.
#[derive(Clone, Debug)]
pub struct InfiniteQueryDef {
    def: QueryDef,
    pagination: PaginationSpec,
}

impl InfiniteQueryDef {
    /// Set a custom key-derivation function.
    pub fn set_key_fn(self, key_fn: impl Fn(&Variables, &ExtensionBag) -> QueryKey + 'static) -> Self {
        InfiniteQueryDef {
            def: self.def.set_key_fn(key_fn),
            ..self
        }
    }

    /// Set an already shared key-derivation function.
    pub fn set_key_fn_rc(self, key_fn: KeyFn) -> Self {
        InfiniteQueryDef {
            def: self.def.set_key_fn_rc(key_fn),
            ..self
        }
    }

    /// Set which ambient extension sources key derivation reads.
    pub fn set_extensions(self, extensions: ExtensionSpec) -> Self {
        InfiniteQueryDef {
            def: self.def.set_extensions(extensions),
            ..self
        }
    }

    /// The definition's default options.
    pub fn options(&self) -> &QueryOptions {
        self.def.options()
    }

    /// The pagination config.
    pub fn pagination(&self) -> &PaginationSpec {
        &self.pagination
    }

    /// Derive the cache key for `variables`. Same derivation as a plain
    /// query; pagination never participates in the key.
    pub fn key<N>(&self, client: &QueryClient<N>, variables: &Variables) -> QueryKey {
        self.def.key(client, variables)
    }

    /// Observe this infinite query without rendering.
    pub fn use_infinite_query<N>(
        &self,
        client: &QueryClient<N>,
        variables: &Variables,
        options: QueryOptions,
    ) -> QueryResult {
        self.def
            .observe_with(client, variables, options, Some(self.pagination.clone()))
    }

    /// Observe and render this infinite query in one pass.
    pub fn render<N>(
        &self,
        client: &QueryClient<N>,
        props: RenderProps<N>,
    ) -> Result<N, QueryError>
    where
        N: crate::RenderNode,
    {
        self.def
            .render_inner(client, props, Some(self.pagination.clone()))
    }

    /// Ask the engine to fetch the page after the last one loaded for
    /// `variables`.
    pub fn fetch_next_page<N>(&self, client: &QueryClient<N>, variables: &Variables) {
        let key = self.def.key(client, variables);
        client.engine().fetch_next_page(&key);
    }
}

/// A [`NextPageFn`] reading a page number out of each page by JSON pointer
/// and yielding that number plus one.
///
/// Yields `None` once the pointer stops matching a number, ending
/// pagination.
///
/// # Panics
///
/// Panics immediately when `pointer` is non-empty and does not start with
/// `/`; a malformed pointer is a definition bug, not a runtime condition.
pub fn next_page_number(pointer: impl Into<String>) -> NextPageFn {
    let pointer = pointer.into();
    if !pointer.is_empty() && !pointer.starts_with('/') {
        panic!("JSON pointer `{pointer}` must start with `/`");
    }
    Rc::new(move |last_page, _pages| {
        last_page
            .pointer(&pointer)
            .and_then(Value::as_i64)
            .map(|page| Value::from(page + 1))
    })
}

/// A [`NextPageFn`] for zero-indexed page APIs: the next param is the count
/// of pages already loaded. Never ends pagination on its own.
pub fn next_page_by_count() -> NextPageFn {
    Rc::new(|_last_page, pages| Some(Value::from(pages.len())))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_util::MockEngine;

    #[test]
    fn next_page_number_reads_the_pointer_and_increments() {
        let next = next_page_number("/info/page");
        let last_page = json!({ "info": { "page": 2 }, "results": [1, 2] });

        assert_eq!(next(&last_page, &[last_page.clone()]), Some(json!(3)));
    }

    #[test]
    fn next_page_number_ends_pagination_when_the_pointer_misses() {
        let next = next_page_number("/info/page");
        let last_page = json!({ "results": [1, 2] });

        assert_eq!(next(&last_page, &[last_page.clone()]), None);
    }

    #[test]
    #[should_panic(expected = "must start with")]
    fn next_page_number_rejects_malformed_pointers() {
        let _ = next_page_number("info/page");
    }

    #[test]
    fn next_page_by_count_yields_the_loaded_page_count() {
        let next = next_page_by_count();
        let pages = [json!([1]), json!([2])];

        assert_eq!(next(&pages[1], &pages), Some(json!(2)));
    }

    #[test]
    fn infinite_data_uses_the_camel_case_wire_shape() {
        let mut data = InfiniteData::first(json!([1, 2]), Value::Null);
        data.push_page(json!([3]), json!(1));

        let value = data.clone().into_value();
        assert_eq!(
            value,
            json!({ "pages": [[1, 2], [3]], "pageParams": [null, 1] })
        );

        let parsed = InfiniteData::from_value(&value);
        assert_eq!(parsed, Some(data), "Wire shape should parse back losslessly");
    }

    #[test]
    fn from_value_rejects_other_shapes() {
        assert_eq!(InfiniteData::from_value(&json!([1, 2, 3])), None);
    }

    #[test]
    fn flatten_concatenates_array_pages() {
        let mut data = InfiniteData::first(json!([1, 2]), Value::Null);
        data.push_page(json!([3]), json!(1));
        data.push_page(json!("trailer"), json!(2));

        assert_eq!(
            data.flatten(),
            vec![json!(1), json!(2), json!(3), json!("trailer")]
        );
    }

    #[test]
    fn first_fetch_carries_the_initial_page_param() {
        let engine = Rc::new(MockEngine::eager());
        let client: QueryClient<String> = QueryClient::from_rc(engine.clone());

        let pages = define_infinite_query(
            QueryOptions::new().set_query_fn(|ctx| async move {
                let page = ctx.page_param.clone().unwrap_or(Value::Null);
                Ok(json!({ "param": page, "items": [1] }))
            }),
            PaginationSpec::new(|_, pages| Some(Value::from(pages.len() as i64)))
                .set_initial_page_param(0),
        );

        let result = pages.use_infinite_query(&client, &Variables::value("todos"), QueryOptions::new());

        assert!(result.status.is_success());
        assert_eq!(result.has_next_page, Some(true));
        let data = InfiniteData::from_value(
            result.data.as_ref().unwrap_or(&Value::Null),
        );
        assert_eq!(
            data.as_ref().and_then(|d| d.last_page()),
            Some(&json!({ "param": 0, "items": [1] })),
            "The query fn should have received the initial page param"
        );
    }

    #[test]
    fn fetch_next_page_appends_a_page() {
        let engine = Rc::new(MockEngine::eager());
        let client: QueryClient<String> = QueryClient::from_rc(engine.clone());

        let pages = define_infinite_query(
            QueryOptions::new().set_query_fn(|ctx| async move {
                let page = ctx.page_param.clone().and_then(|p| p.as_i64().map(Value::from));
                Ok(json!({ "page": page.unwrap_or(json!(0)) }))
            }),
            PaginationSpec::from_rc(next_page_by_count()),
        );

        let variables = Variables::value("todos");
        let _ = pages.use_infinite_query(&client, &variables, QueryOptions::new());
        pages.fetch_next_page(&client, &variables);

        assert_eq!(engine.fetch_count(), 1);
        let result = pages.use_infinite_query(&client, &variables, QueryOptions::new());
        let data = InfiniteData::from_value(result.data.as_ref().unwrap_or(&Value::Null));
        assert_eq!(
            data.as_ref().map(|d| d.pages.len()),
            Some(2),
            "A second page should be appended under the same key"
        );
        assert_eq!(
            data.as_ref().and_then(|d| d.last_page()),
            Some(&json!({ "page": 1 }))
        );
    }

    #[test]
    fn infinite_render_gates_loading_like_a_plain_query() {
        let client: QueryClient<String> = QueryClient::new(MockEngine::new());
        let pages = define_infinite_query(
            QueryOptions::new(),
            PaginationSpec::new(|_, _| None),
        );

        let rendered = pages.render(
            &client,
            RenderProps::new()
                .set_variables(Variables::value("todos"))
                .set_render(|_, _| "content".to_string()),
        );
        assert_eq!(rendered, Ok("loading...".to_string()));
    }
}
