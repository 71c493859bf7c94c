#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! # About QueryKit
//!
//! QueryKit is a declarative query layer over pluggable data-fetching
//! engines.
//!
//! The engine owns the hard parts: caching, request deduplication, retries,
//! background refetching, cancellation. QueryKit owns the declarative shell
//! in front of it:
//! - cache-key derivation from variables plus ambient context
//! - extension resolution (route params, search params), live on every pass
//! - option merging between a definition and its invocations
//! - render gating for loading, error, and settled states
//! - error boundaries with reset listeners
//! - infinite (paginated) query definitions
//!
//! ## The main entry points to using QueryKit are:
//! - [`define_query`] - **Recommended**: a reusable query definition with its defaults baked in.
//! - [`define_infinite_query`] - the same, plus a [`PaginationSpec`] for page chaining.
//! - [`QueryClient`] - the engine handle plus app-wide render defaults.
//!
//! # A Simple Example
//!
//! Wire a client to an engine, define a query, and render it. Here the
//! engine reports every query as still loading, so the loading gate wins.
//!
//! ```rust
//! use querykit::*;
//! use serde_json::Value;
//!
//! struct PendingEngine;
//!
//! impl QueryEngine for PendingEngine {
//!     fn observe(&self, _spec: QuerySpec) -> QueryResult {
//!         QueryResult::pending()
//!     }
//! }
//!
//! let client: QueryClient<String> = QueryClient::new(PendingEngine)
//!     .set_loading("loading todos...")
//!     .set_extensions(ExtensionSource::live(|| {
//!         // In an app this would read the router's current state.
//!         ExtensionBag::new().with_search_params([("page", "2")])
//!     }));
//!
//! let todos = define_query(QueryOptions::new().set_query_fn(|ctx| async move {
//!     Ok(serde_json::json!({ "fetched": ctx.key.canonical() }))
//! }))
//! .set_extensions(ExtensionSpec::sources([SOURCE_SEARCH_PARAMS]));
//!
//! let variables = Variables::parts([
//!     VariablePart::value("todos"),
//!     VariablePart::deferred(|bag| {
//!         bag.search_param("page").map(Value::from).unwrap_or(Value::Null)
//!     }),
//! ]);
//!
//! // Keys derive from variables plus the ambient extensions, fresh per pass.
//! assert_eq!(todos.key(&client, &variables).canonical(), r#"["todos","2"]"#);
//!
//! // A pending result renders the loading node; errors would surface to
//! // the nearest Catch instead.
//! let catch = Catch::new();
//! let rendered = catch.run(&client, || {
//!     todos.render(
//!         &client,
//!         RenderProps::new()
//!             .set_variables(variables.clone())
//!             .set_render(|data, _| format!("{data:?}")),
//!     )
//! });
//! assert_eq!(rendered, "loading todos...");
//! ```

mod catch;
mod define_query;
mod error;
mod extensions;
mod infinite_query;
mod query_client;
mod query_engine;
mod query_key;
mod query_options;
mod query_render;
mod query_result;
mod router_key;

#[cfg(test)]
mod test_util;

pub use catch::*;
pub use define_query::*;
pub use error::*;
pub use extensions::*;
pub use infinite_query::*;
pub use query_client::*;
pub use query_engine::*;
pub use query_key::*;
pub use query_options::*;
pub use query_render::*;
pub use query_result::*;
pub use router_key::*;

/// Convenience trait for render output requirements.
pub trait RenderNode: Clone + From<String> + 'static {}
impl<N> RenderNode for N where N: Clone + From<String> + 'static {}
