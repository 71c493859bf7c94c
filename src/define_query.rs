use std::fmt::{self, Debug};
use std::rc::Rc;

use crate::error::QueryError;
use crate::extensions::{resolve_extensions, ExtensionBag, ExtensionSpec};
use crate::infinite_query::PaginationSpec;
use crate::query_client::QueryClient;
use crate::query_engine::QuerySpec;
use crate::query_key::{default_key_fn, KeyFn, QueryKey, Variables};
use crate::query_options::QueryOptions;
use crate::query_render::{render_gate, RenderProps};
use crate::query_result::QueryResult;

/// Define a reusable query from its base options.
///
/// The returned definition owns the defaults; invocations pass variables and
/// per-call overrides. Options are normalized up front, so a definition never
/// carries a stale time past its gc time.
///
/// ```
/// use querykit::{define_query, QueryOptions};
///
/// let todos = define_query(QueryOptions::new().set_query_fn(|ctx| async move {
///     Ok(serde_json::json!({ "fetched": ctx.key.canonical() }))
/// }));
/// # let _ = todos;
/// ```
pub fn define_query(options: QueryOptions) -> QueryDef {
    QueryDef {
        options: options.validate(),
        key_fn: None,
        extensions: ExtensionSpec::default(),
    }
}

/// A reusable query definition.
///
/// Holds the default options, the key-derivation function, and the
/// extension spec naming which ambient sources key derivation may read.
/// Definitions are inert data; nothing runs until an invocation.
#[derive(Clone)]
pub struct QueryDef {
    options: QueryOptions,
    key_fn: Option<KeyFn>,
    extensions: ExtensionSpec,
}

impl QueryDef {
    /// Set a custom key-derivation function.
    pub fn set_key_fn(self, key_fn: impl Fn(&Variables, &ExtensionBag) -> QueryKey + 'static) -> Self {
        self.set_key_fn_rc(Rc::new(key_fn))
    }

    /// Set an already shared key-derivation function.
    pub fn set_key_fn_rc(self, key_fn: KeyFn) -> Self {
        QueryDef {
            key_fn: Some(key_fn),
            ..self
        }
    }

    /// Set which ambient extension sources key derivation reads.
    pub fn set_extensions(self, extensions: ExtensionSpec) -> Self {
        QueryDef { extensions, ..self }
    }

    /// The definition's default options.
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Derive the cache key for `variables` under this definition.
    ///
    /// Extensions resolve fresh on every call; a deferred variable part
    /// reading the current URL sees the URL as of this call. Useful on its
    /// own for engine-side work keyed the same way (invalidation, manual
    /// cache writes).
    pub fn key<N>(&self, client: &QueryClient<N>, variables: &Variables) -> QueryKey {
        self.key_with(client, variables, &self.extensions)
    }

    fn key_with<N>(
        &self,
        client: &QueryClient<N>,
        variables: &Variables,
        extensions: &ExtensionSpec,
    ) -> QueryKey {
        let bag = resolve_extensions(extensions, client.extensions());
        match &self.key_fn {
            Some(key_fn) => key_fn(variables, &bag),
            None => default_key_fn(variables, &bag),
        }
    }

    /// Observe this query without rendering. Returns the engine's current
    /// state for the derived key.
    pub fn use_query<N>(
        &self,
        client: &QueryClient<N>,
        variables: &Variables,
        options: QueryOptions,
    ) -> QueryResult {
        self.observe_with(client, variables, options, None)
    }

    pub(crate) fn observe_with<N>(
        &self,
        client: &QueryClient<N>,
        variables: &Variables,
        options: QueryOptions,
        pagination: Option<PaginationSpec>,
    ) -> QueryResult {
        let key = self.key(client, variables);
        let merged = QueryOptions::merge(&self.options, &options).validate();
        let spec = QuerySpec::from_options(key, &merged).set_pagination(pagination);
        client.engine().observe(spec)
    }

    /// Observe and render this query in one pass.
    ///
    /// Pending results render the loading node (unless the invocation turned
    /// the gate off), surfaced errors return `Err` for the nearest
    /// [`Catch`](crate::Catch), and everything else reaches the render
    /// function.
    pub fn render<N>(
        &self,
        client: &QueryClient<N>,
        props: RenderProps<N>,
    ) -> Result<N, QueryError>
    where
        N: crate::RenderNode,
    {
        self.render_inner(client, props, None)
    }

    pub(crate) fn render_inner<N>(
        &self,
        client: &QueryClient<N>,
        props: RenderProps<N>,
        pagination: Option<PaginationSpec>,
    ) -> Result<N, QueryError>
    where
        N: crate::RenderNode,
    {
        let RenderProps {
            variables,
            extensions,
            options,
            has_loading,
            loading,
            render,
        } = props;

        let variables = variables.canonicalize();
        let extensions = extensions.unwrap_or_else(|| self.extensions.clone());
        let key = self.key_with(client, &variables, &extensions);

        let merged = QueryOptions::merge(&self.options, &options).validate();
        let spec = QuerySpec::from_options(key, &merged).set_pagination(pagination);
        let result = client.engine().observe(spec);

        render_gate(
            client,
            &result,
            merged.effective_surface_errors(),
            has_loading.unwrap_or(true),
            loading,
            render.as_ref(),
        )
    }
}

impl Debug for QueryDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDef")
            .field("options", &self.options)
            .field("key_fn", &self.key_fn.as_ref().map(|_| ".."))
            .field("extensions", &self.extensions)
            .finish()
    }
}
