use std::fmt::{self, Debug};
use std::rc::Rc;

use crate::catch::ResetHandle;
use crate::error::QueryError;
use crate::extensions::ExtensionSource;
use crate::query_engine::QueryEngine;

/// Renders an error fallback with a handle for retrying out of it.
pub type ErrorRenderFn<N> = Rc<dyn Fn(&QueryError, ResetHandle) -> N>;

/// Fallback output used when a query error reaches a boundary.
pub enum ErrorFallback<N> {
    /// A fixed node.
    Node(N),
    /// A render function receiving the error and a reset handle.
    Render(ErrorRenderFn<N>),
}

impl<N> ErrorFallback<N> {
    /// A fallback from a fixed node.
    pub fn node(node: impl Into<N>) -> Self {
        ErrorFallback::Node(node.into())
    }

    /// A fallback from a render function.
    pub fn render(render: impl Fn(&QueryError, ResetHandle) -> N + 'static) -> Self {
        ErrorFallback::Render(Rc::new(render))
    }

    pub(crate) fn resolve(&self, error: &QueryError, reset: ResetHandle) -> N
    where
        N: Clone,
    {
        match self {
            ErrorFallback::Node(node) => node.clone(),
            ErrorFallback::Render(render) => render(error, reset),
        }
    }
}

impl<N> Clone for ErrorFallback<N>
where
    N: Clone,
{
    fn clone(&self) -> Self {
        match self {
            ErrorFallback::Node(node) => ErrorFallback::Node(node.clone()),
            ErrorFallback::Render(render) => ErrorFallback::Render(render.clone()),
        }
    }
}

impl<N> Debug for ErrorFallback<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorFallback::Node(_) => f.debug_tuple("Node").field(&"..").finish(),
            ErrorFallback::Render(_) => f.debug_tuple("Render").field(&"..").finish(),
        }
    }
}

pub(crate) const DEFAULT_LOADING_TEXT: &str = "loading...";

/// Shared handle on the query engine plus app-wide render defaults.
///
/// Everything in this crate runs through a client:
/// - [Definitions](crate::define_query) derive keys against the client's
///   ambient [extensions](Self::set_extensions).
/// - [Rendering](crate::QueryDef::render) falls back to the client's
///   [loading](Self::set_loading) and [error](Self::set_error) defaults when
///   an invocation supplies none.
///
/// Cloning is cheap and every clone refers to the same engine.
pub struct QueryClient<N> {
    engine: Rc<dyn QueryEngine>,
    // Render defaults.
    loading: Option<N>,
    error: Option<ErrorFallback<N>>,
    // Ambient context for key derivation.
    extensions: ExtensionSource,
}

impl<N> QueryClient<N> {
    /// A client over the given engine, with built-in render defaults.
    pub fn new(engine: impl QueryEngine + 'static) -> Self {
        Self::from_rc(Rc::new(engine))
    }

    /// A client over an already shared engine.
    pub fn from_rc(engine: Rc<dyn QueryEngine>) -> Self {
        QueryClient {
            engine,
            loading: None,
            error: None,
            extensions: ExtensionSource::default(),
        }
    }

    /// Set the app-wide loading node.
    pub fn set_loading(self, loading: impl Into<N>) -> Self {
        QueryClient {
            loading: Some(loading.into()),
            ..self
        }
    }

    /// Set the app-wide error fallback.
    pub fn set_error(self, error: ErrorFallback<N>) -> Self {
        QueryClient {
            error: Some(error),
            ..self
        }
    }

    /// Set the source of ambient extensions (route params, search params).
    pub fn set_extensions(self, extensions: ExtensionSource) -> Self {
        QueryClient { extensions, ..self }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Rc<dyn QueryEngine> {
        &self.engine
    }

    /// The ambient extension source.
    pub fn extensions(&self) -> &ExtensionSource {
        &self.extensions
    }
}

impl<N> QueryClient<N>
where
    N: crate::RenderNode,
{
    /// The loading node for one render pass. Invocation beats client beats
    /// built-in text.
    pub(crate) fn loading_node(&self, invocation: Option<N>) -> N {
        invocation
            .or_else(|| self.loading.clone())
            .unwrap_or_else(|| N::from(DEFAULT_LOADING_TEXT.to_string()))
    }

    /// The error fallback for one boundary. Same precedence as
    /// [`loading_node`](Self::loading_node).
    pub(crate) fn error_fallback(&self, invocation: Option<&ErrorFallback<N>>) -> ErrorFallback<N> {
        invocation
            .cloned()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| {
                ErrorFallback::render(|error, _| N::from(format!("an error occurred: {error}")))
            })
    }
}

impl<N> Clone for QueryClient<N>
where
    N: Clone,
{
    fn clone(&self) -> Self {
        QueryClient {
            engine: self.engine.clone(),
            loading: self.loading.clone(),
            error: self.error.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

impl<N> Debug for QueryClient<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("loading", &self.loading.as_ref().map(|_| ".."))
            .field("error", &self.error)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catch::Catch;
    use crate::test_util::MockEngine;

    fn client() -> QueryClient<String> {
        QueryClient::new(MockEngine::new())
    }

    #[test]
    fn loading_prefers_invocation_over_client() {
        let client = client().set_loading("app spinner");

        assert_eq!(
            client.loading_node(Some("local spinner".to_string())),
            "local spinner"
        );
        assert_eq!(client.loading_node(None), "app spinner");
    }

    #[test]
    fn loading_falls_back_to_builtin_text() {
        assert_eq!(client().loading_node(None), DEFAULT_LOADING_TEXT);
    }

    #[test]
    fn error_precedence_matches_loading() {
        let client = client().set_error(ErrorFallback::node("app error"));
        let reset = Catch::<String>::new().reset_handle();
        let error = QueryError::new("boom");

        let invocation = ErrorFallback::node("local error".to_string());
        assert_eq!(
            client
                .error_fallback(Some(&invocation))
                .resolve(&error, reset.clone()),
            "local error"
        );
        assert_eq!(client.error_fallback(None).resolve(&error, reset), "app error");
    }

    #[test]
    fn builtin_error_fallback_includes_the_message() {
        let reset = Catch::<String>::new().reset_handle();
        let rendered = client()
            .error_fallback(None)
            .resolve(&QueryError::new("boom"), reset);

        assert_eq!(rendered, "an error occurred: boom");
    }
}
